//! DEFLATE (RFC 1951) and zlib (RFC 1950) encoding with zlib's tuning knobs.
//!
//! The encoder exposes the four axes the optimizer searches over: the
//! compression level, the memory level, the strategy, and the window size.
//! Output is produced one block at a time and handed to a sink, so a caller
//! measuring sizes can stop the encode as soon as it is no longer useful.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use crate::bits::BitWriter64;
use crate::compress::adler32::Adler32;
use crate::compress::huffman;
use crate::compress::lz77::{Lz77Compressor, Token, MAX_MATCH_LENGTH, MIN_MATCH_LENGTH};
use crate::error::Result;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Order in which code-length code lengths are transmitted.
const CL_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Largest payload of a single stored block.
const MAX_STORED: usize = 65_535;

const END_OF_BLOCK: usize = 256;

/// zlib compression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// Normal LZ77 + Huffman.
    #[default]
    Default,
    /// Favor Huffman coding; discard short matches (filtered image data).
    Filtered,
    /// Literals only.
    HuffmanOnly,
    /// Run-length matches only (distance 1).
    Rle,
}

impl Strategy {
    /// All strategies, indexed by their zlib number.
    pub const ALL: [Strategy; 4] = [
        Strategy::Default,
        Strategy::Filtered,
        Strategy::HuffmanOnly,
        Strategy::Rle,
    ];

    /// zlib's numeric code for this strategy (0-3).
    pub fn index(self) -> u8 {
        match self {
            Strategy::Default => 0,
            Strategy::Filtered => 1,
            Strategy::HuffmanOnly => 2,
            Strategy::Rle => 3,
        }
    }

    /// Strategy for a zlib numeric code.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Huffman-only and RLE ignore the level and run in a fixed small window.
    pub fn is_fast(self) -> bool {
        matches!(self, Strategy::HuffmanOnly | Strategy::Rle)
    }
}

/// Encoder parameters for one deflate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeflateParams {
    /// Compression level 1-9.
    pub level: u8,
    /// Memory level 1-9: hash table and block buffer size.
    pub mem_level: u8,
    /// Match strategy.
    pub strategy: Strategy,
    /// Base-2 logarithm of the window size, 9-15 (8 is treated as 9).
    pub window_bits: u8,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self {
            level: 9,
            mem_level: 8,
            strategy: Strategy::Default,
            window_bits: 15,
        }
    }
}

impl DeflateParams {
    /// Tokens buffered per block: `2^(mem_level + 6) - 1`.
    pub fn block_tokens(&self) -> usize {
        (1usize << (self.mem_level.clamp(1, 9) as u32 + 6)) - 1
    }

    /// Shrink the window to the smallest one covering `input_len` bytes.
    ///
    /// Only the zlib header changes for inputs that already fit, so the
    /// compressed size is unaffected while decoders need less memory.
    pub fn fit_window(mut self, input_len: usize) -> Self {
        let needed = input_len + MAX_MATCH_LENGTH + MIN_MATCH_LENGTH + 1;
        let mut bits = 9u8;
        while bits < 15 && (1usize << bits) < needed {
            bits += 1;
        }
        self.window_bits = self.window_bits.clamp(9, 15).min(bits);
        self
    }
}

/// Lookup table for length codes: (length-3) -> (symbol offset, extra_bits).
const LENGTH_LOOKUP: [(u8, u8); 256] = {
    let mut table = [(0u8, 0u8); 256];
    let mut i = 0usize;
    while i < 256 {
        let length = i + 3;
        let mut code_idx = 0usize;
        while code_idx < 28 {
            if length >= LENGTH_BASE[code_idx] as usize
                && length < LENGTH_BASE[code_idx + 1] as usize
            {
                break;
            }
            code_idx += 1;
        }
        table[i] = (code_idx as u8, LENGTH_EXTRA[code_idx]);
        i += 1;
    }
    table
};

/// Distance codes for distances below 512.
const DISTANCE_LOOKUP_SMALL: [u8; 512] = {
    let mut table = [0u8; 512];
    let mut i = 1usize;
    while i < 512 {
        let mut code_idx = 0usize;
        while code_idx < 29 {
            if i >= DISTANCE_BASE[code_idx] as usize && i < DISTANCE_BASE[code_idx + 1] as usize {
                break;
            }
            code_idx += 1;
        }
        table[i] = code_idx as u8;
        i += 1;
    }
    table
};

/// Length symbol (257-285), extra bit count and extra value for a match length.
#[inline]
fn length_code(length: u16) -> (usize, u8, u16) {
    debug_assert!((MIN_MATCH_LENGTH as u16..=MAX_MATCH_LENGTH as u16).contains(&length));
    let (offset, extra_bits) = LENGTH_LOOKUP[(length - 3) as usize];
    (
        257 + offset as usize,
        extra_bits,
        length - LENGTH_BASE[offset as usize],
    )
}

/// Distance symbol (0-29), extra bit count and extra value for a distance.
#[inline]
fn distance_code(distance: u16) -> (usize, u8, u16) {
    debug_assert!(distance >= 1);
    let code_idx = if distance < 512 {
        DISTANCE_LOOKUP_SMALL[distance as usize] as usize
    } else {
        let d = distance as u32 - 1;
        let msb = 31 - d.leading_zeros();
        let second_bit = (d >> (msb - 1)) & 1;
        ((2 * msb + second_bit) as usize).min(29)
    };
    (
        code_idx,
        DISTANCE_EXTRA[code_idx],
        distance - DISTANCE_BASE[code_idx],
    )
}

/// Lookup table for reversing the bits in a byte.
const REVERSE_BYTE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut b = i as u8;
        let mut r = 0u8;
        let mut j = 0;
        while j < 8 {
            r = (r << 1) | (b & 1);
            b >>= 1;
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
};

/// Huffman codes are sent MSB-first into an LSB-first bit stream.
#[inline]
fn reverse_bits(code: u16, length: u8) -> u32 {
    if length == 0 {
        return 0;
    }
    let low = REVERSE_BYTE[code as u8 as usize] as u16;
    let high = REVERSE_BYTE[(code >> 8) as u8 as usize] as u16;
    (((low << 8) | high) >> (16 - length)) as u32
}

fn reversed_codes(lengths: &[u8]) -> Vec<(u32, u8)> {
    huffman::generate_canonical_codes(lengths)
        .iter()
        .map(|c| (reverse_bits(c.code, c.length), c.length))
        .collect()
}

static FIXED_LIT_REV: LazyLock<Vec<(u32, u8)>> =
    LazyLock::new(|| reversed_codes(&huffman::fixed_literal_lengths()));

static FIXED_DIST_REV: LazyLock<Vec<(u32, u8)>> = LazyLock::new(|| reversed_codes(&[5u8; 32]));

/// Symbol statistics of one block.
struct BlockStats {
    lit_freqs: [u32; 286],
    dist_freqs: [u32; 30],
    /// Extra bits carried by lengths and distances, identical for every code.
    extra_bits: u64,
}

impl BlockStats {
    fn gather(tokens: &[Token]) -> Self {
        let mut stats = Self {
            lit_freqs: [0; 286],
            dist_freqs: [0; 30],
            extra_bits: 0,
        };
        for token in tokens {
            match *token {
                Token::Literal(b) => stats.lit_freqs[b as usize] += 1,
                Token::Match { length, distance } => {
                    let (len_sym, len_extra, _) = length_code(length);
                    let (dist_sym, dist_extra, _) = distance_code(distance);
                    stats.lit_freqs[len_sym] += 1;
                    stats.dist_freqs[dist_sym] += 1;
                    stats.extra_bits += (len_extra + dist_extra) as u64;
                }
            }
        }
        stats.lit_freqs[END_OF_BLOCK] += 1;
        stats
    }

    fn fixed_cost(&self) -> u64 {
        let lit_lengths = huffman::fixed_literal_lengths();
        let symbols: u64 = self
            .lit_freqs
            .iter()
            .zip(lit_lengths.iter())
            .map(|(&f, &l)| f as u64 * l as u64)
            .sum();
        let distances: u64 = self.dist_freqs.iter().map(|&f| f as u64 * 5).sum();
        3 + symbols + distances + self.extra_bits
    }
}

/// Header and code tables of a dynamic-Huffman block.
struct DynamicTables {
    lit_lengths: Vec<u8>,
    dist_lengths: Vec<u8>,
    cl_lengths: Vec<u8>,
    /// (symbol, extra value, extra bit count)
    rle: Vec<(u8, u8, u8)>,
    hclen: usize,
    cost: u64,
}

impl DynamicTables {
    fn build(stats: &BlockStats) -> Self {
        let mut lit_freqs = stats.lit_freqs;
        let mut dist_freqs = stats.dist_freqs;
        huffman::ensure_two_symbols(&mut lit_freqs);
        huffman::ensure_two_symbols(&mut dist_freqs);

        let mut lit_lengths = huffman::build_lengths(&lit_freqs, huffman::MAX_CODE_LENGTH);
        let mut dist_lengths = huffman::build_lengths(&dist_freqs, huffman::MAX_CODE_LENGTH);
        lit_lengths.truncate(last_nonzero(&lit_lengths).max(257));
        dist_lengths.truncate(last_nonzero(&dist_lengths).max(1));

        let mut cl_freqs = [0u32; 19];
        let rle = rle_code_lengths(&lit_lengths, &dist_lengths, &mut cl_freqs);
        let mut padded_cl = cl_freqs;
        huffman::ensure_two_symbols(&mut padded_cl);
        let cl_lengths = huffman::build_lengths(&padded_cl, huffman::MAX_CL_CODE_LENGTH);

        let hclen = CL_ORDER
            .iter()
            .rposition(|&sym| cl_lengths[sym] > 0)
            .map_or(4, |i| (i + 1).max(4));

        let header_bits = 3
            + 5
            + 5
            + 4
            + 3 * hclen as u64
            + rle
                .iter()
                .map(|&(sym, _, extra)| cl_lengths[sym as usize] as u64 + extra as u64)
                .sum::<u64>();
        let symbol_bits: u64 = stats
            .lit_freqs
            .iter()
            .zip(lit_lengths.iter())
            .map(|(&f, &l)| f as u64 * l as u64)
            .sum::<u64>()
            + stats
                .dist_freqs
                .iter()
                .zip(dist_lengths.iter())
                .map(|(&f, &l)| f as u64 * l as u64)
                .sum::<u64>();

        Self {
            lit_lengths,
            dist_lengths,
            cl_lengths,
            rle,
            hclen,
            cost: header_bits + symbol_bits + stats.extra_bits,
        }
    }

    fn write_header(&self, writer: &mut BitWriter64) {
        writer.write_bits((self.lit_lengths.len() - 257) as u32, 5);
        writer.write_bits((self.dist_lengths.len() - 1) as u32, 5);
        writer.write_bits((self.hclen - 4) as u32, 4);
        for &sym in CL_ORDER.iter().take(self.hclen) {
            writer.write_bits(self.cl_lengths[sym] as u32, 3);
        }
        let cl_rev = reversed_codes(&self.cl_lengths);
        for &(sym, extra_value, extra_bits) in &self.rle {
            let (code, len) = cl_rev[sym as usize];
            writer.write_bits(code, len);
            writer.write_bits(extra_value as u32, extra_bits);
        }
    }
}

fn last_nonzero(lengths: &[u8]) -> usize {
    lengths.iter().rposition(|&l| l != 0).map_or(0, |i| i + 1)
}

/// Run-length encode literal/distance code lengths and count the
/// code-length symbols used.
fn rle_code_lengths(
    lit_lengths: &[u8],
    dist_lengths: &[u8],
    cl_freqs: &mut [u32; 19],
) -> Vec<(u8, u8, u8)> {
    let seq: Vec<u8> = lit_lengths.iter().chain(dist_lengths).copied().collect();

    let mut encoded = Vec::new();
    let mut i = 0;
    while i < seq.len() {
        let curr = seq[i];
        let mut run = 1;
        while i + run < seq.len() && seq[i + run] == curr {
            run += 1;
        }

        if curr == 0 {
            let mut rem = run;
            while rem > 0 {
                if rem >= 11 {
                    let take = rem.min(138);
                    encoded.push((18, (take - 11) as u8, 7));
                    cl_freqs[18] += 1;
                    rem -= take;
                } else if rem >= 3 {
                    let take = rem.min(10);
                    encoded.push((17, (take - 3) as u8, 3));
                    cl_freqs[17] += 1;
                    rem -= take;
                } else {
                    encoded.push((0, 0, 0));
                    cl_freqs[0] += 1;
                    rem -= 1;
                }
            }
        } else {
            encoded.push((curr, 0, 0));
            cl_freqs[curr as usize] += 1;
            let mut rem = run - 1;
            while rem >= 3 {
                let take = rem.min(6);
                encoded.push((16, (take - 3) as u8, 2));
                cl_freqs[16] += 1;
                rem -= take;
            }
            while rem > 0 {
                encoded.push((curr, 0, 0));
                cl_freqs[curr as usize] += 1;
                rem -= 1;
            }
        }

        i += run;
    }

    encoded
}

/// Bits needed to store `len` raw bytes, assuming worst-case alignment.
fn stored_cost(len: usize) -> u64 {
    let blocks = len.div_ceil(MAX_STORED).max(1) as u64;
    blocks * (3 + 7 + 32) + 8 * len as u64
}

fn write_tokens(writer: &mut BitWriter64, tokens: &[Token], lit: &[(u32, u8)], dist: &[(u32, u8)]) {
    for token in tokens {
        match *token {
            Token::Literal(byte) => {
                let (code, len) = lit[byte as usize];
                writer.write_bits(code, len);
            }
            Token::Match { length, distance } => {
                let (len_sym, len_extra_bits, len_extra) = length_code(length);
                let (code, len) = lit[len_sym];
                writer.write_bits(code, len);
                writer.write_bits(len_extra as u32, len_extra_bits);

                let (dist_sym, dist_extra_bits, dist_extra) = distance_code(distance);
                let (code, len) = dist[dist_sym];
                writer.write_bits(code, len);
                writer.write_bits(dist_extra as u32, dist_extra_bits);
            }
        }
    }
    let (code, len) = lit[END_OF_BLOCK];
    writer.write_bits(code, len);
}

/// Emit one block as stored, fixed or dynamic, whichever is smallest.
fn write_block(writer: &mut BitWriter64, tokens: &[Token], raw: &[u8], is_final: bool) {
    let stats = BlockStats::gather(tokens);
    let dynamic = DynamicTables::build(&stats);
    let fixed_cost = stats.fixed_cost();
    let final_bit = u32::from(is_final);

    if stored_cost(raw.len()) < fixed_cost.min(dynamic.cost) {
        let mut pieces = raw.chunks(MAX_STORED).peekable();
        if pieces.peek().is_none() {
            write_stored(writer, &[], final_bit);
        }
        while let Some(piece) = pieces.next() {
            let last = pieces.peek().is_none();
            write_stored(writer, piece, final_bit & u32::from(last));
        }
    } else if fixed_cost <= dynamic.cost {
        writer.write_bits(final_bit, 1);
        writer.write_bits(1, 2);
        write_tokens(writer, tokens, &FIXED_LIT_REV, &FIXED_DIST_REV);
    } else {
        writer.write_bits(final_bit, 1);
        writer.write_bits(2, 2);
        dynamic.write_header(writer);
        let lit = reversed_codes(&dynamic.lit_lengths);
        let dist = reversed_codes(&dynamic.dist_lengths);
        write_tokens(writer, tokens, &lit, &dist);
    }
}

fn write_stored(writer: &mut BitWriter64, piece: &[u8], final_bit: u32) {
    writer.write_bits(final_bit, 1);
    writer.write_bits(0, 2);
    writer.align();
    let len = piece.len() as u16;
    writer.write_bytes(&len.to_le_bytes());
    writer.write_bytes(&(!len).to_le_bytes());
    writer.write_bytes(piece);
}

/// Two-byte zlib header for the given parameters.
pub fn zlib_header(params: &DeflateParams) -> [u8; 2] {
    let cinfo = params.window_bits.clamp(9, 15) - 8;
    let cmf = (cinfo << 4) | 8;
    let flevel: u8 = if params.strategy.is_fast() || params.level < 2 {
        0
    } else if params.level < 6 {
        1
    } else if params.level == 6 {
        2
    } else {
        3
    };
    let mut flg = flevel << 6;
    let fcheck = (31 - (((cmf as u16) << 8 | flg as u16) % 31)) % 31;
    flg |= fcheck as u8;
    [cmf, flg]
}

/// Compress `data` as a zlib stream, handing completed output to `sink`.
///
/// The sink sees the zlib header, then the bytes of each finished block,
/// then the Adler-32 trailer. Returning `ControlFlow::Break` from the sink
/// stops encoding immediately; the function then returns `Break` as well.
pub fn zlib_stream<F>(data: &[u8], params: &DeflateParams, mut sink: F) -> Result<ControlFlow<()>>
where
    F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
{
    let mut writer = BitWriter64::with_capacity(64 * 1024);
    writer.write_bytes(&zlib_header(params));

    let mut lz = Lz77Compressor::new(params);
    let limit = params.block_tokens();
    let mut tokens = Vec::with_capacity(limit);
    loop {
        let range = lz.next_block(data, &mut tokens, limit);
        let is_final = range.end == data.len();
        write_block(&mut writer, &tokens, &data[range], is_final);
        if is_final {
            break;
        }
        if sink(writer.pending())?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        writer.discard_pending();
    }

    let mut adler = Adler32::new();
    adler.update(data);
    writer.align();
    writer.write_bytes(&adler.value().to_be_bytes());
    sink(writer.pending())
}

/// Compress `data` as a complete zlib stream.
pub fn zlib_compress(data: &[u8], params: &DeflateParams) -> Vec<u8> {
    let mut out = Vec::new();
    let flow = zlib_stream(data, params, |bytes| {
        out.extend_from_slice(bytes);
        Ok(ControlFlow::Continue(()))
    });
    debug_assert!(matches!(flow, Ok(ControlFlow::Continue(()))));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .expect("valid zlib stream");
        out
    }

    fn scanline_like(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| match i % 97 {
                0 => 1,
                n if n < 40 => (i / 97 % 5) as u8,
                n => (n * 3 % 17) as u8,
            })
            .collect()
    }

    #[test]
    fn test_length_code_boundaries() {
        assert_eq!(length_code(3), (257, 0, 0));
        assert_eq!(length_code(10), (264, 0, 0));
        assert_eq!(length_code(11), (265, 1, 0));
        assert_eq!(length_code(258), (285, 0, 0));
    }

    #[test]
    fn test_distance_code_boundaries() {
        assert_eq!(distance_code(1), (0, 0, 0));
        assert_eq!(distance_code(5), (4, 1, 0));
        assert_eq!(distance_code(513), (18, 8, 0));
        assert_eq!(distance_code(32768), (29, 13, 8191));
    }

    #[test]
    fn test_zlib_header_checksum() {
        for level in 1..=9 {
            for window_bits in 9..=15 {
                let params = DeflateParams {
                    level,
                    window_bits,
                    ..DeflateParams::default()
                };
                let [cmf, flg] = zlib_header(&params);
                assert_eq!(((cmf as u16) << 8 | flg as u16) % 31, 0);
                assert_eq!(cmf >> 4, window_bits - 8);
            }
        }
    }

    #[test]
    fn test_empty_input_round_trips() {
        let out = zlib_compress(&[], &DeflateParams::default());
        assert!(inflate(&out).is_empty());
    }

    #[test]
    fn test_every_tuple_round_trips() {
        let data = scanline_like(20_000);
        for strategy in Strategy::ALL {
            for level in [1, 3, 4, 6, 9] {
                for mem_level in [1, 8, 9] {
                    let params = DeflateParams {
                        level,
                        mem_level,
                        strategy,
                        window_bits: 15,
                    };
                    let out = zlib_compress(&data, &params);
                    assert_eq!(inflate(&out), data, "{params:?}");
                }
            }
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_incompressible_data_falls_back_to_stored() {
        let data = noise(5000);
        let out = zlib_compress(&data, &DeflateParams::default());
        assert_eq!(inflate(&out), data);
        assert!(out.len() <= data.len() + 2 + 4 + 5 * 2 + 1);
    }

    #[test]
    fn test_small_mem_level_splits_blocks() {
        let data = noise(50_000);
        let params = DeflateParams {
            mem_level: 1,
            ..DeflateParams::default()
        };
        let mut pieces = 0;
        let flow = zlib_stream(&data, &params, |_| {
            pieces += 1;
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        assert!(flow.is_continue());
        assert!(pieces > 10);
    }

    #[test]
    fn test_sink_break_stops_encoding() {
        let data = noise(50_000);
        let params = DeflateParams {
            mem_level: 1,
            ..DeflateParams::default()
        };
        let mut calls = 0;
        let flow = zlib_stream(&data, &params, |_| {
            calls += 1;
            Ok(ControlFlow::Break(()))
        })
        .unwrap();
        assert!(flow.is_break());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fit_window_shrinks_for_small_inputs() {
        let params = DeflateParams::default().fit_window(100);
        assert_eq!(params.window_bits, 9);
        let params = DeflateParams::default().fit_window(1 << 20);
        assert_eq!(params.window_bits, 15);
        let out = zlib_compress(&scanline_like(100), &params);
        assert_eq!(inflate(&out), scanline_like(100));
    }

    #[test]
    fn test_higher_level_is_not_worse_on_repetitive_data() {
        let data = scanline_like(40_000);
        let fast = zlib_compress(&data, &DeflateParams { level: 1, ..DeflateParams::default() });
        let best = zlib_compress(&data, &DeflateParams::default());
        assert!(best.len() <= fast.len());
    }
}
