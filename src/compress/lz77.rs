//! LZ77 match finding with zlib-compatible tuning knobs.
//!
//! The parser is driven block by block: [`Lz77Compressor::next_block`]
//! fills a token buffer up to the block limit and keeps its position and
//! lazy-match state for the next call. This lets the deflate encoder emit
//! and measure output before the whole input has been parsed.
//!
//! Two parsing modes follow zlib's levels:
//! - **Greedy** (levels 1-3): take the longest match at each position.
//! - **Lazy** (levels 4-9): defer a match by one byte when the next
//!   position has a longer one.

use super::deflate::{DeflateParams, Strategy};

/// Minimum match length (RFC 1951).
pub const MIN_MATCH_LENGTH: usize = 3;

/// Maximum match length (RFC 1951).
pub const MAX_MATCH_LENGTH: usize = 258;

/// Bytes reserved at the end of the window, as zlib does.
const MIN_LOOKAHEAD: usize = MAX_MATCH_LENGTH + MIN_MATCH_LENGTH + 1;

/// Length-3 matches further away than this are not worth coding.
const TOO_FAR: usize = 4096;

/// Filtered data only benefits from matches longer than this.
const FILTERED_MAX_DROP: usize = 5;

const NIL: u32 = u32::MAX;

/// LZ77 token representing either a literal or a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A literal byte.
    Literal(u8),
    /// A back-reference: (length, distance).
    Match {
        /// Length of the match (3-258).
        length: u16,
        /// Distance back to the match (1-32768).
        distance: u16,
    },
}

/// Per-level search limits (zlib's configuration table).
#[derive(Debug, Clone, Copy)]
struct LevelConfig {
    /// Reduce chain search above this previous match length.
    good_length: usize,
    /// Lazy: do not look for a better match above this length.
    /// Greedy: insert hashes inside matches only up to this length.
    max_lazy: usize,
    /// Stop searching once a match this long is found.
    nice_length: usize,
    max_chain: usize,
    lazy: bool,
}

const fn config(good: usize, lazy: usize, nice: usize, chain: usize, is_lazy: bool) -> LevelConfig {
    LevelConfig {
        good_length: good,
        max_lazy: lazy,
        nice_length: nice,
        max_chain: chain,
        lazy: is_lazy,
    }
}

const LEVEL_CONFIGS: [LevelConfig; 10] = [
    config(0, 0, 0, 0, false),
    config(4, 4, 8, 4, false),
    config(4, 5, 16, 8, false),
    config(4, 6, 32, 32, false),
    config(4, 4, 16, 16, true),
    config(8, 16, 32, 32, true),
    config(8, 16, 128, 128, true),
    config(8, 32, 128, 256, true),
    config(32, 128, 258, 1024, true),
    config(32, 258, 258, 4096, true),
];

/// LZ77 compressor with hash chains sized by the memory level.
#[derive(Debug)]
pub struct Lz77Compressor {
    head: Vec<u32>,
    prev: Vec<u32>,
    hash_shift: u32,
    window_mask: usize,
    max_distance: usize,
    config: LevelConfig,
    strategy: Strategy,

    // Parser state carried across blocks.
    pos: usize,
    match_available: bool,
    prev_length: usize,
    prev_distance: usize,
}

impl Lz77Compressor {
    /// Create a parser for the given encoder parameters.
    ///
    /// `mem_level` selects `2^(mem_level + 7)` hash heads and `window_bits`
    /// bounds the match distance to `2^window_bits - 262`.
    pub fn new(params: &DeflateParams) -> Self {
        let hash_bits = params.mem_level.clamp(1, 9) as u32 + 7;
        let window_bits = params.window_bits.clamp(9, 15) as u32;
        let window_size = 1usize << window_bits;
        Self {
            head: vec![NIL; 1 << hash_bits],
            prev: vec![NIL; window_size],
            hash_shift: 32 - hash_bits,
            window_mask: window_size - 1,
            max_distance: window_size - MIN_LOOKAHEAD,
            config: LEVEL_CONFIGS[params.level.clamp(1, 9) as usize],
            strategy: params.strategy,
            pos: 0,
            match_available: false,
            prev_length: MIN_MATCH_LENGTH - 1,
            prev_distance: 0,
        }
    }

    /// Largest distance this parser will ever emit.
    pub fn max_distance(&self) -> usize {
        self.max_distance
    }

    /// Position of the next unparsed byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Parse `data` from the current position, appending at most `limit`
    /// tokens. Returns the input range covered by the new tokens.
    pub fn next_block(
        &mut self,
        data: &[u8],
        tokens: &mut Vec<Token>,
        limit: usize,
    ) -> std::ops::Range<usize> {
        // A deferred literal belongs to the previous byte.
        let start = self.pos - usize::from(self.match_available);
        tokens.clear();
        match self.strategy {
            Strategy::HuffmanOnly => self.parse_literals(data, tokens, limit),
            Strategy::Rle => self.parse_rle(data, tokens, limit),
            Strategy::Default | Strategy::Filtered => {
                if self.config.lazy {
                    self.parse_lazy(data, tokens, limit);
                } else {
                    self.parse_greedy(data, tokens, limit);
                }
            }
        }
        let end = self.pos - usize::from(self.match_available);
        start..end
    }

    fn parse_literals(&mut self, data: &[u8], tokens: &mut Vec<Token>, limit: usize) {
        while self.pos < data.len() && tokens.len() < limit {
            tokens.push(Token::Literal(data[self.pos]));
            self.pos += 1;
        }
    }

    fn parse_rle(&mut self, data: &[u8], tokens: &mut Vec<Token>, limit: usize) {
        while self.pos < data.len() && tokens.len() < limit {
            let pos = self.pos;
            let mut run = 0;
            if pos > 0 {
                let byte = data[pos - 1];
                let max = (data.len() - pos).min(MAX_MATCH_LENGTH);
                while run < max && data[pos + run] == byte {
                    run += 1;
                }
            }
            if run >= MIN_MATCH_LENGTH {
                tokens.push(Token::Match {
                    length: run as u16,
                    distance: 1,
                });
                self.pos += run;
            } else {
                tokens.push(Token::Literal(data[pos]));
                self.pos += 1;
            }
        }
    }

    fn parse_greedy(&mut self, data: &[u8], tokens: &mut Vec<Token>, limit: usize) {
        while self.pos < data.len() && tokens.len() < limit {
            let pos = self.pos;
            let head = self.insert(data, pos);
            let (length, distance) = self.accept(self.longest_match(data, pos, head, 0));

            if length >= MIN_MATCH_LENGTH {
                tokens.push(Token::Match {
                    length: length as u16,
                    distance: distance as u16,
                });
                if length <= self.config.max_lazy {
                    for p in pos + 1..pos + length {
                        self.insert(data, p);
                    }
                }
                self.pos += length;
            } else {
                tokens.push(Token::Literal(data[pos]));
                self.pos += 1;
            }
        }
    }

    fn parse_lazy(&mut self, data: &[u8], tokens: &mut Vec<Token>, limit: usize) {
        loop {
            if self.pos >= data.len() {
                if self.match_available {
                    if tokens.len() >= limit {
                        return;
                    }
                    tokens.push(Token::Literal(data[self.pos - 1]));
                    self.match_available = false;
                }
                return;
            }
            if tokens.len() >= limit {
                return;
            }

            let pos = self.pos;
            let head = self.insert(data, pos);
            let mut current = (MIN_MATCH_LENGTH - 1, 0);
            if self.prev_length < self.config.max_lazy {
                current = self.accept(self.longest_match(data, pos, head, self.prev_length));
            }

            if self.prev_length >= MIN_MATCH_LENGTH && current.0 <= self.prev_length {
                // The deferred match at pos - 1 wins.
                tokens.push(Token::Match {
                    length: self.prev_length as u16,
                    distance: self.prev_distance as u16,
                });
                let match_end = pos - 1 + self.prev_length;
                for p in pos + 1..match_end {
                    self.insert(data, p);
                }
                self.pos = match_end;
                self.match_available = false;
                self.prev_length = MIN_MATCH_LENGTH - 1;
            } else {
                if self.match_available {
                    tokens.push(Token::Literal(data[pos - 1]));
                }
                self.match_available = true;
                self.prev_length = current.0;
                self.prev_distance = current.1;
                self.pos += 1;
            }
        }
    }

    /// Apply the strategy's match filters.
    fn accept(&self, (length, distance): (usize, usize)) -> (usize, usize) {
        let too_short = length <= FILTERED_MAX_DROP
            && (self.strategy == Strategy::Filtered
                || (length == MIN_MATCH_LENGTH && distance > TOO_FAR));
        if length < MIN_MATCH_LENGTH || too_short {
            (MIN_MATCH_LENGTH - 1, 0)
        } else {
            (length, distance)
        }
    }

    #[inline]
    fn hash(&self, data: &[u8], pos: usize) -> usize {
        let val = (data[pos] as u32) << 16 | (data[pos + 1] as u32) << 8 | data[pos + 2] as u32;
        (val.wrapping_mul(0x9E37_79B1) >> self.hash_shift) as usize
    }

    /// Insert `pos` into the hash chains and return the previous head.
    #[inline]
    fn insert(&mut self, data: &[u8], pos: usize) -> u32 {
        if pos + MIN_MATCH_LENGTH > data.len() {
            return NIL;
        }
        let h = self.hash(data, pos);
        let old = self.head[h];
        self.prev[pos & self.window_mask] = old;
        self.head[h] = pos as u32;
        old
    }

    fn longest_match(&self, data: &[u8], pos: usize, head: u32, prev_length: usize) -> (usize, usize) {
        let lookahead = data.len() - pos;
        if head == NIL || lookahead < MIN_MATCH_LENGTH {
            return (0, 0);
        }
        let max_len = lookahead.min(MAX_MATCH_LENGTH);
        let nice = self.config.nice_length.min(max_len);
        let mut chain = self.config.max_chain;
        if prev_length >= self.config.good_length {
            chain >>= 2;
        }

        let mut best = (prev_length.max(MIN_MATCH_LENGTH - 1), 0);
        let mut cand = head;
        while cand != NIL && chain > 0 {
            let cand_pos = cand as usize;
            if cand_pos >= pos {
                break;
            }
            let distance = pos - cand_pos;
            if distance > self.max_distance {
                break;
            }
            if data[cand_pos + best.0.min(max_len - 1)] == data[pos + best.0.min(max_len - 1)] {
                let length = match_length(data, cand_pos, pos, max_len);
                if length > best.0 {
                    best = (length, distance);
                    if length >= nice {
                        break;
                    }
                }
            }
            let next = self.prev[cand_pos & self.window_mask];
            if next != NIL && next as usize >= cand_pos {
                break;
            }
            cand = next;
            chain -= 1;
        }

        if best.1 == 0 {
            (0, 0)
        } else {
            best
        }
    }
}

/// Length of the common prefix of `data[a..]` and `data[b..]`, up to `max_len`.
#[inline]
fn match_length(data: &[u8], a: usize, b: usize, max_len: usize) -> usize {
    let mut length = 0;
    while length + 8 <= max_len {
        let x = u64::from_le_bytes(read8(data, a + length));
        let y = u64::from_le_bytes(read8(data, b + length));
        if x != y {
            return length + ((x ^ y).trailing_zeros() / 8) as usize;
        }
        length += 8;
    }
    while length < max_len && data[a + length] == data[b + length] {
        length += 1;
    }
    length
}

#[inline]
fn read8(data: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[at..at + 8]);
    out
}
