//! PNG encoder.
//!
//! The encoder never touches a file: it emits signature, chunk headers,
//! payloads and CRCs to a [`WriteHook`], which decides what is persisted.
//! In trial mode only the chunks that affect pixels are emitted.

use std::io::Cursor;
use std::ops::ControlFlow;

use log::trace;

use super::chunk::ChunkType;
use super::filter::RowFilter;
use super::interlace::{extract_pass, ADAM7};
use super::Ihdr;
use crate::compress::deflate::{zlib_stream, DeflateParams, Strategy};
use crate::error::{ensure_invariant, Result};
use crate::image::{ChunkLocation, Image};
use crate::stream::{ChunkPolicy, WriteHook};

/// Payload size of each IDAT piece handed to the hook.
const IDAT_PIECE: usize = 8192;

/// One point of the encoder parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodeParams {
    /// zlib compression level (1-9).
    pub level: u8,
    /// zlib memory level (1-9).
    pub mem_level: u8,
    /// zlib strategy.
    pub strategy: Strategy,
    /// PNG filter selector (0-4 fixed, 5 adaptive).
    pub filter: u8,
    /// Window bits override (8-15), or 0 for automatic.
    pub window_bits: u8,
}

impl EncodeParams {
    /// The deflate parameters for a filtered stream of `input_len` bytes.
    ///
    /// Huffman-only and RLE need no history beyond 256 bytes; otherwise the
    /// window is the override or 32K, shrunk to what the data can use.
    pub fn deflate_params(&self, input_len: usize) -> DeflateParams {
        let window_bits = if self.strategy.is_fast() {
            9
        } else if self.window_bits > 0 {
            self.window_bits
        } else {
            15
        };
        DeflateParams {
            level: self.level,
            mem_level: self.mem_level,
            strategy: self.strategy,
            window_bits,
        }
        .fit_window(input_len)
    }
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            level: 9,
            mem_level: 8,
            strategy: Strategy::Default,
            filter: 0,
            window_bits: 0,
        }
    }
}

/// Encodes one image repeatedly, caching the filtered rows between calls.
pub struct Encoder<'i> {
    image: &'i Image,
    ihdr: Ihdr,
    filtered: Option<(u8, Vec<u8>)>,
}

impl<'i> Encoder<'i> {
    /// An encoder for `image`, which must be fully decoded.
    pub fn new(image: &'i Image) -> Result<Self> {
        let ihdr = *image.ihdr()?;
        ensure_invariant!(
            image.rows.len() == ihdr.height as usize,
            "Image rows are missing"
        );
        Ok(Self {
            image,
            ihdr,
            filtered: None,
        })
    }

    /// Filtered scanlines for `selector`, interlaced if the header says so.
    fn filtered(&mut self, selector: u8) -> &[u8] {
        let stale = !matches!(&self.filtered, Some((s, _)) if *s == selector);
        if stale {
            self.filtered = Some((selector, filter_image(self.image, &self.ihdr, selector)));
        }
        match &self.filtered {
            Some((_, data)) => data,
            None => &[],
        }
    }

    /// Emit the whole datastream to `hook`.
    ///
    /// Returns `Break` if the hook abandoned the trial.
    pub fn encode(&mut self, params: &EncodeParams, hook: &mut WriteHook<'_>) -> Result<ControlFlow<()>> {
        macro_rules! emit {
            ($e:expr) => {
                if $e?.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            };
        }

        let image = self.image;
        let ihdr = self.ihdr;
        let metadata = hook.is_commit();

        emit!(hook.write_signature());
        emit!(hook.write_chunk(ChunkType::IHDR, &ihdr.to_bytes()));
        if metadata {
            if let Some(sbit) = &image.significant_bits {
                emit!(hook.write_chunk(ChunkType::SBIT, &sbit.to_chunk(ihdr.color_type)));
            }
            for chunk in image.unknown_chunks.iter().filter(|c| c.location == ChunkLocation::BeforePlte) {
                emit!(hook.write_chunk(chunk.chunk_type, &chunk.data));
            }
        }
        if let Some(palette) = &image.palette {
            let data: Vec<u8> = palette.iter().flatten().copied().collect();
            emit!(hook.write_chunk(ChunkType::PLTE, &data));
        }
        if let Some(trns) = &image.transparency {
            emit!(hook.write_chunk(ChunkType::TRNS, &trns.to_chunk()));
        }
        if metadata {
            if let Some(bkgd) = &image.background {
                emit!(hook.write_chunk(ChunkType::BKGD, &bkgd.to_chunk()));
            }
            if let Some(hist) = &image.histogram {
                let data: Vec<u8> = hist.iter().flat_map(|v| v.to_be_bytes()).collect();
                emit!(hook.write_chunk(ChunkType::HIST, &data));
            }
            for chunk in image.unknown_chunks.iter().filter(|c| c.location == ChunkLocation::BeforeIdat) {
                emit!(hook.write_chunk(chunk.chunk_type, &chunk.data));
            }
        }

        let filtered = self.filtered(params.filter);
        let deflate = params.deflate_params(filtered.len());
        trace!("encoding {} filtered bytes with {deflate:?}", filtered.len());
        let mut pending: Vec<u8> = Vec::with_capacity(IDAT_PIECE * 2);
        emit!(zlib_stream(filtered, &deflate, |bytes| {
            pending.extend_from_slice(bytes);
            while pending.len() >= IDAT_PIECE {
                let flow = hook.write_chunk(ChunkType::IDAT, &pending[..IDAT_PIECE])?;
                pending.drain(..IDAT_PIECE);
                if flow.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            Ok(ControlFlow::Continue(()))
        }));
        if !pending.is_empty() {
            emit!(hook.write_chunk(ChunkType::IDAT, &pending));
        }

        if metadata {
            for chunk in image.unknown_chunks.iter().filter(|c| c.location == ChunkLocation::AfterIdat) {
                emit!(hook.write_chunk(chunk.chunk_type, &chunk.data));
            }
        }
        emit!(hook.write_chunk(ChunkType::IEND, &[]));
        hook.flush()?;
        Ok(ControlFlow::Continue(()))
    }
}

fn filter_image(image: &Image, ihdr: &Ihdr, selector: u8) -> Vec<u8> {
    let bpp = ihdr.filter_bpp();
    let row_len = ihdr.row_bytes();
    let mut filter = RowFilter::new(selector, bpp, row_len);
    let mut output = Vec::with_capacity((row_len + 1) * image.rows.len());
    if ihdr.is_interlaced() {
        for pass in &ADAM7 {
            filter.reset();
            for row in extract_pass(ihdr, &image.rows, pass) {
                filter.filter_row(&row, &mut output);
            }
        }
    } else {
        for row in &image.rows {
            filter.filter_row(row, &mut output);
        }
    }
    output
}

/// Encode `image` to an in-memory PNG file, metadata included.
pub fn encode_to_vec(image: &Image, params: &EncodeParams, policy: ChunkPolicy) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut hook = WriteHook::commit(&mut cursor, 0, policy);
    let flow = Encoder::new(image)?.encode(params, &mut hook)?;
    ensure_invariant!(flow.is_continue(), "In-memory encode was cut short");
    drop(hook);
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Transparency, UnknownChunk};
    use crate::png::decode::decode_png;
    use crate::png::ColorType;

    fn gradient(width: u32, height: u32, color_type: ColorType) -> Image {
        let mut image = Image::with_header(Ihdr::new(width, height, 8, color_type));
        for (y, row) in image.rows.iter_mut().enumerate() {
            for (x, byte) in row.iter_mut().enumerate() {
                *byte = (x * 3 + y * 5) as u8;
            }
        }
        image
    }

    #[test]
    fn test_encode_decode_roundtrip_all_filters() {
        let image = gradient(17, 9, ColorType::Rgb);
        for filter in 0..=5 {
            let params = EncodeParams {
                filter,
                ..EncodeParams::default()
            };
            let png = encode_to_vec(&image, &params, ChunkPolicy::default()).unwrap();
            let decoded = decode_png(&png, false).unwrap();
            assert_eq!(decoded.image.rows, image.rows, "filter {filter}");
            assert!(decoded.warnings.is_empty());
        }
    }

    #[test]
    fn test_interlaced_roundtrip() {
        let mut image = gradient(13, 11, ColorType::GrayAlpha);
        if let Some(h) = image.header.as_mut() {
            h.interlace_type = 1;
        }
        let png = encode_to_vec(&image, &EncodeParams::default(), ChunkPolicy::default()).unwrap();
        let decoded = decode_png(&png, false).unwrap();
        assert!(decoded.image.ihdr().unwrap().is_interlaced());
        assert_eq!(decoded.image.rows, image.rows);
    }

    #[test]
    fn test_metadata_only_in_commit_mode() {
        let mut image = gradient(4, 4, ColorType::Gray);
        image.transparency = Some(Transparency::Gray(7));
        image.unknown_chunks.push(UnknownChunk {
            chunk_type: ChunkType(*b"tEXt"),
            data: b"Title\0x".to_vec(),
            location: ChunkLocation::AfterIdat,
        });

        let png = encode_to_vec(&image, &EncodeParams::default(), ChunkPolicy::default()).unwrap();
        let decoded = decode_png(&png, false).unwrap();
        assert_eq!(decoded.image.unknown_chunks, image.unknown_chunks);
        assert_eq!(decoded.image.transparency, Some(Transparency::Gray(7)));

        let mut trial = WriteHook::trial(u64::MAX, ChunkPolicy::default());
        let flow = Encoder::new(&image).unwrap().encode(&EncodeParams::default(), &mut trial).unwrap();
        assert!(flow.is_continue());
        assert_eq!(trial.sizes().plte_trns_size, 2 + 12);
        assert_eq!(trial.sizes().file_size, 0);
    }

    #[test]
    fn test_trial_idat_matches_commit_idat() {
        let image = gradient(64, 64, ColorType::Rgba);
        let params = EncodeParams {
            filter: 5,
            ..EncodeParams::default()
        };
        let mut trial = WriteHook::trial(u64::MAX, ChunkPolicy::default());
        Encoder::new(&image).unwrap().encode(&params, &mut trial).unwrap();

        let png = encode_to_vec(&image, &params, ChunkPolicy::default()).unwrap();
        let decoded = decode_png(&png, false).unwrap();
        assert_eq!(decoded.sizes.idat_size, trial.sizes().idat_size);
    }

    #[test]
    fn test_trial_abort() {
        let image = gradient(64, 64, ColorType::Rgb);
        let mut trial = WriteHook::trial(10, ChunkPolicy::default());
        let flow = Encoder::new(&image).unwrap().encode(&EncodeParams::default(), &mut trial).unwrap();
        assert!(flow.is_break());
    }

    #[test]
    fn test_fast_strategies_use_small_window() {
        let params = EncodeParams {
            strategy: Strategy::Rle,
            window_bits: 15,
            ..EncodeParams::default()
        };
        assert_eq!(params.deflate_params(1 << 20).window_bits, 9);
        let params = EncodeParams {
            window_bits: 12,
            ..EncodeParams::default()
        };
        assert_eq!(params.deflate_params(1 << 20).window_bits, 12);
        assert_eq!(EncodeParams::default().deflate_params(100).window_bits, 9);
    }

    #[test]
    fn test_missing_rows_is_internal() {
        let mut image = Image::default();
        image.header = Some(Ihdr::new(2, 2, 8, ColorType::Gray));
        assert!(Encoder::new(&image).err().is_some_and(|e| e.is_internal()));
    }
}
