//! Hand-assembled PNG datastreams and helpers to take outputs apart.
//!
//! The builder compresses with `flate2`, not with the crate's own encoder,
//! so inputs do not depend on the code under test.

#![allow(dead_code)]

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use pixopt::image::{Image, Transparency};
use pixopt::png::chunk::{write_chunk, ChunkType};
use pixopt::png::ColorType;

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// A chunk as it appears in a datastream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub kind: [u8; 4],
    pub data: Vec<u8>,
}

impl RawChunk {
    pub fn is(&self, kind: &[u8; 4]) -> bool {
        &self.kind == kind
    }
}

/// Builds a non-interlaced PNG from unfiltered rows.
#[derive(Debug, Clone)]
pub struct PngBuilder {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: u8,
    rows: Vec<Vec<u8>>,
    palette: Option<Vec<u8>>,
    trns: Option<Vec<u8>>,
    before_idat: Vec<RawChunk>,
    after_idat: Vec<RawChunk>,
    idat_pieces: usize,
    level: u32,
    signature: bool,
    trailing: Vec<u8>,
}

impl PngBuilder {
    pub fn new(width: u32, height: u32, bit_depth: u8, color_type: u8, rows: Vec<Vec<u8>>) -> Self {
        Self {
            width,
            height,
            bit_depth,
            color_type,
            rows,
            palette: None,
            trns: None,
            before_idat: Vec::new(),
            after_idat: Vec::new(),
            idat_pieces: 1,
            level: 0,
            signature: true,
            trailing: Vec::new(),
        }
    }

    pub fn palette(mut self, entries: &[[u8; 3]]) -> Self {
        self.palette = Some(entries.iter().flatten().copied().collect());
        self
    }

    pub fn trns(mut self, data: &[u8]) -> Self {
        self.trns = Some(data.to_vec());
        self
    }

    /// Add an ancillary chunk ahead of the image data.
    pub fn chunk(mut self, kind: &[u8; 4], data: &[u8]) -> Self {
        self.before_idat.push(RawChunk {
            kind: *kind,
            data: data.to_vec(),
        });
        self
    }

    /// Add a chunk between the image data and IEND.
    pub fn chunk_after_idat(mut self, kind: &[u8; 4], data: &[u8]) -> Self {
        self.after_idat.push(RawChunk {
            kind: *kind,
            data: data.to_vec(),
        });
        self
    }

    /// Spread the zlib stream over `pieces` IDAT chunks.
    pub fn split_idat(mut self, pieces: usize) -> Self {
        self.idat_pieces = pieces.max(1);
        self
    }

    /// zlib level used for the image data (default 0, stored).
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn without_signature(mut self) -> Self {
        self.signature = false;
        self
    }

    /// Bytes appended after IEND.
    pub fn trailing(mut self, bytes: &[u8]) -> Self {
        self.trailing = bytes.to_vec();
        self
    }

    pub fn ihdr(&self) -> [u8; 13] {
        let mut ihdr = [0u8; 13];
        ihdr[..4].copy_from_slice(&self.width.to_be_bytes());
        ihdr[4..8].copy_from_slice(&self.height.to_be_bytes());
        ihdr[8] = self.bit_depth;
        ihdr[9] = self.color_type;
        ihdr
    }

    /// The zlib stream carried by the IDAT chunks.
    pub fn zlib_stream(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        for row in &self.rows {
            raw.push(0);
            raw.extend_from_slice(row);
        }
        deflate(&raw, self.level)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.signature {
            out.extend_from_slice(&SIGNATURE);
        }
        write_chunk(&mut out, ChunkType(*b"IHDR"), &self.ihdr());
        for chunk in &self.before_idat {
            write_chunk(&mut out, ChunkType(chunk.kind), &chunk.data);
        }
        if let Some(palette) = &self.palette {
            write_chunk(&mut out, ChunkType(*b"PLTE"), palette);
        }
        if let Some(trns) = &self.trns {
            write_chunk(&mut out, ChunkType(*b"tRNS"), trns);
        }
        let stream = self.zlib_stream();
        let piece = stream.len().div_ceil(self.idat_pieces).max(1);
        for data in stream.chunks(piece) {
            write_chunk(&mut out, ChunkType(*b"IDAT"), data);
        }
        for chunk in &self.after_idat {
            write_chunk(&mut out, ChunkType(chunk.kind), &chunk.data);
        }
        write_chunk(&mut out, ChunkType(*b"IEND"), &[]);
        out.extend_from_slice(&self.trailing);
        out
    }
}

pub fn deflate(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn inflate(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

/// Split a datastream (with or without signature) into chunks.
pub fn chunks(png: &[u8]) -> Vec<RawChunk> {
    let mut pos = if png.starts_with(&SIGNATURE) { 8 } else { 0 };
    let mut out = Vec::new();
    while pos + 12 <= png.len() {
        let len = u32::from_be_bytes(png[pos..pos + 4].try_into().unwrap()) as usize;
        let kind: [u8; 4] = png[pos + 4..pos + 8].try_into().unwrap();
        out.push(RawChunk {
            kind,
            data: png[pos + 8..pos + 8 + len].to_vec(),
        });
        pos += 12 + len;
        if &kind == b"IEND" {
            break;
        }
    }
    out
}

/// Concatenated IDAT payloads.
pub fn idat_stream(png: &[u8]) -> Vec<u8> {
    chunks(png)
        .into_iter()
        .filter(|c| c.is(b"IDAT"))
        .flat_map(|c| c.data)
        .collect()
}

pub fn count(png: &[u8], kind: &[u8; 4]) -> usize {
    chunks(png).iter().filter(|c| c.is(kind)).count()
}

/// Every pixel as 16-bit RGBA, so images in different formats compare.
pub fn rgba16(image: &Image) -> Vec<[u16; 4]> {
    let ihdr = image.header.expect("header");
    let depth = ihdr.bit_depth;
    let channels = ihdr.color_type.channels();
    let max = (1u32 << depth) - 1;
    let scale = |v: u16| (u32::from(v) * 65535 / max) as u16;
    let mut pixels = Vec::new();
    for row in &image.rows {
        for x in 0..ihdr.width as usize {
            let s: Vec<u16> = (0..channels).map(|c| sample(row, x * channels + c, depth)).collect();
            let pixel = match ihdr.color_type {
                ColorType::Gray => {
                    let alpha = match image.transparency {
                        Some(Transparency::Gray(key)) if key == s[0] => 0,
                        _ => 65535,
                    };
                    [scale(s[0]), scale(s[0]), scale(s[0]), alpha]
                }
                ColorType::GrayAlpha => [scale(s[0]), scale(s[0]), scale(s[0]), scale(s[1])],
                ColorType::Rgb => {
                    let alpha = match image.transparency {
                        Some(Transparency::Rgb(key)) if key == [s[0], s[1], s[2]] => 0,
                        _ => 65535,
                    };
                    [scale(s[0]), scale(s[1]), scale(s[2]), alpha]
                }
                ColorType::Rgba => [scale(s[0]), scale(s[1]), scale(s[2]), scale(s[3])],
                ColorType::Palette => {
                    let index = s[0] as usize;
                    let rgb = image.palette.as_ref().expect("palette")[index];
                    let alpha = match &image.transparency {
                        Some(Transparency::Palette(alpha)) => alpha.get(index).copied().unwrap_or(255),
                        _ => 255,
                    };
                    [
                        u16::from(rgb[0]) * 257,
                        u16::from(rgb[1]) * 257,
                        u16::from(rgb[2]) * 257,
                        u16::from(alpha) * 257,
                    ]
                }
            };
            pixels.push(pixel);
        }
    }
    pixels
}

fn sample(row: &[u8], index: usize, depth: u8) -> u16 {
    match depth {
        16 => u16::from_be_bytes([row[2 * index], row[2 * index + 1]]),
        8 => u16::from(row[index]),
        _ => {
            let bit = index * depth as usize;
            let shift = 8 - depth as usize - bit % 8;
            u16::from((row[bit / 8] >> shift) & ((1u8 << depth) - 1))
        }
    }
}
