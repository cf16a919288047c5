//! Portable anymap import (PBM, PGM, PPM; plain and raw).
//!
//! Bitmaps become 1-bit grayscale. Other maps become 8-bit samples when
//! maxval fits in a byte and 16-bit samples otherwise, rescaled when maxval
//! is not the full range of the target depth.

use log::debug;

use crate::error::{Error, Result};
use crate::image::{Image, SignificantBits};
use crate::png::decode::{Decoded, InputFormat};
use crate::png::{ColorType, Ihdr};
use crate::status::RunStatus;
use crate::stream::{InputSizes, ReadHook};

/// Variant named by the magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bitmap,
    Graymap,
    Pixmap,
}

impl Kind {
    fn channels(self) -> usize {
        match self {
            Kind::Pixmap => 3,
            _ => 1,
        }
    }
}

/// Check the magic number: `P1`..`P6` followed by whitespace or a comment.
pub fn is_pnm(data: &[u8]) -> bool {
    data.len() >= 4
        && data[0] == b'P'
        && (b'1'..=b'6').contains(&data[1])
        && matches!(data[2], b' ' | b'\t' | b'\n' | b'\r' | b'#')
}

/// Cursor over the header and plain-format samples.
struct Tokens<'d> {
    data: &'d [u8],
    pos: usize,
}

impl<'d> Tokens<'d> {
    fn skip_space(&mut self) {
        while let Some(&byte) = self.data.get(self.pos) {
            if byte == b'#' {
                while self.data.get(self.pos).is_some_and(|&b| b != b'\n' && b != b'\r') {
                    self.pos += 1;
                }
            } else if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Next decimal number, or `None` at end of data or on a non-digit.
    fn number(&mut self) -> Option<u32> {
        self.skip_space();
        let start = self.pos;
        while self.data.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// A single plain-bitmap digit; PBM allows them unseparated.
    fn bit(&mut self) -> Option<u32> {
        self.skip_space();
        let byte = *self.data.get(self.pos)?;
        match byte {
            b'0' | b'1' => {
                self.pos += 1;
                Some(u32::from(byte - b'0'))
            }
            _ => None,
        }
    }

    fn header_field(&mut self, what: &str) -> Result<u32> {
        self.number()
            .ok_or_else(|| Error::malformed(format!("Invalid PNM {what}")))
    }

    fn at_end(&mut self, raw: bool) -> bool {
        if !raw {
            self.skip_space();
        }
        self.pos >= self.data.len()
    }
}

/// Decode a PNM image.
pub fn decode_pnm(data: &[u8]) -> Result<Decoded> {
    if !is_pnm(data) {
        return Err(Error::UnrecognizedFormat);
    }
    let raw = data[1] >= b'4';
    let kind = match data[1] {
        b'1' | b'4' => Kind::Bitmap,
        b'2' | b'5' => Kind::Graymap,
        _ => Kind::Pixmap,
    };
    let mut tokens = Tokens { data, pos: 2 };
    let width = tokens.header_field("width")?;
    let height = tokens.header_field("height")?;
    let maxval = if kind == Kind::Bitmap {
        1
    } else {
        tokens.header_field("maxval")?
    };
    if width == 0 || height == 0 || maxval == 0 {
        return Err(Error::malformed("Invalid PNM image dimensions"));
    }
    if maxval > 65535 {
        return Err(Error::malformed("Can't handle PNM samples larger than 16 bits"));
    }
    if raw {
        // Exactly one whitespace byte separates the header from the samples.
        tokens.pos += 1;
    }

    let color_type = if kind == Kind::Pixmap {
        ColorType::Rgb
    } else {
        ColorType::Gray
    };
    let bit_depth = match (kind, maxval) {
        (Kind::Bitmap, _) => 1,
        (_, 1..=255) => 8,
        _ => 16,
    };
    let ihdr = Ihdr::new(width, height, bit_depth, color_type);
    ihdr.validate()?;

    let mut hook = ReadHook::new(false);
    let mut image = Image::with_header(ihdr);
    if kind != Kind::Bitmap {
        significant_bits(maxval, kind, &mut image, &mut hook);
    }

    let samples_per_row = width as usize * kind.channels();
    let mut overflow = false;
    let mut failed = false;
    for row in image.rows.iter_mut() {
        let complete = match (kind, raw) {
            (Kind::Bitmap, true) => read_raw_bits(&mut tokens, row, width as usize),
            (Kind::Bitmap, false) => read_plain_bits(&mut tokens, row, width as usize),
            (_, true) => read_raw_samples(&mut tokens, row, samples_per_row, maxval, &mut overflow),
            (_, false) => read_plain_samples(&mut tokens, row, samples_per_row, maxval, &mut overflow),
        };
        if !complete {
            failed = true;
            break;
        }
    }
    if overflow {
        hook.warn("Overflow in PNM samples");
    }
    if failed {
        return Err(Error::malformed("Error in PNM image file"));
    }
    if !tokens.at_end(raw) {
        tokens.skip_space();
        if is_pnm(&data[tokens.pos..]) {
            // Only the first image of a multi-image stream is read.
            hook.flag(RunStatus::HAS_MULTIPLE_IMAGES);
        } else {
            hook.warn("Extraneous data found after PNM image");
        }
    }

    debug!("imported {width}x{height} PNM, maxval {maxval}");
    let (status, _, warnings) = hook.finish();
    Ok(Decoded {
        image,
        status,
        sizes: InputSizes {
            file_size: data.len() as u64,
            ..InputSizes::default()
        },
        format: InputFormat::Pnm,
        warnings,
    })
}

/// Record sBIT for a `2^n - 1` maxval narrower than the target depth, and
/// warn when maxval is not of that form.
fn significant_bits(maxval: u32, kind: Kind, image: &mut Image, hook: &mut ReadHook) {
    let bits = 32 - maxval.leading_zeros();
    if (1u32 << bits) - 1 != maxval {
        hook.warn("Possibly inexact sample conversion from PNM to PNG");
    } else if bits % 8 != 0 && (kind == Kind::Pixmap || 8 % bits != 0) {
        let bits = bits as u8;
        image.significant_bits = Some(SignificantBits([bits, bits, bits, 0]));
    }
}

fn scale(value: u32, maxval: u32, overflow: &mut bool) -> u32 {
    let full = if maxval <= 255 { 255 } else { 65535 };
    if value > maxval {
        *overflow = true;
        full
    } else if maxval == full {
        value
    } else {
        (value * full + maxval / 2) / maxval
    }
}

fn store(row: &mut [u8], index: usize, value: u32, maxval: u32) {
    if maxval <= 255 {
        row[index] = value as u8;
    } else {
        row[2 * index..2 * index + 2].copy_from_slice(&(value as u16).to_be_bytes());
    }
}

fn read_plain_samples(
    tokens: &mut Tokens<'_>,
    row: &mut [u8],
    samples: usize,
    maxval: u32,
    overflow: &mut bool,
) -> bool {
    for index in 0..samples {
        let Some(value) = tokens.number() else {
            return false;
        };
        store(row, index, scale(value, maxval, overflow), maxval);
    }
    true
}

fn read_raw_samples(
    tokens: &mut Tokens<'_>,
    row: &mut [u8],
    samples: usize,
    maxval: u32,
    overflow: &mut bool,
) -> bool {
    let width = if maxval <= 255 { 1 } else { 2 };
    let Some(bytes) = tokens.data.get(tokens.pos..tokens.pos + samples * width) else {
        return false;
    };
    tokens.pos += samples * width;
    for (index, sample) in bytes.chunks_exact(width).enumerate() {
        let value = sample.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        store(row, index, scale(value, maxval, overflow), maxval);
    }
    true
}

/// PBM uses 1 for black; PNG gray uses 0.
fn read_plain_bits(tokens: &mut Tokens<'_>, row: &mut [u8], width: usize) -> bool {
    for x in 0..width {
        let Some(bit) = tokens.bit() else {
            return false;
        };
        if bit == 0 {
            row[x / 8] |= 0x80 >> (x % 8);
        }
    }
    true
}

fn read_raw_bits(tokens: &mut Tokens<'_>, row: &mut [u8], width: usize) -> bool {
    let len = row.len();
    let Some(bytes) = tokens.data.get(tokens.pos..tokens.pos + len) else {
        return false;
    };
    tokens.pos += len;
    for (dst, src) in row.iter_mut().zip(bytes) {
        *dst = !src;
    }
    // Padding bits past the last pixel stay zero.
    if width % 8 != 0 {
        row[len - 1] &= 0xFF << (8 - width % 8);
    }
    true
}
