//! PNG codec: chunk framing, scanline filters, Adam7 interlacing, and the
//! decode/encode paths that run through the stream interceptor.

pub mod chunk;
pub mod decode;
pub mod encode;
pub mod filter;
pub mod interlace;

use crate::error::{Error, Result};

/// PNG file signature (magic bytes).
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest value allowed in a PNG four-byte length field.
pub const PNG_UINT_31_MAX: u32 = 0x7FFF_FFFF;

/// Maximum supported image dimension.
const MAX_DIMENSION: u32 = 1 << 24; // 16 million pixels

/// PNG color type, as stored in IHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
    /// Grayscale (0).
    Gray,
    /// Truecolor (2).
    Rgb,
    /// Indexed color (3).
    Palette,
    /// Grayscale with alpha (4).
    GrayAlpha,
    /// Truecolor with alpha (6).
    Rgba,
}

impl ColorType {
    /// Color type for an IHDR code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ColorType::Gray),
            2 => Some(ColorType::Rgb),
            3 => Some(ColorType::Palette),
            4 => Some(ColorType::GrayAlpha),
            6 => Some(ColorType::Rgba),
            _ => None,
        }
    }

    /// IHDR code for this color type.
    pub fn code(self) -> u8 {
        match self {
            ColorType::Gray => 0,
            ColorType::Rgb => 2,
            ColorType::Palette => 3,
            ColorType::GrayAlpha => 4,
            ColorType::Rgba => 6,
        }
    }

    /// Samples per pixel.
    pub fn channels(self) -> usize {
        match self {
            ColorType::Gray | ColorType::Palette => 1,
            ColorType::GrayAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }

    /// True if pixels carry an alpha sample.
    pub fn has_alpha(self) -> bool {
        matches!(self, ColorType::GrayAlpha | ColorType::Rgba)
    }

    /// Number of sBIT entries for this color type.
    pub fn significant_bits_len(self) -> usize {
        match self {
            ColorType::Palette => 3,
            other => other.channels(),
        }
    }

    /// Whether `depth` is permitted for this color type.
    pub fn is_valid_depth(self, depth: u8) -> bool {
        match self {
            ColorType::Gray => matches!(depth, 1 | 2 | 4 | 8 | 16),
            ColorType::Palette => matches!(depth, 1 | 2 | 4 | 8),
            ColorType::Rgb | ColorType::GrayAlpha | ColorType::Rgba => matches!(depth, 8 | 16),
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            ColorType::Gray => "grayscale",
            ColorType::Rgb => "RGB",
            ColorType::Palette => "palette",
            ColorType::GrayAlpha => "grayscale+alpha",
            ColorType::Rgba => "RGB+alpha",
        }
    }
}

/// Image header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ihdr {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per sample (palette index bits for indexed images).
    pub bit_depth: u8,
    /// Color type.
    pub color_type: ColorType,
    /// Compression method; always 0.
    pub compression_type: u8,
    /// Filter method; always 0.
    pub filter_type: u8,
    /// 0 for progressive, 1 for Adam7.
    pub interlace_type: u8,
}

impl Ihdr {
    /// A non-interlaced header with default methods.
    pub fn new(width: u32, height: u32, bit_depth: u8, color_type: ColorType) -> Self {
        Self {
            width,
            height,
            bit_depth,
            color_type,
            compression_type: 0,
            filter_type: 0,
            interlace_type: 0,
        }
    }

    /// Parse and validate an IHDR payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 13 {
            return Err(Error::InvalidHeader(format!(
                "IHDR length {} (expected 13)",
                data.len()
            )));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let color_type = ColorType::from_code(data[9])
            .ok_or_else(|| Error::InvalidHeader(format!("color type {}", data[9])))?;
        let ihdr = Self {
            width,
            height,
            bit_depth: data[8],
            color_type,
            compression_type: data[10],
            filter_type: data[11],
            interlace_type: data[12],
        };
        ihdr.validate()?;
        Ok(ihdr)
    }

    /// Check every field against the PNG rules.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidHeader(format!(
                "dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::InvalidHeader(format!(
                "dimensions {}x{} exceed {MAX_DIMENSION}",
                self.width, self.height
            )));
        }
        if !self.color_type.is_valid_depth(self.bit_depth) {
            return Err(Error::InvalidHeader(format!(
                "bit depth {} for {} image",
                self.bit_depth,
                self.color_type.name()
            )));
        }
        if self.compression_type != 0 {
            return Err(Error::InvalidHeader("unknown compression method".into()));
        }
        if self.filter_type != 0 {
            return Err(Error::InvalidHeader("unknown filter method".into()));
        }
        if self.interlace_type > 1 {
            return Err(Error::InvalidHeader("unknown interlace method".into()));
        }
        Ok(())
    }

    /// Serialize to the 13-byte IHDR payload.
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type.code();
        out[10] = self.compression_type;
        out[11] = self.filter_type;
        out[12] = self.interlace_type;
        out
    }

    /// Bits per pixel.
    pub fn bits_per_pixel(&self) -> usize {
        self.color_type.channels() * self.bit_depth as usize
    }

    /// Byte distance used by the Sub/Average/Paeth filters.
    pub fn filter_bpp(&self) -> usize {
        self.bits_per_pixel().div_ceil(8).max(1)
    }

    /// Bytes in one unfiltered row of `width` pixels.
    pub fn row_bytes_for(&self, width: u32) -> usize {
        (width as usize * self.bits_per_pixel()).div_ceil(8)
    }

    /// Bytes in one unfiltered row of the full image.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes_for(self.width)
    }

    /// True if the image is Adam7 interlaced.
    pub fn is_interlaced(&self) -> bool {
        self.interlace_type == 1
    }
}
