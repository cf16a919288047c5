//! The in-memory image model shared by decode, reduction, and encode.

use crate::error::{Error, Result};
use crate::png::chunk::ChunkType;
use crate::png::{ColorType, Ihdr};

/// Where an opaque chunk sat relative to the critical chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkLocation {
    /// Between IHDR and PLTE.
    BeforePlte,
    /// Between PLTE (or IHDR) and the first IDAT.
    BeforeIdat,
    /// Between the last IDAT and IEND.
    AfterIdat,
}

/// An ancillary chunk the codec does not interpret; written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChunk {
    /// Type code.
    pub chunk_type: ChunkType,
    /// Payload.
    pub data: Vec<u8>,
    /// Position in the datastream.
    pub location: ChunkLocation,
}

/// tRNS contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transparency {
    /// Alpha for the first palette entries.
    Palette(Vec<u8>),
    /// The fully transparent gray sample.
    Gray(u16),
    /// The fully transparent RGB sample.
    Rgb([u16; 3]),
}

/// bKGD contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    /// Palette index.
    Index(u8),
    /// Gray sample.
    Gray(u16),
    /// RGB sample.
    Rgb([u16; 3]),
}

/// sBIT contents; only the first `color_type.significant_bits_len()`
/// entries are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignificantBits(pub [u8; 4]);

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

impl Transparency {
    /// Parse a tRNS payload for `color_type`.
    pub fn from_chunk(color_type: ColorType, data: &[u8]) -> Result<Self> {
        match (color_type, data.len()) {
            (ColorType::Palette, _) => Ok(Transparency::Palette(data.to_vec())),
            (ColorType::Gray, 2) => Ok(Transparency::Gray(be16(data, 0))),
            (ColorType::Rgb, 6) => Ok(Transparency::Rgb([
                be16(data, 0),
                be16(data, 2),
                be16(data, 4),
            ])),
            _ => Err(Error::malformed("Invalid tRNS chunk")),
        }
    }

    /// Serialize to a tRNS payload.
    pub fn to_chunk(&self) -> Vec<u8> {
        match self {
            Transparency::Palette(alpha) => alpha.clone(),
            Transparency::Gray(g) => g.to_be_bytes().to_vec(),
            Transparency::Rgb(rgb) => rgb.iter().flat_map(|v| v.to_be_bytes()).collect(),
        }
    }
}

impl Background {
    /// Parse a bKGD payload for `color_type`.
    pub fn from_chunk(color_type: ColorType, data: &[u8]) -> Result<Self> {
        match (color_type, data.len()) {
            (ColorType::Palette, 1) => Ok(Background::Index(data[0])),
            (ColorType::Gray | ColorType::GrayAlpha, 2) => Ok(Background::Gray(be16(data, 0))),
            (ColorType::Rgb | ColorType::Rgba, 6) => Ok(Background::Rgb([
                be16(data, 0),
                be16(data, 2),
                be16(data, 4),
            ])),
            _ => Err(Error::malformed("Invalid bKGD chunk")),
        }
    }

    /// Serialize to a bKGD payload.
    pub fn to_chunk(&self) -> Vec<u8> {
        match self {
            Background::Index(i) => vec![*i],
            Background::Gray(g) => g.to_be_bytes().to_vec(),
            Background::Rgb(rgb) => rgb.iter().flat_map(|v| v.to_be_bytes()).collect(),
        }
    }
}

impl SignificantBits {
    /// Parse an sBIT payload for `color_type`.
    pub fn from_chunk(color_type: ColorType, data: &[u8]) -> Result<Self> {
        let len = Self::len_for(color_type);
        if data.len() != len {
            return Err(Error::malformed("Invalid sBIT chunk"));
        }
        let mut bits = [0u8; 4];
        bits[..len].copy_from_slice(data);
        Ok(SignificantBits(bits))
    }

    /// Serialize to an sBIT payload.
    pub fn to_chunk(&self, color_type: ColorType) -> Vec<u8> {
        self.0[..Self::len_for(color_type)].to_vec()
    }

    fn len_for(color_type: ColorType) -> usize {
        color_type.significant_bits_len()
    }
}

/// A decoded raster plus the chunk data that travels with it.
///
/// Rows are unfiltered, deinterlaced, and packed at the header's bit depth.
#[derive(Debug, Clone, Default)]
pub struct Image {
    /// Header fields.
    pub header: Option<Ihdr>,
    /// One buffer per row; empty until image data is seen.
    pub rows: Vec<Vec<u8>>,
    /// PLTE entries.
    pub palette: Option<Vec<[u8; 3]>>,
    /// tRNS.
    pub transparency: Option<Transparency>,
    /// bKGD.
    pub background: Option<Background>,
    /// hIST.
    pub histogram: Option<Vec<u16>>,
    /// sBIT.
    pub significant_bits: Option<SignificantBits>,
    /// Every other ancillary chunk, in stream order.
    pub unknown_chunks: Vec<UnknownChunk>,
}

impl Image {
    /// An image with the given header and zero-filled rows.
    pub fn with_header(header: Ihdr) -> Self {
        let mut image = Self::default();
        image.header = Some(header);
        image.allocate_rows();
        image
    }

    /// The header; fails if IHDR has not been read.
    pub fn ihdr(&self) -> Result<&Ihdr> {
        self.header
            .as_ref()
            .ok_or(Error::Internal("image header not loaded"))
    }

    /// Allocate zero-filled rows for the header's geometry.
    ///
    /// Returns false, allocating nothing, if no usable header is present.
    pub fn allocate_rows(&mut self) -> bool {
        let Some(ihdr) = self.header else {
            return false;
        };
        if ihdr.height == 0 {
            return false;
        }
        let row_bytes = ihdr.row_bytes();
        self.rows = (0..ihdr.height).map(|_| vec![0u8; row_bytes]).collect();
        true
    }

    /// True once the header (and the palette, for indexed images) is known,
    /// which is enough to salvage a damaged stream.
    pub fn has_critical_info(&self) -> bool {
        match &self.header {
            Some(ihdr) if ihdr.validate().is_ok() => {
                ihdr.color_type != ColorType::Palette || self.palette.is_some()
            }
            _ => false,
        }
    }

    /// Bit depth, or 0 if no header is loaded.
    pub fn bit_depth(&self) -> u8 {
        self.header.map_or(0, |h| h.bit_depth)
    }

    /// True if the image is indexed-color.
    pub fn is_palette(&self) -> bool {
        self.header
            .is_some_and(|h| h.color_type == ColorType::Palette)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        for row in &mut self.rows {
            row.fill(0);
        }
        for chunk in &mut self.unknown_chunks {
            chunk.data.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_rows_needs_height() {
        let mut image = Image::default();
        assert!(!image.allocate_rows());

        image.header = Some(Ihdr::new(3, 2, 8, ColorType::Rgb));
        assert!(image.allocate_rows());
        assert_eq!(image.rows.len(), 2);
        assert_eq!(image.rows[0].len(), 9);
    }

    #[test]
    fn test_critical_info_requires_palette() {
        let mut image = Image::default();
        assert!(!image.has_critical_info());
        image.header = Some(Ihdr::new(1, 1, 8, ColorType::Palette));
        assert!(!image.has_critical_info());
        image.palette = Some(vec![[0, 0, 0]]);
        assert!(image.has_critical_info());
    }

    #[test]
    fn test_transparency_chunk_forms() {
        let t = Transparency::from_chunk(ColorType::Rgb, &[0, 1, 0, 2, 0, 3]).unwrap();
        assert_eq!(t, Transparency::Rgb([1, 2, 3]));
        assert_eq!(t.to_chunk(), vec![0, 1, 0, 2, 0, 3]);
        assert!(Transparency::from_chunk(ColorType::Rgba, &[0; 6]).is_err());
    }

    #[test]
    fn test_background_and_sbit() {
        let b = Background::from_chunk(ColorType::GrayAlpha, &[0x12, 0x34]).unwrap();
        assert_eq!(b, Background::Gray(0x1234));
        assert!(Background::from_chunk(ColorType::Palette, &[1, 2]).is_err());

        let s = SignificantBits::from_chunk(ColorType::Rgba, &[5, 6, 7, 8]).unwrap();
        assert_eq!(s.to_chunk(ColorType::Rgba), vec![5, 6, 7, 8]);
        assert!(SignificantBits::from_chunk(ColorType::Gray, &[1, 2]).is_err());
    }
}
