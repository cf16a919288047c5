//! PNG chunk types and framing.

use std::fmt;

use crate::compress::crc32::Crc32;

/// A four-byte chunk type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    /// Image header.
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    /// Palette.
    pub const PLTE: ChunkType = ChunkType(*b"PLTE");
    /// Image data.
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    /// Image trailer.
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    /// Transparency.
    pub const TRNS: ChunkType = ChunkType(*b"tRNS");
    /// Background color.
    pub const BKGD: ChunkType = ChunkType(*b"bKGD");
    /// Palette histogram.
    pub const HIST: ChunkType = ChunkType(*b"hIST");
    /// Significant bits.
    pub const SBIT: ChunkType = ChunkType(*b"sBIT");
    /// Digital signature.
    pub const DSIG: ChunkType = ChunkType(*b"dSIG");
    /// APNG animation control.
    pub const ACTL: ChunkType = ChunkType(*b"acTL");
    /// APNG frame control.
    pub const FCTL: ChunkType = ChunkType(*b"fcTL");
    /// APNG frame data.
    pub const FDAT: ChunkType = ChunkType(*b"fdAT");

    /// Raw type bytes.
    pub fn bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Ancillary bit (0x20 of the first byte).
    pub fn is_ancillary(self) -> bool {
        self.0[0] & 0x20 != 0
    }

    /// Critical chunks, with tRNS promoted: dropping it would change pixels.
    pub fn is_critical(self) -> bool {
        !self.is_ancillary() || self == Self::TRNS
    }

    /// acTL, fcTL or fdAT.
    pub fn is_apng(self) -> bool {
        matches!(self, Self::ACTL | Self::FCTL | Self::FDAT)
    }

    /// dSIG.
    pub fn is_digital_signature(self) -> bool {
        self == Self::DSIG
    }

    /// Chunks decoded into the image model rather than kept as opaque blobs.
    pub fn is_codec_handled(self) -> bool {
        self.is_critical() || matches!(self, Self::BKGD | Self::HIST | Self::SBIT)
    }

    /// Every byte is an ASCII letter.
    pub fn is_well_formed(self) -> bool {
        self.0.iter().all(u8::is_ascii_alphabetic)
    }

    /// Length + type header for a payload of `len` bytes.
    pub fn header(self, len: u32) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&len.to_be_bytes());
        out[4..].copy_from_slice(&self.0);
        out
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({self})")
    }
}

/// CRC-32 of a chunk (type + payload).
pub fn chunk_crc(chunk_type: ChunkType, data: &[u8]) -> u32 {
    let mut crc = Crc32::for_chunk(chunk_type.bytes());
    crc.update(data);
    crc.value()
}

/// Write a PNG chunk (length, type, data, CRC32) to the output buffer.
pub fn write_chunk(output: &mut Vec<u8>, chunk_type: ChunkType, data: &[u8]) {
    output.reserve(12 + data.len());
    output.extend_from_slice(&chunk_type.header(data.len() as u32));
    output.extend_from_slice(data);
    output.extend_from_slice(&chunk_crc(chunk_type, data).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_iend_chunk() {
        let mut output = Vec::new();
        write_chunk(&mut output, ChunkType::IEND, &[]);

        assert_eq!(output.len(), 12);
        assert_eq!(&output[0..4], &[0, 0, 0, 0]);
        assert_eq!(&output[4..8], b"IEND");
        assert_eq!(&output[8..12], &0xAE426082_u32.to_be_bytes());
    }

    #[test]
    fn test_write_chunk_with_data() {
        let mut output = Vec::new();
        write_chunk(&mut output, ChunkType(*b"tEXt"), b"hello");

        assert_eq!(output.len(), 17);
        assert_eq!(&output[0..4], &[0, 0, 0, 5]);
        assert_eq!(&output[4..8], b"tEXt");
        assert_eq!(&output[8..13], b"hello");
    }

    #[test]
    fn test_classification() {
        assert!(ChunkType::IDAT.is_critical());
        assert!(ChunkType::TRNS.is_ancillary());
        assert!(ChunkType::TRNS.is_critical());
        assert!(!ChunkType::BKGD.is_critical());
        assert!(ChunkType::BKGD.is_codec_handled());
        assert!(!ChunkType(*b"tEXt").is_codec_handled());
        assert!(ChunkType::FDAT.is_apng());
        assert!(!ChunkType::IDAT.is_apng());
        assert!(ChunkType::DSIG.is_digital_signature());
    }

    #[test]
    fn test_display_escapes_binary() {
        assert_eq!(ChunkType::IDAT.to_string(), "IDAT");
        assert_eq!(ChunkType([b'a', 0, b'b', b'c']).to_string(), "a\\x00bc");
        assert!(!ChunkType([b'a', 0, b'b', b'c']).is_well_formed());
    }
}
