//! Read-side interception: input measurement and chunk classification.

use log::trace;

use super::IoLocation;
use crate::error::{ensure_invariant, Result};
use crate::image::Image;
use crate::png::chunk::ChunkType;
use crate::status::RunStatus;

/// Sizes measured on the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSizes {
    /// Bytes up to the end of the datastream, including any leading data.
    pub file_size: u64,
    /// Bytes preceding the datastream.
    pub datastream_offset: u64,
    /// Sum of all IDAT payload lengths.
    pub idat_size: u64,
    /// PLTE and tRNS chunks, including their 12 bytes of framing.
    pub plte_trns_size: u64,
}

/// What the decoder should do with a chunk whose header was just read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    /// Decode into the image model.
    Decode,
    /// Keep as an opaque chunk.
    Keep,
    /// Skip the payload.
    Discard,
}

/// Observes every read of a PNG datastream.
#[derive(Debug)]
pub struct ReadHook {
    status: RunStatus,
    sizes: InputSizes,
    snip: bool,
    started: bool,
    seen_idat: bool,
    warnings: Vec<String>,
}

impl ReadHook {
    /// A hook for one input; `snip` drops APNG chunks.
    pub fn new(snip: bool) -> Self {
        Self {
            status: RunStatus::empty(),
            sizes: InputSizes::default(),
            snip,
            started: false,
            seen_idat: false,
            warnings: Vec::new(),
        }
    }

    /// Account for `data`, read at byte `offset` of the input.
    pub fn on_read(&mut self, offset: u64, location: IoLocation, data: &[u8]) -> Result<()> {
        if !self.started {
            ensure_invariant!(data.len() == 8, "PNG I/O must start with the first 8 bytes");
            self.started = true;
            self.sizes.datastream_offset = offset;
            self.status |= RunStatus::HAS_PNG_DATASTREAM;
            if location == IoLocation::Signature {
                self.status |= RunStatus::HAS_PNG_SIGNATURE;
            }
            if offset == 0 {
                self.status |= RunStatus::IS_PNG_FILE;
            }
            self.sizes.file_size = offset;
        }
        self.sizes.file_size += data.len() as u64;
        Ok(())
    }

    /// Classify a chunk from its header, allocating image rows on the first IDAT.
    pub fn on_chunk_header(
        &mut self,
        length: u32,
        chunk_type: ChunkType,
        image: &mut Image,
    ) -> Result<ChunkAction> {
        match chunk_type {
            ChunkType::IDAT => {
                if !self.seen_idat {
                    self.seen_idat = true;
                    // A premature IDAT leaves the rows unallocated; decoding
                    // reports the error.
                    if image.header.is_some_and(|h| h.height > 0) {
                        ensure_invariant!(
                            image.rows.is_empty(),
                            "Image rows have been allocated too early"
                        );
                        image.allocate_rows();
                    }
                } else {
                    self.status |= RunStatus::HAS_JUNK;
                }
                self.sizes.idat_size += u64::from(length);
                Ok(ChunkAction::Decode)
            }
            ChunkType::PLTE | ChunkType::TRNS => {
                self.sizes.plte_trns_size += u64::from(length) + 12;
                Ok(ChunkAction::Decode)
            }
            other => Ok(self.handle_chunk(other)),
        }
    }

    fn handle_chunk(&mut self, chunk_type: ChunkType) -> ChunkAction {
        if chunk_type.is_codec_handled() {
            return ChunkAction::Decode;
        }
        if chunk_type.is_digital_signature() {
            self.status |= RunStatus::HAS_DIGITAL_SIGNATURE;
        } else if chunk_type.is_apng() {
            self.status |= RunStatus::HAS_APNG;
            if chunk_type == ChunkType::FDAT {
                self.status |= RunStatus::HAS_MULTIPLE_IMAGES;
            }
            if self.snip {
                trace!("dropping {chunk_type}");
                self.status |= RunStatus::HAS_JUNK;
                return ChunkAction::Discard;
            }
        }
        ChunkAction::Keep
    }

    /// Record a recoverable error. Recovery needs the image data re-encoded.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.status |= RunStatus::HAS_ERRORS | RunStatus::NEEDS_NEW_IDAT;
        self.warnings.push(message.into());
    }

    /// Record a notice that only marks the file as carrying junk.
    pub fn junk(&mut self, message: impl Into<String>) {
        self.status |= RunStatus::HAS_JUNK;
        self.warnings.push(message.into());
    }

    /// Set additional status flags.
    pub fn flag(&mut self, flags: RunStatus) {
        self.status |= flags;
    }

    /// Flags gathered so far.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Sizes gathered so far.
    pub fn sizes(&self) -> InputSizes {
        self.sizes
    }

    /// Consume the hook, returning flags, sizes and warnings.
    pub fn finish(self) -> (RunStatus, InputSizes, Vec<String>) {
        (self.status, self.sizes, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::{ColorType, Ihdr};

    #[test]
    fn test_first_read_sets_datastream_flags() {
        let mut hook = ReadHook::new(false);
        hook.on_read(0, IoLocation::Signature, &[0; 8]).unwrap();
        hook.on_read(8, IoLocation::ChunkHeader, &[0; 8]).unwrap();
        let status = hook.status();
        assert!(status.contains(
            RunStatus::HAS_PNG_DATASTREAM | RunStatus::HAS_PNG_SIGNATURE | RunStatus::IS_PNG_FILE
        ));
        assert_eq!(hook.sizes().file_size, 16);
    }

    #[test]
    fn test_embedded_datastream_offset() {
        let mut hook = ReadHook::new(false);
        hook.on_read(100, IoLocation::ChunkHeader, &[0; 8]).unwrap();
        let status = hook.status();
        assert!(status.contains(RunStatus::HAS_PNG_DATASTREAM));
        assert!(!status.contains(RunStatus::IS_PNG_FILE));
        assert!(!status.contains(RunStatus::HAS_PNG_SIGNATURE));
        assert_eq!(hook.sizes().datastream_offset, 100);
        assert_eq!(hook.sizes().file_size, 108);
    }

    #[test]
    fn test_first_read_must_be_eight_bytes() {
        let mut hook = ReadHook::new(false);
        let err = hook.on_read(0, IoLocation::Signature, &[0; 4]).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_idat_headers_allocate_and_mark_junk() {
        let mut hook = ReadHook::new(false);
        let mut image = Image::default();
        image.header = Some(Ihdr::new(4, 3, 8, ColorType::Gray));
        hook.on_chunk_header(10, ChunkType::IDAT, &mut image).unwrap();
        assert_eq!(image.rows.len(), 3);
        assert!(!hook.status().contains(RunStatus::HAS_JUNK));
        hook.on_chunk_header(5, ChunkType::IDAT, &mut image).unwrap();
        assert!(hook.status().contains(RunStatus::HAS_JUNK));
        assert_eq!(hook.sizes().idat_size, 15);
    }

    #[test]
    fn test_premature_idat_skips_allocation() {
        let mut hook = ReadHook::new(false);
        let mut image = Image::default();
        let action = hook.on_chunk_header(10, ChunkType::IDAT, &mut image).unwrap();
        assert_eq!(action, ChunkAction::Decode);
        assert!(image.rows.is_empty());
    }

    #[test]
    fn test_plte_trns_overhead() {
        let mut hook = ReadHook::new(false);
        let mut image = Image::default();
        hook.on_chunk_header(6, ChunkType::PLTE, &mut image).unwrap();
        hook.on_chunk_header(2, ChunkType::TRNS, &mut image).unwrap();
        assert_eq!(hook.sizes().plte_trns_size, 18 + 14);
    }

    #[test]
    fn test_classification_flags() {
        let mut image = Image::default();
        let mut hook = ReadHook::new(false);
        assert_eq!(
            hook.on_chunk_header(0, ChunkType::DSIG, &mut image).unwrap(),
            ChunkAction::Keep
        );
        assert_eq!(
            hook.on_chunk_header(0, ChunkType::FDAT, &mut image).unwrap(),
            ChunkAction::Keep
        );
        assert_eq!(
            hook.on_chunk_header(0, ChunkType::BKGD, &mut image).unwrap(),
            ChunkAction::Decode
        );
        let status = hook.status();
        assert!(status.contains(
            RunStatus::HAS_DIGITAL_SIGNATURE | RunStatus::HAS_APNG | RunStatus::HAS_MULTIPLE_IMAGES
        ));
        assert!(!status.contains(RunStatus::HAS_JUNK));
    }

    #[test]
    fn test_snip_discards_apng_chunks() {
        let mut image = Image::default();
        let mut hook = ReadHook::new(true);
        assert_eq!(
            hook.on_chunk_header(8, ChunkType::ACTL, &mut image).unwrap(),
            ChunkAction::Discard
        );
        let status = hook.status();
        assert!(status.contains(RunStatus::HAS_APNG | RunStatus::HAS_JUNK));
        assert!(!status.contains(RunStatus::HAS_MULTIPLE_IMAGES));
    }

    #[test]
    fn test_warn_requires_new_idat() {
        let mut hook = ReadHook::new(false);
        hook.warn("CRC error");
        let (status, _, warnings) = hook.finish();
        assert!(status.contains(RunStatus::HAS_ERRORS | RunStatus::NEEDS_NEW_FILE));
        assert_eq!(warnings, vec!["CRC error".to_string()]);
    }
}
