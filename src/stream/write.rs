//! Write-side interception: output measurement, IDAT merging, chunk
//! filtering, and trial pruning.

use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::ControlFlow;

use super::IoLocation;
use crate::compress::crc32::Crc32;
use crate::error::{ensure_invariant, Error, Result};
use crate::png::chunk::{chunk_crc, ChunkType};
use crate::png::{PNG_SIGNATURE, PNG_UINT_31_MAX};

/// A seekable output sink.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// Sizes measured on the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSizes {
    /// Bytes written to the sink (commit mode only).
    pub file_size: u64,
    /// Sum of all IDAT payload lengths.
    pub idat_size: u64,
    /// PLTE and tRNS chunks, including their 12 bytes of framing.
    pub plte_trns_size: u64,
}

/// Which chunk types may reach the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Block APNG chunks (keep the first frame only).
    pub snip: bool,
}

impl ChunkPolicy {
    /// Digital signatures are never re-emitted; APNG chunks only without snip.
    pub fn allows(&self, chunk_type: ChunkType) -> bool {
        if chunk_type.is_digital_signature() {
            return false;
        }
        !(self.snip && chunk_type.is_apng())
    }
}

/// State of the merged IDAT chunk being written in commit mode.
#[derive(Debug, Default)]
struct CommitSession {
    /// Sink offset of the merged IDAT's length field.
    idat_offset: Option<u64>,
    /// Length written provisionally into that field.
    provisional_size: u64,
    /// CRC over "IDAT" and every payload piece so far.
    crc: Crc32,
}

/// Observes (and, in commit mode, persists) every write of a datastream.
pub struct WriteHook<'a> {
    sink: Option<&'a mut dyn WriteSeek>,
    policy: ChunkPolicy,
    max_idat_size: u64,
    best_idat_size: u64,
    sizes: OutputSizes,
    allow_current: bool,
    current_is_idat: bool,
    session: CommitSession,
}

impl<'a> WriteHook<'a> {
    /// Trial mode: nothing is persisted, and writing stops once the IDAT
    /// total exceeds `max_idat_size`.
    pub fn trial(max_idat_size: u64, policy: ChunkPolicy) -> Self {
        Self::with_sink(None, max_idat_size, 0, policy)
    }

    /// Commit mode. `best_idat_size` is the expected merged IDAT length,
    /// or 0 if unknown (the length is then patched after the fact).
    pub fn commit(sink: &'a mut dyn WriteSeek, best_idat_size: u64, policy: ChunkPolicy) -> Self {
        Self::with_sink(Some(sink), u64::MAX, best_idat_size, policy)
    }

    fn with_sink(
        sink: Option<&'a mut dyn WriteSeek>,
        max_idat_size: u64,
        best_idat_size: u64,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            sink,
            policy,
            max_idat_size,
            best_idat_size,
            sizes: OutputSizes::default(),
            allow_current: true,
            current_is_idat: false,
            session: CommitSession::default(),
        }
    }

    /// True if bytes are persisted.
    pub fn is_commit(&self) -> bool {
        self.sink.is_some()
    }

    /// Sizes measured so far.
    pub fn sizes(&self) -> OutputSizes {
        self.sizes
    }

    /// Handle one tagged write. `Break` means the trial exceeded its ceiling.
    pub fn write(&mut self, location: IoLocation, data: &[u8]) -> Result<ControlFlow<()>> {
        let mut header = [0u8; 8];
        if location == IoLocation::ChunkHeader {
            ensure_invariant!(data.len() == 8, "Writing chunk header, expecting 8 bytes");
            header.copy_from_slice(data);
            let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let chunk_type = ChunkType([data[4], data[5], data[6], data[7]]);
            self.allow_current = self.policy.allows(chunk_type);
            if chunk_type == ChunkType::IDAT {
                self.current_is_idat = true;
                self.sizes.idat_size += u64::from(length);
                if self.sink.is_none() && self.sizes.idat_size > self.max_idat_size {
                    return Ok(ControlFlow::Break(()));
                }
            } else {
                self.current_is_idat = false;
                if matches!(chunk_type, ChunkType::PLTE | ChunkType::TRNS) {
                    self.sizes.plte_trns_size += u64::from(length) + 12;
                }
            }
        }

        let Some(sink) = self.sink.as_mut() else {
            return Ok(ControlFlow::Continue(()));
        };
        if location != IoLocation::Signature && !self.allow_current {
            return Ok(ControlFlow::Continue(()));
        }

        let mut data = data;
        match location {
            IoLocation::ChunkHeader if self.current_is_idat => {
                if self.session.idat_offset.is_some() {
                    // Later pieces merge into the first IDAT.
                    return Ok(ControlFlow::Continue(()));
                }
                let offset = sink.stream_position()?;
                let provisional = if self.best_idat_size > 0 {
                    self.best_idat_size
                } else {
                    u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]))
                };
                header[..4].copy_from_slice(&(provisional as u32).to_be_bytes());
                self.session = CommitSession {
                    idat_offset: Some(offset),
                    provisional_size: provisional,
                    crc: Crc32::for_chunk(ChunkType::IDAT.bytes()),
                };
                data = &header;
            }
            IoLocation::ChunkHeader => {
                if let Some(offset) = self.session.idat_offset.take() {
                    // First chunk after the IDAT run: finalize it.
                    sink.write_all(&self.session.crc.value().to_be_bytes())?;
                    self.sizes.file_size += 4;
                    if self.sizes.idat_size != self.session.provisional_size {
                        ensure_invariant!(self.best_idat_size == 0, "Incorrect calculation of IDAT size");
                        ensure_invariant!(
                            self.sizes.idat_size <= u64::from(PNG_UINT_31_MAX),
                            "Exceedingly large IDAT in output"
                        );
                        let resume = sink.stream_position()?;
                        sink.seek(SeekFrom::Start(offset))?;
                        sink.write_all(&(self.sizes.idat_size as u32).to_be_bytes())?;
                        sink.seek(SeekFrom::Start(resume))?;
                    }
                }
            }
            IoLocation::ChunkData if self.current_is_idat => self.session.crc.update(data),
            IoLocation::ChunkCrc if self.current_is_idat => {
                // Deferred until the first non-IDAT chunk.
                return Ok(ControlFlow::Continue(()));
            }
            _ => {}
        }

        sink.write_all(data)?;
        self.sizes.file_size += data.len() as u64;
        Ok(ControlFlow::Continue(()))
    }

    /// Emit the PNG signature.
    pub fn write_signature(&mut self) -> Result<ControlFlow<()>> {
        self.write(IoLocation::Signature, &PNG_SIGNATURE)
    }

    /// Emit a whole chunk as header, payload and CRC.
    pub fn write_chunk(&mut self, chunk_type: ChunkType, data: &[u8]) -> Result<ControlFlow<()>> {
        let length = u32::try_from(data.len())
            .ok()
            .filter(|&len| len <= PNG_UINT_31_MAX)
            .ok_or_else(|| Error::malformed(format!("{chunk_type} chunk is too large")))?;
        if self.write(IoLocation::ChunkHeader, &chunk_type.header(length))?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        if !data.is_empty() && self.write(IoLocation::ChunkData, data)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        self.write(IoLocation::ChunkCrc, &chunk_crc(chunk_type, data).to_be_bytes())
    }

    /// Flush the sink.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Copy a datastream chunk by chunk, from just past any leading data up to
/// and including IEND, recomputing every CRC on the way.
///
/// A signature at the start of `input` is skipped; a fresh one is written.
/// `hook` must be in commit mode.
pub fn copy_datastream<R: Read>(input: &mut R, hook: &mut WriteHook<'_>) -> Result<()> {
    let flow = hook.write_signature()?;
    ensure_invariant!(flow.is_continue(), "Datastream copy was cut short");
    let mut buf = Vec::new();
    let mut first = true;
    loop {
        let mut header = [0u8; 8];
        input
            .read_exact(&mut header)
            .map_err(|_| Error::malformed("Read error"))?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if length > PNG_UINT_31_MAX {
            if first && header == PNG_SIGNATURE {
                first = false;
                continue;
            }
            return Err(Error::malformed("Data error"));
        }
        first = false;
        let chunk_type = ChunkType([header[4], header[5], header[6], header[7]]);
        buf.resize(length as usize + 4, 0);
        input
            .read_exact(&mut buf)
            .map_err(|_| Error::malformed("Read error"))?;
        let flow = hook.write_chunk(chunk_type, &buf[..length as usize])?;
        ensure_invariant!(flow.is_continue(), "Datastream copy was cut short");
        if chunk_type == ChunkType::IEND {
            return Ok(());
        }
    }
}
