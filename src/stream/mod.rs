//! The stream interceptor: hooks on every tagged unit of PNG I/O.
//!
//! The decoder reports each signature, chunk header, payload and CRC it
//! consumes to a [`ReadHook`], which measures the input and classifies
//! chunks. The encoder emits the same units to a [`WriteHook`], which
//! measures the output, merges IDAT pieces into a single chunk, filters
//! disallowed chunks, and in trial mode aborts as soon as the IDAT size
//! exceeds the current ceiling.

pub mod read;
pub mod write;

pub use read::{ChunkAction, InputSizes, ReadHook};
pub use write::{copy_datastream, ChunkPolicy, OutputSizes, WriteHook, WriteSeek};

/// Which part of the datastream a piece of I/O belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoLocation {
    /// The 8-byte PNG signature.
    Signature,
    /// Length and type of a chunk (8 bytes).
    ChunkHeader,
    /// Chunk payload.
    ChunkData,
    /// Chunk CRC (4 bytes).
    ChunkCrc,
}
