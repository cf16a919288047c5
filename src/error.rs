//! Error types for the pixopt library.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pixopt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used to decide how far it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or truncated input; repairable only with `fix`.
    Format,
    /// The caller did not authorize an operation the file requires.
    Policy,
    /// Filesystem or naming failure.
    Resource,
    /// Bad option values or combinations.
    Options,
    /// A broken internal invariant. Aborts the whole run.
    Internal,
}

/// Errors produced while optimizing a file.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is neither PNG nor a supported import format.
    #[error("Unrecognized image file format")]
    UnrecognizedFormat,

    /// A PNG signature mangled by newline conversion.
    #[error("PNG file appears to be corrupted by text file conversions")]
    TextConversionCorruption,

    /// MNG and JNG are recognized but not imported.
    #[error("MNG/JNG files are not supported")]
    UnsupportedMng,

    /// Structural damage in the input datastream.
    #[error("{0}")]
    Malformed(String),

    /// An image header value outside the PNG specification.
    #[error("Invalid image header: {0}")]
    InvalidHeader(String),

    /// The input carries a dSIG chunk and `force` was not given.
    #[error("Can't optimize digitally-signed files")]
    DigitallySigned,

    /// Multi-image input that cannot become a single PNG without `snip`.
    #[error("Incompatible input format")]
    IncompatibleFormat,

    /// Decode warnings were recorded and `fix` was not given.
    #[error("Previous error(s) not fixed")]
    ErrorsNotFixed,

    /// A new output file would clobber an existing one.
    #[error("The output file exists, try backing it up (use -keep)")]
    OutputExists,

    /// The existing output file cannot be moved out of the way.
    #[error("Can't back up the existing output file")]
    CannotBackupOutput,

    /// Renaming the input (in-place case) or the old output failed.
    #[error("Can't back up the {what} file")]
    BackupFailed {
        /// "input" or "output".
        what: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A derived file name would exceed the platform limit.
    #[error("Can't create {what} (name too long)")]
    NameTooLong {
        /// What was being named: "the output file" or "backup file".
        what: &'static str,
    },

    /// Failed to remove the backup after a successful commit.
    #[error("Can't remove the backup file {}", path.display())]
    BackupNotRemoved {
        /// Backup path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O failure on a specific path.
    #[error("{action} {}: {source}", path.display())]
    File {
        /// Short description ("Can't open the input file", ...).
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O failure while streaming data.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No trial produced an image data stream.
    #[error("Can't encode the image data with any of the selected parameters")]
    NoEncoding,

    /// Invalid option value or combination.
    #[error("{0}")]
    InvalidOptions(String),

    /// Explicit iteration parameters were all outside their legal range.
    #[error("Iteration parameters (-zc, -zm, -zs, -f) out of range")]
    IterationOutOfRange,

    /// A broken internal invariant.
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnrecognizedFormat
            | Error::TextConversionCorruption
            | Error::UnsupportedMng
            | Error::Malformed(_)
            | Error::InvalidHeader(_)
            | Error::NoEncoding => ErrorKind::Format,
            Error::DigitallySigned
            | Error::IncompatibleFormat
            | Error::ErrorsNotFixed
            | Error::OutputExists => ErrorKind::Policy,
            Error::CannotBackupOutput
            | Error::BackupFailed { .. }
            | Error::NameTooLong { .. }
            | Error::BackupNotRemoved { .. }
            | Error::File { .. }
            | Error::Io(_) => ErrorKind::Resource,
            Error::InvalidOptions(_) | Error::IterationOutOfRange => ErrorKind::Options,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for broken invariants, which must stop the whole batch.
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    pub(crate) fn file(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Fail with [`Error::Internal`] unless `cond` holds.
macro_rules! ensure_invariant {
    ($cond:expr, $msg:literal) => {
        if !$cond {
            return Err($crate::error::Error::Internal($msg));
        }
    };
}
pub(crate) use ensure_invariant;
