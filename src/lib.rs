//! # pixopt
//!
//! A lossless PNG optimizer.
//!
//! Each input (PNG, or a PNM image to import) is decoded into an in-memory
//! model, reduced where that loses nothing, and re-encoded under every
//! tuple of a parameter space (zlib level, memory level, strategy and PNG
//! filter). The smallest encoding replaces the file, through a backup that
//! is restored if writing fails, and only when it is strictly smaller or a
//! rewrite is required.
//!
//! ## Features
//!
//! - **Branch-and-bound search**: a trial stops as soon as its IDAT grows
//!   past the best size so far
//! - **Hand-written DEFLATE encoder** with zlib-style levels and strategies
//! - **Chunk-preserving**: ancillary chunks are copied to the output in place
//! - **Transactional writes** with `.bak` backups
//!
//! ## Example
//!
//! ```no_run
//! use pixopt::{LogReporter, Optimizer, Options};
//!
//! let options = Options::with_level(2);
//! let mut optimizer = Optimizer::new(options, LogReporter).unwrap();
//! let summary = optimizer.run(&["image.png"]).unwrap();
//! assert!(!summary.has_failures());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bits;
pub mod commit;
pub mod compress;
pub mod error;
pub mod fsutil;
pub mod image;
pub mod optimizer;
pub mod options;
pub mod params;
pub mod png;
pub mod pnm;
pub mod reduce;
pub mod report;
pub mod search;
pub mod status;
pub mod stream;

pub use error::{Error, ErrorKind, Result};
pub use image::Image;
pub use optimizer::{FileOutcome, Optimizer};
pub use options::Options;
pub use params::{ParamSet, ParamSpace};
pub use png::ColorType;
pub use reduce::{LosslessReducer, Reducer, Reductions};
pub use report::{Event, LogReporter, NullReporter, Reporter, Summary};
pub use status::RunStatus;
