//! Progress reporting.
//!
//! The optimizer describes what it does as [`Event`]s handed to a
//! [`Reporter`] supplied by the caller. Events carry data only; their
//! `Display` impl renders the customary one-line text, which reporters may
//! use or ignore.

use std::fmt;
use std::path::Path;

use log::Level;

use crate::error::Error;
use crate::image::{Image, Transparency};
use crate::png::decode::InputFormat;
use crate::png::encode::EncodeParams;
use crate::png::{ColorType, Ihdr};
use crate::reduce::Reductions;
use crate::stream::{InputSizes, OutputSizes};

/// Header facts worth showing about an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSummary {
    /// Header fields.
    pub header: Ihdr,
    /// Palette entries.
    pub palette_len: usize,
    /// Palette entries with an alpha value.
    pub transparent_len: usize,
    /// A gray or RGB tRNS value is present.
    pub has_color_key: bool,
}

impl ImageSummary {
    /// Summarize `image`; `None` if no header is loaded.
    pub fn of(image: &Image) -> Option<Self> {
        let header = image.header?;
        let (transparent_len, has_color_key) = match &image.transparency {
            Some(Transparency::Palette(alpha)) => (alpha.len(), false),
            Some(_) => (0, true),
            None => (0, false),
        };
        Some(Self {
            header,
            palette_len: image.palette.as_ref().map_or(0, Vec::len),
            transparent_len,
            has_color_key,
        })
    }
}

/// `640x480 pixels, 3x8 bits/pixel, RGB`.
impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        write!(f, "{}x{} pixels, ", h.width, h.height)?;
        let channels = h.color_type.channels();
        match (channels, h.bit_depth) {
            (1, 1) => f.write_str("1 bit/pixel")?,
            (1, depth) => write!(f, "{depth} bits/pixel")?,
            (n, depth) => write!(f, "{n}x{depth} bits/pixel")?,
        }
        f.write_str(", ")?;
        if h.color_type == ColorType::Palette {
            match self.palette_len {
                1 => f.write_str("1 color")?,
                n => write!(f, "{n} colors")?,
            }
            if self.transparent_len > 0 {
                write!(f, " ({} transparent)", self.transparent_len)?;
            }
            f.write_str(" in palette")?;
        } else {
            let color = matches!(h.color_type, ColorType::Rgb | ColorType::Rgba);
            f.write_str(if color { "RGB" } else { "grayscale" })?;
            if h.color_type.has_alpha() {
                f.write_str("+alpha")?;
            } else if self.has_color_key {
                f.write_str("+transparency")?;
            }
        }
        if h.is_interlaced() {
            f.write_str(", interlaced")?;
        }
        Ok(())
    }
}

/// A fraction shown as a percentage below 100% and as a factor above.
#[derive(Debug, Clone, Copy)]
pub struct Ratio {
    /// Numerator.
    pub num: u64,
    /// Denominator.
    pub denom: u64,
    /// Never switch to the factor form.
    pub force_percent: bool,
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (num, denom) = (u128::from(self.num), u128::from(self.denom));
        if denom == 0 {
            return f.write_str(if num == 0 { "??%" } else { "INFTY%" });
        }
        // Below 99.995%, rounded to 0.01%.
        if num < denom && denom / (denom - num) < 20_000 {
            let scaled = (num * 10_000 + denom / 2) / denom;
            return write!(f, "{}.{:02}%", scaled / 100, scaled % 100);
        }
        let mut integral = num / denom;
        let rem = num % denom;
        let hundredths = if denom / (denom - rem) >= 200 {
            integral += 1;
            0
        } else {
            (rem * 100 + denom / 2) / denom
        };
        if self.force_percent {
            write!(f, "{integral}{hundredths:02}%")
        } else if integral < 100 {
            write!(f, "{integral}.{hundredths:02}x")
        } else {
            write!(f, "{}x", (num + denom / 2) / denom)
        }
    }
}

/// `123 bytes = 4.56% decrease`, or `no change`.
#[derive(Debug, Clone, Copy)]
pub struct SizeDifference {
    /// Size before.
    pub before: u64,
    /// Size after.
    pub after: u64,
    /// Append the change relative to `before`.
    pub show_ratio: bool,
}

impl fmt::Display for SizeDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let difference = self.before.abs_diff(self.after);
        match difference {
            0 => return f.write_str("no change"),
            1 => f.write_str("1 byte")?,
            n => write!(f, "{n} bytes")?,
        }
        if self.show_ratio && self.before > 0 {
            let ratio = Ratio {
                num: difference,
                denom: self.before,
                force_percent: true,
            };
            write!(f, " = {ratio}")?;
        }
        f.write_str(if self.after > self.before {
            " increase"
        } else {
            " decrease"
        })
    }
}

/// Batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Files attempted.
    pub files: u32,
    /// Files that failed, plus files whose errors were repaired.
    pub errors: u32,
    /// Files repaired.
    pub fixed: u32,
    /// Multi-image files reduced to their first image.
    pub snipped: u32,
    /// Files that failed.
    pub failed: u32,
}

impl Summary {
    /// True if any file failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Whether the status report is worth printing.
    pub fn is_noteworthy(&self) -> bool {
        self.snipped > 0 || self.errors > 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "** Status report")?;
        write!(f, "{} file(s) have been processed.", self.files)?;
        if self.snipped > 0 {
            write!(f, "\n{} multi-image file(s) have been snipped.", self.snipped)?;
        }
        if self.errors > 0 {
            write!(f, "\n{} error(s) have been encountered.", self.errors)?;
            if self.fixed > 0 {
                write!(f, "\n{} erroneous file(s) have been fixed.", self.fixed)?;
            }
        }
        Ok(())
    }
}

fn tuple(f: &mut fmt::Formatter<'_>, params: &EncodeParams) -> fmt::Result {
    write!(
        f,
        "  zc = {}  zm = {}  zs = {}  f = {}",
        params.level,
        params.mem_level,
        params.strategy.index(),
        params.filter
    )
}

/// Something the optimizer did or found.
#[derive(Debug)]
pub enum Event<'a> {
    /// Work on a file begins.
    Processing {
        /// Input path.
        path: &'a Path,
    },
    /// The input is not a plain PNG file.
    Importing {
        /// Recognized format.
        format: InputFormat,
        /// More than one image found in a non-PNG container.
        multiple: bool,
        /// The input has several images and only the first is kept.
        snip: bool,
    },
    /// The decoded image.
    Image(ImageSummary),
    /// A recoverable problem.
    Warning(&'a str),
    /// A dSIG chunk was found.
    DigitalSignature {
        /// It will be removed.
        erasing: bool,
    },
    /// Multi-image input needs `snip` to become PNG.
    SnipRequired,
    /// Decode recorded recoverable errors.
    RecoverableErrors {
        /// They will be repaired.
        fixing: bool,
    },
    /// Reductions are skipped for animated PNG files.
    ReductionsDisabled,
    /// The image model was reduced.
    Reduced {
        /// The reduced image.
        image: ImageSummary,
        /// Kinds applied.
        reductions: Reductions,
    },
    /// Input measurements.
    InputSizes {
        /// Sizes.
        sizes: InputSizes,
        /// The input had a PNG datastream, so its IDAT size is meaningful.
        has_datastream: bool,
    },
    /// Recompression was disabled but the IDAT must be rewritten.
    RecompressionRequired,
    /// Trials are about to run.
    TrialsStarted {
        /// Trial count.
        total: usize,
    },
    /// One trial finished.
    Trial {
        /// Zero-based position.
        index: usize,
        /// Trial count.
        total: usize,
        /// Parameters tried.
        params: EncodeParams,
        /// IDAT size, or `None` if the trial was abandoned.
        idat_size: Option<u64>,
    },
    /// Parameters for the new IDAT.
    Selected {
        /// Winning parameters.
        params: EncodeParams,
        /// Measured IDAT size; `None` when no trials were needed.
        idat_size: Option<u64>,
    },
    /// Nothing to improve.
    AlreadyOptimized {
        /// Input path.
        path: &'a Path,
    },
    /// Simulation stopped before writing.
    Simulated {
        /// The file that would have been written.
        path: &'a Path,
        /// It would have been a new file.
        created: bool,
    },
    /// A new output file name is in use.
    OutputFile {
        /// Output path.
        path: &'a Path,
    },
    /// The output is written.
    OutputSizes {
        /// Input measurements.
        input: InputSizes,
        /// Output measurements.
        output: OutputSizes,
        /// The input had a PNG datastream.
        has_datastream: bool,
    },
    /// The backup could not be moved back after a failed write.
    RecoveryFailed,
    /// The file could not be optimized.
    Failed {
        /// Input path.
        path: &'a Path,
        /// Reason.
        error: &'a Error,
    },
    /// The batch is complete.
    Finished(Summary),
}

impl Event<'_> {
    /// Log level that suits this event.
    pub fn level(&self) -> Level {
        match self {
            Event::Warning(_)
            | Event::RecompressionRequired
            | Event::SnipRequired
            | Event::RecoveryFailed => Level::Warn,
            Event::Failed { .. } => Level::Error,
            Event::TrialsStarted { .. } | Event::Trial { .. } => Level::Debug,
            _ => Level::Info,
        }
    }
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Processing { path } => write!(f, "** Processing: {}", path.display()),
            Event::Importing {
                format,
                multiple,
                snip,
            } => {
                write!(f, "Importing {format}")?;
                if *multiple {
                    f.write_str(" (multi-image or animation)")?;
                }
                if *snip {
                    f.write_str("; snipping...")?;
                }
                Ok(())
            }
            Event::Image(summary) => write!(f, "{summary}"),
            Event::Warning(message) => write!(f, "Warning: {message}"),
            Event::DigitalSignature { erasing: true } => {
                f.write_str("Digital signature found in input. Erasing...")
            }
            Event::DigitalSignature { erasing: false } => f.write_str(
                "Digital signature found in input. Rerun with -force enabled.",
            ),
            Event::SnipRequired => f.write_str(
                "Conversion to PNG requires snipping. Rerun with -snip enabled.",
            ),
            Event::RecoverableErrors { fixing: true } => {
                f.write_str("Recoverable errors found in input. Fixing...")
            }
            Event::RecoverableErrors { fixing: false } => {
                f.write_str("Recoverable errors found in input. Rerun with -fix enabled.")
            }
            Event::ReductionsDisabled => {
                f.write_str("Can't reliably reduce APNG file; disabling reductions.")
            }
            Event::Reduced { image, .. } => write!(f, "Reducing image to {image}"),
            Event::InputSizes {
                sizes,
                has_datastream,
            } => {
                if *has_datastream {
                    writeln!(f, "Input IDAT size = {} bytes", sizes.idat_size)?;
                }
                write!(f, "Input file size = {} bytes", sizes.file_size)
            }
            Event::RecompressionRequired => {
                f.write_str("Warning: IDAT recompression is required; ignoring -o0 and -nz")
            }
            Event::TrialsStarted { total } => write!(f, "Trying {total} combination(s):"),
            Event::Trial {
                params, idat_size, ..
            } => {
                tuple(f, params)?;
                match idat_size {
                    Some(size) => write!(f, "\t\tIDAT size = {size}"),
                    None => f.write_str("\t\tIDAT too big"),
                }
            }
            Event::Selected { params, idat_size } => {
                f.write_str("Selecting parameters:\n")?;
                tuple(f, params)?;
                if let Some(size) = idat_size {
                    write!(f, "\t\tIDAT size = {size}")?;
                }
                Ok(())
            }
            Event::AlreadyOptimized { path } => {
                write!(f, "{} is already optimized.", path.display())
            }
            Event::Simulated {
                path,
                created: true,
            } => write!(f, "Simulation mode: {} not created.", path.display()),
            Event::Simulated {
                path,
                created: false,
            } => write!(f, "Simulation mode: {} not changed.", path.display()),
            Event::OutputFile { path } => write!(f, "Output file: {}", path.display()),
            Event::OutputSizes {
                input,
                output,
                has_datastream,
            } => {
                write!(f, "Output IDAT size = {} bytes", output.idat_size)?;
                if *has_datastream {
                    let diff = SizeDifference {
                        before: input.idat_size,
                        after: output.idat_size,
                        show_ratio: false,
                    };
                    write!(f, " ({diff})")?;
                }
                let diff = SizeDifference {
                    before: input.file_size,
                    after: output.file_size,
                    show_ratio: true,
                };
                write!(f, "\nOutput file size = {} bytes ({diff})", output.file_size)
            }
            Event::RecoveryFailed => {
                f.write_str("Warning: The original file could not be recovered from the backup")
            }
            Event::Failed { error, .. } => write!(f, "Error: {error}"),
            Event::Finished(summary) => write!(f, "{summary}"),
        }
    }
}

/// Receives events from the optimizer.
pub trait Reporter {
    /// Handle one event.
    fn report(&mut self, event: &Event<'_>);
}

/// Sends every event to the `log` facade at [`Event::level`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: &Event<'_>) {
        if let Event::Finished(summary) = event {
            if !summary.is_noteworthy() {
                return;
            }
        }
        log::log!(event.level(), "{event}");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _event: &Event<'_>) {}
}

/// Keeps every event's text; useful in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    /// Rendered events, in order.
    pub lines: Vec<String>,
}

impl RecordingReporter {
    /// True if any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, event: &Event<'_>) {
        self.lines.push(event.to_string());
    }
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report(&mut self, event: &Event<'_>) {
        (**self).report(event);
    }
}
