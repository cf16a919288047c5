//! Per-file orchestration.
//!
//! For each input: decode it, apply policy to what the decoder found,
//! reduce the image, search the parameter space, and commit the result only
//! when it is smaller or a rewrite is mandatory.

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use log::debug;

use crate::commit::FilePlan;
use crate::error::{ensure_invariant, Error, Result};
use crate::image::Image;
use crate::options::Options;
use crate::params::ParamSpace;
use crate::png::decode::{decode_png, is_png, Decoded, InputFormat};
use crate::png::encode::Encoder;
use crate::pnm::{decode_pnm, is_pnm};
use crate::reduce::{LosslessReducer, Reducer, Reductions};
use crate::report::{Event, ImageSummary, Reporter, Summary};
use crate::search::{initial_ceiling, Best, Search};
use crate::status::RunStatus;
use crate::stream::{copy_datastream, ChunkPolicy, InputSizes, OutputSizes, WriteHook, WriteSeek};

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    /// Final run status.
    pub status: RunStatus,
    /// Input measurements.
    pub input: InputSizes,
    /// Reductions applied to the image.
    pub reductions: Reductions,
    /// Parameters of the new IDAT, if one was selected.
    pub best: Option<Best>,
    /// The file written and its measurements; `None` when nothing was written.
    pub written: Option<(PathBuf, OutputSizes)>,
}

/// Optimizes files one at a time, reporting to `R`.
pub struct Optimizer<R: Reporter> {
    options: Options,
    reducer: Box<dyn Reducer>,
    reporter: R,
    summary: Summary,
}

impl<R: Reporter> Optimizer<R> {
    /// Validate `options` and build an optimizer with the lossless reducer.
    pub fn new(options: Options, reporter: R) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            reducer: Box::new(LosslessReducer),
            reporter,
            summary: Summary::default(),
        })
    }

    /// Replace the image reducer.
    pub fn with_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.reducer = Box::new(reducer);
        self
    }

    /// The options in effect.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Counters so far.
    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Give back the reporter.
    pub fn into_reporter(self) -> R {
        self.reporter
    }

    /// Optimize every file in `paths`, then report the summary.
    ///
    /// A file that fails is counted and skipped. Only a broken internal
    /// invariant stops the batch.
    pub fn run<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Summary> {
        self.options.validate_inputs(paths.len())?;
        for path in paths {
            if let Err(err) = self.optimize(path.as_ref()) {
                if err.is_internal() {
                    return Err(err);
                }
            }
        }
        self.reporter.report(&Event::Finished(self.summary));
        Ok(self.summary)
    }

    /// Optimize one file. Failures are counted and reported before being
    /// returned.
    pub fn optimize(&mut self, path: &Path) -> Result<FileOutcome> {
        self.summary.files += 1;
        self.reporter.report(&Event::Processing { path });
        let result = FileJob {
            options: &self.options,
            reducer: self.reducer.as_ref(),
            reporter: &mut self.reporter,
            summary: &mut self.summary,
            path,
        }
        .run();
        if let Err(err) = &result {
            self.summary.errors += 1;
            self.summary.failed += 1;
            self.reporter.report(&Event::Failed { path, error: err });
        }
        result
    }
}

/// State for optimizing one file.
struct FileJob<'a> {
    options: &'a Options,
    reducer: &'a dyn Reducer,
    reporter: &'a mut dyn Reporter,
    summary: &'a mut Summary,
    path: &'a Path,
}

impl FileJob<'_> {
    fn run(mut self) -> Result<FileOutcome> {
        let options = self.options;
        let data = fs::read(self.path)
            .map_err(|source| Error::file("Can't open the input file", self.path, source))?;
        let mut decoded = read_image(&data, options.snip)?;
        for warning in &decoded.warnings {
            self.reporter.report(&Event::Warning(warning));
        }
        let mut status = decoded.status;
        if options.force {
            status.insert(RunStatus::NEEDS_NEW_IDAT);
        }
        self.report_import(&decoded, status);
        let reductions = self.prepare_image(&mut decoded.image, &mut status)?;
        self.apply_policy(&mut status)?;

        let plan = FilePlan::new(
            self.path,
            status.contains(RunStatus::IS_PNG_FILE),
            options,
        )?;
        if !options.simulate {
            plan.preflight(options.keep)?;
        }

        let input = decoded.sizes;
        let has_datastream = status.contains(RunStatus::HAS_PNG_DATASTREAM);
        self.reporter.report(&Event::InputSizes {
            sizes: input,
            has_datastream,
        });
        if options.recompression_disabled()
            && has_datastream
            && status.contains(RunStatus::NEEDS_NEW_IDAT)
        {
            self.reporter.report(&Event::RecompressionRequired);
        }

        let policy = ChunkPolicy { snip: options.snip };
        let best = if !options.recompression_disabled() || status.contains(RunStatus::NEEDS_NEW_IDAT)
        {
            self.search(&decoded.image, &input, policy, &mut status)?
        } else {
            None
        };
        if status.contains(RunStatus::NEEDS_NEW_IDAT) {
            status.insert(RunStatus::NEEDS_NEW_FILE);
        }

        let mut outcome = FileOutcome {
            status,
            input,
            reductions,
            best,
            written: None,
        };
        if !status.contains(RunStatus::NEEDS_NEW_FILE) {
            self.reporter.report(&Event::AlreadyOptimized { path: self.path });
            if !plan.new_output {
                return Ok(outcome);
            }
        }
        if options.simulate {
            self.reporter.report(&Event::Simulated {
                path: &plan.output,
                created: plan.new_output,
            });
            return Ok(outcome);
        }

        let image = &decoded.image;
        let output = plan.commit(options, &mut *self.reporter, |sink| {
            write_output(sink, image, &data, &input, best, status, policy)
        })?;
        self.reporter.report(&Event::OutputSizes {
            input,
            output,
            has_datastream,
        });
        outcome.written = Some((plan.output, output));
        Ok(outcome)
    }

    fn report_import(&mut self, decoded: &Decoded, status: RunStatus) {
        let multiple = status.contains(RunStatus::HAS_MULTIPLE_IMAGES);
        if decoded.format != InputFormat::Png {
            self.reporter.report(&Event::Importing {
                format: decoded.format,
                multiple: multiple && !status.contains(RunStatus::IS_PNG_FILE),
                snip: multiple && self.options.snip,
            });
        }
        if let Some(summary) = ImageSummary::of(&decoded.image) {
            self.reporter.report(&Event::Image(summary));
        }
    }

    /// Reduce the image and apply the interlace override.
    fn prepare_image(&mut self, image: &mut Image, status: &mut RunStatus) -> Result<Reductions> {
        let options = self.options;
        let mut allowed = options.allowed_reductions();
        if status.contains(RunStatus::HAS_DIGITAL_SIGNATURE) {
            allowed = Reductions::NONE;
        }
        if status.contains(RunStatus::IS_PNG_FILE | RunStatus::HAS_MULTIPLE_IMAGES)
            && !allowed.is_empty()
            && !options.snip
        {
            self.reporter.report(&Event::ReductionsDisabled);
            allowed = Reductions::NONE;
        }

        let applied = if allowed.is_empty() {
            Reductions::NONE
        } else {
            self.reducer.reduce(image, allowed)?
        };
        if !applied.is_empty() {
            status.insert(RunStatus::NEEDS_NEW_IDAT);
            if let Some(summary) = ImageSummary::of(image) {
                self.reporter.report(&Event::Reduced {
                    image: summary,
                    reductions: applied,
                });
            }
        }

        if let Some(interlace) = options.interlace {
            if let Some(header) = image.header.as_mut() {
                if header.interlace_type != interlace {
                    header.interlace_type = interlace;
                    status.insert(RunStatus::NEEDS_NEW_IDAT);
                }
            }
        }
        Ok(applied)
    }

    /// Turn decoder findings into rewrite decisions, or refuse the file.
    fn apply_policy(&mut self, status: &mut RunStatus) -> Result<()> {
        let options = self.options;
        if !status.contains(RunStatus::HAS_PNG_DATASTREAM) {
            status.insert(RunStatus::NEEDS_NEW_IDAT);
        }
        if !status.contains(RunStatus::HAS_PNG_SIGNATURE) {
            status.insert(RunStatus::NEEDS_NEW_FILE);
        }

        if status.contains(RunStatus::HAS_DIGITAL_SIGNATURE) {
            self.reporter.report(&Event::DigitalSignature {
                erasing: options.force,
            });
            if !options.force {
                return Err(Error::DigitallySigned);
            }
            status.insert(RunStatus::NEEDS_NEW_FILE);
        }

        if status.contains(RunStatus::HAS_MULTIPLE_IMAGES) {
            if options.snip {
                self.summary.snipped += 1;
            } else if !status.contains(RunStatus::IS_PNG_FILE) {
                self.reporter.report(&Event::SnipRequired);
                return Err(Error::IncompatibleFormat);
            }
        }
        if status.contains(RunStatus::HAS_APNG) && options.snip {
            status.insert(RunStatus::NEEDS_NEW_FILE);
        }
        if status.contains(RunStatus::HAS_JUNK) {
            status.insert(RunStatus::NEEDS_NEW_FILE);
        }

        if status.contains(RunStatus::HAS_ERRORS) {
            self.reporter.report(&Event::RecoverableErrors { fixing: options.fix });
            if !options.fix {
                return Err(Error::ErrorsNotFixed);
            }
            status.insert(RunStatus::NEEDS_NEW_FILE);
            self.summary.errors += 1;
            self.summary.fixed += 1;
        }
        Ok(())
    }

    /// Search the parameter space; sets `NEEDS_NEW_IDAT` when the best
    /// tuple beats the input.
    fn search(
        &mut self,
        image: &Image,
        input: &InputSizes,
        policy: ChunkPolicy,
        status: &mut RunStatus,
    ) -> Result<Option<Best>> {
        let options = self.options;
        let low_depth_or_palette = image.bit_depth() < 8 || image.palette.is_some();
        let space = ParamSpace::resolve(&options.params, options.effective_level(), low_depth_or_palette)?;
        let needs_new_idat = status.contains(RunStatus::NEEDS_NEW_IDAT);
        let ceiling = initial_ceiling(needs_new_idat, options.full, input);

        let result = Search::new(image, space, options.window_bits, policy, options.full).run(
            ceiling,
            needs_new_idat,
            &mut *self.reporter,
        )?;
        debug!(
            "{} trial(s), best {:?}, PLTE+tRNS {} bytes",
            result.trials, result.best, result.plte_trns_size
        );
        if result.improves(input) {
            status.insert(RunStatus::NEEDS_NEW_IDAT);
        }
        if !status.contains(RunStatus::NEEDS_NEW_IDAT) {
            return Ok(None);
        }
        let best = result.best.ok_or(Error::NoEncoding)?;
        self.reporter.report(&Event::Selected {
            params: best.params,
            idat_size: (best.idat_size > 0).then_some(best.idat_size),
        });
        Ok(Some(best))
    }
}

/// Decode `data` as PNG, or import it as PNM.
fn read_image(data: &[u8], snip: bool) -> Result<Decoded> {
    if is_png(data)? {
        decode_png(data, snip)
    } else if is_pnm(data) {
        decode_pnm(data)
    } else {
        Err(Error::UnrecognizedFormat)
    }
}

/// Write the output datastream: a fresh encoding of `image` when a new IDAT
/// is needed, otherwise a re-chunked copy of the input datastream.
fn write_output(
    sink: &mut dyn WriteSeek,
    image: &Image,
    data: &[u8],
    input: &InputSizes,
    best: Option<Best>,
    status: RunStatus,
    policy: ChunkPolicy,
) -> Result<OutputSizes> {
    if status.contains(RunStatus::NEEDS_NEW_IDAT) {
        let best = best.ok_or(Error::NoEncoding)?;
        let mut hook = WriteHook::commit(sink, best.idat_size, policy);
        let flow = Encoder::new(image)?.encode(&best.params, &mut hook)?;
        ensure_invariant!(flow == ControlFlow::Continue(()), "Commit write was cut short");
        return Ok(hook.sizes());
    }
    let offset = usize::try_from(input.datastream_offset)
        .ok()
        .filter(|&offset| offset <= data.len())
        .ok_or(Error::Internal("Datastream offset out of range"))?;
    let mut hook = WriteHook::commit(sink, input.idat_size, policy);
    let mut datastream = &data[offset..];
    copy_datastream(&mut datastream, &mut hook)?;
    hook.flush()?;
    Ok(hook.sizes())
}
