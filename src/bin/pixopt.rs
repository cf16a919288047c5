//! pixopt CLI - lossless PNG optimizer
//!
//! Optimizes PNG files in place (or into `--out`/`--dir`), and converts PNM
//! images to PNG.

use std::path::PathBuf;

use clap::Parser;

use pixopt::report::Event;
use pixopt::{Optimizer, Options, ParamSet, ParamSpace, Reporter};

/// A lossless PNG optimizer.
///
/// Tries combinations of zlib and PNG filter parameters and keeps the
/// smallest result. Also imports PBM, PGM and PPM files.
#[derive(Parser, Debug)]
#[command(name = "pixopt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files (PNG, PBM, PGM or PPM)
    #[arg(value_name = "FILES", required = true)]
    files: Vec<PathBuf>,

    /// Optimization level (0-7)
    #[arg(short = 'o', long = "optimization-level", value_name = "LEVEL")]
    level: Option<u8>,

    /// zlib compression levels, e.g. "1-9" or "9"
    #[arg(long, value_name = "SET")]
    zc: Option<ParamSet>,

    /// zlib memory levels, e.g. "8-9"
    #[arg(long, value_name = "SET")]
    zm: Option<ParamSet>,

    /// zlib strategies (0-3)
    #[arg(long, value_name = "SET")]
    zs: Option<ParamSet>,

    /// PNG delta filters (0-5, 5 = adaptive)
    #[arg(short = 'f', long = "filters", value_name = "SET")]
    filters: Option<ParamSet>,

    /// zlib window size (256, 512, 1k, ... 32k)
    #[arg(long, value_name = "SIZE", value_parser = parse_window_size)]
    zw: Option<u8>,

    /// PNG interlace type (0 = none, 1 = Adam7)
    #[arg(short = 'i', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    interlace: Option<u8>,

    /// No bit depth reduction
    #[arg(long)]
    nb: bool,

    /// No color type reduction
    #[arg(long)]
    nc: bool,

    /// No palette reduction
    #[arg(long)]
    np: bool,

    /// No IDAT recompression (also disables all reductions)
    #[arg(long)]
    nz: bool,

    /// Fix recoverable errors (may lose data)
    #[arg(long)]
    fix: bool,

    /// Write a new output even if it is larger than the input
    #[arg(long)]
    force: bool,

    /// Run every trial to completion instead of pruning
    #[arg(long)]
    full: bool,

    /// Keep backups of modified files
    #[arg(long)]
    keep: bool,

    /// Preserve file attributes if possible
    #[arg(long)]
    preserve: bool,

    /// Show errors only
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Report what would be done, without writing anything
    #[arg(long)]
    simulate: bool,

    /// Cut multi-image files down to their first image
    #[arg(long)]
    snip: bool,

    /// Output file (single input only)
    #[arg(long, value_name = "FILE", conflicts_with = "dir")]
    out: Option<PathBuf>,

    /// Output directory
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Show every trial
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> Options {
        Options {
            optim_level: self.level,
            params: ParamSpace {
                levels: self.zc.unwrap_or(ParamSet::EMPTY),
                mem_levels: self.zm.unwrap_or(ParamSet::EMPTY),
                strategies: self.zs.unwrap_or(ParamSet::EMPTY),
                filters: self.filters.unwrap_or(ParamSet::EMPTY),
            },
            window_bits: self.zw.unwrap_or(0),
            interlace: self.interlace,
            no_bit_depth_reduction: self.nb,
            no_color_type_reduction: self.nc,
            no_palette_reduction: self.np,
            no_recompression: self.nz,
            fix: self.fix,
            force: self.force,
            full: self.full,
            keep: self.keep,
            preserve: self.preserve,
            simulate: self.simulate,
            snip: self.snip,
            out: self.out.clone(),
            dir: self.dir.clone(),
        }
    }
}

/// Window size in bytes (with an optional `k` suffix) to window bits.
fn parse_window_size(text: &str) -> Result<u8, String> {
    let text = text.trim();
    let (digits, scale) = match text.strip_suffix(['k', 'K']) {
        Some(digits) => (digits, 1024),
        None => (text, 1),
    };
    let size = digits
        .parse::<u32>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| format!("invalid window size: {text}"))?;
    if !size.is_power_of_two() || !(256..=32 * 1024).contains(&size) {
        return Err(format!("window size must be a power of two from 256 to 32k: {text}"));
    }
    Ok(size.trailing_zeros() as u8)
}

/// Prints events to stderr.
struct TextReporter {
    quiet: bool,
    verbose: bool,
}

impl Reporter for TextReporter {
    fn report(&mut self, event: &Event<'_>) {
        let show = match event {
            Event::Failed { .. } | Event::RecoveryFailed => true,
            _ if self.quiet => false,
            Event::TrialsStarted { .. } | Event::Trial { .. } => self.verbose,
            Event::Finished(summary) => summary.is_noteworthy(),
            _ => true,
        };
        if show {
            eprintln!("{event}");
        }
    }
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns false if any file failed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let reporter = TextReporter {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let mut optimizer = Optimizer::new(args.options(), reporter)?;
    let summary = optimizer.run(&args.files)?;
    Ok(!summary.has_failures())
}
