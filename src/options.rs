//! Caller-facing configuration.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::params::{ParamSpace, MAX_OPTIM_LEVEL};
use crate::reduce::Reductions;

/// How files are optimized and where results go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Optimization level preset (0-7). `None` uses the default preset
    /// without merging it into explicitly given axes.
    pub optim_level: Option<u8>,
    /// Explicit compression levels, memory levels, strategies and filters.
    pub params: ParamSpace,
    /// Deflate window bits (8-15), or 0 to size the window automatically.
    pub window_bits: u8,
    /// Interlace type of the output (0 or 1); `None` keeps the input's.
    pub interlace: Option<u8>,
    /// Skip bit depth reduction.
    pub no_bit_depth_reduction: bool,
    /// Skip color type reduction.
    pub no_color_type_reduction: bool,
    /// Skip palette reduction.
    pub no_palette_reduction: bool,
    /// Keep the existing IDAT unless it must be rewritten.
    pub no_recompression: bool,
    /// Repair recoverable errors instead of failing.
    pub fix: bool,
    /// Rewrite even when nothing improves, and strip digital signatures.
    pub force: bool,
    /// Run every trial to completion instead of pruning.
    pub full: bool,
    /// Keep backups, and allow replacing an existing output file.
    pub keep: bool,
    /// Copy timestamps and permissions to the output.
    pub preserve: bool,
    /// Report what would happen without writing anything.
    pub simulate: bool,
    /// Keep only the first frame of multi-image input.
    pub snip: bool,
    /// Output file name (single input only).
    pub out: Option<PathBuf>,
    /// Output directory.
    pub dir: Option<PathBuf>,
}

impl Options {
    /// Default options at optimization level `level`.
    pub fn with_level(level: u8) -> Self {
        Self {
            optim_level: Some(level),
            ..Self::default()
        }
    }

    /// Check cross-field rules.
    pub fn validate(&self) -> Result<()> {
        if self.out.is_some() && self.dir.is_some() {
            return Err(Error::InvalidOptions(
                "-out and -dir are mutually exclusive".into(),
            ));
        }
        if self.window_bits != 0 && !(8..=15).contains(&self.window_bits) {
            return Err(Error::InvalidOptions(format!(
                "Invalid window bits: {}",
                self.window_bits
            )));
        }
        if self.interlace.is_some_and(|i| i > 1) {
            return Err(Error::InvalidOptions("Invalid interlace type".into()));
        }
        // Range violations do not depend on the image.
        ParamSpace::resolve(&self.params, self.optim_level, false)?;
        Ok(())
    }

    /// Check rules that depend on the number of inputs.
    pub fn validate_inputs(&self, count: usize) -> Result<()> {
        if self.out.is_some() && count != 1 {
            return Err(Error::InvalidOptions(
                "-out requires one input file".into(),
            ));
        }
        Ok(())
    }

    /// Level 0 and `no_recompression` both leave the IDAT alone.
    pub fn recompression_disabled(&self) -> bool {
        self.no_recompression || self.optim_level == Some(0)
    }

    /// Reductions the caller permits; none when recompression is disabled.
    pub fn allowed_reductions(&self) -> Reductions {
        if self.recompression_disabled() {
            return Reductions::NONE;
        }
        let mut allowed = Reductions::ALL;
        if self.no_bit_depth_reduction {
            allowed.remove(Reductions::BIT_DEPTH);
        }
        if self.no_color_type_reduction {
            allowed.remove(Reductions::COLOR_TYPE);
        }
        if self.no_palette_reduction {
            allowed.remove(Reductions::PALETTE);
        }
        allowed
    }

    /// The optimization level actually applied.
    pub fn effective_level(&self) -> Option<u8> {
        self.optim_level.map(|l| l.min(MAX_OPTIM_LEVEL))
    }
}
