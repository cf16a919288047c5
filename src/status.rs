//! Per-file run status: facts discovered while reading, plus the rewrite
//! decisions derived from them.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of status flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunStatus(u32);

impl RunStatus {
    /// The datastream starts at offset 0 of the file.
    pub const IS_PNG_FILE: RunStatus = RunStatus(0x0001);
    /// A PNG datastream was found (with or without signature).
    pub const HAS_PNG_DATASTREAM: RunStatus = RunStatus(0x0002);
    /// The datastream starts with the PNG signature.
    pub const HAS_PNG_SIGNATURE: RunStatus = RunStatus(0x0004);
    /// A dSIG chunk was seen.
    pub const HAS_DIGITAL_SIGNATURE: RunStatus = RunStatus(0x0008);
    /// The input holds more than one image (fdAT, or a multi-image import).
    pub const HAS_MULTIPLE_IMAGES: RunStatus = RunStatus(0x0010);
    /// APNG chunks were seen.
    pub const HAS_APNG: RunStatus = RunStatus(0x0020);
    /// Split IDAT, dropped chunks, or trailing garbage.
    pub const HAS_JUNK: RunStatus = RunStatus(0x0040);
    /// Recoverable decode errors were downgraded to warnings.
    pub const HAS_ERRORS: RunStatus = RunStatus(0x0080);
    /// The output file must be written.
    pub const NEEDS_NEW_FILE: RunStatus = RunStatus(0x0100);
    /// The image data must be re-encoded.
    pub const NEEDS_NEW_IDAT: RunStatus = RunStatus(0x0200);

    const NAMES: [(RunStatus, &'static str); 10] = [
        (Self::IS_PNG_FILE, "IS_PNG_FILE"),
        (Self::HAS_PNG_DATASTREAM, "HAS_PNG_DATASTREAM"),
        (Self::HAS_PNG_SIGNATURE, "HAS_PNG_SIGNATURE"),
        (Self::HAS_DIGITAL_SIGNATURE, "HAS_DIGITAL_SIGNATURE"),
        (Self::HAS_MULTIPLE_IMAGES, "HAS_MULTIPLE_IMAGES"),
        (Self::HAS_APNG, "HAS_APNG"),
        (Self::HAS_JUNK, "HAS_JUNK"),
        (Self::HAS_ERRORS, "HAS_ERRORS"),
        (Self::NEEDS_NEW_FILE, "NEEDS_NEW_FILE"),
        (Self::NEEDS_NEW_IDAT, "NEEDS_NEW_IDAT"),
    ];

    /// No flags.
    pub const fn empty() -> Self {
        RunStatus(0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: RunStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags in `other`. Requesting a new IDAT also requests a new file.
    pub fn insert(&mut self, other: RunStatus) {
        self.0 |= other.0;
        if self.contains(Self::NEEDS_NEW_IDAT) {
            self.0 |= Self::NEEDS_NEW_FILE.0;
        }
    }

    /// Clear every flag.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl BitOr for RunStatus {
    type Output = RunStatus;

    fn bitor(self, rhs: RunStatus) -> RunStatus {
        RunStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for RunStatus {
    fn bitor_assign(&mut self, rhs: RunStatus) {
        self.insert(rhs);
    }
}

impl fmt::Debug for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}
