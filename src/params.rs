//! The encoder parameter space.
//!
//! Each axis (compression level, memory level, strategy, filter) is a small
//! set of integers. The space searched for a file is the caller's sets,
//! limited to the legal range of each axis and merged with the preset of the
//! optimization level.

use std::fmt;
use std::str::FromStr;

use crate::compress::deflate::Strategy;
use crate::error::{ensure_invariant, Error, Result};
use crate::png::encode::EncodeParams;

/// Highest optimization level with its own preset.
pub const MAX_OPTIM_LEVEL: u8 = 7;

/// Preset used when no optimization level is given.
pub const DEFAULT_OPTIM_LEVEL: u8 = 2;

/// A set of small non-negative integers (0-31).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParamSet(u32);

impl ParamSet {
    /// Largest member value.
    pub const MAX: u8 = 31;

    /// The empty set.
    pub const EMPTY: ParamSet = ParamSet(0);

    /// `{value}`.
    pub const fn single(value: u8) -> Self {
        ParamSet(1 << value)
    }

    /// `{lo, ..., hi}`; empty when `lo > hi`.
    pub const fn range(lo: u8, hi: u8) -> Self {
        if lo > hi {
            return Self::EMPTY;
        }
        let upper = if hi >= Self::MAX { u32::MAX } else { (1u32 << (hi + 1)) - 1 };
        ParamSet(upper & !((1u32 << lo) - 1))
    }

    /// Both sets' members.
    pub const fn union(self, other: ParamSet) -> Self {
        ParamSet(self.0 | other.0)
    }

    /// Members common to both sets.
    pub const fn intersection(self, other: ParamSet) -> Self {
        ParamSet(self.0 & other.0)
    }

    /// Members of `self` not in `other`.
    pub const fn difference(self, other: ParamSet) -> Self {
        ParamSet(self.0 & !other.0)
    }

    /// Membership test.
    pub const fn contains(self, value: u8) -> bool {
        value <= Self::MAX && self.0 & (1 << value) != 0
    }

    /// Number of members.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True if there are no members.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Smallest member.
    pub fn first(self) -> Option<u8> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() as u8)
    }

    /// Members in ascending order; reverse for descending.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = u8> {
        (0..=Self::MAX).filter(move |&v| self.contains(v))
    }

    /// Parse an enumeration such as `"1-9"`, `"0,5"`, `"0-"` or `"-3;7"`.
    ///
    /// An open range end means 0 or the largest member value.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidOptions(format!("Invalid parameter set: {text}"));
        let number = |s: &str, default: u8| -> Result<u8> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(default);
            }
            s.parse::<u8>()
                .ok()
                .filter(|&v| v <= Self::MAX)
                .ok_or_else(invalid)
        };

        let mut set = Self::EMPTY;
        for item in text.split([',', ';']) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if !item.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b.is_ascii_whitespace()) {
                return Err(invalid());
            }
            let members = match item.split_once('-') {
                Some((lo, hi)) => Self::range(number(lo, 0)?, number(hi, Self::MAX)?),
                None => Self::single(number(item, 0)?),
            };
            set = set.union(members);
        }
        Ok(set)
    }
}

impl FromStr for ParamSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Formats as a parsable enumeration with maximal ranges, e.g. `0-3,5`.
impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut values = self.iter().peekable();
        let mut first = true;
        while let Some(lo) = values.next() {
            let mut hi = lo;
            while values.peek() == Some(&(hi + 1)) {
                hi += 1;
                values.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if hi == lo {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{self}}}")
    }
}

/// One dimension of the parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// zlib compression level.
    CompressionLevel,
    /// zlib memory level.
    MemoryLevel,
    /// zlib strategy.
    Strategy,
    /// PNG filter selector.
    Filter,
}

const PRESETS_LEVEL: [ParamSet; 8] = [
    ParamSet::EMPTY,
    ParamSet::EMPTY,
    ParamSet::single(9),
    ParamSet::single(9),
    ParamSet::single(9),
    ParamSet::single(9),
    ParamSet::range(1, 9),
    ParamSet::range(1, 9),
];

const PRESETS_MEMORY: [ParamSet; 8] = [
    ParamSet::EMPTY,
    ParamSet::EMPTY,
    ParamSet::single(8),
    ParamSet::range(8, 9),
    ParamSet::single(8),
    ParamSet::range(8, 9),
    ParamSet::single(8),
    ParamSet::range(8, 9),
];

const PRESETS_STRATEGY: [ParamSet; 8] = [
    ParamSet::EMPTY,
    ParamSet::EMPTY,
    ParamSet::range(0, 3),
    ParamSet::range(0, 3),
    ParamSet::range(0, 3),
    ParamSet::range(0, 3),
    ParamSet::range(0, 3),
    ParamSet::range(0, 3),
];

const PRESETS_FILTER: [ParamSet; 8] = [
    ParamSet::EMPTY,
    ParamSet::EMPTY,
    ParamSet::single(0).union(ParamSet::single(5)),
    ParamSet::single(0).union(ParamSet::single(5)),
    ParamSet::range(0, 5),
    ParamSet::range(0, 5),
    ParamSet::range(0, 5),
    ParamSet::range(0, 5),
];

impl Axis {
    /// Legal values.
    pub const fn mask(self) -> ParamSet {
        match self {
            Axis::CompressionLevel | Axis::MemoryLevel => ParamSet::range(1, 9),
            Axis::Strategy => ParamSet::range(0, 3),
            Axis::Filter => ParamSet::range(0, 5),
        }
    }

    /// Values tried at optimization level `level` (clamped to the table).
    pub fn preset(self, level: u8) -> ParamSet {
        let index = usize::from(level.min(MAX_OPTIM_LEVEL));
        match self {
            Axis::CompressionLevel => PRESETS_LEVEL[index],
            Axis::MemoryLevel => PRESETS_MEMORY[index],
            Axis::Strategy => PRESETS_STRATEGY[index],
            Axis::Filter => PRESETS_FILTER[index],
        }
    }

    /// Combine the caller's set with the preset.
    ///
    /// The preset is merged in when the caller's set is empty or when an
    /// optimization level was given explicitly.
    fn resolve(self, requested: ParamSet, optim_level: Option<u8>) -> Result<ParamSet> {
        let mask = self.mask();
        let mut set = requested.intersection(mask);
        if !requested.is_empty() && set.is_empty() {
            return Err(Error::IterationOutOfRange);
        }
        if set.is_empty() || optim_level.is_some() {
            let preset = self.preset(optim_level.unwrap_or(DEFAULT_OPTIM_LEVEL));
            set = set.union(preset.intersection(mask));
        }
        Ok(set)
    }
}

const FAST_STRATEGIES: ParamSet = ParamSet::range(2, 3);

/// The four axes of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamSpace {
    /// zlib compression levels.
    pub levels: ParamSet,
    /// zlib memory levels.
    pub mem_levels: ParamSet,
    /// zlib strategies, by number.
    pub strategies: ParamSet,
    /// PNG filter selectors.
    pub filters: ParamSet,
}

impl ParamSpace {
    /// Resolve the space searched for one image.
    ///
    /// `low_depth_or_palette` picks the fallback for axes left empty: images
    /// with a palette or fewer than 8 bits per sample default to no filter
    /// and the default strategy, others to adaptive filtering and the
    /// filtered strategy.
    pub fn resolve(
        requested: &ParamSpace,
        optim_level: Option<u8>,
        low_depth_or_palette: bool,
    ) -> Result<Self> {
        let mut space = ParamSpace {
            levels: Axis::CompressionLevel.resolve(requested.levels, optim_level)?,
            mem_levels: Axis::MemoryLevel.resolve(requested.mem_levels, optim_level)?,
            strategies: Axis::Strategy.resolve(requested.strategies, optim_level)?,
            filters: Axis::Filter.resolve(requested.filters, optim_level)?,
        };
        if space.levels.is_empty() {
            space.levels = ParamSet::single(9);
        }
        if space.mem_levels.is_empty() {
            space.mem_levels = ParamSet::single(8);
        }
        let (strategy, filter) = if low_depth_or_palette { (0, 0) } else { (1, 5) };
        if space.strategies.is_empty() {
            space.strategies = ParamSet::single(strategy);
        }
        if space.filters.is_empty() {
            space.filters = ParamSet::single(filter);
        }
        ensure_invariant!(space.num_trials() > 0, "Invalid iteration parameters");
        Ok(space)
    }

    /// Levels tried under `strategy`: Huffman-only runs once at level 1 and
    /// RLE once at level 9.
    pub fn levels_for(&self, strategy: Strategy) -> ParamSet {
        match strategy {
            Strategy::HuffmanOnly => ParamSet::single(1),
            Strategy::Rle => ParamSet::single(9),
            _ => self.levels,
        }
    }

    /// Number of tuples [`trials`](Self::trials) yields.
    pub fn num_trials(&self) -> usize {
        let slow = self.levels.len() * self.strategies.difference(FAST_STRATEGIES).len();
        let fast = self.strategies.intersection(FAST_STRATEGIES).len();
        (slow + fast) * self.mem_levels.len() * self.filters.len()
    }

    /// Tuples in search order: filter and strategy ascending, then level and
    /// memory level descending.
    pub fn trials(&self, window_bits: u8) -> impl Iterator<Item = EncodeParams> + '_ {
        self.filters.iter().flat_map(move |filter| {
            self.strategies
                .iter()
                .filter_map(Strategy::from_index)
                .flat_map(move |strategy| {
                    self.levels_for(strategy).iter().rev().flat_map(move |level| {
                        self.mem_levels.iter().rev().map(move |mem_level| EncodeParams {
                            level,
                            mem_level,
                            strategy,
                            filter,
                            window_bits,
                        })
                    })
                })
        })
    }

    /// The smallest value of every axis; the only tuple of a one-trial space.
    pub fn first(&self, window_bits: u8) -> Option<EncodeParams> {
        let strategy = Strategy::from_index(self.strategies.first()?)?;
        Some(EncodeParams {
            level: self.levels_for(strategy).first()?,
            mem_level: self.mem_levels.first()?,
            strategy,
            filter: self.filters.first()?,
            window_bits,
        })
    }
}
