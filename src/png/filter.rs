//! PNG scanline filtering.
//!
//! PNG uses filtering to improve compression by exploiting correlations
//! between adjacent pixels. Filter selectors 0-4 apply one filter type to
//! every row; selector 5 picks the type per row by the minimum sum of
//! absolute differences, the heuristic zlib-based encoders have always used.

use crate::error::{Error, Result};

/// Filter type bytes as defined by PNG specification.
pub const FILTER_NONE: u8 = 0;
/// Difference from the left pixel.
pub const FILTER_SUB: u8 = 1;
/// Difference from the pixel above.
pub const FILTER_UP: u8 = 2;
/// Difference from the mean of left and above.
pub const FILTER_AVERAGE: u8 = 3;
/// Difference from the Paeth predictor.
pub const FILTER_PAETH: u8 = 4;
/// Selector choosing a filter per row.
pub const FILTER_ADAPTIVE: u8 = 5;

/// Scratch buffers reused for adaptive filtering to reduce per-row allocations.
struct AdaptiveScratch {
    candidates: [Vec<u8>; 5],
}

impl AdaptiveScratch {
    fn new(row_len: usize) -> Self {
        Self {
            candidates: std::array::from_fn(|_| Vec::with_capacity(row_len)),
        }
    }
}

/// Filters consecutive rows of one pass, remembering the previous row.
pub struct RowFilter {
    selector: u8,
    bpp: usize,
    prev: Vec<u8>,
    scratch: AdaptiveScratch,
}

impl RowFilter {
    /// A filter for `selector` (0-5) over rows of up to `row_len` bytes.
    pub fn new(selector: u8, bpp: usize, row_len: usize) -> Self {
        Self {
            selector: selector.min(FILTER_ADAPTIVE),
            bpp,
            prev: Vec::with_capacity(row_len),
            scratch: AdaptiveScratch::new(row_len),
        }
    }

    /// Start a new pass; the next row sees an all-zero row above it.
    pub fn reset(&mut self) {
        self.prev.clear();
    }

    /// Append the filter byte and filtered bytes of `row` to `output`.
    pub fn filter_row(&mut self, row: &[u8], output: &mut Vec<u8>) {
        if self.prev.len() != row.len() {
            self.prev.clear();
            self.prev.resize(row.len(), 0);
        }
        if self.selector == FILTER_ADAPTIVE {
            adaptive_filter(row, &self.prev, self.bpp, output, &mut self.scratch);
        } else {
            output.push(self.selector);
            apply_filter_type(self.selector, row, &self.prev, self.bpp, output);
        }
        self.prev.copy_from_slice(row);
    }
}

/// Filter whole rows with one selector, as a single pass.
pub fn filter_rows<'a>(
    rows: impl IntoIterator<Item = &'a [u8]>,
    bpp: usize,
    selector: u8,
    row_len: usize,
) -> Vec<u8> {
    let mut filter = RowFilter::new(selector, bpp, row_len);
    let mut output = Vec::new();
    for row in rows {
        filter.filter_row(row, &mut output);
    }
    output
}

fn apply_filter_type(filter: u8, row: &[u8], prev_row: &[u8], bpp: usize, output: &mut Vec<u8>) {
    match filter {
        FILTER_SUB => filter_sub(row, bpp, output),
        FILTER_UP => filter_up(row, prev_row, output),
        FILTER_AVERAGE => filter_average(row, prev_row, bpp, output),
        FILTER_PAETH => filter_paeth(row, prev_row, bpp, output),
        _ => output.extend_from_slice(row),
    }
}

/// Sub filter: difference from left pixel.
fn filter_sub(row: &[u8], bpp: usize, output: &mut Vec<u8>) {
    for (i, &byte) in row.iter().enumerate() {
        let left = if i >= bpp { row[i - bpp] } else { 0 };
        output.push(byte.wrapping_sub(left));
    }
}

/// Up filter: difference from above pixel.
fn filter_up(row: &[u8], prev_row: &[u8], output: &mut Vec<u8>) {
    for (i, &byte) in row.iter().enumerate() {
        output.push(byte.wrapping_sub(prev_row[i]));
    }
}

/// Average filter: difference from average of left and above.
fn filter_average(row: &[u8], prev_row: &[u8], bpp: usize, output: &mut Vec<u8>) {
    for (i, &byte) in row.iter().enumerate() {
        let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
        let above = prev_row[i] as u16;
        output.push(byte.wrapping_sub(((left + above) / 2) as u8));
    }
}

/// Paeth filter: difference from Paeth predictor.
fn filter_paeth(row: &[u8], prev_row: &[u8], bpp: usize, output: &mut Vec<u8>) {
    for (i, &byte) in row.iter().enumerate() {
        let left = if i >= bpp { row[i - bpp] } else { 0 };
        let above = prev_row[i];
        let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
        output.push(byte.wrapping_sub(paeth_predictor(left, above, upper_left)));
    }
}

/// Paeth predictor function.
///
/// Selects the value (a, b, or c) closest to p = a + b - c.
#[inline]
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let a_i = a as i16;
    let b_i = b as i16;
    let c_i = c as i16;

    let p = a_i + b_i - c_i;
    let pa = (p - a_i).abs();
    let pb = (p - b_i).abs();
    let pc = (p - c_i).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Try all five filters and keep the one with the lowest score.
/// Ties go to the lower filter type.
fn adaptive_filter(
    row: &[u8],
    prev_row: &[u8],
    bpp: usize,
    output: &mut Vec<u8>,
    scratch: &mut AdaptiveScratch,
) {
    let mut best_filter = FILTER_NONE;
    let mut best_score = u64::MAX;
    for filter in FILTER_NONE..=FILTER_PAETH {
        let candidate = &mut scratch.candidates[filter as usize];
        candidate.clear();
        apply_filter_type(filter, row, prev_row, bpp, candidate);
        let score = score_filter(candidate);
        if score < best_score {
            best_score = score;
            best_filter = filter;
        }
        // A score of 0 means all zeros - can't do better
        if best_score == 0 {
            break;
        }
    }

    output.push(best_filter);
    output.extend_from_slice(&scratch.candidates[best_filter as usize]);
}

/// Score a filtered row using sum of absolute values.
///
/// Lower scores typically result in better compression.
#[inline]
fn score_filter(filtered: &[u8]) -> u64 {
    filtered
        .iter()
        .map(|&b| (b as i8).unsigned_abs() as u64)
        .sum()
}

/// Reverse the filter on `row` in place, given the reconstructed row above.
pub fn unfilter_row(filter: u8, row: &mut [u8], prev_row: &[u8], bpp: usize) -> Result<()> {
    match filter {
        FILTER_NONE => {}
        FILTER_SUB => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        FILTER_UP => {
            for (byte, &above) in row.iter_mut().zip(prev_row) {
                *byte = byte.wrapping_add(above);
            }
        }
        FILTER_AVERAGE => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let above = prev_row[i] as u16;
                row[i] = row[i].wrapping_add(((left + above) / 2) as u8);
            }
        }
        FILTER_PAETH => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                row[i] = row[i].wrapping_add(paeth_predictor(left, prev_row[i], upper_left));
            }
        }
        other => return Err(Error::malformed(format!("Unknown filter type {other}"))),
    }
    Ok(())
}
