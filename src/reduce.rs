//! Lossless image reductions.
//!
//! A [`Reducer`] rewrites the image model in place into a smaller
//! representation of the same pixels. The optimizer only needs the returned
//! set of applied reductions; anything non-empty forces a new IDAT.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use log::debug;

use crate::error::Result;
use crate::image::{Background, Image, SignificantBits, Transparency};
use crate::png::{ColorType, Ihdr};

/// A set of reduction kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Reductions(u8);

impl Reductions {
    /// No reductions.
    pub const NONE: Reductions = Reductions(0);
    /// 16 to 8 bits per sample.
    pub const BIT_DEPTH: Reductions = Reductions(0x1);
    /// Alpha removal and RGB to gray.
    pub const COLOR_TYPE: Reductions = Reductions(0x2);
    /// Palette and palette-alpha trimming.
    pub const PALETTE: Reductions = Reductions(0x4);
    /// Every reduction kind.
    pub const ALL: Reductions = Reductions(0x7);

    /// True if no kind is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every kind in `other` is set.
    pub const fn contains(self, other: Reductions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Remove the kinds in `other`.
    pub fn remove(&mut self, other: Reductions) {
        self.0 &= !other.0;
    }
}

impl BitOr for Reductions {
    type Output = Reductions;

    fn bitor(self, rhs: Reductions) -> Reductions {
        Reductions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Reductions {
    fn bitor_assign(&mut self, rhs: Reductions) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Reductions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (kind, name) in [
            (Self::BIT_DEPTH, "BIT_DEPTH"),
            (Self::COLOR_TYPE, "COLOR_TYPE"),
            (Self::PALETTE, "PALETTE"),
        ] {
            if self.contains(kind) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Rewrites an image into a smaller equivalent.
pub trait Reducer {
    /// Apply any of the `allowed` reductions; return the ones applied.
    fn reduce(&self, image: &mut Image, allowed: Reductions) -> Result<Reductions>;
}

/// The built-in reducer. Every step checks all pixels before changing
/// anything, and gives up when a chunk value cannot follow the change.
#[derive(Debug, Clone, Copy, Default)]
pub struct LosslessReducer;

impl Reducer for LosslessReducer {
    fn reduce(&self, image: &mut Image, allowed: Reductions) -> Result<Reductions> {
        let before = *image.ihdr()?;
        let mut applied = Reductions::NONE;
        if allowed.contains(Reductions::BIT_DEPTH) && reduce_bit_depth(image) {
            applied |= Reductions::BIT_DEPTH;
        }
        if allowed.contains(Reductions::COLOR_TYPE) {
            let stripped = strip_alpha(image);
            let grayed = rgb_to_gray(image);
            if stripped || grayed {
                applied |= Reductions::COLOR_TYPE;
            }
        }
        if allowed.contains(Reductions::PALETTE) && trim_palette(image) {
            applied |= Reductions::PALETTE;
        }
        if !applied.is_empty() {
            let after = image.ihdr()?;
            debug!(
                "reduced {}-bit {} to {}-bit {}: {applied:?}",
                before.bit_depth,
                before.color_type.name(),
                after.bit_depth,
                after.color_type.name()
            );
        }
        Ok(applied)
    }
}

fn narrow(value: u16) -> Option<u16> {
    let [hi, lo] = value.to_be_bytes();
    (hi == lo).then_some(u16::from(hi))
}

fn narrow_rgb(rgb: [u16; 3]) -> Option<[u16; 3]> {
    Some([narrow(rgb[0])?, narrow(rgb[1])?, narrow(rgb[2])?])
}

fn reduce_bit_depth(image: &mut Image) -> bool {
    let Some(ihdr) = image.header else {
        return false;
    };
    if ihdr.bit_depth != 16 {
        return false;
    }
    if !image
        .rows
        .iter()
        .all(|row| row.chunks_exact(2).all(|s| s[0] == s[1]))
    {
        return false;
    }
    let transparency = match &image.transparency {
        None => None,
        Some(Transparency::Gray(v)) => match narrow(*v) {
            Some(v) => Some(Transparency::Gray(v)),
            None => return false,
        },
        Some(Transparency::Rgb(rgb)) => match narrow_rgb(*rgb) {
            Some(rgb) => Some(Transparency::Rgb(rgb)),
            None => return false,
        },
        Some(Transparency::Palette(_)) => return false,
    };
    let background = match image.background {
        None => None,
        Some(Background::Gray(v)) => match narrow(v) {
            Some(v) => Some(Background::Gray(v)),
            None => return false,
        },
        Some(Background::Rgb(rgb)) => match narrow_rgb(rgb) {
            Some(rgb) => Some(Background::Rgb(rgb)),
            None => return false,
        },
        Some(Background::Index(_)) => return false,
    };

    for row in image.rows.iter_mut() {
        *row = row.iter().step_by(2).copied().collect();
    }
    image.transparency = transparency;
    image.background = background;
    if let Some(SignificantBits(bits)) = image.significant_bits.as_mut() {
        for b in bits.iter_mut() {
            *b = (*b).min(8);
        }
    }
    image.header = Some(Ihdr {
        bit_depth: 8,
        ..ihdr
    });
    true
}

/// Drop an alpha channel that is opaque everywhere.
fn strip_alpha(image: &mut Image) -> bool {
    let Some(ihdr) = image.header else {
        return false;
    };
    let color_type = match ihdr.color_type {
        ColorType::GrayAlpha => ColorType::Gray,
        ColorType::Rgba => ColorType::Rgb,
        _ => return false,
    };
    let sample = usize::from(ihdr.bit_depth / 8);
    let channels = ihdr.color_type.channels();
    let pixel = sample * channels;
    let opaque = image.rows.iter().all(|row| {
        row.chunks_exact(pixel)
            .all(|p| p[pixel - sample..].iter().all(|&b| b == 0xFF))
    });
    if !opaque {
        return false;
    }

    for row in image.rows.iter_mut() {
        *row = row
            .chunks_exact(pixel)
            .flat_map(|p| &p[..pixel - sample])
            .copied()
            .collect();
    }
    if let Some(SignificantBits(bits)) = image.significant_bits.as_mut() {
        bits[channels - 1] = 0;
    }
    image.header = Some(Ihdr {
        color_type,
        ..ihdr
    });
    true
}

/// Collapse RGB samples to gray when every pixel has R = G = B.
fn rgb_to_gray(image: &mut Image) -> bool {
    let Some(ihdr) = image.header else {
        return false;
    };
    let color_type = match ihdr.color_type {
        ColorType::Rgb => ColorType::Gray,
        ColorType::Rgba => ColorType::GrayAlpha,
        _ => return false,
    };
    // A suggested palette has no gray equivalent.
    if image.palette.is_some() {
        return false;
    }
    let sample = usize::from(ihdr.bit_depth / 8);
    let pixel = sample * ihdr.color_type.channels();
    let gray = image.rows.iter().all(|row| {
        row.chunks_exact(pixel).all(|p| {
            p[..sample] == p[sample..2 * sample] && p[..sample] == p[2 * sample..3 * sample]
        })
    });
    if !gray {
        return false;
    }
    let transparency = match &image.transparency {
        None => None,
        Some(Transparency::Rgb([r, g, b])) if r == g && g == b => Some(Transparency::Gray(*r)),
        Some(_) => return false,
    };
    let background = match image.background {
        None => None,
        Some(Background::Rgb([r, g, b])) if r == g && g == b => Some(Background::Gray(r)),
        Some(_) => return false,
    };

    for row in image.rows.iter_mut() {
        *row = row
            .chunks_exact(pixel)
            .flat_map(|p| p[..sample].iter().chain(&p[3 * sample..]))
            .copied()
            .collect();
    }
    image.transparency = transparency;
    image.background = background;
    if let Some(SignificantBits([r, g, b, a])) = image.significant_bits {
        image.significant_bits = Some(SignificantBits([r.max(g).max(b), a, 0, 0]));
    }
    image.header = Some(Ihdr {
        color_type,
        ..ihdr
    });
    true
}

/// Highest palette index referenced by any pixel.
fn max_index(image: &Image, ihdr: &Ihdr) -> u8 {
    let depth = usize::from(ihdr.bit_depth);
    let mask = ((1u16 << depth) - 1) as u8;
    let width = ihdr.width as usize;
    let mut max = 0;
    for row in &image.rows {
        for x in 0..width {
            let bit = x * depth;
            let index = (row[bit / 8] >> (8 - depth - bit % 8)) & mask;
            max = max.max(index);
        }
    }
    max
}

/// Drop trailing unused palette entries and trailing opaque tRNS entries.
fn trim_palette(image: &mut Image) -> bool {
    let Some(ihdr) = image.header else {
        return false;
    };
    if ihdr.color_type != ColorType::Palette {
        return false;
    }
    let Some(len) = image.palette.as_ref().map(Vec::len) else {
        return false;
    };
    let mut keep = usize::from(max_index(image, &ihdr)) + 1;
    if let Some(Background::Index(i)) = image.background {
        keep = keep.max(usize::from(i) + 1);
    }
    let keep = keep.min(len);

    let mut changed = false;
    if keep < len {
        if let Some(palette) = image.palette.as_mut() {
            palette.truncate(keep);
        }
        if let Some(hist) = image.histogram.as_mut() {
            hist.truncate(keep);
        }
        changed = true;
    }
    if let Some(Transparency::Palette(alpha)) = image.transparency.as_mut() {
        let before = alpha.len();
        alpha.truncate(keep);
        while alpha.last() == Some(&0xFF) {
            alpha.pop();
        }
        changed |= alpha.len() != before;
        if alpha.is_empty() {
            image.transparency = None;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, bit_depth: u8, color_type: ColorType, rows: Vec<Vec<u8>>) -> Image {
        let mut image = Image::default();
        image.header = Some(Ihdr::new(width, rows.len() as u32, bit_depth, color_type));
        image.rows = rows;
        image
    }

    #[test]
    fn test_sixteen_to_eight() {
        let mut img = image(2, 16, ColorType::Gray, vec![vec![0x12, 0x12, 0xAB, 0xAB]]);
        img.transparency = Some(Transparency::Gray(0x1212));
        img.significant_bits = Some(SignificantBits([12, 0, 0, 0]));
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert_eq!(applied, Reductions::BIT_DEPTH);
        assert_eq!(img.rows[0], vec![0x12, 0xAB]);
        assert_eq!(img.bit_depth(), 8);
        assert_eq!(img.transparency, Some(Transparency::Gray(0x12)));
        assert_eq!(img.significant_bits, Some(SignificantBits([8, 0, 0, 0])));
    }

    #[test]
    fn test_sixteen_bit_kept_when_trns_is_wide() {
        let mut img = image(1, 16, ColorType::Gray, vec![vec![0x12, 0x12]]);
        img.transparency = Some(Transparency::Gray(0x1234));
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert!(applied.is_empty());
        assert_eq!(img.bit_depth(), 16);
    }

    #[test]
    fn test_opaque_rgba_to_gray() {
        let mut img = image(
            2,
            8,
            ColorType::Rgba,
            vec![vec![10, 10, 10, 255, 20, 20, 20, 255]],
        );
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert_eq!(applied, Reductions::COLOR_TYPE);
        assert_eq!(img.ihdr().unwrap().color_type, ColorType::Gray);
        assert_eq!(img.rows[0], vec![10, 20]);
    }

    #[test]
    fn test_translucent_rgba_keeps_alpha() {
        let mut img = image(1, 8, ColorType::Rgba, vec![vec![1, 2, 3, 128]]);
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert!(applied.is_empty());
        assert_eq!(img.rows[0], vec![1, 2, 3, 128]);
    }

    #[test]
    fn test_gray_rgba_to_gray_alpha() {
        let mut img = image(1, 8, ColorType::Rgba, vec![vec![9, 9, 9, 7]]);
        img.background = Some(Background::Rgb([4, 4, 4]));
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert_eq!(applied, Reductions::COLOR_TYPE);
        assert_eq!(img.ihdr().unwrap().color_type, ColorType::GrayAlpha);
        assert_eq!(img.rows[0], vec![9, 7]);
        assert_eq!(img.background, Some(Background::Gray(4)));
    }

    #[test]
    fn test_colored_trns_blocks_gray() {
        let mut img = image(1, 8, ColorType::Rgb, vec![vec![5, 5, 5]]);
        img.transparency = Some(Transparency::Rgb([1, 2, 3]));
        assert!(LosslessReducer
            .reduce(&mut img, Reductions::ALL)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_palette_trim() {
        let mut img = image(4, 2, ColorType::Palette, vec![vec![0b0001_0001]]);
        img.palette = Some(vec![[0, 0, 0], [1, 1, 1], [2, 2, 2], [3, 3, 3]]);
        img.transparency = Some(Transparency::Palette(vec![0, 255, 255, 255]));
        img.histogram = Some(vec![2, 2, 0, 0]);
        let applied = LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert_eq!(applied, Reductions::PALETTE);
        assert_eq!(img.palette.as_ref().map(Vec::len), Some(2));
        assert_eq!(img.histogram, Some(vec![2, 2]));
        assert_eq!(img.transparency, Some(Transparency::Palette(vec![0])));
    }

    #[test]
    fn test_palette_keeps_background_entry() {
        let mut img = image(1, 8, ColorType::Palette, vec![vec![0]]);
        img.palette = Some(vec![[0, 0, 0], [1, 1, 1], [2, 2, 2]]);
        img.background = Some(Background::Index(1));
        LosslessReducer.reduce(&mut img, Reductions::ALL).unwrap();
        assert_eq!(img.palette.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_disallowed_kinds_are_skipped() {
        let mut img = image(1, 16, ColorType::Rgba, vec![vec![1, 1, 1, 1, 1, 1, 255, 255]]);
        let mut allowed = Reductions::ALL;
        allowed.remove(Reductions::COLOR_TYPE);
        let applied = LosslessReducer.reduce(&mut img, allowed).unwrap();
        assert_eq!(applied, Reductions::BIT_DEPTH);
        assert_eq!(img.ihdr().unwrap().color_type, ColorType::Rgba);
        assert_eq!(img.rows[0], vec![1, 1, 1, 255]);
        assert!(LosslessReducer
            .reduce(&mut img, Reductions::NONE)
            .unwrap()
            .is_empty());
    }
}
