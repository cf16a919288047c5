//! Synthetic test image generation.
//!
//! Generates deterministic rows of packed samples. All functions produce
//! reproducible output suitable for regression testing.

#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Every row filled with the same bytes.
pub fn solid(width: u32, height: u32, pixel: &[u8]) -> Vec<Vec<u8>> {
    let row: Vec<u8> = pixel.iter().copied().cycle().take(width as usize * pixel.len()).collect();
    vec![row; height as usize]
}

/// RGB diagonal gradient; compresses well once filtered.
pub fn gradient_rgb(width: u32, height: u32) -> Vec<Vec<u8>> {
    (0..height)
        .map(|y| {
            (0..width)
                .flat_map(|x| {
                    let v = (x * 3 + y * 5) as u8;
                    [v, v.wrapping_add(40), v.wrapping_mul(2)]
                })
                .collect()
        })
        .collect()
}

/// 8-bit grayscale gradient.
pub fn gradient_gray(width: u32, height: u32) -> Vec<Vec<u8>> {
    (0..height)
        .map(|y| (0..width).map(|x| (x + 2 * y) as u8).collect())
        .collect()
}

/// Uniform random bytes from a fixed seed.
pub fn noise(row_bytes: usize, height: u32, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..height)
        .map(|_| (0..row_bytes).map(|_| rng.gen()).collect())
        .collect()
}

/// Palette indices cycling through `colors` entries, packed at 8 bits.
pub fn indexed(width: u32, height: u32, colors: u8) -> Vec<Vec<u8>> {
    (0..height)
        .map(|y| (0..width).map(|x| ((x + y) % u32::from(colors)) as u8).collect())
        .collect()
}
