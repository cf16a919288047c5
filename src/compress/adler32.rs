//! Adler-32 checksum (RFC 1950) for the zlib trailer.

const MOD_ADLER: u32 = 65_521;

/// Largest n such that 255*n*(n+1)/2 + (n+1)*(65520) <= 2^32-1.
const NMAX: usize = 5552;

/// Adler-32 of `data`.
#[inline]
#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    let mut sum = Adler32::new();
    sum.update(data);
    sum.value()
}

/// Running Adler-32 accumulator.
#[derive(Debug, Clone, Copy)]
pub struct Adler32 {
    s1: u32,
    s2: u32,
}

impl Adler32 {
    /// Start a new accumulator.
    pub fn new() -> Self {
        Self { s1: 1, s2: 0 }
    }

    /// Feed more bytes. Modulo reduction happens once per `NMAX` bytes.
    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(NMAX) {
            for &b in chunk {
                self.s1 += b as u32;
                self.s2 += self.s1;
            }
            self.s1 %= MOD_ADLER;
            self.s2 %= MOD_ADLER;
        }
    }

    /// Current checksum value.
    pub fn value(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}
