//! Bit-level output for DEFLATE.

/// A bit writer using a 64-bit accumulator, packing bits LSB-first.
///
/// Completed bytes can be drained while encoding continues, which is how
/// the deflate encoder streams compressed output block by block.
#[derive(Debug)]
pub struct BitWriter64 {
    buffer: Vec<u8>,
    acc: u64,
    bits_in_acc: u8,
    drained: usize,
}

impl Default for BitWriter64 {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter64 {
    /// Create a writer with a default capacity.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a writer with the given byte capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            acc: 0,
            bits_in_acc: 0,
            drained: 0,
        }
    }

    /// Write the low `num_bits` of `value` (at most 32).
    #[inline]
    pub fn write_bits(&mut self, value: u32, num_bits: u8) {
        debug_assert!(num_bits <= 32);
        if num_bits == 0 {
            return;
        }
        let val64 = (value as u64) & ((1u64 << num_bits) - 1);
        self.acc |= val64 << self.bits_in_acc;
        self.bits_in_acc += num_bits;

        while self.bits_in_acc >= 8 {
            self.buffer.push(self.acc as u8);
            self.acc >>= 8;
            self.bits_in_acc -= 8;
        }
    }

    /// Pad the current byte with zero bits.
    pub fn align(&mut self) {
        if self.bits_in_acc > 0 {
            self.buffer.push(self.acc as u8);
            self.acc = 0;
            self.bits_in_acc = 0;
        }
    }

    /// Append whole bytes. The writer must be byte-aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.bits_in_acc, 0);
        self.buffer.extend_from_slice(bytes);
    }

    /// Completed bytes not yet drained.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the completed bytes after the caller has consumed them.
    pub fn discard_pending(&mut self) {
        self.drained += self.buffer.len();
        self.buffer.clear();
    }

    /// Total number of whole bytes produced so far, drained or not.
    pub fn total_bytes(&self) -> usize {
        self.drained + self.buffer.len()
    }

    /// Pad to a byte boundary and return the remaining bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.buffer
    }
}
