//! CRC-32 checksum used by PNG chunk framing (CRC-32/ISO-HDLC).

/// Slicing-by-8 tables for polynomial 0xEDB88320 (reflected 0x04C11DB7).
static CRC_TABLES: std::sync::LazyLock<[[u32; 256]; 8]> = std::sync::LazyLock::new(|| {
    let mut tables = [[0u32; 256]; 8];

    for (i, entry) in tables[0].iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if (crc & 1) != 0 {
                (crc >> 1) ^ 0xEDB88320
            } else {
                crc >> 1
            };
        }
        *entry = crc;
    }

    for t in 1..8 {
        for i in 0..256 {
            let prev = tables[t - 1][i];
            tables[t][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
        }
    }

    tables
});

/// Advance a pre-conditioned (inverted) CRC register over `data`.
#[inline]
fn advance(mut crc: u32, data: &[u8]) -> u32 {
    let tables = &*CRC_TABLES;

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let low = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let high = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

        crc ^= low;

        crc = tables[7][(crc & 0xFF) as usize]
            ^ tables[6][((crc >> 8) & 0xFF) as usize]
            ^ tables[5][((crc >> 16) & 0xFF) as usize]
            ^ tables[4][((crc >> 24) & 0xFF) as usize]
            ^ tables[3][(high & 0xFF) as usize]
            ^ tables[2][((high >> 8) & 0xFF) as usize]
            ^ tables[1][((high >> 16) & 0xFF) as usize]
            ^ tables[0][((high >> 24) & 0xFF) as usize];
    }

    for &b in chunks.remainder() {
        let idx = ((crc ^ b as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ tables[0][idx];
    }

    crc
}

/// CRC-32 of `data`, as stored in a PNG chunk trailer.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    advance(0xFFFF_FFFF, data) ^ 0xFFFF_FFFF
}

/// Running CRC-32 accumulator.
///
/// Chunk writers feed the type code and then every payload piece; merged
/// IDAT output keeps one of these alive across several source chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    /// Start a new accumulator.
    pub fn new() -> Self {
        Self { crc: 0xFFFF_FFFF }
    }

    /// Start an accumulator already primed with a chunk type code.
    pub fn for_chunk(chunk_type: &[u8; 4]) -> Self {
        let mut crc = Self::new();
        crc.update(chunk_type);
        crc
    }

    /// Feed more bytes.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.crc = advance(self.crc, data);
    }

    /// Current checksum value. The accumulator stays usable.
    #[inline]
    pub fn value(&self) -> u32 {
        self.crc ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
