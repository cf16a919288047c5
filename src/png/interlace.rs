//! Adam7 interlace geometry.

use super::Ihdr;

/// One Adam7 pass: origin and step in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    x_start: u32,
    y_start: u32,
    x_step: u32,
    y_step: u32,
}

/// The seven Adam7 passes in stream order.
pub const ADAM7: [Pass; 7] = [
    Pass { x_start: 0, y_start: 0, x_step: 8, y_step: 8 },
    Pass { x_start: 4, y_start: 0, x_step: 8, y_step: 8 },
    Pass { x_start: 0, y_start: 4, x_step: 4, y_step: 8 },
    Pass { x_start: 2, y_start: 0, x_step: 4, y_step: 4 },
    Pass { x_start: 0, y_start: 2, x_step: 2, y_step: 4 },
    Pass { x_start: 1, y_start: 0, x_step: 2, y_step: 2 },
    Pass { x_start: 0, y_start: 1, x_step: 1, y_step: 2 },
];

impl Pass {
    /// Width and height of this pass's reduced image. Either may be zero.
    pub fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let w = (width + self.x_step - 1 - self.x_start) / self.x_step;
        let h = (height + self.y_step - 1 - self.y_start) / self.y_step;
        if width <= self.x_start || height <= self.y_start {
            (0, 0)
        } else {
            (w, h)
        }
    }
}

fn get_pixel(row: &[u8], x: usize, bits: usize, out: &mut [u8]) {
    if bits >= 8 {
        let n = bits / 8;
        out[..n].copy_from_slice(&row[x * n..x * n + n]);
    } else {
        let bit = x * bits;
        let shift = 8 - bits - bit % 8;
        out[0] = (row[bit / 8] >> shift) & ((1u8 << bits) - 1);
    }
}

fn put_pixel(row: &mut [u8], x: usize, bits: usize, px: &[u8]) {
    if bits >= 8 {
        let n = bits / 8;
        row[x * n..x * n + n].copy_from_slice(&px[..n]);
    } else {
        let bit = x * bits;
        let shift = 8 - bits - bit % 8;
        let mask = ((1u8 << bits) - 1) << shift;
        row[bit / 8] = (row[bit / 8] & !mask) | ((px[0] << shift) & mask);
    }
}

/// Gather the pixels of `pass` from full-size rows.
pub fn extract_pass(ihdr: &Ihdr, rows: &[Vec<u8>], pass: &Pass) -> Vec<Vec<u8>> {
    let (pw, ph) = pass.dimensions(ihdr.width, ihdr.height);
    if pw == 0 || ph == 0 {
        return Vec::new();
    }
    let bits = ihdr.bits_per_pixel();
    let row_len = ihdr.row_bytes_for(pw);
    let mut px = [0u8; 8];
    (0..ph)
        .map(|py| {
            let src = &rows[(pass.y_start + py * pass.y_step) as usize];
            let mut out = vec![0u8; row_len];
            for qx in 0..pw as usize {
                let x = pass.x_start as usize + qx * pass.x_step as usize;
                get_pixel(src, x, bits, &mut px);
                put_pixel(&mut out, qx, bits, &px);
            }
            out
        })
        .collect()
}

/// Scatter one reduced pass row back into the full-size rows.
pub fn merge_pass_row(ihdr: &Ihdr, rows: &mut [Vec<u8>], pass: &Pass, py: u32, pass_row: &[u8]) {
    let (pw, _) = pass.dimensions(ihdr.width, ihdr.height);
    let bits = ihdr.bits_per_pixel();
    let dst = &mut rows[(pass.y_start + py * pass.y_step) as usize];
    let mut px = [0u8; 8];
    for qx in 0..pw as usize {
        let x = pass.x_start as usize + qx * pass.x_step as usize;
        get_pixel(pass_row, qx, bits, &mut px);
        put_pixel(dst, x, bits, &px);
    }
}
