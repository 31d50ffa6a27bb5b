//! Palette quantization for sprite transfer.
//!
//! Reduces a decoded RGBA raster to an indexed palette small enough for the
//! peripheral display: aspect-preserving downscale to a pixel budget, then
//! deterministic median-cut palette generation and nearest-palette indexing.
//! Image decoding itself is an external collaborator; this module starts from
//! raw pixels.

use crate::error::CodecError;

/// Decoded raster input: `(width, height, RGBA)` as produced by an external
/// image decoder.
#[derive(Debug, Clone)]
pub struct RawImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(CodecError::malformed(
                "RawImage",
                format!("{}x{} needs {} rgba bytes, got {}", width, height, expected, rgba.len()),
            ));
        }
        if width == 0 || height == 0 {
            return Err(CodecError::malformed("RawImage", "zero dimension"));
        }
        Ok(Self { width, height, rgba })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2]]
    }
}

/// Downscale to at most `max_pixels`, preserving aspect ratio.
/// Nearest-neighbour sampling; returns `(width, height, rgb pixels)`.
pub(crate) fn downscale(image: &RawImage, max_pixels: u32) -> (u32, u32, Vec<[u8; 3]>) {
    let (w, h) = (image.width, image.height);
    let pixels = w as u64 * h as u64;

    let (nw, nh) = if pixels <= max_pixels as u64 {
        (w, h)
    } else {
        let scale = (max_pixels as f64 / pixels as f64).sqrt();
        let nw = ((w as f64 * scale).floor() as u32).max(1);
        let nh = ((h as f64 * scale).floor() as u32).max(1);
        (nw, nh)
    };

    let mut out = Vec::with_capacity(nw as usize * nh as usize);
    for y in 0..nh {
        let sy = (y as u64 * h as u64 / nh as u64) as u32;
        for x in 0..nw {
            let sx = (x as u64 * w as u64 / nw as u64) as u32;
            out.push(image.rgb_at(sx, sy));
        }
    }
    (nw, nh, out)
}

/// Deterministic median-cut palette of exactly `colors` entries
/// (`colors` is a power of two in 2..=256).
pub(crate) fn median_cut(pixels: &[[u8; 3]], colors: usize) -> Vec<[u8; 3]> {
    let mut boxes: Vec<Vec<[u8; 3]>> = vec![pixels.to_vec()];

    while boxes.len() < colors {
        // Split the box with the widest channel range; stable ordering keeps
        // the result deterministic for a fixed input.
        let mut best: Option<(usize, usize, u8)> = None; // (box, channel, range)
        for (i, b) in boxes.iter().enumerate() {
            if b.len() < 2 {
                continue;
            }
            for ch in 0..3 {
                let min = b.iter().map(|p| p[ch]).min().unwrap_or(0);
                let max = b.iter().map(|p| p[ch]).max().unwrap_or(0);
                let range = max - min;
                if range > 0 && best.map_or(true, |(_, _, r)| range > r) {
                    best = Some((i, ch, range));
                }
            }
        }
        let Some((box_idx, channel, _)) = best else { break };

        let mut b = boxes.swap_remove(box_idx);
        b.sort_by_key(|p| p[channel]);
        let half = b.len() / 2;
        let right = b.split_off(half);
        boxes.push(b);
        boxes.push(right);
    }

    let mut palette: Vec<[u8; 3]> = boxes
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| {
            let n = b.len() as u64;
            let mut sums = [0u64; 3];
            for p in b {
                for ch in 0..3 {
                    sums[ch] += p[ch] as u64;
                }
            }
            [(sums[0] / n) as u8, (sums[1] / n) as u8, (sums[2] / n) as u8]
        })
        .collect();

    // Sort for a canonical ordering, then pad to the exact palette size the
    // header promises.
    palette.sort_unstable();
    palette.dedup();
    let pad = *palette.last().unwrap_or(&[0, 0, 0]);
    while palette.len() < colors {
        palette.push(pad);
    }
    palette.truncate(colors);
    palette
}

/// Index of the palette entry nearest to `rgb` (squared-distance RGB).
pub(crate) fn nearest_index(palette: &[[u8; 3]], rgb: [u8; 3]) -> u8 {
    let mut best = 0usize;
    let mut best_dist = u32::MAX;
    for (i, p) in palette.iter().enumerate() {
        let dist: u32 = (0..3)
            .map(|ch| {
                let d = p[ch] as i32 - rgb[ch] as i32;
                (d * d) as u32
            })
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best as u8
}

/// Pack palette indices into a continuous MSB-first bitstream of
/// `ceil(len * bpp / 8)` bytes.
pub(crate) fn pack_indices(indices: &[u8], bpp: u8) -> Vec<u8> {
    let total_bits = indices.len() * bpp as usize;
    let mut out = vec![0u8; total_bits.div_ceil(8)];
    let mut bit = 0usize;
    for &index in indices {
        for b in (0..bpp).rev() {
            if (index >> b) & 1 == 1 {
                out[bit / 8] |= 1 << (7 - bit % 8);
            }
            bit += 1;
        }
    }
    out
}

/// Inverse of [`pack_indices`], used by the decode path and tests.
pub(crate) fn unpack_indices(packed: &[u8], bpp: u8, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    let mut bit = 0usize;
    for _ in 0..count {
        let mut index = 0u8;
        for _ in 0..bpp {
            let set = (packed[bit / 8] >> (7 - bit % 8)) & 1;
            index = (index << 1) | set;
            bit += 1;
        }
        out.push(index);
    }
    out
}
