// this_file: src/scale.rs
//! Pure image scalers used to derive the map and magic map variants.
//!
//! `scale2x` is the edge-directed Scale2x magnifier. `scale8d` shrinks by a
//! factor of eight, picking the most frequent colour of every 8x8 block so
//! that small features keep their exact colour instead of being blended.

use image::{Rgba, RgbaImage};

/// Block edge length used by [`scale8d`]
pub const DOWNSCALE_FACTOR: u32 = 8;

/// Double width and height using the Scale2x rule.
///
/// For every source pixel `E` with neighbours `B` (up), `D` (left), `F`
/// (right) and `H` (down), edges clamped:
///
/// ```text
///   B        E0 E1
/// D E F  ->  E2 E3
///   H
/// ```
///
/// When `B != H` and `D != F` each output pixel copies the neighbour shared by
/// its two adjacent sides if those agree, otherwise `E`. In every other case
/// all four output pixels are `E`.
pub fn scale2x(src: &RgbaImage) -> RgbaImage {
    let (width, height) = src.dimensions();
    let mut dst = RgbaImage::new(width * 2, height * 2);
    if width == 0 || height == 0 {
        return dst;
    }

    for y in 0..height {
        for x in 0..width {
            let b = *src.get_pixel(x, y.saturating_sub(1));
            let d = *src.get_pixel(x.saturating_sub(1), y);
            let e = *src.get_pixel(x, y);
            let f = *src.get_pixel((x + 1).min(width - 1), y);
            let h = *src.get_pixel(x, (y + 1).min(height - 1));

            let (e0, e1, e2, e3) = if b != h && d != f {
                (
                    if d == b { d } else { e },
                    if b == f { f } else { e },
                    if d == h { d } else { e },
                    if h == f { f } else { e },
                )
            } else {
                (e, e, e, e)
            };

            dst.put_pixel(2 * x, 2 * y, e0);
            dst.put_pixel(2 * x + 1, 2 * y, e1);
            dst.put_pixel(2 * x, 2 * y + 1, e2);
            dst.put_pixel(2 * x + 1, 2 * y + 1, e3);
        }
    }

    dst
}

/// Output size of [`scale8d`] along one axis.
///
/// Inputs smaller than one block still produce a single pixel.
pub fn downscaled_len(len: u32) -> u32 {
    if len == 0 {
        0
    } else {
        (len / DOWNSCALE_FACTOR).max(1)
    }
}

/// Shrink width and height by eight, keeping the majority colour per block.
///
/// Ties go to the colour that appears first in row-major order within the
/// block. Pixels beyond the last full block are ignored.
pub fn scale8d(src: &RgbaImage) -> RgbaImage {
    let (width, height) = src.dimensions();
    let out_width = downscaled_len(width);
    let out_height = downscaled_len(height);
    let mut dst = RgbaImage::new(out_width, out_height);

    let block_width = DOWNSCALE_FACTOR.min(width);
    let block_height = DOWNSCALE_FACTOR.min(height);
    let mut counts: Vec<(Rgba<u8>, u32)> = Vec::with_capacity(64);

    for by in 0..out_height {
        for bx in 0..out_width {
            counts.clear();
            for y in by * block_height..(by + 1) * block_height {
                for x in bx * block_width..(bx + 1) * block_width {
                    let pixel = *src.get_pixel(x, y);
                    match counts.iter_mut().find(|(color, _)| *color == pixel) {
                        Some((_, count)) => *count += 1,
                        None => counts.push((pixel, 1)),
                    }
                }
            }

            // `counts` is in first-seen order, so a strict comparison keeps
            // the earliest colour among equals.
            let mut best = counts[0];
            for &candidate in &counts[1..] {
                if candidate.1 > best.1 {
                    best = candidate;
                }
            }
            dst.put_pixel(bx, by, best.0);
        }
    }

    dst
}
