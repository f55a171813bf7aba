use arrayvec::ArrayVec;
use nalgebra_glm::DVec2;

use crate::lensmap::LensMap;

/// The wraparound guard: quads whose bounding box exceeds this many pixels
/// on either axis straddle a lens discontinuity and are dropped.
pub const MAX_QUAD_SPAN: f64 = 20.0;

/// Fills a screen-space quadrilateral on the lens map, writing the given
/// globe texel index and tint at every covered pixel. Degenerate quads
/// (points, axis-aligned lines) fill their bounding box.
///
/// Returns false when the quad was rejected by the wraparound guard or lies
/// entirely outside the viewport.
///
/// # Arguments
/// * `map` - The lens map to write into.
/// * `corners` - The four corner points in winding order.
/// * `value` - The globe texel index to store.
/// * `tint` - The tint byte to store alongside.
pub fn fill_quad(map: &mut LensMap, corners: &[DVec2; 4], value: u32, tint: u8) -> bool {
    let (mut min_x, mut max_x) = (corners[0].x, corners[0].x);
    let (mut min_y, mut max_y) = (corners[0].y, corners[0].y);

    for c in corners.iter().skip(1) {
        min_x = min_x.min(c.x);
        max_x = max_x.max(c.x);
        min_y = min_y.min(c.y);
        max_y = max_y.max(c.y);
    }

    if max_x - min_x > MAX_QUAD_SPAN || max_y - min_y > MAX_QUAD_SPAN {
        return false;
    }

    if map.width_px() == 0 || map.height_px() == 0 {
        return false;
    }

    if max_x < 0.0
        || max_y < 0.0
        || min_x > (map.width_px() - 1) as f64
        || min_y > (map.height_px() - 1) as f64
    {
        return false;
    }

    let y0 = min_y.round().max(0.0) as usize;
    let y1 = (max_y.round() as usize).min(map.height_px() - 1);

    let mut written = false;

    for y in y0..=y1 {
        let yc = y as f64;

        // intersect the four edges with the scanline
        let mut xs: ArrayVec<f64, 8> = ArrayVec::new();
        for i in 0..4 {
            let a = corners[i];
            let b = corners[(i + 1) % 4];

            if (a.y - yc) * (b.y - yc) > 0.0 {
                continue;
            }

            if (b.y - a.y).abs() < 1e-12 {
                xs.push(a.x);
                xs.push(b.x);
            } else {
                let t = (yc - a.y) / (b.y - a.y);
                xs.push(a.x + t * (b.x - a.x));
            }
        }

        if xs.is_empty() {
            continue;
        }

        let lo = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        if hi < 0.0 || lo > (map.width_px() - 1) as f64 {
            continue;
        }

        let x0 = lo.round().max(0.0) as usize;
        let x1 = (hi.round() as usize).min(map.width_px() - 1);

        for x in x0..=x1 {
            let index = map.index(x, y);
            map.pixels[index] = Some(value);
            map.tints[index] = tint;
            written = true;
        }
    }

    written
}
