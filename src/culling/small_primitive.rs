//! Small-primitive filter: sub-pixel triangles can never cover a sample.

use glam::Vec2;

use super::{CullControl, CullVertex};

/// Round a screen coordinate to the pixel-center grid.
#[inline]
fn to_pixel_center(v: f32) -> f32 {
    (v - 0.5).round()
}

/// Cull when the screen-space bounding box, with corners rounded to pixel
/// centers, collapses on either axis. Only valid when all three w share one
/// sign (otherwise the projection folds) and conservative rasterization is
/// off (a conservative rasterizer must still visit sub-pixel primitives).
pub fn cull_small_primitive(flag: bool, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    if ctl.conservative_raster {
        return false;
    }
    let w0 = verts[0].position.w;
    let w1 = verts[1].position.w;
    let w2 = verts[2].position.w;
    let all_positive = w0 > 0.0 && w1 > 0.0 && w2 > 0.0;
    let all_negative = w0 < 0.0 && w1 < 0.0 && w2 < 0.0;
    if !all_positive && !all_negative {
        return false;
    }

    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for v in verts {
        let rcp_w = 1.0 / v.position.w;
        let ndc = Vec2::new(v.position.x * rcp_w, v.position.y * rcp_w);
        let screen = ndc * ctl.viewport_scale + ctl.viewport_offset;
        min = min.min(screen);
        max = max.max(screen);
    }

    let min_rounded = Vec2::new(to_pixel_center(min.x), to_pixel_center(min.y));
    let max_rounded = Vec2::new(to_pixel_center(max.x), to_pixel_center(max.y));
    min_rounded.x == max_rounded.x || min_rounded.y == max_rounded.y
}
