//! Backface test: sign of the homogeneous screen-space area.

use super::{CullControl, CullVertex};

/// Tolerance scale: areas within `max_term * 2^-24` of zero are treated as
/// unsigned and never culled, so degenerate but valid triangles survive.
const AREA_TOLERANCE_SCALE: f32 = 0.5 * f32::EPSILON; // 2^-24

pub fn cull_backface(flag: bool, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    // Wireframe rasterizes edges of both facings; the test is disabled.
    if ctl.wireframe || (!ctl.cull_front && !ctl.cull_back) {
        return false;
    }

    let [v0, v1, v2] = [verts[0].position, verts[1].position, verts[2].position];

    // Homogeneous signed area: determinant of the 3x3 matrix formed by the
    // (x, y, w) rows. Equivalent to the 2D cross-product area after the
    // perspective divide, without performing any division.
    let t0 = v0.x * (v1.y * v2.w - v2.y * v1.w);
    let t1 = v1.x * (v2.y * v0.w - v0.y * v2.w);
    let t2 = v2.x * (v0.y * v1.w - v1.y * v0.w);
    let area = t0 + t1 + t2;

    // Exponent-scaled near-zero band. Strict comparisons: an exact zero
    // area is never culled regardless of winding configuration.
    let tolerance = t0.abs().max(t1.abs()).max(t2.abs()) * AREA_TOLERANCE_SCALE;
    let ccw = area > tolerance;
    let cw = area < -tolerance;
    if !ccw && !cw {
        return false;
    }

    let front_facing = if ctl.front_face_ccw { ccw } else { cw };
    (front_facing && ctl.cull_front) || (!front_facing && ctl.cull_back)
}
