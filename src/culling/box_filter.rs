//! Box-filter test: triangle NDC bounding box vs. the clip box.

use super::{CullControl, CullVertex};

/// Reject when the triangle's axis-aligned NDC bounding box misses the clip
/// box entirely. Requires all three w positive so the perspective divide
/// preserves ordering; mixed-sign triangles fall through to later tests.
pub fn cull_box_filter(flag: bool, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    if verts.iter().any(|v| v.position.w <= 0.0) {
        return false;
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for v in verts {
        let rcp_w = 1.0 / v.position.w;
        let ndc = [v.position.x * rcp_w, v.position.y * rcp_w, v.position.z * rcp_w];
        for axis in 0..3 {
            min[axis] = min[axis].min(ndc[axis]);
            max[axis] = max[axis].max(ndc[axis]);
        }
    }

    let adj = ctl.clip_space_adjust;
    min[0] > adj
        || max[0] < -adj
        || min[1] > adj
        || max[1] < -adj
        || min[2] > 1.0
        || max[2] < ctl.z_near_ndc()
}
