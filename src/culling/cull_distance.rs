//! Cull-distance test: per-vertex sign masks precomputed by the fetch stage.

use super::{CullControl, CullVertex};

/// Cull iff some declared cull distance is negative at all three vertices:
/// the AND of the sign bitmasks is nonzero.
pub fn cull_cull_distance(flag: bool, verts: &[CullVertex; 3], _ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    (verts[0].cull_distance_mask & verts[1].cull_distance_mask & verts[2].cull_distance_mask) != 0
}
