//! Frustum test: per-vertex clip-plane outcodes.

use glam::Vec4;

use super::{CullControl, CullVertex};

const OUT_LEFT: u32 = 1 << 0;
const OUT_RIGHT: u32 = 1 << 1;
const OUT_BOTTOM: u32 = 1 << 2;
const OUT_TOP: u32 = 1 << 3;
const OUT_NEAR: u32 = 1 << 4;
const OUT_FAR: u32 = 1 << 5;

/// 6-bit outcode for one clip-space vertex.
#[inline]
fn outcode(p: Vec4, ctl: &CullControl) -> u32 {
    let adj = ctl.clip_space_adjust;
    let mut code = 0;
    if p.x < -adj * p.w {
        code |= OUT_LEFT;
    }
    if p.x > adj * p.w {
        code |= OUT_RIGHT;
    }
    if p.y < -adj * p.w {
        code |= OUT_BOTTOM;
    }
    if p.y > adj * p.w {
        code |= OUT_TOP;
    }
    let z_near = if ctl.z_near_is_minus_w { -p.w } else { 0.0 };
    if p.z < z_near {
        code |= OUT_NEAR;
    }
    if p.z > p.w {
        code |= OUT_FAR;
    }
    code
}

/// Cull iff all three vertices agree on being outside one plane: the
/// bitwise AND of the outcodes is nonzero.
pub fn cull_frustum(flag: bool, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    let c0 = outcode(verts[0].position, ctl);
    let c1 = outcode(verts[1].position, ctl);
    let c2 = outcode(verts[2].position, ctl);
    (c0 & c1 & c2) != 0
}
