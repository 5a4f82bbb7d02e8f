//! Sphere test: distance from the normalized clip box's center to the
//! nearest point on the triangle.

use glam::Vec3;

use super::{CullControl, CullVertex};

/// Radius^2 of the cull sphere in normalized space: the sphere through the
/// corners of the [-1, 1]^3 box.
const SPHERE_RADIUS_SQ: f32 = 3.0;

/// Project the triangle to barycentric space, solve the 2x2 system for the
/// point nearest the origin, clamp it into the valid simplex, back-project,
/// and reject when the distance^2 from the origin exceeds the radius^2.
/// Near-zero determinants produce huge reciprocals that the comparison
/// tolerates; no explicit guard.
pub fn cull_sphere(flag: bool, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
    if flag {
        return true;
    }
    if verts.iter().any(|v| v.position.w <= 0.0) {
        return false;
    }

    // Normalized space: NDC with z remapped so the box is [-1, 1]^3 in both
    // clip-control modes.
    let normalized = |v: &CullVertex| -> Vec3 {
        let rcp_w = 1.0 / v.position.w;
        let z = v.position.z * rcp_w;
        let z = if ctl.z_near_is_minus_w { z } else { 2.0 * z - 1.0 };
        Vec3::new(v.position.x * rcp_w, v.position.y * rcp_w, z)
    };
    let p0 = normalized(&verts[0]);
    let e1 = normalized(&verts[1]) - p0;
    let e2 = normalized(&verts[2]) - p0;

    // Minimize |p0 + u*e1 + v*e2|^2: the normal equations give a symmetric
    // 2x2 system solved by Cramer's rule.
    let a = e1.dot(e1);
    let b = e1.dot(e2);
    let c = e2.dot(e2);
    let r0 = -p0.dot(e1);
    let r1 = -p0.dot(e2);
    let det = a * c - b * b;
    let rcp_det = 1.0 / det;
    let u = (r0 * c - r1 * b) * rcp_det;
    let v = (r1 * a - r0 * b) * rcp_det;

    // Clamp into the barycentric simplex: u >= 0, v >= 0, u + v <= 1.
    // max/min also swallow the NaNs a zero determinant can produce.
    let u = u.max(0.0).min(1.0);
    let v = v.max(0.0).min(1.0 - u);

    let nearest = p0 + e1 * u + e2 * v;
    nearest.length_squared() > SPHERE_RADIUS_SQ
}

#[cfg(test)]
mod tests {
    use super::super::verts;
    use super::*;
    use glam::vec4;

    #[test]
    fn triangle_through_center_survives() {
        let ctl = CullControl::default();
        let tri = verts(
            vec4(-0.5, -0.5, 0.5, 1.0),
            vec4(0.5, -0.5, 0.5, 1.0),
            vec4(0.0, 0.5, 0.5, 1.0),
        );
        assert!(!cull_sphere(false, &tri, &ctl));
    }

    #[test]
    fn distant_triangle_is_culled() {
        let ctl = CullControl::default();
        // All vertices at NDC distance > sqrt(3) from the center.
        let tri = verts(
            vec4(5.0, 5.0, 0.5, 1.0),
            vec4(6.0, 5.0, 0.5, 1.0),
            vec4(5.0, 6.0, 0.5, 1.0),
        );
        assert!(cull_sphere(false, &tri, &ctl));
    }

    #[test]
    fn nearest_point_is_found_on_an_edge() {
        let ctl = CullControl::default();
        // The unclamped minimum lies outside the simplex; the clamped
        // nearest point sits on the edge closest to the origin, still within
        // the sphere.
        let tri = verts(
            vec4(1.2, -8.0, 0.5, 1.0),
            vec4(1.2, 8.0, 0.5, 1.0),
            vec4(9.0, 0.0, 0.5, 1.0),
        );
        assert!(!cull_sphere(false, &tri, &ctl));
    }

    #[test]
    fn degenerate_triangle_is_tolerated() {
        let ctl = CullControl::default();
        // Collinear vertices: determinant is 0, reciprocal is infinite; the
        // clamp and comparison still produce a stable keep/cull decision
        // without crashing.
        let near = verts(
            vec4(0.0, 0.0, 0.5, 1.0),
            vec4(0.5, 0.0, 0.5, 1.0),
            vec4(1.0, 0.0, 0.5, 1.0),
        );
        let _ = cull_sphere(false, &near, &ctl);
    }
}
