//! Per-primitive visibility culling.
//!
//! An ordered chain of independent tests, each consuming the current cull
//! flag and possibly setting it. The flag is monotonic: once a test sets it,
//! every later test sees `true` and returns it unchanged, so the chain order
//! is part of the numerical contract and must not be rearranged.

use glam::{Vec2, Vec4};

mod backface;
mod box_filter;
mod cull_distance;
mod frustum;
mod small_primitive;
mod sphere;

pub use backface::cull_backface;
pub use box_filter::cull_box_filter;
pub use cull_distance::cull_cull_distance;
pub use frustum::cull_frustum;
pub use small_primitive::cull_small_primitive;
pub use sphere::cull_sphere;

use crate::config::CullOptions;

/// Read-only culling control values, fetched once per subgroup from the
/// external constant table and shared by every test. Never mutated.
#[derive(Debug, Clone, Copy)]
pub struct CullControl {
    /// Viewport transform: screen = ndc * scale + offset.
    pub viewport_scale: Vec2,
    pub viewport_offset: Vec2,
    /// Guard-band adjustment for the x/y clip planes (1.0 = tight clip box).
    pub clip_space_adjust: f32,
    /// Near-plane mode: GL-style z in [-w, w] when set, D3D-style [0, w]
    /// when clear.
    pub z_near_is_minus_w: bool,
    /// Winding: front faces are counter-clockwise when set.
    pub front_face_ccw: bool,
    pub cull_front: bool,
    pub cull_back: bool,
    /// Polygon mode is wireframe; backface culling is disabled outright.
    pub wireframe: bool,
    /// Conservative rasterization; the small-primitive filter is invalid.
    pub conservative_raster: bool,
}

impl Default for CullControl {
    fn default() -> Self {
        Self {
            viewport_scale: Vec2::new(640.0, 360.0),
            viewport_offset: Vec2::new(640.0, 360.0),
            clip_space_adjust: 1.0,
            z_near_is_minus_w: false,
            front_face_ccw: true,
            cull_front: false,
            cull_back: true,
            wireframe: false,
            conservative_raster: false,
        }
    }
}

impl CullControl {
    /// NDC z of the near clip plane for the active clip-control mode.
    #[inline]
    pub(crate) fn z_near_ndc(&self) -> f32 {
        if self.z_near_is_minus_w {
            -1.0
        } else {
            0.0
        }
    }
}

/// Per-vertex data consumed by the chain.
#[derive(Debug, Clone, Copy)]
pub struct CullVertex {
    /// Clip-space position.
    pub position: Vec4,
    /// Sign bitmask of declared cull distances.
    pub cull_distance_mask: u32,
}

/// The closed set of tests, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullTest {
    Backface,
    Frustum,
    BoxFilter,
    Sphere,
    SmallPrimitive,
    CullDistance,
}

/// Ordered list of enabled tests. Built once per configuration.
#[derive(Debug, Clone)]
pub struct CullChain {
    tests: Vec<CullTest>,
}

impl CullChain {
    /// Assemble the chain in its fixed order from the per-test enables.
    pub fn from_options(opts: &CullOptions) -> Self {
        let mut tests = Vec::new();
        if opts.backface {
            tests.push(CullTest::Backface);
        }
        if opts.frustum {
            tests.push(CullTest::Frustum);
        }
        if opts.box_filter {
            tests.push(CullTest::BoxFilter);
        }
        if opts.sphere {
            tests.push(CullTest::Sphere);
        }
        if opts.small_primitives {
            tests.push(CullTest::SmallPrimitive);
        }
        if opts.cull_distance {
            tests.push(CullTest::CullDistance);
        }
        Self { tests }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    #[inline]
    pub fn tests(&self) -> &[CullTest] {
        &self.tests
    }

    /// Run the chain for one primitive. Starts from `false` and threads the
    /// flag through every enabled test.
    pub fn run(&self, verts: &[CullVertex; 3], ctl: &CullControl) -> bool {
        self.run_with_verdict(verts, ctl).is_some()
    }

    /// Like [`run`](Self::run), but reports which test set the flag. Later
    /// tests still execute with the flag already true (and short-circuit),
    /// preserving the monotonic chain semantics exactly.
    pub fn run_with_verdict(&self, verts: &[CullVertex; 3], ctl: &CullControl) -> Option<CullTest> {
        let mut flag = false;
        let mut verdict = None;
        for test in &self.tests {
            let next = match test {
                CullTest::Backface => cull_backface(flag, verts, ctl),
                CullTest::Frustum => cull_frustum(flag, verts, ctl),
                CullTest::BoxFilter => cull_box_filter(flag, verts, ctl),
                CullTest::Sphere => cull_sphere(flag, verts, ctl),
                CullTest::SmallPrimitive => cull_small_primitive(flag, verts, ctl),
                CullTest::CullDistance => cull_cull_distance(flag, verts, ctl),
            };
            if next && !flag {
                verdict = Some(*test);
            }
            flag = next;
        }
        verdict
    }
}

/// Build a [`CullVertex`] triple from three positions with empty distance
/// masks. Test helper shared by unit tests across the chain modules.
#[cfg(test)]
pub(crate) fn verts(p0: Vec4, p1: Vec4, p2: Vec4) -> [CullVertex; 3] {
    [
        CullVertex {
            position: p0,
            cull_distance_mask: 0,
        },
        CullVertex {
            position: p1,
            cull_distance_mask: 0,
        },
        CullVertex {
            position: p2,
            cull_distance_mask: 0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec4;

    #[test]
    fn chain_order_is_fixed() {
        let chain = CullChain::from_options(&CullOptions {
            backface: true,
            frustum: true,
            box_filter: true,
            sphere: true,
            small_primitives: true,
            cull_distance: true,
            cull_distance_count: 1,
        });
        assert_eq!(
            chain.tests(),
            &[
                CullTest::Backface,
                CullTest::Frustum,
                CullTest::BoxFilter,
                CullTest::Sphere,
                CullTest::SmallPrimitive,
                CullTest::CullDistance,
            ]
        );
    }

    #[test]
    fn disabled_tests_are_absent() {
        let chain = CullChain::from_options(&CullOptions {
            backface: false,
            frustum: true,
            box_filter: false,
            sphere: false,
            small_primitives: false,
            cull_distance: false,
            cull_distance_count: 0,
        });
        assert_eq!(chain.tests(), &[CullTest::Frustum]);
    }

    #[test]
    fn onscreen_front_facing_triangle_survives_full_chain() {
        let chain = CullChain::from_options(&CullOptions::default());
        let ctl = CullControl::default();
        // Large CCW triangle around the origin, well inside the frustum.
        let tri = verts(
            vec4(-0.5, -0.5, 0.5, 1.0),
            vec4(0.5, -0.5, 0.5, 1.0),
            vec4(0.0, 0.5, 0.5, 1.0),
        );
        assert!(!chain.run(&tri, &ctl), "visible triangle must not be culled");
    }
}
