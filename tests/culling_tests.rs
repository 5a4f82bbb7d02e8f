/// Cull chain behavior across tests: monotonicity, ordering, and the
/// backface exact-boundary guarantee.
use cull_engine::culling::{
    cull_backface, cull_box_filter, cull_cull_distance, cull_frustum, cull_small_primitive,
    cull_sphere, CullChain, CullControl, CullTest, CullVertex,
};
use cull_engine::CullOptions;
use glam::{vec4, Vec4};

fn tri(p0: Vec4, p1: Vec4, p2: Vec4) -> [CullVertex; 3] {
    [p0, p1, p2].map(|position| CullVertex {
        position,
        cull_distance_mask: 0,
    })
}

fn all_tests_enabled() -> CullOptions {
    CullOptions {
        backface: true,
        frustum: true,
        box_filter: true,
        sphere: true,
        small_primitives: true,
        cull_distance: true,
        cull_distance_count: 2,
    }
}

#[test]
fn every_test_passes_an_already_set_flag_through() {
    // Monotonicity at the single-test level: a true input flag is returned
    // unchanged even for geometry the test would otherwise keep.
    let ctl = CullControl::default();
    let visible = tri(
        vec4(-0.5, -0.5, 0.5, 1.0),
        vec4(0.5, -0.5, 0.5, 1.0),
        vec4(0.0, 0.5, 0.5, 1.0),
    );
    assert!(cull_backface(true, &visible, &ctl));
    assert!(cull_frustum(true, &visible, &ctl));
    assert!(cull_box_filter(true, &visible, &ctl));
    assert!(cull_sphere(true, &visible, &ctl));
    assert!(cull_small_primitive(true, &visible, &ctl));
    assert!(cull_cull_distance(true, &visible, &ctl));
}

#[test]
fn first_firing_test_wins_the_verdict() {
    let ctl = CullControl::default();
    let chain = CullChain::from_options(&all_tests_enabled());

    // Backfacing AND offscreen: backface runs first, so it takes the
    // verdict and frustum never observes a false flag.
    let back_and_out = tri(
        vec4(-9.0, -1.0, 0.5, 1.0),
        vec4(-9.0, 1.0, 0.5, 1.0),
        vec4(-8.0, -1.0, 0.5, 1.0),
    );
    assert_eq!(
        chain.run_with_verdict(&back_and_out, &ctl),
        Some(CullTest::Backface)
    );

    // Offscreen but front-facing: frustum takes it.
    let front_and_out = tri(
        vec4(-9.0, -1.0, 0.5, 1.0),
        vec4(-8.0, -1.0, 0.5, 1.0),
        vec4(-9.0, 1.0, 0.5, 1.0),
    );
    assert_eq!(
        chain.run_with_verdict(&front_and_out, &ctl),
        Some(CullTest::Frustum)
    );
}

#[test]
fn verdict_agrees_with_run() {
    let ctl = CullControl::default();
    let chain = CullChain::from_options(&all_tests_enabled());
    let cases = [
        tri(
            vec4(-0.5, -0.5, 0.5, 1.0),
            vec4(0.5, -0.5, 0.5, 1.0),
            vec4(0.0, 0.5, 0.5, 1.0),
        ),
        tri(
            vec4(-9.0, -1.0, 0.5, 1.0),
            vec4(-8.0, -1.0, 0.5, 1.0),
            vec4(-9.0, 1.0, 0.5, 1.0),
        ),
        tri(
            vec4(0.1000, 0.1000, 0.5, 1.0),
            vec4(0.1001, 0.1000, 0.5, 1.0),
            vec4(0.1000, 0.1001, 0.5, 1.0),
        ),
    ];
    for (i, case) in cases.iter().enumerate() {
        assert_eq!(
            chain.run(case, &ctl),
            chain.run_with_verdict(case, &ctl).is_some(),
            "case {i}"
        );
    }
}

#[test]
fn backface_exact_zero_area_boundary() {
    // A triangle with signed area exactly 0 is never culled by the backface
    // test, regardless of winding configuration: the comparisons are strict.
    let zero_area = tri(
        vec4(-1.0, -1.0, 0.5, 1.0),
        vec4(0.0, 0.0, 0.5, 1.0),
        vec4(1.0, 1.0, 0.5, 1.0),
    );
    for front_face_ccw in [false, true] {
        for (cull_front, cull_back) in [(true, false), (false, true), (true, true)] {
            let ctl = CullControl {
                front_face_ccw,
                cull_front,
                cull_back,
                ..CullControl::default()
            };
            assert!(
                !cull_backface(false, &zero_area, &ctl),
                "zero area culled (ccw={front_face_ccw}, front={cull_front}, back={cull_back})"
            );
        }
    }
}

#[test]
fn cull_distance_uses_fetched_sign_masks() {
    let ctl = CullControl::default();
    let chain = CullChain::from_options(&CullOptions {
        backface: false,
        frustum: false,
        box_filter: false,
        sphere: false,
        small_primitives: false,
        cull_distance: true,
        cull_distance_count: 2,
    });

    let mut verts = tri(
        vec4(-0.5, -0.5, 0.5, 1.0),
        vec4(0.5, -0.5, 0.5, 1.0),
        vec4(0.0, 0.5, 0.5, 1.0),
    );
    for v in verts.iter_mut() {
        v.cull_distance_mask = 0b10;
    }
    assert_eq!(
        chain.run_with_verdict(&verts, &ctl),
        Some(CullTest::CullDistance)
    );

    verts[1].cull_distance_mask = 0b01;
    assert_eq!(chain.run_with_verdict(&verts, &ctl), None);
}

#[test]
fn empty_chain_keeps_everything() {
    let chain = CullChain::from_options(&CullOptions {
        backface: false,
        frustum: false,
        box_filter: false,
        sphere: false,
        small_primitives: false,
        cull_distance: false,
        cull_distance_count: 0,
    });
    assert!(chain.is_empty());
    let ctl = CullControl::default();
    let anything = tri(
        vec4(-9.0, -9.0, 9.0, 1.0),
        vec4(-8.0, -9.0, 9.0, 1.0),
        vec4(-9.0, -8.0, 9.0, 1.0),
    );
    assert!(!chain.run(&anything, &ctl));
}
