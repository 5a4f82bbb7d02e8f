//! Input fetch / split stage.
//!
//! The upstream per-vertex stage is an opaque callable that emits all of its
//! outputs through a sink. Culling only needs position and cull distances,
//! so the stage is run twice against two different sinks: a minimal
//! cull-data pass before culling, and a deferred full-output pass that runs
//! only for surviving, compacted vertices. The two passes must agree
//! bit-for-bit on position.

use glam::Vec4;

use crate::config::MAX_CULL_DISTANCES;

/// Per-lane inputs handed to the upstream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneInputs {
    pub vertex_id: u32,
    pub instance_id: u32,
    pub primitive_id: u32,
}

/// Receiver for upstream output emissions.
pub trait OutputSink {
    fn position(&mut self, position: Vec4);
    fn cull_distance(&mut self, index: u32, value: f32);
    fn attribute(&mut self, location: u32, value: Vec4);
}

/// Opaque upstream per-vertex processing stage.
pub trait VertexStage {
    fn execute(&self, inputs: &LaneInputs, sink: &mut dyn OutputSink);
}

/// Minimal per-vertex data needed by the cull chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullData {
    /// Clip-space position.
    pub position: Vec4,
    /// Bit i set iff declared cull distance i is negative.
    pub cull_distance_mask: u32,
}

/// Full deferred output for one surviving vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexOutputs {
    pub position: Vec4,
    /// (location, value) pairs in emission order.
    pub attributes: Vec<(u32, Vec4)>,
}

impl VertexOutputs {
    /// Attribute value at `location`, if the stage emitted one.
    pub fn attribute(&self, location: u32) -> Option<Vec4> {
        self.attributes
            .iter()
            .find(|(loc, _)| *loc == location)
            .map(|(_, v)| *v)
    }
}

/// Sink that captures only position and cull distances, reducing the
/// distances to a sign bitmask immediately. Attribute emissions are dropped
/// on the floor: this pass exists to be cheap.
struct CullDataSink {
    position: Vec4,
    mask: u32,
    distance_count: u32,
}

impl OutputSink for CullDataSink {
    fn position(&mut self, position: Vec4) {
        self.position = position;
    }

    fn cull_distance(&mut self, index: u32, value: f32) {
        if index < self.distance_count && value < 0.0 {
            self.mask |= 1 << index;
        }
    }

    fn attribute(&mut self, _location: u32, _value: Vec4) {}
}

/// Sink that captures everything for export.
struct DeferredSink {
    position: Vec4,
    attributes: Vec<(u32, Vec4)>,
}

impl OutputSink for DeferredSink {
    fn position(&mut self, position: Vec4) {
        self.position = position;
    }

    fn cull_distance(&mut self, _index: u32, _value: f32) {}

    fn attribute(&mut self, location: u32, value: Vec4) {
        self.attributes.push((location, value));
    }
}

/// The split stage: one upstream callable partitioned into a cull-data
/// fetch and a deferred full-output fetch.
pub struct SplitVertexStage<'a> {
    stage: &'a dyn VertexStage,
    cull_distance_count: u32,
}

impl<'a> SplitVertexStage<'a> {
    pub fn new(stage: &'a dyn VertexStage, cull_distance_count: u32) -> Self {
        debug_assert!(cull_distance_count <= MAX_CULL_DISTANCES);
        Self {
            stage,
            cull_distance_count,
        }
    }

    /// Run the minimal pass: position plus cull-distance sign mask.
    pub fn fetch_cull_data(&self, inputs: &LaneInputs) -> CullData {
        let mut sink = CullDataSink {
            position: Vec4::ZERO,
            mask: 0,
            distance_count: self.cull_distance_count,
        };
        self.stage.execute(inputs, &mut sink);
        CullData {
            position: sink.position,
            cull_distance_mask: sink.mask,
        }
    }

    /// Run the stage once, unsplit. Used by the passthrough paths, which
    /// never fetched cull data.
    pub fn run_full(&self, inputs: &LaneInputs) -> VertexOutputs {
        let mut sink = DeferredSink {
            position: Vec4::ZERO,
            attributes: Vec::new(),
        };
        self.stage.execute(inputs, &mut sink);
        VertexOutputs {
            position: sink.position,
            attributes: sink.attributes,
        }
    }

    /// Run the deferred pass for a surviving vertex. The recomputed position
    /// must bit-match `fetched_position`: the split may not change results.
    pub fn deferred_export(&self, inputs: &LaneInputs, fetched_position: Vec4) -> VertexOutputs {
        let mut sink = DeferredSink {
            position: Vec4::ZERO,
            attributes: Vec::new(),
        };
        self.stage.execute(inputs, &mut sink);
        debug_assert_eq!(
            sink.position.to_array().map(f32::to_bits),
            fetched_position.to_array().map(f32::to_bits),
            "deferred pass diverged from fetched position"
        );
        VertexOutputs {
            position: sink.position,
            attributes: sink.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec4;

    /// A deterministic stage used across the test suite: position derived
    /// from the vertex id, one color attribute, two cull distances.
    struct TestStage;

    impl VertexStage for TestStage {
        fn execute(&self, inputs: &LaneInputs, sink: &mut dyn OutputSink) {
            let v = inputs.vertex_id as f32;
            sink.position(vec4(v * 0.25, -v * 0.5, v, 1.0 + v * 0.125));
            sink.cull_distance(0, v - 4.0);
            sink.cull_distance(1, 1.0);
            sink.attribute(0, vec4(v, v + 1.0, v + 2.0, 1.0));
        }
    }

    #[test]
    fn fetch_reduces_cull_distances_to_sign_mask() {
        let split = SplitVertexStage::new(&TestStage, 2);
        let close = split.fetch_cull_data(&LaneInputs {
            vertex_id: 1,
            instance_id: 0,
            primitive_id: 0,
        });
        // distance 0 = 1 - 4 < 0, distance 1 = 1.0 >= 0
        assert_eq!(close.cull_distance_mask, 0b01);

        let far = split.fetch_cull_data(&LaneInputs {
            vertex_id: 9,
            instance_id: 0,
            primitive_id: 0,
        });
        assert_eq!(far.cull_distance_mask, 0);
    }

    #[test]
    fn undeclared_distances_do_not_contribute() {
        let split = SplitVertexStage::new(&TestStage, 1);
        let data = split.fetch_cull_data(&LaneInputs {
            vertex_id: 0,
            instance_id: 0,
            primitive_id: 0,
        });
        // distance 0 = -4 sets bit 0; distance 1 is undeclared.
        assert_eq!(data.cull_distance_mask, 0b01);
    }

    #[test]
    fn split_round_trip_is_bit_identical() {
        let split = SplitVertexStage::new(&TestStage, 2);
        for vertex_id in [0u32, 3, 17, 255] {
            let inputs = LaneInputs {
                vertex_id,
                instance_id: 0,
                primitive_id: 0,
            };
            let fetched = split.fetch_cull_data(&inputs);
            let full = split.deferred_export(&inputs, fetched.position);
            assert_eq!(
                full.position.to_array().map(f32::to_bits),
                fetched.position.to_array().map(f32::to_bits),
                "vertex {vertex_id} position must be bit-identical across the split"
            );
            assert_eq!(full.attributes.len(), 1);
        }
    }
}
