//! Export coordination: connectivity formatting, branch selection, and the
//! degenerate fully-culled path.

use glam::Vec4;

use crate::config::{PipelineConfig, PrimitiveTopology};
use crate::subgroup::GroupInfo;

/// Null-primitive flag in the connectivity word.
pub const CONNECTIVITY_NULL_BIT: u32 = 1 << 31;

/// Bits per packed vertex index.
const INDEX_BITS: u32 = 10;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Fixed-function output stage driven by the coordinator. One connectivity
/// export per surviving primitive, one position export and one attribute
/// export per surviving vertex, plus the cross-subgroup allocation request.
pub trait PrimitiveOutput {
    /// Announce the subgroup's final vertex/primitive counts.
    fn alloc_output_space(&mut self, vertex_count: u32, primitive_count: u32);
    fn export_primitive(&mut self, slot: u32, connectivity: u32);
    fn export_position(&mut self, slot: u32, position: Vec4);
    fn export_attributes(&mut self, slot: u32, attributes: &[(u32, Vec4)]);
}

/// Pack subgroup-relative vertex indices into a connectivity word.
/// Triangles with the winding flag flip their second and third indices so
/// the fixed-function stage always receives its native winding.
pub fn pack_connectivity(
    topology: PrimitiveTopology,
    indices: [u32; 3],
    null_primitive: bool,
    flip_winding: bool,
) -> u32 {
    debug_assert!(indices.iter().all(|i| *i <= INDEX_MASK));
    let [i0, mut i1, mut i2] = indices;
    if flip_winding && topology == PrimitiveTopology::Triangles {
        core::mem::swap(&mut i1, &mut i2);
    }
    let mut word = match topology {
        PrimitiveTopology::Points => i0,
        PrimitiveTopology::Lines => i0 | (i1 << INDEX_BITS),
        PrimitiveTopology::Triangles => i0 | (i1 << INDEX_BITS) | (i2 << (2 * INDEX_BITS)),
    };
    if null_primitive {
        word |= CONNECTIVITY_NULL_BIT;
    }
    word
}

/// Unpack a connectivity word back into indices and the null flag.
pub fn unpack_connectivity(topology: PrimitiveTopology, word: u32) -> ([u32; 3], bool) {
    let null_primitive = word & CONNECTIVITY_NULL_BIT != 0;
    let indices = match topology {
        PrimitiveTopology::Points => [word & INDEX_MASK, 0, 0],
        PrimitiveTopology::Lines => [word & INDEX_MASK, (word >> INDEX_BITS) & INDEX_MASK, 0],
        PrimitiveTopology::Triangles => [
            word & INDEX_MASK,
            (word >> INDEX_BITS) & INDEX_MASK,
            (word >> (2 * INDEX_BITS)) & INDEX_MASK,
        ],
    };
    (indices, null_primitive)
}

/// The three per-subgroup export strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportBranch {
    /// Culling compiled out; primitives pass through untouched.
    FastPassthrough,
    /// Culling apparatus present, but this subgroup skips it: too small, or
    /// position Z is a compile-time constant.
    RuntimePassthrough,
    /// Full cull + compact + re-export.
    Compacted,
}

/// Choose the branch for one subgroup. Every lane derives the same answer
/// from the same inputs, so the whole subgroup agrees on the early exit.
pub fn select_branch(cfg: &PipelineConfig, info: GroupInfo) -> ExportBranch {
    if !cfg.culling_active() {
        return ExportBranch::FastPassthrough;
    }
    if cfg.constant_position_z || info.raw_vertex_count < cfg.small_subgroup_threshold {
        return ExportBranch::RuntimePassthrough;
    }
    ExportBranch::Compacted
}

/// Emit the degenerate export for a fully-culled subgroup: one null
/// primitive and one zero-payload vertex. The fixed-function stage requires
/// every invoked subgroup to emit at least one primitive, so zero dummy
/// exports are never issued even when a configured count would compute to
/// zero.
pub fn export_dummy(cfg: &PipelineConfig, output: &mut dyn PrimitiveOutput) {
    if !cfg.no_alloc_message {
        output.alloc_output_space(1, 1);
    }
    output.export_primitive(0, pack_connectivity(cfg.topology, [0, 0, 0], true, false));
    output.export_position(0, Vec4::ZERO);
}
