//! Shared-region planner for the subgroup scratchpad.
//!
//! Walks a fixed, mode-dependent sequence of named regions and accumulates a
//! dword offset counter. The planner is callable twice with identical
//! results: once with `None` to size the allocation, once with a `RegionMap`
//! to record actual offsets. Region pairs whose enabling flags are mutually
//! exclusive may alias; the contract for each aliased pair is documented on
//! the region itself.

use log::debug;

use crate::config::{ConfigError, PipelineConfig, MAX_SCRATCH_DWORDS, MAX_STREAMOUT_BUFFERS};

/// Named windows into the subgroup scratchpad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchRegion {
    /// Primitive ID staged through the scratchpad in passthrough
    /// configurations. Aliases the head of `VertexPosition` in culling
    /// configurations: distribution completes (and is consumed) before any
    /// position write, so the two never hold live data at the same time.
    DistributedPrimitiveId,
    /// Four dwords per vertex: clip-space position fetched before culling.
    VertexPosition,
    /// One dword per vertex: sign bitmask of declared cull distances.
    VertexCullDistance,
    /// One dword per primitive: connectivity word with the null flag doubling
    /// as the cull flag.
    PrimitiveData,
    /// Two dwords: revised vertex/primitive counts (sentinel-initialized).
    SubgroupCounts,
    /// Per-wave surviving-primitive counts plus a total slot.
    PrimitiveCounts,
    /// Per-wave surviving-vertex counts plus a total slot.
    VertexCounts,
    /// One dword per vertex: nonzero when some surviving primitive
    /// references the vertex.
    DrawFlag,
    /// Uncompacted index -> compacted index.
    CompactedVertexMap,
    /// Compacted index -> uncompacted index (export order).
    UncompactedVertexMap,
    /// Two dwords per stream-out buffer: (dwords already written, primitives
    /// to write), published once per subgroup.
    StreamOutControl,
}

const REGION_COUNT: usize = 11;

impl ScratchRegion {
    #[inline]
    fn index(self) -> usize {
        match self {
            ScratchRegion::DistributedPrimitiveId => 0,
            ScratchRegion::VertexPosition => 1,
            ScratchRegion::VertexCullDistance => 2,
            ScratchRegion::PrimitiveData => 3,
            ScratchRegion::SubgroupCounts => 4,
            ScratchRegion::PrimitiveCounts => 5,
            ScratchRegion::VertexCounts => 6,
            ScratchRegion::DrawFlag => 7,
            ScratchRegion::CompactedVertexMap => 8,
            ScratchRegion::UncompactedVertexMap => 9,
            ScratchRegion::StreamOutControl => 10,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ScratchRegion::DistributedPrimitiveId => "Distributed Primitive ID",
            ScratchRegion::VertexPosition => "Vertex Position",
            ScratchRegion::VertexCullDistance => "Vertex Cull Distance",
            ScratchRegion::PrimitiveData => "Primitive Data",
            ScratchRegion::SubgroupCounts => "Subgroup Counts",
            ScratchRegion::PrimitiveCounts => "Primitive Counts In Waves",
            ScratchRegion::VertexCounts => "Vertex Counts In Waves",
            ScratchRegion::DrawFlag => "Vertex Draw Flag",
            ScratchRegion::CompactedVertexMap => "Compacted Vertex Map",
            ScratchRegion::UncompactedVertexMap => "Uncompacted Vertex Map",
            ScratchRegion::StreamOutControl => "Stream-Out Control",
        }
    }
}

/// Planned (offset, size) pairs, indexed by region. Immutable once planned
/// for a given configuration.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    entries: [Option<(u32, u32)>; REGION_COUNT],
}

impl RegionMap {
    /// Offset of a planned region in dwords. Panics if the region is absent
    /// for the active configuration; callers branch on the same flags the
    /// planner does, so a miss is a programming error.
    #[inline]
    pub fn offset(&self, region: ScratchRegion) -> u32 {
        self.entries[region.index()]
            .unwrap_or_else(|| panic!("region {} not planned for this configuration", region.name()))
            .0
    }

    /// Size of a planned region in dwords.
    #[inline]
    pub fn size(&self, region: ScratchRegion) -> u32 {
        self.entries[region.index()]
            .unwrap_or_else(|| panic!("region {} not planned for this configuration", region.name()))
            .1
    }

    #[inline]
    pub fn contains(&self, region: ScratchRegion) -> bool {
        self.entries[region.index()].is_some()
    }

    fn record(&mut self, region: ScratchRegion, offset: u32, size: u32) {
        debug!(
            "{:<28} : offset = {:#06x}, size = {:#06x}{}",
            region.name(),
            offset,
            size,
            if size == 0 { " (empty)" } else { "" }
        );
        self.entries[region.index()] = Some((offset, size));
    }
}

/// Plan the scratchpad layout for `cfg`. Returns the total footprint in
/// dwords. With `layout == None` only the size is computed; with a map the
/// offsets are recorded as well. Both calls yield the same total.
pub fn plan_regions(cfg: &PipelineConfig, mut layout: Option<&mut RegionMap>) -> u32 {
    let max_verts = cfg.max_verts_per_subgroup;
    let max_prims = cfg.max_prims_per_subgroup;
    let wave_slots = cfg.wave_slots();

    let mut offset = 0u32;
    let mut total = 0u32;

    if layout.is_some() {
        debug!("scratchpad region plan (dwords):");
    }

    let mut place = |region: ScratchRegion, size: u32, layout: &mut Option<&mut RegionMap>| {
        if let Some(map) = layout.as_deref_mut() {
            map.record(region, offset, size);
        }
        offset += size;
        total += size;
    };

    if cfg.culling_active() {
        // Position data leads the layout so the distributed primitive ID
        // alias below lands at a fixed base.
        place(ScratchRegion::VertexPosition, 4 * max_verts, &mut layout);
        if cfg.cull.cull_distance {
            place(ScratchRegion::VertexCullDistance, max_verts, &mut layout);
        }
    } else if cfg.distribute_primitive_id {
        place(ScratchRegion::DistributedPrimitiveId, max_verts, &mut layout);
    }

    place(ScratchRegion::PrimitiveData, max_prims, &mut layout);
    place(ScratchRegion::SubgroupCounts, 2, &mut layout);

    if cfg.culling_active() {
        place(ScratchRegion::PrimitiveCounts, wave_slots + 1, &mut layout);
        if cfg.vertex_compaction {
            place(ScratchRegion::VertexCounts, wave_slots + 1, &mut layout);
            place(ScratchRegion::DrawFlag, max_verts, &mut layout);
            place(ScratchRegion::CompactedVertexMap, max_verts, &mut layout);
            place(ScratchRegion::UncompactedVertexMap, max_verts, &mut layout);
        }
    }

    if cfg.stream_out {
        place(
            ScratchRegion::StreamOutControl,
            2 * MAX_STREAMOUT_BUFFERS as u32,
            &mut layout,
        );
    }

    // Alias: in culling configurations the distributed primitive ID shares
    // the head of the vertex position region. Distribution is consumed
    // before the first position write, so the overlap is safe.
    if cfg.culling_active() && cfg.distribute_primitive_id {
        if let Some(map) = layout.as_deref_mut() {
            let base = map.offset(ScratchRegion::VertexPosition);
            map.record(ScratchRegion::DistributedPrimitiveId, base, max_verts);
        }
    }

    if layout.is_some() {
        debug!("total scratchpad footprint : {:#06x} dwords", total);
    }

    assert!(
        total <= MAX_SCRATCH_DWORDS,
        "scratchpad footprint {total} exceeds hardware ceiling {MAX_SCRATCH_DWORDS}"
    );
    total
}

/// Host-side wrapper combining configuration validation with the footprint
/// ceiling check, for callers sizing an allocation.
pub fn plan_checked(cfg: &PipelineConfig) -> Result<u32, ConfigError> {
    cfg.validate()?;
    let total = plan_regions(cfg, None);
    if total > MAX_SCRATCH_DWORDS {
        return Err(ConfigError::ScratchOverflow(total));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamOutBufferDesc;

    #[test]
    fn sizing_and_layout_calls_agree() {
        let mut cfg = PipelineConfig::default();
        cfg.stream_out = true;
        cfg.streamout_buffers[0] = Some(StreamOutBufferDesc {
            capacity_dwords: 256,
            vertex_stride: 4,
        });
        cfg.cull.cull_distance = true;
        cfg.cull.cull_distance_count = 2;

        let sized = plan_regions(&cfg, None);
        let mut map = RegionMap::default();
        let laid_out = plan_regions(&cfg, Some(&mut map));
        assert_eq!(sized, laid_out, "sizing call must match layout call");
    }

    #[test]
    fn regions_are_disjoint_unless_aliased() {
        let mut cfg = PipelineConfig::default();
        cfg.distribute_primitive_id = true;
        let mut map = RegionMap::default();
        plan_regions(&cfg, Some(&mut map));

        let mut spans: Vec<(u32, u32, ScratchRegion)> = Vec::new();
        for region in [
            ScratchRegion::VertexPosition,
            ScratchRegion::VertexCullDistance,
            ScratchRegion::PrimitiveData,
            ScratchRegion::SubgroupCounts,
            ScratchRegion::PrimitiveCounts,
            ScratchRegion::VertexCounts,
            ScratchRegion::DrawFlag,
            ScratchRegion::CompactedVertexMap,
            ScratchRegion::UncompactedVertexMap,
        ] {
            if map.contains(region) {
                spans.push((map.offset(region), map.size(region), region));
            }
        }
        spans.sort_by_key(|s| s.0);
        for pair in spans.windows(2) {
            assert!(
                pair[0].0 + pair[0].1 <= pair[1].0,
                "{:?} overlaps {:?}",
                pair[0].2,
                pair[1].2
            );
        }

        // The documented alias: distributed primitive ID sits at the head of
        // the position region in culling configurations.
        assert_eq!(
            map.offset(ScratchRegion::DistributedPrimitiveId),
            map.offset(ScratchRegion::VertexPosition)
        );
    }

    #[test]
    fn passthrough_layout_has_no_compaction_regions() {
        let mut cfg = PipelineConfig::default();
        cfg.passthrough = true;
        cfg.vertex_compaction = false;
        cfg.distribute_primitive_id = true;
        let mut map = RegionMap::default();
        plan_regions(&cfg, Some(&mut map));

        assert!(map.contains(ScratchRegion::DistributedPrimitiveId));
        assert!(!map.contains(ScratchRegion::VertexPosition));
        assert!(!map.contains(ScratchRegion::CompactedVertexMap));
        assert!(!map.contains(ScratchRegion::DrawFlag));
    }

    #[test]
    fn footprint_stays_under_ceiling_at_max_shape() {
        let cfg = PipelineConfig::default(); // 256 verts, 256 prims, everything on
        let total = plan_regions(&cfg, None);
        assert!(total <= MAX_SCRATCH_DWORDS);
    }
}
