/// Planner determinism and aliasing contract, across the configuration
/// space.
use cull_engine::config::{PipelineConfig, StreamOutBufferDesc, WaveSize};
use cull_engine::layout::{plan_regions, RegionMap, ScratchRegion};

fn config_grid() -> Vec<PipelineConfig> {
    let mut configs = Vec::new();
    for passthrough in [false, true] {
        for compaction in [false, true] {
            for stream_out in [false, true] {
                for cull_distance in [false, true] {
                    for distribute_prim_id in [false, true] {
                        for wave_size in [WaveSize::W32, WaveSize::W64] {
                            let mut cfg = PipelineConfig::default();
                            cfg.passthrough = passthrough;
                            cfg.vertex_compaction = compaction && !passthrough;
                            cfg.stream_out = stream_out;
                            cfg.cull.cull_distance = cull_distance;
                            cfg.cull.cull_distance_count = if cull_distance { 2 } else { 0 };
                            cfg.distribute_primitive_id = distribute_prim_id;
                            cfg.wave_size = wave_size;
                            if stream_out {
                                cfg.streamout_buffers[0] = Some(StreamOutBufferDesc {
                                    capacity_dwords: 1024,
                                    vertex_stride: 4,
                                });
                            }
                            configs.push(cfg);
                        }
                    }
                }
            }
        }
    }
    configs
}

#[test]
fn sizing_call_equals_layout_call_for_all_configurations() {
    for (i, cfg) in config_grid().iter().enumerate() {
        let sized = plan_regions(cfg, None);
        let mut map = RegionMap::default();
        let laid_out = plan_regions(cfg, Some(&mut map));
        assert_eq!(sized, laid_out, "config #{i}: size drift between calls");
    }
}

#[test]
fn planning_twice_yields_identical_offsets() {
    for cfg in config_grid() {
        let mut first = RegionMap::default();
        let mut second = RegionMap::default();
        plan_regions(&cfg, Some(&mut first));
        plan_regions(&cfg, Some(&mut second));
        for region in [
            ScratchRegion::DistributedPrimitiveId,
            ScratchRegion::VertexPosition,
            ScratchRegion::VertexCullDistance,
            ScratchRegion::PrimitiveData,
            ScratchRegion::SubgroupCounts,
            ScratchRegion::PrimitiveCounts,
            ScratchRegion::VertexCounts,
            ScratchRegion::DrawFlag,
            ScratchRegion::CompactedVertexMap,
            ScratchRegion::UncompactedVertexMap,
            ScratchRegion::StreamOutControl,
        ] {
            assert_eq!(first.contains(region), second.contains(region));
            if first.contains(region) {
                assert_eq!(first.offset(region), second.offset(region));
                assert_eq!(first.size(region), second.size(region));
            }
        }
    }
}

#[test]
fn every_region_fits_inside_the_total() {
    for cfg in config_grid() {
        let mut map = RegionMap::default();
        let total = plan_regions(&cfg, Some(&mut map));
        for region in [
            ScratchRegion::DistributedPrimitiveId,
            ScratchRegion::VertexPosition,
            ScratchRegion::PrimitiveData,
            ScratchRegion::SubgroupCounts,
            ScratchRegion::StreamOutControl,
        ] {
            if map.contains(region) {
                assert!(
                    map.offset(region) + map.size(region) <= total,
                    "{region:?} extends past the footprint"
                );
            }
        }
    }
}

#[test]
fn shrinking_the_subgroup_shrinks_the_footprint() {
    let mut big = PipelineConfig::default();
    big.max_verts_per_subgroup = 256;
    big.max_prims_per_subgroup = 256;
    let mut small = big.clone();
    small.max_verts_per_subgroup = 64;
    small.max_prims_per_subgroup = 64;
    assert!(plan_regions(&small, None) < plan_regions(&big, None));
}
