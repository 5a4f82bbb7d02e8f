//! Per-subgroup phase driver and the batch launch driver.
//!
//! One subgroup runs to completion through a fixed sequence of barrier-
//! separated phases:
//!
//! ```text
//! decode counts, plan layout
//! fetch cull data, stage positions            (write phase)
//! -- barrier --
//! cull chain, stage primitive data            (read + write phase)
//! -- barrier --
//! accumulate vertex draw flags                (write phase)
//! -- barrier --
//! compact vertices and primitives, stage revised counts
//! -- barrier --
//! read counts; allocate output space; export or dummy-export
//! stream-out reservation + capture
//! record statistics
//! ```
//!
//! Every lane derives the same branch decision from the same inputs, so the
//! whole subgroup agrees on early exits and no lane diverges on scratchpad
//! access.

use glam::Vec4;
use rayon::prelude::*;

use crate::compaction::compact;
use crate::config::{ConfigError, PipelineConfig, MAX_STREAMOUT_BUFFERS};
use crate::count_stat;
use crate::culling::{CullChain, CullControl, CullTest, CullVertex};
use crate::export::{
    export_dummy, pack_connectivity, select_branch, unpack_connectivity, ExportBranch,
    PrimitiveOutput,
};
use crate::fetch::{LaneInputs, SplitVertexStage, VertexOutputs, VertexStage};
use crate::layout::{plan_regions, RegionMap, ScratchRegion};
use crate::scratch::{RegionView, Scratchpad};
use crate::streamout::{BufferReservation, OrderedCounter, StreamOutBuffer, StreamOutEmulator};
use crate::subgroup::SubgroupLaunch;

/// Sentinel written to the subgroup counts region before compaction runs.
const INVALID_COUNT: u32 = u32::MAX;

/// One subgroup's worth of work.
#[derive(Debug, Clone)]
pub struct SubgroupRun<'a> {
    pub launch: SubgroupLaunch,
    /// Subgroup-relative vertex indices, one triple per raw primitive
    /// (unused tail components for points/lines).
    pub connectivity: &'a [[u32; 3]],
}

/// Outcome of one subgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubgroupResult {
    pub branch: ExportBranch,
    pub revised_vertex_count: u32,
    pub revised_primitive_count: u32,
}

/// Stream-out state handed to a subgroup: buffer memory plus the per-buffer
/// ordered counters.
pub struct StreamOutContext<'a> {
    pub buffers: &'a mut [StreamOutBuffer],
    pub counters: [Option<&'a dyn OrderedCounter>; MAX_STREAMOUT_BUFFERS],
}

/// The culling/compaction stage, configured once and reused across
/// subgroups.
pub struct PrimPipeline<'a> {
    cfg: &'a PipelineConfig,
    control: CullControl,
    chain: CullChain,
    regions: RegionMap,
    scratch_size: u32,
}

impl<'a> PrimPipeline<'a> {
    pub fn new(cfg: &'a PipelineConfig, control: CullControl) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut regions = RegionMap::default();
        let scratch_size = plan_regions(cfg, Some(&mut regions));
        Ok(Self {
            cfg,
            control,
            chain: CullChain::from_options(&cfg.cull),
            regions,
            scratch_size,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        self.cfg
    }

    #[inline]
    pub fn scratch_size(&self) -> u32 {
        self.scratch_size
    }

    #[inline]
    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    fn lane_inputs(&self, run: &SubgroupRun, lane: u32) -> LaneInputs {
        LaneInputs {
            vertex_id: run.launch.first_vertex + lane,
            instance_id: 0,
            primitive_id: run.launch.first_primitive + lane,
        }
    }

    /// Stage each primitive's id at its provoking vertex and read the
    /// result back per vertex lane. In culling configurations the region
    /// aliases the head of the vertex position data, so distribution must
    /// complete before the first position write; the returned vector is
    /// that consumed copy.
    fn distribute_primitive_ids(
        &self,
        run: &SubgroupRun,
        pad: &mut Scratchpad,
        vert_count: u32,
        prim_count: u32,
    ) -> Vec<u32> {
        let region = RegionView::new(&self.regions, ScratchRegion::DistributedPrimitiveId);
        for lane in 0..prim_count {
            let provoking = run.connectivity[lane as usize][0];
            region.write(pad, provoking, run.launch.first_primitive + lane, lane);
        }
        pad.barrier();
        let ids = (0..vert_count).map(|v| region.read(pad, v, v)).collect();
        // Consumed: the aliased position region may be overwritten now.
        pad.barrier();
        ids
    }

    /// Run one subgroup to completion.
    pub fn run_subgroup(
        &self,
        run: &SubgroupRun,
        stage: &dyn VertexStage,
        output: &mut dyn PrimitiveOutput,
        mut streamout: Option<StreamOutContext<'_>>,
    ) -> SubgroupResult {
        let info = run.launch.group_info();
        debug_assert!(info.raw_vertex_count <= self.cfg.max_verts_per_subgroup);
        debug_assert!(info.raw_primitive_count <= self.cfg.max_prims_per_subgroup);
        debug_assert!(run.connectivity.len() as u32 >= info.raw_primitive_count);

        count_stat!(subgroups_launched);
        count_stat!(primitives_processed, info.raw_primitive_count);

        let split = SplitVertexStage::new(stage, self.cfg.cull.cull_distance_count);
        let branch = select_branch(self.cfg, info);
        match branch {
            ExportBranch::FastPassthrough => {
                count_stat!(subgroups_fast_passthrough);
                self.export_passthrough(run, &split, branch, output, streamout.as_mut())
            }
            ExportBranch::RuntimePassthrough => {
                count_stat!(subgroups_runtime_passthrough);
                self.export_passthrough(run, &split, branch, output, streamout.as_mut())
            }
            ExportBranch::Compacted => {
                self.run_culled(run, &split, output, streamout.as_mut())
            }
        }
    }

    /// Passthrough export: original indices, no culling, no compaction.
    fn export_passthrough(
        &self,
        run: &SubgroupRun,
        split: &SplitVertexStage,
        branch: ExportBranch,
        output: &mut dyn PrimitiveOutput,
        streamout: Option<&mut StreamOutContext<'_>>,
    ) -> SubgroupResult {
        let info = run.launch.group_info();
        let vert_count = info.raw_vertex_count;
        let prim_count = info.raw_primitive_count;

        if !self.cfg.no_alloc_message {
            output.alloc_output_space(vert_count, prim_count);
        }

        let mut pad = Scratchpad::new(self.scratch_size);
        let distributed = self
            .cfg
            .distribute_primitive_id
            .then(|| self.distribute_primitive_ids(run, &mut pad, vert_count, prim_count));

        for prim in 0..prim_count {
            let word = pack_connectivity(
                self.cfg.topology,
                run.connectivity[prim as usize],
                false,
                false,
            );
            output.export_primitive(prim, word);
        }

        let mut outputs: Vec<VertexOutputs> = Vec::with_capacity(vert_count as usize);
        for vert in 0..vert_count {
            let mut inputs = self.lane_inputs(run, vert);
            if let Some(ids) = &distributed {
                inputs.primitive_id = ids[vert as usize];
            }
            let full = split.run_full(&inputs);
            output.export_position(vert, full.position);
            output.export_attributes(vert, &full.attributes);
            outputs.push(full);
        }
        count_stat!(primitives_exported, prim_count);
        count_stat!(vertices_exported, vert_count);

        if let Some(ctx) = streamout {
            // Nothing was culled; identity slots, every primitive captured.
            let slots: Vec<(u32, [u32; 3])> = (0..prim_count)
                .map(|p| (p, run.connectivity[p as usize]))
                .collect();
            self.run_streamout(ctx, &mut pad, prim_count, &slots, |v| {
                Some(&outputs[v as usize])
            });
        }

        SubgroupResult {
            branch,
            revised_vertex_count: vert_count,
            revised_primitive_count: prim_count,
        }
    }

    /// The full cull + compact + export path.
    fn run_culled(
        &self,
        run: &SubgroupRun,
        split: &SplitVertexStage,
        output: &mut dyn PrimitiveOutput,
        streamout: Option<&mut StreamOutContext<'_>>,
    ) -> SubgroupResult {
        let info = run.launch.group_info();
        let vert_count = info.raw_vertex_count;
        let prim_count = info.raw_primitive_count;
        let wave_size = self.cfg.wave_size;

        let mut pad = Scratchpad::new(self.scratch_size);
        let positions = RegionView::new(&self.regions, ScratchRegion::VertexPosition);
        let distances = self
            .cfg
            .cull
            .cull_distance
            .then(|| RegionView::new(&self.regions, ScratchRegion::VertexCullDistance));
        let prim_data = RegionView::new(&self.regions, ScratchRegion::PrimitiveData);
        let counts = RegionView::new(&self.regions, ScratchRegion::SubgroupCounts);

        // Primitive-id distribution first: its region aliases the head of
        // the position data and must be consumed before positions land.
        let distributed = self
            .cfg
            .distribute_primitive_id
            .then(|| self.distribute_primitive_ids(run, &mut pad, vert_count, prim_count));
        let vertex_inputs = |lane: u32| -> LaneInputs {
            let mut inputs = self.lane_inputs(run, lane);
            if let Some(ids) = &distributed {
                inputs.primitive_id = ids[lane as usize];
            }
            inputs
        };

        // Fetch phase: stage every lane's cull data. Lane 0 also seeds the
        // counts region with the sentinel that the compaction phase must
        // overwrite.
        counts.write(&mut pad, 0, INVALID_COUNT, 0);
        counts.write(&mut pad, 1, INVALID_COUNT, 0);
        for lane in 0..vert_count {
            let data = split.fetch_cull_data(&vertex_inputs(lane));
            let bits = data.position.to_array().map(f32::to_bits);
            for (c, b) in bits.iter().enumerate() {
                positions.write(&mut pad, 4 * lane + c as u32, *b, lane);
            }
            if let Some(region) = distances {
                region.write(&mut pad, lane, data.cull_distance_mask, lane);
            }
        }
        pad.barrier();

        // Cull phase: each primitive lane gathers its three vertices from
        // the scratchpad and runs the chain. The connectivity word is staged
        // with the null flag doubling as the cull flag.
        let mut prim_alive = vec![false; prim_count as usize];
        for lane in 0..prim_count {
            let indices = run.connectivity[lane as usize];
            let verts = indices.map(|v| {
                let mut bits = [0u32; 4];
                for (c, b) in bits.iter_mut().enumerate() {
                    *b = positions.read(&pad, 4 * v + c as u32, lane);
                }
                let [x, y, z, w] = bits.map(f32::from_bits);
                CullVertex {
                    position: Vec4::new(x, y, z, w),
                    cull_distance_mask: distances
                        .map(|region| region.read(&pad, v, lane))
                        .unwrap_or(0),
                }
            });
            let verdict = self.chain.run_with_verdict(&verts, &self.control);
            let culled = verdict.is_some();
            match verdict {
                Some(CullTest::Backface) => count_stat!(primitives_culled_backface),
                Some(CullTest::Frustum) => count_stat!(primitives_culled_frustum),
                Some(CullTest::BoxFilter) => count_stat!(primitives_culled_box),
                Some(CullTest::Sphere) => count_stat!(primitives_culled_sphere),
                Some(CullTest::SmallPrimitive) => count_stat!(primitives_culled_small),
                Some(CullTest::CullDistance) => count_stat!(primitives_culled_distance),
                None => {}
            }
            prim_alive[lane as usize] = !culled;
            let word = pack_connectivity(self.cfg.topology, indices, culled, false);
            prim_data.write(&mut pad, lane, word, lane);
        }
        pad.barrier();

        // Draw-flag phase: surviving primitives mark the vertices they
        // reference. Atomic OR, many primitives may share a vertex.
        let verts_per_prim = self.cfg.topology.vertices_per_primitive() as usize;
        if self.cfg.vertex_compaction {
            let draw_flags = RegionView::new(&self.regions, ScratchRegion::DrawFlag);
            for lane in 0..prim_count {
                if prim_alive[lane as usize] {
                    for &v in &run.connectivity[lane as usize][..verts_per_prim] {
                        draw_flags.atomic_or(&mut pad, v, 1);
                    }
                }
            }
            pad.barrier();
        }

        // Compaction phase.
        let prim_counts = RegionView::new(&self.regions, ScratchRegion::PrimitiveCounts);
        let prim_compaction = compact(&mut pad, prim_counts, None, wave_size, &prim_alive);
        let revised_prims = prim_compaction.total;

        let (vertex_compaction, revised_verts) = if self.cfg.vertex_compaction {
            let draw_flags = RegionView::new(&self.regions, ScratchRegion::DrawFlag);
            let drawn: Vec<bool> = (0..vert_count)
                .map(|v| draw_flags.read(&pad, v, v) != 0)
                .collect();
            let maps = (
                RegionView::new(&self.regions, ScratchRegion::CompactedVertexMap),
                RegionView::new(&self.regions, ScratchRegion::UncompactedVertexMap),
            );
            let vertex_counts = RegionView::new(&self.regions, ScratchRegion::VertexCounts);
            let compaction = compact(&mut pad, vertex_counts, Some(maps), wave_size, &drawn);
            let total = compaction.total;
            (Some(compaction), total)
        } else {
            (None, vert_count)
        };

        counts.write(&mut pad, 0, revised_verts, 0);
        counts.write(&mut pad, 1, revised_prims, 0);
        pad.barrier();

        // Read-back: every lane observes the same revised counts.
        let revised_verts = counts.read(&pad, 0, 1);
        let revised_prims = counts.read(&pad, 1, 1);
        debug_assert_ne!(revised_verts, INVALID_COUNT, "counts sentinel survived");
        debug_assert_ne!(revised_prims, INVALID_COUNT, "counts sentinel survived");

        if revised_prims == 0 {
            // Fully culled: the fixed-function stage still requires one
            // primitive from every invoked subgroup.
            count_stat!(subgroups_fully_culled);
            if let Some(ctx) = streamout {
                // Participate in the ordering epoch even with nothing to
                // write, so later subgroups observe correct totals.
                self.run_streamout(ctx, &mut pad, 0, &[], |_| None);
            }
            export_dummy(self.cfg, output);
            return SubgroupResult {
                branch: ExportBranch::Compacted,
                revised_vertex_count: 0,
                revised_primitive_count: 0,
            };
        }

        if !self.cfg.no_alloc_message {
            output.alloc_output_space(revised_verts, revised_prims);
        }

        // Deferred outputs are fetched lazily: a vertex may be needed by the
        // export phase, the stream-out phase, both, or neither.
        let mut deferred: Vec<Option<VertexOutputs>> = vec![None; vert_count as usize];
        let mut fetch_deferred = |lane: u32| -> VertexOutputs {
            if deferred[lane as usize].is_none() {
                let mut bits = [0u32; 4];
                for (c, b) in bits.iter_mut().enumerate() {
                    *b = positions.read(&pad, 4 * lane + c as u32, lane);
                }
                let [x, y, z, w] = bits.map(f32::from_bits);
                let fetched = Vec4::new(x, y, z, w);
                deferred[lane as usize] =
                    Some(split.deferred_export(&vertex_inputs(lane), fetched));
            }
            deferred[lane as usize].clone().unwrap_or_else(|| VertexOutputs {
                position: Vec4::ZERO,
                attributes: Vec::new(),
            })
        };

        // Primitive export: each surviving lane re-formats its connectivity
        // with compacted indices and writes its own dense slot.
        let flip = !self.control.front_face_ccw;
        let compacted_map = self
            .cfg
            .vertex_compaction
            .then(|| RegionView::new(&self.regions, ScratchRegion::CompactedVertexMap));
        let mut survivors: Vec<(u32, [u32; 3])> = Vec::with_capacity(revised_prims as usize);
        for lane in 0..prim_count {
            let Some(slot) = prim_compaction.compacted[lane as usize] else {
                continue;
            };
            // Staged connectivity comes back out of the scratchpad; the
            // null flag must agree with the compaction predicate.
            let staged = prim_data.read(&pad, lane, lane);
            let (original, culled) = unpack_connectivity(self.cfg.topology, staged);
            debug_assert!(!culled, "surviving primitive staged as null");
            let mut indices = original;
            if let Some(map) = compacted_map {
                for i in indices[..verts_per_prim].iter_mut() {
                    *i = map.read(&pad, *i, lane);
                }
            }
            let word = pack_connectivity(self.cfg.topology, indices, false, flip);
            output.export_primitive(slot, word);
            survivors.push((slot, original));
        }
        count_stat!(primitives_exported, revised_prims);

        // Vertex export: compacted slots re-fetch deferred outputs through
        // the compacted -> uncompacted map; without vertex compaction every
        // raw vertex keeps its slot.
        if vertex_compaction.is_some() {
            let reverse = RegionView::new(&self.regions, ScratchRegion::UncompactedVertexMap);
            for slot in 0..revised_verts {
                let original = reverse.read(&pad, slot, slot);
                let full = fetch_deferred(original);
                output.export_position(slot, full.position);
                output.export_attributes(slot, &full.attributes);
            }
        } else {
            for vert in 0..vert_count {
                let full = fetch_deferred(vert);
                output.export_position(vert, full.position);
                output.export_attributes(vert, &full.attributes);
            }
        }
        count_stat!(vertices_exported, revised_verts);

        if let Some(ctx) = streamout {
            let mut cache: Vec<Option<VertexOutputs>> = vec![None; vert_count as usize];
            for (_, original) in &survivors {
                for &v in &original[..verts_per_prim] {
                    if cache[v as usize].is_none() {
                        cache[v as usize] = Some(fetch_deferred(v));
                    }
                }
            }
            self.run_streamout(ctx, &mut pad, revised_prims, &survivors, |v| {
                cache[v as usize].as_ref()
            });
        }

        SubgroupResult {
            branch: ExportBranch::Compacted,
            revised_vertex_count: revised_verts,
            revised_primitive_count: revised_prims,
        }
    }

    /// Stream-out phases: lane-0 reservation, barrier, per-primitive
    /// capture. `survivors` pairs each dense slot with its original
    /// connectivity; `outputs` resolves an original vertex index to its
    /// deferred outputs.
    fn run_streamout<'v>(
        &self,
        ctx: &mut StreamOutContext<'_>,
        pad: &mut Scratchpad,
        primitive_count: u32,
        survivors: &[(u32, [u32; 3])],
        outputs: impl Fn(u32) -> Option<&'v VertexOutputs>,
    ) -> bool {
        if !self.cfg.stream_out {
            return false;
        }
        let emulator = StreamOutEmulator::new(self.cfg, ctx.counters);

        let control = RegionView::new(&self.regions, ScratchRegion::StreamOutControl);
        let reservations = emulator.reserve(pad, control, primitive_count);
        pad.barrier();

        // Lanes read the published decision back; the local array must
        // agree with the scratch region.
        let mut published = [BufferReservation::default(); MAX_STREAMOUT_BUFFERS];
        for buffer in 0..MAX_STREAMOUT_BUFFERS {
            if self.cfg.streamout_buffers[buffer].is_some() {
                published[buffer] = emulator.read_reservation(pad, control, buffer, 1);
                debug_assert_eq!(
                    published[buffer].primitives_to_write,
                    reservations[buffer].primitives_to_write
                );
            }
        }

        let verts_per_prim = self.cfg.topology.vertices_per_primitive() as usize;
        for (slot, original) in survivors {
            let gathered: Vec<&VertexOutputs> = original[..verts_per_prim]
                .iter()
                .filter_map(|v| outputs(*v))
                .collect();
            if gathered.len() == verts_per_prim {
                emulator.export_primitive(ctx.buffers, &published, *slot, &gathered);
            }
        }
        true
    }
}

/// Captured fixed-function output for one subgroup; the reference
/// [`PrimitiveOutput`] used by tests and the demo driver.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    pub alloc: Option<(u32, u32)>,
    /// (slot, connectivity word)
    pub primitives: Vec<(u32, u32)>,
    /// (slot, position)
    pub positions: Vec<(u32, Vec4)>,
    /// (slot, attributes)
    pub attributes: Vec<(u32, Vec<(u32, Vec4)>)>,
}

impl PrimitiveOutput for CapturedOutput {
    fn alloc_output_space(&mut self, vertex_count: u32, primitive_count: u32) {
        debug_assert!(self.alloc.is_none(), "one allocation request per subgroup");
        self.alloc = Some((vertex_count, primitive_count));
    }

    fn export_primitive(&mut self, slot: u32, connectivity: u32) {
        self.primitives.push((slot, connectivity));
    }

    fn export_position(&mut self, slot: u32, position: Vec4) {
        self.positions.push((slot, position));
    }

    fn export_attributes(&mut self, slot: u32, attributes: &[(u32, Vec4)]) {
        self.attributes.push((slot, attributes.to_vec()));
    }
}

/// Results of a batch launch.
pub struct BatchOutput {
    pub results: Vec<SubgroupResult>,
    pub outputs: Vec<CapturedOutput>,
}

impl<'a> PrimPipeline<'a> {
    /// Run many independent subgroups in parallel. Stream-out is not
    /// available here: the ordered reservation serializes subgroups by
    /// design, so stream-out launches go through
    /// [`run_batch_with_streamout`](Self::run_batch_with_streamout).
    pub fn run_batch(
        &self,
        stage: &(dyn VertexStage + Sync),
        runs: &[SubgroupRun],
    ) -> BatchOutput {
        let pairs: Vec<(SubgroupResult, CapturedOutput)> = runs
            .par_iter()
            .map(|run| {
                let mut captured = CapturedOutput::default();
                let result = self.run_subgroup(run, stage, &mut captured, None);
                (result, captured)
            })
            .collect();
        let (results, outputs): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        BatchOutput { results, outputs }
    }

    /// Run subgroups in launch-token order with stream-out capture. The
    /// ordered counters serialize cross-subgroup reservations; the emulator
    /// honors that by walking the subgroups in token order.
    pub fn run_batch_with_streamout(
        &self,
        stage: &(dyn VertexStage + Sync),
        runs: &[SubgroupRun],
        buffers: &mut [StreamOutBuffer],
        counters: [Option<&dyn OrderedCounter>; MAX_STREAMOUT_BUFFERS],
    ) -> BatchOutput {
        let mut order: Vec<usize> = (0..runs.len()).collect();
        order.sort_by_key(|i| runs[*i].launch.ordering_token);

        let mut results = vec![None; runs.len()];
        let mut outputs = vec![CapturedOutput::default(); runs.len()];
        for i in order {
            let ctx = StreamOutContext {
                buffers: &mut *buffers,
                counters,
            };
            results[i] = Some(self.run_subgroup(&runs[i], stage, &mut outputs[i], Some(ctx)));
        }
        BatchOutput {
            results: results.into_iter().flatten().collect(),
            outputs,
        }
    }
}
