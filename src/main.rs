/// Demo driver: push a synthetic triangle soup through the culling engine
/// and report what survived.
use glam::{vec4, Vec4};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::time::Instant;

use cull_engine::config::{StreamOutBufferDesc, XfbFormat, XfbOutput};
use cull_engine::fetch::{LaneInputs, OutputSink};
use cull_engine::pipeline::SubgroupRun;
use cull_engine::streamout::EpochOrderedCounter;
use cull_engine::{
    CullControl, PipelineConfig, PrimPipeline, SubgroupLaunch, VertexStage, PIPELINE_COUNTERS,
};

/// Triangle soup with positions baked per vertex id.
struct SoupStage {
    positions: Vec<Vec4>,
}

impl VertexStage for SoupStage {
    fn execute(&self, inputs: &LaneInputs, sink: &mut dyn OutputSink) {
        let position = self.positions[inputs.vertex_id as usize];
        sink.position(position);
        // One color attribute derived from the vertex id.
        let t = (inputs.vertex_id % 64) as f32 / 64.0;
        sink.attribute(0, vec4(t, 1.0 - t, 0.5, 1.0));
    }
}

/// Scatter triangles over and around the clip volume: a mix of visible,
/// offscreen, backfacing, and sub-pixel primitives.
fn build_soup(triangle_count: u32) -> SoupStage {
    let mut positions = Vec::with_capacity(3 * triangle_count as usize);
    for i in 0..triangle_count {
        // Cheap deterministic scatter.
        let h = i.wrapping_mul(2654435761);
        let cx = ((h >> 8) & 0xff) as f32 / 128.0 - 1.0;
        let cy = ((h >> 16) & 0xff) as f32 / 128.0 - 1.0;
        let (cx, cy, size) = match i % 5 {
            0 => (cx * 4.0, cy * 4.0, 0.2),   // mostly offscreen
            1 => (cx, cy, 0.0001),            // sub-pixel
            _ => (cx, cy, 0.05 + cx.abs() * 0.05),
        };
        let z = 0.3 + ((h >> 24) as f32 / 255.0) * 0.5;
        let a = vec4(cx - size, cy - size, z, 1.0);
        let b = vec4(cx + size, cy - size, z, 1.0);
        let c = vec4(cx, cy + size, z, 1.0);
        if i % 7 == 3 {
            // Backfacing: swap the winding.
            positions.extend([a, c, b]);
        } else {
            positions.extend([a, b, c]);
        }
    }
    SoupStage { positions }
}

fn main() {
    env_logger::init();
    cull_engine::perf_scope!("demo total");

    println!("=== Subgroup Culling Engine ===");
    let triangle_count = 4096u32;
    println!("Input: {triangle_count} triangles");

    let cfg = PipelineConfig::default();
    let control = CullControl::default();
    let pipeline = match PrimPipeline::new(&cfg, control) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("configuration rejected: {err}");
            std::process::exit(1);
        }
    };
    println!("Scratchpad footprint: {} dwords", pipeline.scratch_size());

    let stage = build_soup(triangle_count);

    // Slice the soup into subgroups: 64 triangles, 192 vertices each.
    let prims_per_subgroup = 64u32;
    let connectivity: Vec<[u32; 3]> = (0..prims_per_subgroup)
        .map(|p| [3 * p, 3 * p + 1, 3 * p + 2])
        .collect();
    let runs: Vec<SubgroupRun> = (0..triangle_count / prims_per_subgroup)
        .map(|sg| {
            let mut launch =
                SubgroupLaunch::new(3 * prims_per_subgroup, prims_per_subgroup, sg);
            launch.first_vertex = sg * 3 * prims_per_subgroup;
            launch.first_primitive = sg * prims_per_subgroup;
            SubgroupRun {
                launch,
                connectivity: &connectivity,
            }
        })
        .collect();

    let start = Instant::now();
    let batch = pipeline.run_batch(&stage, &runs);
    let elapsed = start.elapsed();

    let exported: u32 = batch.results.iter().map(|r| r.revised_primitive_count).sum();
    println!(
        "Culling pass: {} subgroups in {:.2}ms, {exported} primitives survived",
        batch.results.len(),
        elapsed.as_secs_f64() * 1000.0
    );

    // Second pass with stream-out capture into one position buffer.
    let mut so_cfg = cfg.clone();
    so_cfg.stream_out = true;
    so_cfg.streamout_buffers[0] = Some(StreamOutBufferDesc {
        capacity_dwords: 64 * 1024,
        vertex_stride: 4,
    });
    so_cfg.streamout_outputs.push(XfbOutput {
        buffer: 0,
        offset_in_vertex: 0,
        location: 0,
        format: XfbFormat::F32x4,
    });
    let so_pipeline = match PrimPipeline::new(&so_cfg, control) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("stream-out configuration rejected: {err}");
            std::process::exit(1);
        }
    };
    let mut buffers = vec![cull_engine::StreamOutBuffer::new(
        so_cfg.streamout_buffers[0].unwrap_or(StreamOutBufferDesc {
            capacity_dwords: 0,
            vertex_stride: 1,
        }),
    )];
    let counter = EpochOrderedCounter::new(runs.len() as u32);
    let start = Instant::now();
    let so_batch = so_pipeline.run_batch_with_streamout(
        &stage,
        &runs,
        &mut buffers,
        [Some(&counter), None, None, None],
    );
    let elapsed = start.elapsed();
    println!(
        "Stream-out pass: {} subgroups in {:.2}ms, {} dwords captured",
        so_batch.results.len(),
        elapsed.as_secs_f64() * 1000.0,
        counter.total().min(buffers[0].desc.capacity_dwords)
    );

    PIPELINE_COUNTERS.snapshot().print_report();
}
