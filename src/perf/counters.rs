/// Thread-safe counters for pipeline telemetry.
/// Written by every subgroup (lane 0 records its subgroup's statistics once,
/// at the end of the export phase); read by the launch driver for reports.
use std::sync::atomic::{AtomicU64, Ordering};

pub struct PipelineCounters {
    // Subgroup-level outcomes
    pub subgroups_launched: AtomicU64,
    pub subgroups_fast_passthrough: AtomicU64,
    pub subgroups_runtime_passthrough: AtomicU64,
    pub subgroups_fully_culled: AtomicU64,

    // Primitive-level outcomes
    pub primitives_processed: AtomicU64,
    pub primitives_culled_backface: AtomicU64,
    pub primitives_culled_frustum: AtomicU64,
    pub primitives_culled_box: AtomicU64,
    pub primitives_culled_sphere: AtomicU64,
    pub primitives_culled_small: AtomicU64,
    pub primitives_culled_distance: AtomicU64,
    pub primitives_exported: AtomicU64,
    pub vertices_exported: AtomicU64,

    // Stream-out telemetry: needed counts all survivors, written only what
    // fit after clamping.
    pub streamout_primitives_needed: AtomicU64,
    pub streamout_primitives_written: AtomicU64,
}

impl PipelineCounters {
    pub const fn new() -> Self {
        Self {
            subgroups_launched: AtomicU64::new(0),
            subgroups_fast_passthrough: AtomicU64::new(0),
            subgroups_runtime_passthrough: AtomicU64::new(0),
            subgroups_fully_culled: AtomicU64::new(0),
            primitives_processed: AtomicU64::new(0),
            primitives_culled_backface: AtomicU64::new(0),
            primitives_culled_frustum: AtomicU64::new(0),
            primitives_culled_box: AtomicU64::new(0),
            primitives_culled_sphere: AtomicU64::new(0),
            primitives_culled_small: AtomicU64::new(0),
            primitives_culled_distance: AtomicU64::new(0),
            primitives_exported: AtomicU64::new(0),
            vertices_exported: AtomicU64::new(0),
            streamout_primitives_needed: AtomicU64::new(0),
            streamout_primitives_written: AtomicU64::new(0),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.subgroups_launched.store(0, Ordering::Relaxed);
        self.subgroups_fast_passthrough.store(0, Ordering::Relaxed);
        self.subgroups_runtime_passthrough.store(0, Ordering::Relaxed);
        self.subgroups_fully_culled.store(0, Ordering::Relaxed);
        self.primitives_processed.store(0, Ordering::Relaxed);
        self.primitives_culled_backface.store(0, Ordering::Relaxed);
        self.primitives_culled_frustum.store(0, Ordering::Relaxed);
        self.primitives_culled_box.store(0, Ordering::Relaxed);
        self.primitives_culled_sphere.store(0, Ordering::Relaxed);
        self.primitives_culled_small.store(0, Ordering::Relaxed);
        self.primitives_culled_distance.store(0, Ordering::Relaxed);
        self.primitives_exported.store(0, Ordering::Relaxed);
        self.vertices_exported.store(0, Ordering::Relaxed);
        self.streamout_primitives_needed.store(0, Ordering::Relaxed);
        self.streamout_primitives_written.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            subgroups_launched: self.subgroups_launched.load(Ordering::Relaxed),
            subgroups_fast_passthrough: self.subgroups_fast_passthrough.load(Ordering::Relaxed),
            subgroups_runtime_passthrough: self.subgroups_runtime_passthrough.load(Ordering::Relaxed),
            subgroups_fully_culled: self.subgroups_fully_culled.load(Ordering::Relaxed),
            primitives_processed: self.primitives_processed.load(Ordering::Relaxed),
            primitives_culled_backface: self.primitives_culled_backface.load(Ordering::Relaxed),
            primitives_culled_frustum: self.primitives_culled_frustum.load(Ordering::Relaxed),
            primitives_culled_box: self.primitives_culled_box.load(Ordering::Relaxed),
            primitives_culled_sphere: self.primitives_culled_sphere.load(Ordering::Relaxed),
            primitives_culled_small: self.primitives_culled_small.load(Ordering::Relaxed),
            primitives_culled_distance: self.primitives_culled_distance.load(Ordering::Relaxed),
            primitives_exported: self.primitives_exported.load(Ordering::Relaxed),
            vertices_exported: self.vertices_exported.load(Ordering::Relaxed),
            streamout_primitives_needed: self.streamout_primitives_needed.load(Ordering::Relaxed),
            streamout_primitives_written: self.streamout_primitives_written.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub subgroups_launched: u64,
    pub subgroups_fast_passthrough: u64,
    pub subgroups_runtime_passthrough: u64,
    pub subgroups_fully_culled: u64,
    pub primitives_processed: u64,
    pub primitives_culled_backface: u64,
    pub primitives_culled_frustum: u64,
    pub primitives_culled_box: u64,
    pub primitives_culled_sphere: u64,
    pub primitives_culled_small: u64,
    pub primitives_culled_distance: u64,
    pub primitives_exported: u64,
    pub vertices_exported: u64,
    pub streamout_primitives_needed: u64,
    pub streamout_primitives_written: u64,
}

impl StatsSnapshot {
    /// Print formatted report.
    pub fn print_report(&self) {
        println!("\n=== Pipeline Statistics ===");
        println!("\nSubgroups:");
        println!("  launched:              {:12}", self.subgroups_launched);
        println!("  fast passthrough:      {:12}", self.subgroups_fast_passthrough);
        println!("  runtime passthrough:   {:12}", self.subgroups_runtime_passthrough);
        println!("  fully culled:          {:12}", self.subgroups_fully_culled);

        println!("\nPrimitives:");
        println!("  processed:             {:12}", self.primitives_processed);
        println!("  culled (backface):     {:12}", self.primitives_culled_backface);
        println!("  culled (frustum):      {:12}", self.primitives_culled_frustum);
        println!("  culled (box):          {:12}", self.primitives_culled_box);
        println!("  culled (sphere):       {:12}", self.primitives_culled_sphere);
        println!("  culled (small):        {:12}", self.primitives_culled_small);
        println!("  culled (distance):     {:12}", self.primitives_culled_distance);
        println!("  exported:              {:12}", self.primitives_exported);
        if self.primitives_processed > 0 {
            let cull_rate = 100.0
                * (self.primitives_processed - self.primitives_exported) as f64
                / self.primitives_processed as f64;
            println!("  cull rate:             {:11.2}%", cull_rate);
        }
        println!("  vertices exported:     {:12}", self.vertices_exported);

        println!("\nStream-out:");
        println!("  primitives needed:     {:12}", self.streamout_primitives_needed);
        println!("  primitives written:    {:12}", self.streamout_primitives_written);
        println!();
    }
}

/// Global pipeline counters instance.
pub static PIPELINE_COUNTERS: PipelineCounters = PipelineCounters::new();

/// Macro for incrementing a counter.
#[macro_export]
macro_rules! count_stat {
    ($counter:ident) => {{
        $crate::perf::PIPELINE_COUNTERS
            .$counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }};
    ($counter:ident, $value:expr) => {{
        $crate::perf::PIPELINE_COUNTERS
            .$counter
            .fetch_add($value as u64, std::sync::atomic::Ordering::Relaxed);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = PipelineCounters::new();
        counters.primitives_processed.fetch_add(64, Ordering::Relaxed);
        counters.primitives_exported.fetch_add(40, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.primitives_processed, 64);
        assert_eq!(snap.primitives_exported, 40);
        counters.reset();
        assert_eq!(counters.snapshot().primitives_processed, 0);
    }
}
