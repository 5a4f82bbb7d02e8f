/// Pipeline statistics and telemetry.
/// Lane 0 of each subgroup records its subgroup's outcomes once at the end
/// of the export phase; the launch driver reads the totals for reports.
pub mod counters;

pub use counters::{PipelineCounters, StatsSnapshot, PIPELINE_COUNTERS};

use std::time::{Duration, Instant};

pub struct PerfTimer {
    name: &'static str,
    start: Instant,
}

impl PerfTimer {
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        println!("[PERF] {}: {:.2}μs", self.name, elapsed.as_micros());
    }
}

/// Macro for easy performance measurement
#[macro_export]
macro_rules! perf_scope {
    ($name:expr) => {
        let _timer = $crate::perf::PerfTimer::new($name);
    };
}
