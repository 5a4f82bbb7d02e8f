pub mod compaction;
pub mod config;
pub mod culling;
pub mod export;
pub mod fetch;
pub mod layout;
pub mod perf;
/// Subgroup culling engine - software emulation of a geometry pipeline
/// culling and compaction stage, built from barrier-ordered lockstep phases
pub mod pipeline;
pub mod scratch;
pub mod streamout;
pub mod subgroup;

pub use compaction::{ballot, compact, Compaction};
pub use config::{ConfigError, CullOptions, PipelineConfig, PrimitiveTopology, WaveSize};
pub use culling::{CullChain, CullControl, CullTest, CullVertex};
pub use export::{pack_connectivity, select_branch, ExportBranch, PrimitiveOutput};
pub use fetch::{LaneInputs, OutputSink, SplitVertexStage, VertexStage};
pub use layout::{plan_regions, RegionMap, ScratchRegion};
pub use perf::{PipelineCounters, StatsSnapshot, PIPELINE_COUNTERS};
pub use pipeline::{CapturedOutput, PrimPipeline, SubgroupResult, SubgroupRun};
pub use scratch::Scratchpad;
pub use streamout::{EpochOrderedCounter, OrderedCounter, StreamOutBuffer};
pub use subgroup::SubgroupLaunch;
