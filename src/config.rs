/// Static pipeline configuration for one subgroup launch shape.
/// Everything here is decided on the host before any subgroup runs;
/// invalid combinations are rejected up front, never at lane level.
use thiserror::Error;

/// Hardware ceiling on lanes per subgroup.
pub const MAX_LANES_PER_SUBGROUP: u32 = 256;

/// Hardware ceiling on the shared scratchpad, in dwords (64 KiB).
pub const MAX_SCRATCH_DWORDS: u32 = 16 * 1024;

/// Maximum stream-out destination buffers.
pub const MAX_STREAMOUT_BUFFERS: usize = 4;

/// Maximum declared cull distances per vertex.
pub const MAX_CULL_DISTANCES: u32 = 8;

/// Width of one SIMD group (wave) within the subgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveSize {
    W32,
    W64,
}

impl WaveSize {
    #[inline]
    pub fn lanes(self) -> u32 {
        match self {
            WaveSize::W32 => 32,
            WaveSize::W64 => 64,
        }
    }
}

/// Output primitive topology. Determines how many vertex indices form one
/// primitive and therefore the shape of the connectivity word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    Triangles,
}

impl PrimitiveTopology {
    #[inline]
    pub fn vertices_per_primitive(self) -> u32 {
        match self {
            PrimitiveTopology::Points => 1,
            PrimitiveTopology::Lines => 2,
            PrimitiveTopology::Triangles => 3,
        }
    }
}

/// Per-test enables for the cull chain. Order of application is fixed by
/// the chain itself; these only switch individual tests on or off.
#[derive(Debug, Clone, Copy)]
pub struct CullOptions {
    pub backface: bool,
    pub frustum: bool,
    pub box_filter: bool,
    pub sphere: bool,
    pub small_primitives: bool,
    pub cull_distance: bool,
    /// Number of declared cull distances (only meaningful when
    /// `cull_distance` is set).
    pub cull_distance_count: u32,
}

impl Default for CullOptions {
    fn default() -> Self {
        Self {
            backface: true,
            frustum: true,
            box_filter: false,
            sphere: false,
            small_primitives: true,
            cull_distance: false,
            cull_distance_count: 0,
        }
    }
}

impl CullOptions {
    /// True when at least one test is enabled.
    #[inline]
    pub fn any_enabled(&self) -> bool {
        self.backface
            || self.frustum
            || self.box_filter
            || self.sphere
            || self.small_primitives
            || self.cull_distance
    }
}

/// Stream-out element formats. `F16x3` is the odd one out: no single store
/// covers three halves, so it is written as one dword plus a trailing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XfbFormat {
    F32,
    F32x2,
    F32x3,
    F32x4,
    F16x2,
    F16x3,
    F16x4,
}

impl XfbFormat {
    /// Size of one element in dwords, rounded up for the half formats.
    #[inline]
    pub fn size_in_dwords(self) -> u32 {
        match self {
            XfbFormat::F32 => 1,
            XfbFormat::F32x2 | XfbFormat::F16x3 | XfbFormat::F16x4 => 2,
            XfbFormat::F32x3 => 3,
            XfbFormat::F32x4 => 4,
            XfbFormat::F16x2 => 1,
        }
    }

    #[inline]
    pub fn component_count(self) -> u32 {
        match self {
            XfbFormat::F32 => 1,
            XfbFormat::F32x2 | XfbFormat::F16x2 => 2,
            XfbFormat::F32x3 | XfbFormat::F16x3 => 3,
            XfbFormat::F32x4 | XfbFormat::F16x4 => 4,
        }
    }
}

/// One declared stream-out output: which attribute goes where.
#[derive(Debug, Clone, Copy)]
pub struct XfbOutput {
    /// Destination buffer slot.
    pub buffer: usize,
    /// Dword offset within one captured vertex.
    pub offset_in_vertex: u32,
    /// Source attribute location (as emitted by the vertex stage).
    pub location: u32,
    pub format: XfbFormat,
}

/// Descriptor for one stream-out destination buffer.
#[derive(Debug, Clone, Copy)]
pub struct StreamOutBufferDesc {
    /// Total capacity in dwords.
    pub capacity_dwords: u32,
    /// Dwords consumed per captured vertex.
    pub vertex_stride: u32,
}

/// Host-side configuration errors, caught before any subgroup launches.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max vertices per subgroup {0} exceeds hardware limit {MAX_LANES_PER_SUBGROUP}")]
    TooManyVertices(u32),
    #[error("max primitives per subgroup {0} exceeds hardware limit {MAX_LANES_PER_SUBGROUP}")]
    TooManyPrimitives(u32),
    #[error("cull distance count {0} exceeds limit {MAX_CULL_DISTANCES}")]
    TooManyCullDistances(u32),
    #[error("vertex compaction requires culling to be active")]
    CompactionWithoutCulling,
    #[error("stream-out buffer slot {0} out of range")]
    StreamOutBufferOutOfRange(usize),
    #[error("stream-out output references undeclared buffer {0}")]
    UndeclaredStreamOutBuffer(usize),
    #[error("stream-out output at buffer {buffer} offset {offset} overruns vertex stride {stride}")]
    StreamOutOverrunsStride { buffer: usize, offset: u32, stride: u32 },
    #[error("scratchpad footprint {0} dwords exceeds ceiling {MAX_SCRATCH_DWORDS}")]
    ScratchOverflow(u32),
    #[error("the no-alloc-message fast mode requires stream-out to be inactive")]
    NoAllocMessageWithStreamOut,
    #[error("the cull chain operates on triangles; other topologies must use passthrough")]
    CullingRequiresTriangles,
}

/// Static configuration of the culling/compaction stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub wave_size: WaveSize,
    pub topology: PrimitiveTopology,
    /// Upper bound on vertices a subgroup may carry.
    pub max_verts_per_subgroup: u32,
    /// Upper bound on primitives a subgroup may carry.
    pub max_prims_per_subgroup: u32,

    /// A user geometry stage is present upstream (its per-primitive callable
    /// then owns connectivity).
    pub has_geometry_stage: bool,
    /// Fast passthrough: the whole culling apparatus is compiled out.
    pub passthrough: bool,
    /// Compact surviving vertices into a dense index space.
    pub vertex_compaction: bool,
    /// Emulate legacy stream-out capture.
    pub stream_out: bool,
    /// Distribute the primitive ID through the scratchpad (passthrough
    /// configurations without a geometry stage).
    pub distribute_primitive_id: bool,

    /// Position Z was proven compile-time constant; culling is skipped at
    /// runtime.
    pub constant_position_z: bool,
    /// Subgroups with fewer vertices than this skip culling entirely.
    pub small_subgroup_threshold: u32,
    /// Skip the allocation-request message when stream-out is inactive.
    pub no_alloc_message: bool,

    pub cull: CullOptions,

    pub streamout_buffers: [Option<StreamOutBufferDesc>; MAX_STREAMOUT_BUFFERS],
    pub streamout_outputs: Vec<XfbOutput>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wave_size: WaveSize::W32,
            topology: PrimitiveTopology::Triangles,
            max_verts_per_subgroup: MAX_LANES_PER_SUBGROUP,
            max_prims_per_subgroup: MAX_LANES_PER_SUBGROUP,
            has_geometry_stage: false,
            passthrough: false,
            vertex_compaction: true,
            stream_out: false,
            distribute_primitive_id: false,
            constant_position_z: false,
            small_subgroup_threshold: 16,
            no_alloc_message: false,
            cull: CullOptions::default(),
            streamout_buffers: [None; MAX_STREAMOUT_BUFFERS],
            streamout_outputs: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// True when the culling apparatus is present at all.
    #[inline]
    pub fn culling_active(&self) -> bool {
        !self.passthrough && self.cull.any_enabled()
    }

    /// Number of waves needed to cover the widest of the two counts.
    #[inline]
    pub fn wave_slots(&self) -> u32 {
        let lanes = self.max_verts_per_subgroup.max(self.max_prims_per_subgroup);
        lanes.div_ceil(self.wave_size.lanes())
    }

    /// Validate the combination. All violations here are host-side
    /// configuration errors; nothing is ever re-checked per lane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_verts_per_subgroup > MAX_LANES_PER_SUBGROUP {
            return Err(ConfigError::TooManyVertices(self.max_verts_per_subgroup));
        }
        if self.max_prims_per_subgroup > MAX_LANES_PER_SUBGROUP {
            return Err(ConfigError::TooManyPrimitives(self.max_prims_per_subgroup));
        }
        if self.cull.cull_distance && self.cull.cull_distance_count > MAX_CULL_DISTANCES {
            return Err(ConfigError::TooManyCullDistances(self.cull.cull_distance_count));
        }
        if self.vertex_compaction && !self.culling_active() {
            return Err(ConfigError::CompactionWithoutCulling);
        }
        if self.no_alloc_message && self.stream_out {
            return Err(ConfigError::NoAllocMessageWithStreamOut);
        }
        if self.culling_active() && self.topology != PrimitiveTopology::Triangles {
            return Err(ConfigError::CullingRequiresTriangles);
        }
        for out in &self.streamout_outputs {
            if out.buffer >= MAX_STREAMOUT_BUFFERS {
                return Err(ConfigError::StreamOutBufferOutOfRange(out.buffer));
            }
            let Some(desc) = self.streamout_buffers[out.buffer] else {
                return Err(ConfigError::UndeclaredStreamOutBuffer(out.buffer));
            };
            if out.offset_in_vertex + out.format.size_in_dwords() > desc.vertex_stride {
                return Err(ConfigError::StreamOutOverrunsStride {
                    buffer: out.buffer,
                    offset: out.offset_in_vertex,
                    stride: desc.vertex_stride,
                });
            }
        }
        Ok(())
    }
}
