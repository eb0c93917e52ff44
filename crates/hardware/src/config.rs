//! Configuration system for the trace-driven simulator.
//!
//! This module defines all configuration structures used to parameterize a
//! run. It provides:
//! 1. **Defaults:** the baseline core and memory-hierarchy constants.
//! 2. **Structures:** hierarchical config for value prediction, fetch,
//!    pipeline resources, branch prediction, and the memory hierarchy.
//! 3. **Validation:** geometry checks performed before a simulator is built.
//!
//! Configuration is normally assembled by the CLI from flags; every structure
//! also deserializes from JSON for test harnesses.

use serde::Deserialize;

use crate::common::error::{Result, SimError};

/// Default configuration constants for the simulator.
///
/// These values define the baseline machine when not explicitly overridden
/// on the command line.
mod defaults {
    /// Window (reorder buffer) capacity in micro-instructions.
    pub const WINDOW_SIZE: usize = 512;

    /// Fetch-bundle width; 0 means unlimited.
    pub const FETCH_WIDTH: u64 = 16;

    /// Branches fetched per bundle; 0 means unlimited.
    pub const FETCH_NUM_BRANCH: u64 = 16;

    /// Terminate the fetch bundle at an unconditional indirect branch.
    pub const FETCH_STOP_AT_INDIRECT: bool = true;

    /// Terminate the fetch bundle at any taken branch.
    pub const FETCH_STOP_AT_TAKEN: bool = true;

    /// Model the instruction cache during fetch.
    pub const FETCH_MODEL_ICACHE: bool = true;

    /// Cycles between fetch and earliest execute (front-end depth).
    pub const PIPELINE_FILL_LATENCY: u64 = 5;

    /// Load/store execution lanes; 0 means unbounded.
    pub const NUM_LDST_LANES: u64 = 8;

    /// ALU execution lanes; 0 means unbounded.
    pub const NUM_ALU_LANES: u64 = 16;

    /// Stride prefetcher in the L1 data cache.
    pub const PREFETCHER_ENABLE: bool = true;

    /// Stores allocate the block in L1 at commit.
    pub const WRITE_ALLOCATE: bool = true;

    /// Instruction cache: 128 KiB, 8-way, 64 B blocks, searched in cycle 0.
    pub const IC_SIZE: u64 = 1 << 17;
    /// Instruction cache associativity.
    pub const IC_ASSOC: u64 = 8;
    /// Instruction cache block size in bytes.
    pub const IC_BLOCKSIZE: u64 = 64;

    /// L1 data cache: 64 KiB.
    pub const L1_SIZE: u64 = 1 << 16;
    /// L1 associativity.
    pub const L1_ASSOC: u64 = 8;
    /// L1 block size in bytes.
    pub const L1_BLOCKSIZE: u64 = 64;
    /// L1 search latency in cycles.
    pub const L1_LATENCY: u64 = 3;

    /// L2 cache: 1 MiB.
    pub const L2_SIZE: u64 = 1 << 20;
    /// L2 associativity.
    pub const L2_ASSOC: u64 = 8;
    /// L2 block size in bytes.
    pub const L2_BLOCKSIZE: u64 = 64;
    /// L2 search latency in cycles.
    pub const L2_LATENCY: u64 = 12;

    /// L3 cache: 8 MiB.
    pub const L3_SIZE: u64 = 1 << 23;
    /// L3 associativity.
    pub const L3_ASSOC: u64 = 16;
    /// L3 block size in bytes.
    pub const L3_BLOCKSIZE: u64 = 128;
    /// L3 search latency in cycles.
    pub const L3_LATENCY: u64 = 60;

    /// Main memory fixed search time in cycles.
    pub const MAIN_MEMORY_LATENCY: u64 = 150;

    /// Return-address stack entries.
    pub const RAS_SIZE: usize = 64;
}

/// Candidate filter applied before consulting the value predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VpTrack {
    /// Every instruction with a predictable destination is a candidate.
    #[default]
    All,
    /// Only loads are candidates.
    LoadsOnly,
    /// Only loads are candidates; requests carry the data-cache outcome.
    LoadsOnlyHitMiss,
}

impl VpTrack {
    /// Decodes the `-t` track number.
    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::All),
            1 => Some(Self::LoadsOnly),
            2 => Some(Self::LoadsOnlyHitMiss),
            _ => None,
        }
    }

    /// Track name as printed in the report.
    pub fn name(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::LoadsOnly => "LoadsOnly",
            Self::LoadsOnlyHitMiss => "LoadsOnlyHitMiss",
        }
    }
}

/// Value-prediction settings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VpConfig {
    /// Consult the value predictor at all.
    #[serde(default)]
    pub enable: bool,

    /// Oracle mode: every predictable destination predicts correctly.
    #[serde(default)]
    pub perfect: bool,

    /// Candidate filter.
    #[serde(default)]
    pub track: VpTrack,
}

/// Fetch-bundle formation constraints.
#[derive(Clone, Debug, Deserialize)]
pub struct FetchConfig {
    /// Micro-instructions per bundle; 0 = unlimited.
    #[serde(default = "FetchConfig::default_width")]
    pub width: u64,

    /// Branches per bundle; 0 = unlimited.
    #[serde(default = "FetchConfig::default_num_branch")]
    pub num_branch: u64,

    /// Stop the bundle at an unconditional indirect branch.
    #[serde(default = "FetchConfig::default_stop_at_indirect")]
    pub stop_at_indirect: bool,

    /// Stop the bundle at any taken branch.
    #[serde(default = "FetchConfig::default_stop_at_taken")]
    pub stop_at_taken: bool,

    /// Model the instruction cache during fetch.
    #[serde(default = "FetchConfig::default_model_icache")]
    pub model_icache: bool,
}

impl FetchConfig {
    fn default_width() -> u64 {
        defaults::FETCH_WIDTH
    }

    fn default_num_branch() -> u64 {
        defaults::FETCH_NUM_BRANCH
    }

    fn default_stop_at_indirect() -> bool {
        defaults::FETCH_STOP_AT_INDIRECT
    }

    fn default_stop_at_taken() -> bool {
        defaults::FETCH_STOP_AT_TAKEN
    }

    fn default_model_icache() -> bool {
        defaults::FETCH_MODEL_ICACHE
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            width: defaults::FETCH_WIDTH,
            num_branch: defaults::FETCH_NUM_BRANCH,
            stop_at_indirect: defaults::FETCH_STOP_AT_INDIRECT,
            stop_at_taken: defaults::FETCH_STOP_AT_TAKEN,
            model_icache: defaults::FETCH_MODEL_ICACHE,
        }
    }
}

/// Pipeline depth, execution lanes, and window capacity.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    /// Cycles between fetch and earliest execute.
    #[serde(default = "PipelineConfig::default_fill_latency")]
    pub fill_latency: u64,

    /// Load/store lanes; 0 = unbounded.
    #[serde(default = "PipelineConfig::default_ldst_lanes")]
    pub ldst_lanes: u64,

    /// ALU lanes; 0 = unbounded.
    #[serde(default = "PipelineConfig::default_alu_lanes")]
    pub alu_lanes: u64,

    /// Window (reorder buffer) capacity.
    #[serde(default = "PipelineConfig::default_window_size")]
    pub window_size: usize,
}

impl PipelineConfig {
    fn default_fill_latency() -> u64 {
        defaults::PIPELINE_FILL_LATENCY
    }

    fn default_ldst_lanes() -> u64 {
        defaults::NUM_LDST_LANES
    }

    fn default_alu_lanes() -> u64 {
        defaults::NUM_ALU_LANES
    }

    fn default_window_size() -> usize {
        defaults::WINDOW_SIZE
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fill_latency: defaults::PIPELINE_FILL_LATENCY,
            ldst_lanes: defaults::NUM_LDST_LANES,
            alu_lanes: defaults::NUM_ALU_LANES,
            window_size: defaults::WINDOW_SIZE,
        }
    }
}

/// Branch-prediction settings.
#[derive(Clone, Debug, Deserialize)]
pub struct BranchConfig {
    /// Oracle prediction for every branch type.
    #[serde(default)]
    pub perfect: bool,

    /// Oracle prediction for indirect targets only.
    #[serde(default)]
    pub perfect_indirect: bool,

    /// Return-address stack entries.
    #[serde(default = "BranchConfig::default_ras_size")]
    pub ras_size: usize,
}

impl BranchConfig {
    fn default_ras_size() -> usize {
        defaults::RAS_SIZE
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            perfect: false,
            perfect_indirect: false,
            ras_size: defaults::RAS_SIZE,
        }
    }
}

/// Geometry and latency of one cache level.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct CacheGeometry {
    /// Total capacity in bytes.
    pub size: u64,
    /// Number of ways.
    pub assoc: u64,
    /// Block size in bytes (power of two).
    pub block_size: u64,
    /// Search latency in cycles.
    pub latency: u64,
}

impl CacheGeometry {
    fn check(&self, name: &str) -> Result<()> {
        if self.assoc == 0 || self.block_size == 0 || self.size == 0 {
            return Err(SimError::Config(format!(
                "{name}: size, associativity, and block size must be non-zero"
            )));
        }
        if !self.block_size.is_power_of_two() {
            return Err(SimError::Config(format!(
                "{name}: block size {} is not a power of two",
                self.block_size
            )));
        }
        let sets = self.size / (self.assoc * self.block_size);
        if sets == 0 || !sets.is_power_of_two() {
            return Err(SimError::Config(format!(
                "{name}: {} sets (size {} / assoc {} / block {}) is not a power of two",
                sets, self.size, self.assoc, self.block_size
            )));
        }
        Ok(())
    }
}

/// Memory-hierarchy configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct MemoryConfig {
    /// Oracle data cache: every load hits L1.
    #[serde(default)]
    pub perfect_cache: bool,

    /// Stores allocate the block in L1 at commit.
    #[serde(default = "MemoryConfig::default_write_allocate")]
    pub write_allocate: bool,

    /// Stride prefetcher in the L1 data cache.
    #[serde(default = "MemoryConfig::default_prefetcher")]
    pub prefetcher: bool,

    /// Instruction cache geometry (latency fixed at 0: hits do not delay fetch).
    #[serde(default = "MemoryConfig::default_icache")]
    pub icache: CacheGeometry,

    /// L1 data cache geometry.
    #[serde(default = "MemoryConfig::default_l1")]
    pub l1: CacheGeometry,

    /// L2 cache geometry.
    #[serde(default = "MemoryConfig::default_l2")]
    pub l2: CacheGeometry,

    /// L3 cache geometry.
    #[serde(default = "MemoryConfig::default_l3")]
    pub l3: CacheGeometry,

    /// Main memory fixed search time in cycles.
    #[serde(default = "MemoryConfig::default_main_latency")]
    pub main_latency: u64,
}

impl MemoryConfig {
    fn default_write_allocate() -> bool {
        defaults::WRITE_ALLOCATE
    }

    fn default_prefetcher() -> bool {
        defaults::PREFETCHER_ENABLE
    }

    fn default_icache() -> CacheGeometry {
        CacheGeometry {
            size: defaults::IC_SIZE,
            assoc: defaults::IC_ASSOC,
            block_size: defaults::IC_BLOCKSIZE,
            latency: 0,
        }
    }

    fn default_l1() -> CacheGeometry {
        CacheGeometry {
            size: defaults::L1_SIZE,
            assoc: defaults::L1_ASSOC,
            block_size: defaults::L1_BLOCKSIZE,
            latency: defaults::L1_LATENCY,
        }
    }

    fn default_l2() -> CacheGeometry {
        CacheGeometry {
            size: defaults::L2_SIZE,
            assoc: defaults::L2_ASSOC,
            block_size: defaults::L2_BLOCKSIZE,
            latency: defaults::L2_LATENCY,
        }
    }

    fn default_l3() -> CacheGeometry {
        CacheGeometry {
            size: defaults::L3_SIZE,
            assoc: defaults::L3_ASSOC,
            block_size: defaults::L3_BLOCKSIZE,
            latency: defaults::L3_LATENCY,
        }
    }

    fn default_main_latency() -> u64 {
        defaults::MAIN_MEMORY_LATENCY
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            perfect_cache: false,
            write_allocate: defaults::WRITE_ALLOCATE,
            prefetcher: defaults::PREFETCHER_ENABLE,
            icache: Self::default_icache(),
            l1: Self::default_l1(),
            l2: Self::default_l2(),
            l3: Self::default_l3(),
            main_latency: defaults::MAIN_MEMORY_LATENCY,
        }
    }
}

/// Root configuration for one simulation run.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SimConfig {
    /// Value-prediction settings.
    #[serde(default)]
    pub vp: VpConfig,
    /// Fetch-bundle constraints.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Pipeline depth, lanes, and window.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Branch-prediction settings.
    #[serde(default)]
    pub branch: BranchConfig,
    /// Memory-hierarchy settings.
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl SimConfig {
    /// Checks every geometry constraint before a simulator is built.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] naming the offending parameter.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.window_size == 0 {
            return Err(SimError::Config("window size must be non-zero".into()));
        }
        self.memory.l1.check("L1")?;
        self.memory.l2.check("L2")?;
        self.memory.l3.check("L3")?;
        if self.fetch.model_icache {
            self.memory.icache.check("I-cache")?;
        }
        Ok(())
    }
}
