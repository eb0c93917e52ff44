//! Common types and constants shared across the simulator.
//!
//! This module defines the vocabulary every component speaks:
//! 1. **Instruction classes** as recorded in the trace.
//! 2. **Prediction interface types** exchanged with the value predictor.
//! 3. **Register-file constants** (integer / FP-SIMD / flags namespaces).
//! 4. **Errors** raised by configuration and trace decoding.

/// Error types for configuration and trace decoding.
pub mod error;

pub use error::SimError;

/// Number of logical registers: r0-r31 integer, r32-r63 FP/SIMD lane, r64 flags.
pub const RF_SIZE: usize = 65;

/// The flags register is r64 (65th register).
pub const RF_FLAGS: u64 = 64;

/// First FP/SIMD register id.
pub const VEC_OFFSET: u64 = 32;

/// Sentinel cycle returned when a bounded schedule search fails.
pub const MAX_CYCLE: u64 = u64::MAX;

/// Placeholder for absent operands, addresses, and values in the trace and
/// the predictor interface.
pub const NO_OPERAND: u64 = 0xdead_beef;

/// Dynamic instruction class of one trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InstClass {
    /// Single-cycle integer operation.
    Alu = 0,
    /// Memory load.
    Load = 1,
    /// Memory store.
    Store = 2,
    /// Conditional branch.
    CondBranch = 3,
    /// Unconditional direct jump or call.
    UncondDirect = 4,
    /// Unconditional indirect jump, call, or return.
    UncondIndirect = 5,
    /// Floating-point operation.
    Fp = 6,
    /// Multi-cycle integer operation (multiply, divide).
    SlowAlu = 7,
    /// Undefined; never emitted by a well-formed trace.
    Undef = 8,
}

impl InstClass {
    /// Decodes the one-byte class field of a trace record.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Alu),
            1 => Some(Self::Load),
            2 => Some(Self::Store),
            3 => Some(Self::CondBranch),
            4 => Some(Self::UncondDirect),
            5 => Some(Self::UncondIndirect),
            6 => Some(Self::Fp),
            7 => Some(Self::SlowAlu),
            _ => None,
        }
    }

    /// True for all three control-transfer classes.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::CondBranch | Self::UncondDirect | Self::UncondIndirect
        )
    }
}

/// Data-cache outcome attached to a prediction request on the
/// loads-with-hit-miss track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HitMissInfo {
    /// Missed all cache levels.
    Miss,
    /// Hit in the L1 data cache.
    L1DHit,
    /// Hit in the L2 cache.
    L2Hit,
    /// Hit in the L3 cache.
    L3Hit,
    /// Not a load, or the active track does not expose cache outcomes.
    #[default]
    Invalid,
}

/// One request to the value predictor, made at fetch of each piece.
#[derive(Clone, Copy, Debug)]
pub struct PredictionRequest {
    /// Dynamic micro-instruction number (increments per piece).
    pub seq_no: u64,
    /// Program counter of the instruction.
    pub pc: u64,
    /// Piece number within a cracked instruction.
    pub piece: u8,
    /// Candidate for value prediction under the active track.
    pub is_candidate: bool,
    /// Data-cache outcome; valid only on the loads-with-hit-miss track.
    pub cache_hit: HitMissInfo,
}

/// The predictor's answer to a [`PredictionRequest`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PredictionResult {
    /// The predicted 64-bit destination value.
    pub predicted_value: u64,
    /// Whether the core should speculate on the prediction. Speculating
    /// reveals the outcome immediately; declining defers it to retire.
    pub speculate: bool,
}

/// Memory payload handed to the predictor at retire.
///
/// CVP-1 traces record addresses and access sizes but not store data, so the
/// data words keep their placeholder value.
#[derive(Clone, Copy, Debug)]
pub struct MemData {
    /// True when the retiring piece is a load.
    pub is_load: bool,
    /// First store-data register, low 64 bits.
    pub std_1_lo: u64,
    /// First store-data register, high 64 bits.
    pub std_1_hi: u64,
    /// Second store-data register, low 64 bits.
    pub std_2_lo: u64,
    /// Second store-data register, high 64 bits.
    pub std_2_hi: u64,
    /// True for store-pair forms.
    pub is_pair: bool,
    /// Access size in bytes for loads and stores, zero otherwise.
    pub access_size: u8,
}

impl Default for MemData {
    fn default() -> Self {
        Self {
            is_load: false,
            std_1_lo: NO_OPERAND,
            std_1_hi: NO_OPERAND,
            std_2_lo: NO_OPERAND,
            std_2_hi: NO_OPERAND,
            is_pair: false,
            access_size: 0,
        }
    }
}
