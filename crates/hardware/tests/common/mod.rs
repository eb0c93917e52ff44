//! Shared test infrastructure: micro-op builders, config presets, a
//! recording value predictor, and a synthetic gzip trace writer.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use flate2::write::GzEncoder;
use flate2::Compression;

use vpsim_core::common::{InstClass, MemData, PredictionRequest, PredictionResult, NO_OPERAND};
use vpsim_core::config::SimConfig;
use vpsim_core::trace::{MicroOp, Operand};
use vpsim_core::ValuePredictor;

/// Builds a source operand reading `reg`.
pub fn src(reg: u64) -> Operand {
    Operand {
        valid: true,
        is_int: reg < 32 || reg == 64,
        log_reg: reg,
        value: NO_OPERAND,
    }
}

/// Builds a destination operand writing `reg` with `value`.
pub fn dst(reg: u64, value: u64) -> Operand {
    Operand {
        valid: true,
        is_int: reg < 32 || reg == 64,
        log_reg: reg,
        value,
    }
}

/// An ALU piece with up to one source and one destination.
pub fn alu(pc: u64, source: Option<u64>, dest: Option<(u64, u64)>) -> MicroOp {
    MicroOp {
        class: InstClass::Alu,
        pc,
        next_pc: pc + 4,
        a: source.map(src).unwrap_or_default(),
        d: dest.map(|(r, v)| dst(r, v)).unwrap_or_default(),
        ..MicroOp::default()
    }
}

/// A load piece.
pub fn load(pc: u64, addr: u64, size: u64, dest: (u64, u64)) -> MicroOp {
    MicroOp {
        class: InstClass::Load,
        pc,
        next_pc: pc + 4,
        d: dst(dest.0, dest.1),
        is_load: true,
        addr,
        size,
        mem_size: size.min(255) as u8,
        ..MicroOp::default()
    }
}

/// A store piece.
pub fn store(pc: u64, addr: u64, size: u64) -> MicroOp {
    MicroOp {
        class: InstClass::Store,
        pc,
        next_pc: pc + 4,
        is_store: true,
        addr,
        size,
        mem_size: size.min(255) as u8,
        ..MicroOp::default()
    }
}

/// A conditional branch piece; `taken` selects the recorded next PC.
pub fn cond_branch(pc: u64, taken: bool, target: u64) -> MicroOp {
    MicroOp {
        class: InstClass::CondBranch,
        pc,
        next_pc: if taken { target } else { pc + 4 },
        a: src(64),
        ..MicroOp::default()
    }
}

/// Config preset used by the timing scenarios: no instruction cache, no
/// prefetcher, default core otherwise.
pub fn scenario_config() -> SimConfig {
    let mut cfg = SimConfig::default();
    cfg.fetch.model_icache = false;
    cfg.memory.prefetcher = false;
    cfg
}

/// Config preset with every resource unbounded and a zero-depth front end,
/// for data-dependence limit checks.
pub fn unbounded_config() -> SimConfig {
    let mut cfg = scenario_config();
    cfg.fetch.width = 0;
    cfg.fetch.num_branch = 0;
    cfg.fetch.stop_at_indirect = false;
    cfg.fetch.stop_at_taken = false;
    cfg.pipeline.fill_latency = 0;
    cfg.pipeline.ldst_lanes = 0;
    cfg.pipeline.alu_lanes = 0;
    cfg.pipeline.window_size = 1 << 16;
    cfg
}

/// One retire-time update observed by the [`RecordingPredictor`].
#[derive(Clone, Copy, Debug)]
pub struct RetireRecord {
    pub seq_no: u64,
    pub addr: u64,
    pub value: u64,
    pub latency: u64,
}

/// A value predictor that never speculates and records every prediction
/// request and retire-time update, so tests can observe what the simulator
/// reports.
pub struct RecordingPredictor {
    pub retires: Rc<RefCell<Vec<RetireRecord>>>,
    pub requests: Rc<RefCell<Vec<PredictionRequest>>>,
}

impl RecordingPredictor {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        Rc<RefCell<Vec<RetireRecord>>>,
        Rc<RefCell<Vec<PredictionRequest>>>,
    ) {
        let retires = Rc::new(RefCell::new(Vec::new()));
        let requests = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                retires: Rc::clone(&retires),
                requests: Rc::clone(&requests),
            },
            retires,
            requests,
        )
    }
}

impl ValuePredictor for RecordingPredictor {
    fn begin(&mut self, _args: &[String]) {}

    fn end(&self) {}

    fn get_prediction(&mut self, req: &PredictionRequest) -> PredictionResult {
        self.requests.borrow_mut().push(*req);
        PredictionResult::default()
    }

    #[allow(clippy::too_many_arguments)]
    fn speculative_update(
        &mut self,
        _seq_no: u64,
        _eligible: bool,
        _prediction_result: u8,
        _pc: u64,
        _next_pc: u64,
        _insn: InstClass,
        _mem_size: u8,
        _is_pair: bool,
        _piece: u8,
        _src1: u64,
        _src2: u64,
        _src3: u64,
        _dst: u64,
    ) {
    }

    fn update_predictor(
        &mut self,
        seq_no: u64,
        actual_addr: u64,
        actual_value: u64,
        _mem_data: &MemData,
        actual_latency: u64,
    ) {
        self.retires.borrow_mut().push(RetireRecord {
            seq_no,
            addr: actual_addr,
            value: actual_value,
            latency: actual_latency,
        });
    }
}

/// Serializes synthetic trace records in the wire format.
#[derive(Default)]
pub struct TraceBuilder {
    bytes: Vec<u8>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn put_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// An ALU record; `outs` pairs each integer output register with its
    /// value (use [`Self::alu_simd`] for vector outputs).
    pub fn alu(&mut self, pc: u64, ins: &[u8], outs: &[(u8, u64)]) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(0);
        self.regs_and_values(ins, outs);
        self
    }

    /// An ALU record with one SIMD output carrying both lanes.
    pub fn alu_simd(&mut self, pc: u64, ins: &[u8], out_reg: u8, lo: u64, hi: u64) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(0);
        self.put_u8(ins.len() as u8);
        self.bytes.extend_from_slice(ins);
        self.put_u8(1);
        self.put_u8(out_reg);
        self.put_u64(lo);
        self.put_u64(hi);
        self
    }

    /// A load record.
    pub fn load(
        &mut self,
        pc: u64,
        addr: u64,
        size_per_reg: u8,
        ins: &[u8],
        outs: &[(u8, u64)],
    ) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(1);
        self.put_u64(addr);
        self.put_u8(size_per_reg);
        self.regs_and_values(ins, outs);
        self
    }

    /// A load record with one SIMD output carrying both lanes.
    pub fn load_simd(
        &mut self,
        pc: u64,
        addr: u64,
        size_per_reg: u8,
        out_reg: u8,
        lo: u64,
        hi: u64,
    ) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(1);
        self.put_u64(addr);
        self.put_u8(size_per_reg);
        self.put_u8(0);
        self.put_u8(1);
        self.put_u8(out_reg);
        self.put_u64(lo);
        self.put_u64(hi);
        self
    }

    /// A store record; `outs` is non-empty for writeback (base-update)
    /// forms.
    pub fn store(
        &mut self,
        pc: u64,
        addr: u64,
        size_per_reg: u8,
        ins: &[u8],
        outs: &[(u8, u64)],
    ) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(2);
        self.put_u64(addr);
        self.put_u8(size_per_reg);
        self.regs_and_values(ins, outs);
        self
    }

    /// A conditional branch record.
    pub fn cond_branch(&mut self, pc: u64, taken: bool, target: u64, ins: &[u8]) -> &mut Self {
        self.put_u64(pc);
        self.put_u8(3);
        self.put_u8(u8::from(taken));
        if taken {
            self.put_u64(target);
        }
        self.regs_and_values(ins, &[]);
        self
    }

    /// Appends raw bytes, for truncation and bad-class tests.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn regs_and_values(&mut self, ins: &[u8], outs: &[(u8, u64)]) {
        self.put_u8(ins.len() as u8);
        self.bytes.extend_from_slice(ins);
        self.put_u8(outs.len() as u8);
        for &(reg, _) in outs {
            self.put_u8(reg);
        }
        for &(_, value) in outs {
            self.put_u64(value);
        }
    }

    /// Gzips the records into a temp file and returns its handle.
    pub fn finish(&self) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::fast());
        encoder.write_all(&self.bytes).unwrap();
        encoder.finish().unwrap();
        file
    }
}
