//! Value prediction.
//!
//! The simulator talks to a value predictor through the [`ValuePredictor`]
//! capability surface: predict at fetch, speculatively update immediately
//! after, and non-speculatively update at retire. The shipped implementation
//! is [`VtageEstride`] — a VTAGE tagged-geometric component over a shared
//! deduplicated value pool, combined with a 3-way skewed stride component.
//! The two fire independently; when both are confident the VTAGE value wins
//! because it is written last.

/// E-Stride: 3-way skewed stride predictor with a global safety counter.
mod estride;
/// VTAGE: tagged-geometric value predictor over a shared value pool.
mod vtage;

use crate::common::{InstClass, MemData, PredictionRequest, PredictionResult, NO_OPERAND};

use estride::EStride;
use vtage::Vtage;

/// Capability surface the microarchitecture simulator drives.
pub trait ValuePredictor {
    /// Called once before the first instruction; receives the CLI arguments
    /// that follow the trace path.
    fn begin(&mut self, args: &[String]);

    /// Called once after the last instruction retires; prints
    /// predictor-specific measurements.
    fn end(&self);

    /// Predicts the destination value of the piece described by `req`.
    fn get_prediction(&mut self, req: &PredictionRequest) -> PredictionResult;

    /// Called immediately after [`Self::get_prediction`] for the same piece.
    ///
    /// `prediction_result` is 0 (incorrect), 1 (correct), or 2 (not revealed:
    /// the predictor declined to speculate or the piece is not a candidate,
    /// so the outcome stays hidden until retire). Register specifiers are
    /// [`NO_OPERAND`] when absent.
    #[allow(clippy::too_many_arguments)]
    fn speculative_update(
        &mut self,
        seq_no: u64,
        eligible: bool,
        prediction_result: u8,
        pc: u64,
        next_pc: u64,
        insn: InstClass,
        mem_size: u8,
        is_pair: bool,
        piece: u8,
        src1: u64,
        src2: u64,
        src3: u64,
        dst: u64,
    );

    /// Called at retire, in retire order.
    fn update_predictor(
        &mut self,
        seq_no: u64,
        actual_addr: u64,
        actual_value: u64,
        mem_data: &MemData,
        actual_latency: u64,
    );
}

// 32-KB configuration shared by both components.

/// Useful-counter width.
pub(crate) const UWIDTH: u32 = 2;
/// Log2 of one value-pool bank.
pub(crate) const LOGLDATA: usize = 9;
/// Log2 of one VTAGE bank.
pub(crate) const LOGBANK: usize = 7;
/// VTAGE tag width.
pub(crate) const TAGWIDTH: usize = 11;
/// Number of VTAGE banks.
pub(crate) const NBBANK: usize = 49;
/// Number of history lengths above bank 0.
pub(crate) const NHIST: usize = 8;
/// History length per bank.
pub(crate) const HL: [usize; NHIST + 1] = [0, 0, 3, 7, 15, 31, 63, 90, 127];
/// Log2 sets in the stride table.
pub(crate) const LOGSTR: usize = 4;
/// Stride table ways.
pub(crate) const NBWAYSTR: usize = 3;
/// Stride tag width.
pub(crate) const TAGWIDTHSTR: usize = 14;
/// Maximum encodable stride magnitude (bits).
pub(crate) const LOGSTRIDE: usize = 20;

/// VTAGE confidence width and ceiling.
pub(crate) const WIDTHCONFID: u32 = 3;
/// Saturated VTAGE confidence.
pub(crate) const MAXCONFID: u8 = (1 << WIDTHCONFID) - 1;
/// Stride confidence width and ceiling.
pub(crate) const WIDTHCONFIDSTR: u32 = 5;
/// Saturated stride confidence.
pub(crate) const MAXCONFIDSTR: u8 = (1 << WIDTHCONFIDSTR) - 1;
/// Saturated useful counter.
pub(crate) const MAXU: u8 = (1 << UWIDTH) - 1;

/// One value-pool bank.
pub(crate) const BANKDATA: usize = 1 << LOGLDATA;
/// One VTAGE bank.
pub(crate) const BANKSIZE: usize = 1 << LOGBANK;
/// Total VTAGE entries.
pub(crate) const PREDSIZE: usize = NBBANK * BANKSIZE;
/// Tick ceiling for useful-counter aging.
pub(crate) const MAXTICK: i32 = 1024;
/// In-flight bookkeeping ring size.
pub(crate) const MAXINFLIGHT: usize = 512;

/// Latency-bucket terms used by the probabilistic update rules. Thresholds
/// mirror the memory hierarchy: main memory 150, L3 60, L2 12; single-cycle
/// and near-single-cycle instructions get their own buckets.
#[derive(Clone, Copy)]
pub(crate) struct LatencyBuckets {
    /// `latency < 150`.
    pub notllc: u32,
    /// `latency < 60`.
    pub notl2: u32,
    /// `latency < 12`.
    pub notl1: u32,
    /// `latency == 1`.
    pub fast: u32,
    /// `latency < 3`.
    pub mfast: u32,
}

impl LatencyBuckets {
    pub fn of(actual_latency: u64) -> Self {
        Self {
            notllc: u32::from(actual_latency < 150),
            notl2: u32::from(actual_latency < 60),
            notl1: u32::from(actual_latency < 12),
            fast: u32::from(actual_latency == 1),
            mfast: u32::from(actual_latency < 3),
        }
    }
}

/// Per-in-flight-piece bookkeeping captured at prediction time and consumed
/// at retire.
#[derive(Clone, Copy)]
pub(crate) struct ForUpdate {
    pub predvtage: bool,
    pub predstride: bool,
    /// True when the speculative outcome was revealed as correct.
    pub prediction_result: bool,
    /// 1 while a retire-time update is pending.
    pub todo: u8,
    pub pc: u64,
    /// VTAGE index per bank.
    pub gi: [u32; NHIST + 1],
    /// VTAGE tag per bank.
    pub gtag: [u32; NHIST + 1],
    /// Stride-table index per way.
    pub b: [u32; NBWAYSTR],
    /// Stride-table tag per way.
    pub tagstr: [u32; NBWAYSTR],
    pub hit_bank: i32,
    pub insttype: InstClass,
    pub nb_operand: u8,
}

impl Default for ForUpdate {
    fn default() -> Self {
        Self {
            predvtage: false,
            predstride: false,
            prediction_result: false,
            todo: 0,
            pc: 0,
            gi: [0; NHIST + 1],
            gtag: [0; NHIST + 1],
            b: [0; NBWAYSTR],
            tagstr: [0; NBWAYSTR],
            hit_bank: -1,
            insttype: InstClass::Undef,
            nb_operand: 0,
        }
    }
}

/// Deterministic counter+shift generator driving the allocation and
/// confidence heuristics. Seeded at construction; identical call sequences
/// yield identical draws, which the determinism guarantee depends on.
pub(crate) struct PredRng {
    counter: u64,
    state: u64,
}

impl PredRng {
    pub fn new(seed: u64) -> Self {
        Self {
            counter: 0,
            state: seed,
        }
    }

    pub fn next(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        let mut s = self.state.wrapping_add(self.counter);
        s = (s >> 21).wrapping_add(s.wrapping_shl(11));
        s ^= s >> 17;
        s = (s >> 10).wrapping_add(s.wrapping_shl(22));
        self.state = s;
        s
    }
}

/// The shipped VTAGE + E-Stride value predictor.
pub struct VtageEstride {
    vtage: Vtage,
    stride: EStride,
    update_ring: Vec<ForUpdate>,
    seq_commit: u64,
    /// 512 bits of global path history, shifted as 8 chained words.
    gpath: [u64; 8],
    /// 64 bits of taken-target history.
    gtargeth: u64,
    rng: PredRng,
}

impl Default for VtageEstride {
    fn default() -> Self {
        Self::new(0)
    }
}

impl VtageEstride {
    /// Builds the predictor; `seed` fixes the internal generator.
    pub fn new(seed: u64) -> Self {
        Self {
            vtage: Vtage::new(),
            stride: EStride::new(),
            update_ring: vec![ForUpdate::default(); MAXINFLIGHT],
            seq_commit: 0,
            gpath: [0; 8],
            gtargeth: 0,
            rng: PredRng::new(seed),
        }
    }

    #[inline]
    fn ring_slot(seq_no: u64) -> usize {
        (seq_no & (MAXINFLIGHT as u64 - 1)) as usize
    }
}

impl ValuePredictor for VtageEstride {
    fn begin(&mut self, _args: &[String]) {}

    fn end(&self) {
        let mut size =
            NBWAYSTR * (1 << LOGSTR) * (67 + LOGSTRIDE + TAGWIDTHSTR + WIDTHCONFIDSTR as usize)
                + 16;
        print!("STORAGE SIZE: STRIDE ({size} bits)");

        let value_bits = ((64 - LOGLDATA) + 2) * 3 << LOGLDATA;
        print!(" |Value array:  ({value_bits} bits)");
        size += value_bits;

        let vtage_bits = BANKSIZE
            * NBBANK
            * (TAGWIDTH + (LOGLDATA + 2) + WIDTHCONFID as usize + UWIDTH as usize)
            + 8
            + 10;
        print!(" |VTAGE:  ({vtage_bits} bits)");
        size += vtage_bits;
        println!(" ||| TOTAL SIZE: {size} bits");
    }

    fn get_prediction(&mut self, req: &PredictionRequest) -> PredictionResult {
        let idx = Self::ring_slot(req.seq_no);
        let pc = req.pc + u64::from(req.piece);

        // Same-PC instances still in flight between the last commit and this
        // piece; the stride component projects that many strides ahead.
        let mut inflight = 0u64;
        let mut i = self.seq_commit + 1;
        while i < req.seq_no {
            inflight += u64::from(self.update_ring[Self::ring_slot(i)].pc == pc);
            i += 1;
        }

        {
            let u = &mut self.update_ring[idx];
            u.pc = pc;
            u.predvtage = false;
            u.predstride = false;
        }

        let mut result = PredictionResult::default();
        self.stride
            .predict(&mut self.update_ring[idx], inflight, &mut result.predicted_value);
        self.vtage.predict(
            &mut self.update_ring[idx],
            &self.gpath,
            self.gtargeth,
            &mut result.predicted_value,
        );
        // The two are very rarely both confident; VTAGE overwrote the value
        // last, so it wins when they are.

        let u = &self.update_ring[idx];
        result.speculate = u.predstride || u.predvtage;
        result
    }

    fn speculative_update(
        &mut self,
        seq_no: u64,
        eligible: bool,
        prediction_result: u8,
        pc: u64,
        next_pc: u64,
        insn: InstClass,
        _mem_size: u8,
        _is_pair: bool,
        _piece: u8,
        src1: u64,
        src2: u64,
        src3: u64,
        _dst: u64,
    ) {
        let idx = Self::ring_slot(seq_no);

        self.vtage.last_misp += 1;

        if eligible {
            let (predvtage, predstride);
            {
                let u = &mut self.update_ring[idx];
                u.nb_operand = u8::from(src1 != NO_OPERAND)
                    + u8::from(src2 != NO_OPERAND)
                    + u8::from(src3 != NO_OPERAND);
                u.todo = 1;
                u.insttype = insn;
                u.prediction_result = prediction_result == 1;
                predvtage = u.predvtage;
                predstride = u.predstride;
            }

            if self.stride.safe_stride < (1 << 15) - 1 {
                self.stride.safe_stride += 1;
            }
            if prediction_result != 2 {
                if prediction_result == 1 {
                    if predstride && self.stride.safe_stride < (1 << 15) - 1 {
                        self.stride.safe_stride += 4 * (1 + i32::from(insn == InstClass::Load));
                    }
                } else {
                    // Mispredictions cluster: silence VTAGE for a while and
                    // make the stride component re-earn trust.
                    if predvtage {
                        self.vtage.last_misp = 0;
                    }
                    if predstride {
                        self.stride.safe_stride -= 1024;
                    }
                }
            }
        }

        // Path history advances only on taken control transfers.
        let is_cond = insn == InstClass::CondBranch;
        let is_uncond =
            insn == InstClass::UncondIndirect || insn == InstClass::UncondDirect;
        if (is_cond || is_uncond) && pc != next_pc.wrapping_sub(4) {
            for i in (1..8).rev() {
                self.gpath[i] = (self.gpath[i] << 1) ^ ((self.gpath[i - 1] >> 63) & 1);
            }
            self.gpath[0] = (self.gpath[0] << 1) ^ (pc >> 2);
            self.gtargeth = (self.gtargeth << 1) ^ (next_pc >> 2);
        }
    }

    fn update_predictor(
        &mut self,
        seq_no: u64,
        _actual_addr: u64,
        actual_value: u64,
        _mem_data: &MemData,
        actual_latency: u64,
    ) {
        let idx = Self::ring_slot(seq_no);
        if self.update_ring[idx].todo == 1 {
            let u = self.update_ring[idx];
            let buckets = LatencyBuckets::of(actual_latency);
            self.vtage.update(&u, actual_value, buckets, &mut self.rng);
            self.stride.update(&u, actual_value, buckets, &mut self.rng);
            self.update_ring[idx].todo = 0;
        }
        self.seq_commit = seq_no;
    }
}
