//! The microarchitecture simulator.
//!
//! A timestamp propagator: each step consumes one cracked trace piece,
//! computes the cycle its result becomes available from operand readiness
//! and finite resources, and advances the fetch cycle under fetch-bundle,
//! window, branch-misprediction, and value-misprediction constraints. The
//! simulated cycle count is the maximum completion cycle seen; IPC follows.
//!
//! Ordering within a step: retire, predict, speculative update, execute,
//! dispatch, fetch-cycle update, prefetch drain, base-cycle advance.
//! Retirement happens first, so the predictor observes committed state for
//! everything older than the current piece.

use tracing::trace;

use crate::bp::BranchUnit;
use crate::common::{
    HitMissInfo, InstClass, MemData, PredictionRequest, MAX_CYCLE, NO_OPERAND, RF_FLAGS, RF_SIZE,
};
use crate::config::{SimConfig, VpTrack};
use crate::core::cache::{CacheHierarchy, CacheStats};
use crate::core::fifo::Fifo;
use crate::core::prefetch::StridePrefetcher;
use crate::core::resources::ResourceSchedule;
use crate::core::store_queue::StoreQueue;
use crate::trace::{MicroOp, Operand};
use crate::vp::ValuePredictor;

/// One in-flight piece, pushed at dispatch and popped at retire.
#[derive(Clone, Default)]
struct WindowEntry {
    retire_cycle: u64,
    seq_no: u64,
    addr: u64,
    value: u64,
    latency: u64,
    mem: MemData,
}

/// The simulator. Owns every timing structure and the value predictor.
pub struct UarchSim {
    cfg: SimConfig,

    /// Register timestamps: cycle at which each logical register's value
    /// becomes visible.
    rf: [u64; RF_SIZE],
    sq: StoreQueue,
    caches: CacheHierarchy,

    fetch_cycle: u64,
    previous_fetch_cycle: u64,
    num_fetched: u64,
    num_fetched_branch: u64,
    window: Fifo<WindowEntry>,
    ldst_lanes: Option<ResourceSchedule>,
    alu_lanes: Option<ResourceSchedule>,

    bp: BranchUnit,
    prefetcher: StridePrefetcher,
    predictor: Box<dyn ValuePredictor>,

    /// Piece counter: consecutive records at the same PC are pieces of one
    /// instruction.
    piece: u8,
    prev_pc: u64,

    num_inst: u64,
    cycle: u64,

    num_eligible: u64,
    num_correct: u64,
    num_incorrect: u64,

    num_load: u64,
    num_load_sqmiss: u64,
    pfs_issued_to_mem: u64,
}

impl UarchSim {
    /// Builds a simulator from a validated configuration and a predictor.
    pub fn new(cfg: &SimConfig, predictor: Box<dyn ValuePredictor>) -> Self {
        assert!(cfg.pipeline.window_size > 0);
        Self {
            cfg: cfg.clone(),
            rf: [0; RF_SIZE],
            sq: StoreQueue::new(),
            caches: CacheHierarchy::new(&cfg.memory, cfg.fetch.model_icache),
            fetch_cycle: 0,
            previous_fetch_cycle: 0,
            num_fetched: 0,
            num_fetched_branch: 0,
            window: Fifo::new(cfg.pipeline.window_size),
            ldst_lanes: (cfg.pipeline.ldst_lanes > 0)
                .then(|| ResourceSchedule::new(cfg.pipeline.ldst_lanes)),
            alu_lanes: (cfg.pipeline.alu_lanes > 0)
                .then(|| ResourceSchedule::new(cfg.pipeline.alu_lanes)),
            bp: BranchUnit::new(&cfg.branch),
            prefetcher: StridePrefetcher::new(),
            predictor,
            piece: 0,
            prev_pc: NO_OPERAND,
            num_inst: 0,
            cycle: 0,
            num_eligible: 0,
            num_correct: 0,
            num_incorrect: 0,
            num_load: 0,
            num_load_sqmiss: 0,
            pfs_issued_to_mem: 0,
        }
    }

    /// Forwards the post-trace CLI arguments to the predictor.
    pub fn predictor_begin(&mut self, args: &[String]) {
        self.predictor.begin(args);
    }

    /// Lets the predictor print its end-of-run measurements.
    pub fn predictor_end(&self) {
        self.predictor.end();
    }

    fn is_candidate_for_track(&self, op: &MicroOp) -> bool {
        match self.cfg.vp.track {
            VpTrack::All => true,
            VpTrack::LoadsOnly | VpTrack::LoadsOnlyHitMiss => op.is_load,
        }
    }

    /// Projects the cycle this load would perform address generation,
    /// without binding any resources.
    fn projected_agen_cycle(&mut self, op: &MicroOp) -> u64 {
        let mut exec_cycle = self.fetch_cycle + self.cfg.pipeline.fill_latency;
        for src in [&op.a, &op.b, &op.c] {
            if src.valid {
                exec_cycle = exec_cycle.max(self.rf[src.log_reg as usize]);
            }
        }
        if let Some(lanes) = self.ldst_lanes.as_mut() {
            exec_cycle = lanes.try_schedule(exec_cycle);
        }
        exec_cycle + 1
    }

    /// Fills the cache-outcome field of a loads-with-hit-miss request by
    /// probing the hierarchy at the load's projected execution cycle.
    fn load_hit_miss(&mut self, op: &MicroOp) -> HitMissInfo {
        if self.cfg.memory.perfect_cache {
            return HitMissInfo::L1DHit;
        }
        let agen_cycle = self.projected_agen_cycle(op);
        let (l1, l2, l3) = (self.caches.l1(), self.caches.l2(), self.caches.l3());
        let l1_latency = self.caches.level(l1).latency();
        let l2_latency = self.caches.level(l2).latency();
        if self.caches.is_hit(l1, agen_cycle, op.addr) {
            HitMissInfo::L1DHit
        } else if self.caches.is_hit(l2, agen_cycle + l1_latency, op.addr) {
            HitMissInfo::L2Hit
        } else if self
            .caches
            .is_hit(l3, agen_cycle + l1_latency + l2_latency, op.addr)
        {
            HitMissInfo::L3Hit
        } else {
            HitMissInfo::Miss
        }
    }

    /// Simulates one cracked piece.
    pub fn step(&mut self, op: &MicroOp) {
        // Preliminary: which piece of the instruction this is.
        self.piece = if op.pc == self.prev_pc {
            self.piece + 1
        } else {
            0
        };
        self.prev_pc = op.pc;

        // Manage window: retire everything the fetch cycle has caught up to.
        while !self.window.is_empty()
            && self.fetch_cycle >= self.window.peek_head().retire_cycle
        {
            let w = self.window.pop();
            if self.cfg.vp.enable && !self.cfg.vp.perfect {
                self.predictor
                    .update_predictor(w.seq_no, w.addr, w.value, &w.mem, w.latency);
            }
        }

        let seq_no = self.num_inst;
        let predictable = op.d.valid && op.d.log_reg != RF_FLAGS;
        let mut predicted_value = 0u64;
        let mut speculate = false;

        if self.cfg.vp.enable {
            if self.cfg.vp.perfect {
                predicted_value = op.d.value;
                speculate = predictable;
            } else {
                let is_candidate = self.is_candidate_for_track(op);
                let cache_hit = if self.cfg.vp.track == VpTrack::LoadsOnlyHitMiss && op.is_load {
                    self.load_hit_miss(op)
                } else {
                    HitMissInfo::Invalid
                };
                let req = PredictionRequest {
                    seq_no,
                    pc: op.pc,
                    piece: self.piece,
                    is_candidate,
                    cache_hit,
                };
                let result = self.predictor.get_prediction(&req);
                speculate = result.speculate;
                predicted_value = result.predicted_value;

                // Speculating reveals the outcome immediately; otherwise it
                // stays hidden until retire.
                let prediction_result = if predictable && speculate && is_candidate {
                    u8::from(predicted_value == op.d.value)
                } else {
                    2
                };
                self.predictor.speculative_update(
                    seq_no,
                    predictable,
                    prediction_result,
                    op.pc,
                    op.next_pc,
                    op.class,
                    op.mem_size,
                    op.is_pair,
                    self.piece,
                    reg_or_absent(&op.a),
                    reg_or_absent(&op.b),
                    reg_or_absent(&op.c),
                    reg_or_absent(&op.d),
                );
            }
        }

        // I-cache hit latency is 0, so the fetch cycle only moves on misses.
        if let Some(ic) = self.caches.icache() {
            self.fetch_cycle = self.caches.access(ic, self.fetch_cycle, op.pc, false);
        }

        // Schedule the execution cycle: pipeline fill, then source readiness.
        let mut exec_cycle = self.fetch_cycle + self.cfg.pipeline.fill_latency;
        for src in [&op.a, &op.b, &op.c] {
            if src.valid {
                assert!((src.log_reg as usize) < RF_SIZE);
                exec_cycle = exec_cycle.max(self.rf[src.log_reg as usize]);
            }
        }

        // Bind an execution lane.
        if op.is_load || op.is_store {
            if let Some(lanes) = self.ldst_lanes.as_mut() {
                exec_cycle = lanes.schedule(exec_cycle, MAX_CYCLE);
            }
        } else if let Some(lanes) = self.alu_lanes.as_mut() {
            exec_cycle = lanes.schedule(exec_cycle, MAX_CYCLE);
        }

        let latency;
        if op.is_load {
            let issue_cycle = exec_cycle;

            if self.cfg.memory.prefetcher && !self.cfg.memory.perfect_cache {
                self.prefetcher.train(op.pc, op.addr);
                self.prefetcher.lookahead(op.pc, self.fetch_cycle);
            }

            // AGEN takes one cycle.
            exec_cycle += 1;

            // Search the data cache with AGEN's cycle.
            let l1 = self.caches.l1();
            let data_cache_cycle = if self.cfg.memory.perfect_cache {
                exec_cycle + self.caches.level(l1).latency()
            } else {
                self.caches.access(l1, exec_cycle, op.addr, false)
            };

            // SQ search takes one cycle after AGEN.
            exec_cycle += 1;

            let (combined, missed_any) =
                self.sq
                    .load_forward(op.addr, op.size, exec_cycle, data_cache_cycle);
            self.num_load += 1;
            self.num_load_sqmiss += u64::from(missed_any);

            assert!(combined >= exec_cycle);
            exec_cycle = combined;

            latency = exec_cycle - issue_cycle;
            // Two cycles when every byte forwards from the SQ.
            assert!(latency >= 2);
        } else {
            latency = match op.class {
                InstClass::Fp => 3,
                InstClass::SlowAlu => 4,
                _ => 1,
            };
            exec_cycle += latency;
        }

        self.num_inst += 1;
        self.cycle = self.cycle.max(exec_cycle);

        // Destination timestamp: a correct value prediction makes the value
        // visible at fetch, breaking the dependence; a wrong one squashes.
        let mut squash = false;
        if op.d.valid {
            assert!((op.d.log_reg as usize) < RF_SIZE);
            if op.d.log_reg != RF_FLAGS {
                squash = speculate && predicted_value != op.d.value;
                self.rf[op.d.log_reg as usize] = if speculate && predicted_value == op.d.value {
                    self.fetch_cycle
                } else {
                    exec_cycle
                };
            }
        }

        // Store queue byte timestamps. A store searches the L1 at commit and
        // is released whether it hits or misses; conflicting loads forward
        // from the SQ until the store's commit cycle.
        if op.is_store {
            let data_cache_cycle =
                if !self.cfg.memory.write_allocate || self.cfg.memory.perfect_cache {
                    exec_cycle
                } else {
                    let l1 = self.caches.l1();
                    self.caches.access(l1, exec_cycle, op.addr, false)
                };
            let tail_retire = if self.window.is_empty() {
                0
            } else {
                self.window.peek_tail().retire_cycle
            };
            let ret_cycle = data_cache_cycle.max(tail_retire);
            self.sq.store(op.addr, op.size, exec_cycle, ret_cycle);
        }

        self.num_eligible += u64::from(predictable);
        self.num_correct += u64::from(predictable && speculate && !squash);
        self.num_incorrect += u64::from(predictable && speculate && squash);

        // Manage window: dispatch.
        let tail_retire = if self.window.is_empty() {
            0
        } else {
            self.window.peek_tail().retire_cycle
        };
        self.window.push(WindowEntry {
            retire_cycle: exec_cycle.max(tail_retire),
            seq_no,
            addr: if op.is_load || op.is_store {
                op.addr
            } else {
                NO_OPERAND
            },
            value: if predictable { op.d.value } else { NO_OPERAND },
            latency,
            mem: MemData {
                is_load: op.is_load,
                is_pair: op.is_pair,
                access_size: op.mem_size,
                ..MemData::default()
            },
        });

        // Manage fetch cycle.
        if squash {
            // Control dependence on the retire cycle of the mispredicted
            // piece: the whole window drains before fetch resumes.
            self.num_fetched = 0;
            assert!(
                !self.window.is_empty()
                    && self.fetch_cycle < self.window.peek_tail().retire_cycle
            );
            self.fetch_cycle = self.window.peek_tail().retire_cycle;
        } else if self.window.is_full() {
            if self.fetch_cycle < self.window.peek_head().retire_cycle {
                self.num_fetched = 0;
                self.fetch_cycle = self.window.peek_head().retire_cycle;
            }
        } else {
            // Fetch-bundle constraints.
            let mut stop = false;
            let cond_branch = op.class == InstClass::CondBranch;
            let uncond_direct = op.class == InstClass::UncondDirect;
            let uncond_indirect = op.class == InstClass::UncondIndirect;

            if self.cfg.fetch.width > 0 {
                self.num_fetched += 1;
                if self.num_fetched == self.cfg.fetch.width {
                    stop = true;
                }
            }

            if self.cfg.fetch.num_branch > 0
                && (cond_branch || uncond_direct || uncond_indirect)
            {
                self.num_fetched_branch += 1;
                if self.num_fetched_branch == self.cfg.fetch.num_branch {
                    stop = true;
                }
            }

            if self.cfg.fetch.stop_at_indirect && uncond_indirect {
                stop = true;
            }

            if self.cfg.fetch.stop_at_taken
                && (uncond_direct
                    || uncond_indirect
                    || (cond_branch && op.next_pc != op.pc + 4))
            {
                stop = true;
            }

            if stop {
                self.num_fetched = 0;
                self.num_fetched_branch = 0;
                self.fetch_cycle += 1;
            }
        }

        // A mispredicted branch stalls fetch until the branch executes.
        if !self.cfg.branch.perfect && self.bp.predict(op.class, op.pc, op.next_pc) {
            self.fetch_cycle = self.fetch_cycle.max(exec_cycle);
        }

        // Issue queued prefetches into load/store slots the demand stream
        // left free between the previous and current fetch cycles.
        self.drain_prefetches();

        // Recycle resource-schedule slots behind the fetch cycle, but never
        // past a cycle a still-queued prefetch needs.
        let base = self.fetch_cycle.min(self.prefetcher.oldest_pf_cycle());
        if let Some(lanes) = self.ldst_lanes.as_mut() {
            lanes.advance_base_cycle(base);
        }
        if let Some(lanes) = self.alu_lanes.as_mut() {
            lanes.advance_base_cycle(base);
        }
        self.previous_fetch_cycle = self.fetch_cycle;

        trace!(
            seq_no,
            pc = op.pc,
            exec_cycle,
            fetch_cycle = self.fetch_cycle,
            "step"
        );
    }

    fn drain_prefetches(&mut self) {
        if !self.cfg.memory.prefetcher || self.cfg.memory.perfect_cache {
            return;
        }
        while let Some(pf) = self.prefetcher.issue(self.fetch_cycle) {
            let start = pf.gen_cycle.max(self.previous_fetch_cycle);
            let cycle = match self.ldst_lanes.as_mut() {
                Some(lanes) => {
                    let max_delta = self.fetch_cycle.saturating_sub(start);
                    lanes.schedule(start, max_delta)
                }
                None => start,
            };
            if cycle == MAX_CYCLE {
                self.prefetcher.put_back(pf);
                break;
            }
            let l1 = self.caches.l1();
            let _ = self.caches.access(l1, cycle, pf.address, true);
            self.pfs_issued_to_mem += 1;
        }
    }

    /// Total simulated cycles (max completion cycle seen so far).
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Pieces simulated so far.
    pub fn instructions(&self) -> u64 {
        self.num_inst
    }

    /// Current fetch cycle.
    pub fn fetch_cycle(&self) -> u64 {
        self.fetch_cycle
    }

    /// Prediction-eligible pieces seen so far.
    pub fn num_eligible(&self) -> u64 {
        self.num_eligible
    }

    /// Correct speculated predictions so far.
    pub fn num_correct(&self) -> u64 {
        self.num_correct
    }

    /// Incorrect speculated predictions so far.
    pub fn num_incorrect(&self) -> u64 {
        self.num_incorrect
    }

    /// Loads executed so far.
    pub fn num_loads(&self) -> u64 {
        self.num_load
    }

    /// Loads with at least one byte not forwarded by the store queue.
    pub fn num_load_sq_misses(&self) -> u64 {
        self.num_load_sqmiss
    }

    /// The branch-prediction façade (counters).
    pub fn branch_unit(&self) -> &BranchUnit {
        &self.bp
    }

    /// L1 demand/prefetch counters.
    pub fn l1_stats(&self) -> CacheStats {
        self.caches.level(self.caches.l1()).stats()
    }

    /// Prefetcher activity counters.
    pub fn prefetcher_stats(&self) -> crate::core::prefetch::PrefetchStats {
        self.prefetcher.stats()
    }

    /// Prints the full end-of-run report.
    pub fn print_report(&self) {
        let cfg = &self.cfg;
        println!("VP_ENABLE = {}", u8::from(cfg.vp.enable));
        println!(
            "VP_PERFECT = {}",
            if cfg.vp.enable {
                if cfg.vp.perfect { "1" } else { "0" }
            } else {
                "n/a"
            }
        );
        println!(
            "VP_TRACK = {}",
            if cfg.vp.enable {
                cfg.vp.track.name()
            } else {
                "n/a"
            }
        );
        println!("WINDOW_SIZE = {}", cfg.pipeline.window_size);
        println!("FETCH_WIDTH = {}", cfg.fetch.width);
        println!("FETCH_NUM_BRANCH = {}", cfg.fetch.num_branch);
        println!(
            "FETCH_STOP_AT_INDIRECT = {}",
            u8::from(cfg.fetch.stop_at_indirect)
        );
        println!(
            "FETCH_STOP_AT_TAKEN = {}",
            u8::from(cfg.fetch.stop_at_taken)
        );
        println!("FETCH_MODEL_ICACHE = {}", u8::from(cfg.fetch.model_icache));
        println!("PERFECT_BRANCH_PRED = {}", u8::from(cfg.branch.perfect));
        println!(
            "PERFECT_INDIRECT_PRED = {}",
            u8::from(cfg.branch.perfect_indirect)
        );
        println!("PIPELINE_FILL_LATENCY = {}", cfg.pipeline.fill_latency);
        if cfg.pipeline.ldst_lanes > 0 {
            println!("NUM_LDST_LANES = {}", cfg.pipeline.ldst_lanes);
        } else {
            println!("NUM_LDST_LANES = 0 (unbounded)");
        }
        if cfg.pipeline.alu_lanes > 0 {
            println!("NUM_ALU_LANES = {}", cfg.pipeline.alu_lanes);
        } else {
            println!("NUM_ALU_LANES = 0 (unbounded)");
        }

        println!("MEMORY HIERARCHY CONFIGURATION---------------------");
        println!("PERFECT_CACHE = {}", u8::from(cfg.memory.perfect_cache));
        println!("WRITE_ALLOCATE = {}", u8::from(cfg.memory.write_allocate));
        println!("PREFETCHER_ENABLE = {}", u8::from(cfg.memory.prefetcher));
        println!("Within-pipeline factors:");
        println!("\tAGEN latency = 1 cycle");
        println!(
            "\tStore Queue (SQ): SQ size = window size, oracle memory \
             disambiguation, store-load forwarding = 1 cycle after store's \
             or load's agen."
        );
        println!("\t* Note: A store searches the L1$ at commit. The store is released");
        println!("\t* from the SQ and window, whether it hits or misses. Store misses");
        println!("\t* are buffered until the block is allocated and the store is");
        println!("\t* performed in the L1$. While buffered, conflicting loads get");
        println!("\t* the store's data as they would from the SQ.");
        if cfg.fetch.model_icache {
            let (size, unit) = scaled_size(cfg.memory.icache.size);
            println!(
                "I$: {} {}, {}-way set-assoc., {}B block size",
                size, unit, cfg.memory.icache.assoc, cfg.memory.icache.block_size
            );
        }
        for (name, geom) in [
            ("L1$", &cfg.memory.l1),
            ("L2$", &cfg.memory.l2),
            ("L3$", &cfg.memory.l3),
        ] {
            let (size, unit) = scaled_size(geom.size);
            println!(
                "{}: {} {}, {}-way set-assoc., {}B block size, {}-cycle search latency",
                name, size, unit, geom.assoc, geom.block_size, geom.latency
            );
        }
        println!(
            "Main Memory: {}-cycle fixed search time",
            cfg.memory.main_latency
        );

        println!("STORE QUEUE MEASUREMENTS---------------------------");
        println!("Number of loads: {}", self.num_load);
        println!(
            "Number of loads that miss in SQ: {} ({:.2}%)",
            self.num_load_sqmiss,
            100.0 * (self.num_load_sqmiss as f64) / (self.num_load as f64)
        );

        println!("MEMORY HIERARCHY MEASUREMENTS----------------------");
        if let Some(ic) = self.caches.icache() {
            println!("I$:");
            print_cache_stats(self.caches.level(ic).stats());
        }
        println!("L1$:");
        print_cache_stats(self.caches.level(self.caches.l1()).stats());
        println!("L2$:");
        print_cache_stats(self.caches.level(self.caches.l2()).stats());
        println!("L3$:");
        print_cache_stats(self.caches.level(self.caches.l3()).stats());

        self.bp.print_report();

        if cfg.memory.prefetcher {
            let pf = self.prefetcher.stats();
            println!("PREFETCHER MEASUREMENTS----------------------------");
            println!("Num Trainings: {}", pf.trainings);
            println!("Num Prefetches generated: {}", pf.generated);
            println!("Num Prefetches issued: {}", pf.issued);
            println!("Num Prefetches issued to memory: {}", self.pfs_issued_to_mem);
            println!("Num Prefetches filtered by PF queue: {}", pf.duplicate_filtered);
            println!(
                "Num untimely prefetches dropped from PF queue: {}",
                pf.dropped_untimely
            );
            println!("Num prefetches not issued LDST contention: {}", pf.put_back);
            println!("Num prefetches not issued stride 0: {}", pf.stride_zero);
        }

        println!("ILP LIMIT STUDY------------------------------------");
        println!("instructions = {}", self.num_inst);
        println!("cycles       = {}", self.cycle);
        println!(
            "IPC          = {:.2}",
            (self.num_inst as f64) / (self.cycle as f64)
        );
        println!("CVP STUDY------------------------------------------");
        println!("prediction-eligible instructions = {}", self.num_eligible);
        println!(
            "correct predictions              = {} ({:.2}%)",
            self.num_correct,
            100.0 * (self.num_correct as f64) / (self.num_eligible as f64)
        );
        println!(
            "incorrect predictions            = {} ({:.2}%)",
            self.num_incorrect,
            100.0 * (self.num_incorrect as f64) / (self.num_eligible as f64)
        );
    }
}

fn reg_or_absent(operand: &Operand) -> u64 {
    if operand.valid {
        operand.log_reg
    } else {
        NO_OPERAND
    }
}

fn scaled_size(size: u64) -> (u64, &'static str) {
    const KILOBYTE: u64 = 1 << 10;
    const MEGABYTE: u64 = 1 << 20;
    if size / KILOBYTE >= KILOBYTE {
        (size / MEGABYTE, "MB")
    } else {
        (size / KILOBYTE, "KB")
    }
}

fn print_cache_stats(stats: CacheStats) {
    println!("\taccesses   = {}", stats.accesses);
    println!("\tmisses     = {}", stats.misses);
    println!(
        "\tmiss ratio = {:.2}%",
        100.0 * (stats.misses as f64) / (stats.accesses as f64)
    );
    println!("\tpf accesses   = {}", stats.pf_accesses);
    println!("\tpf misses     = {}", stats.pf_misses);
    println!(
        "\tpf miss ratio = {:.2}%",
        100.0 * (stats.pf_misses as f64) / (stats.pf_accesses as f64)
    );
}
