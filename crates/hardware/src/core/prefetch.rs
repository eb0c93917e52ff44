//! Reference-prediction-table stride prefetcher.
//!
//! The classical RPT design: one entry per load PC with a four-state FSM
//! driven by whether the newly observed stride matches the recorded one.
//! Entries in `SteadyState` generate prefetches two strides ahead of the
//! current address at lookahead time. Generated prefetches sit in a FIFO
//! until the core has a free load/store slot; stale ones are dropped.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::MAX_CYCLE;

/// Reference-prediction-table entries.
const NUM_RPT_ENTRIES: usize = 1024;

/// Lookahead distance in strides: training runs one access behind the
/// lookahead point, so the next useful block is two strides out.
const PREFETCH_MULTIPLIER: i64 = 2;

/// Queue dedup granularity (64-byte cache lines).
const CACHE_LINE_MASK: u64 = !63;

/// A prefetch not issued within this many cycles of generation is dropped.
const PF_MUST_ISSUE_BEFORE_CYCLES: u64 = 8;

/// Per-entry FSM state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PrefetchState {
    /// Entry holds no trained pattern.
    #[default]
    Invalid,
    /// Freshly installed; stride not yet confirmed.
    Initial,
    /// One stride mismatch seen; candidate stride recorded.
    Transient,
    /// Stride confirmed; entry generates prefetches.
    SteadyState,
    /// Pattern is irregular; wait for the stride to recur.
    NoPrediction,
}

#[derive(Clone, Copy)]
struct RptEntry {
    state: PrefetchState,
    tag: u64,
    prev_addr: u64,
    cur_addr: u64,
    stride: i64,
    lru: u64,
}

impl Default for RptEntry {
    fn default() -> Self {
        Self {
            state: PrefetchState::Invalid,
            tag: crate::common::NO_OPERAND,
            prev_addr: crate::common::NO_OPERAND,
            cur_addr: crate::common::NO_OPERAND,
            stride: -1,
            lru: 0,
        }
    }
}

/// A generated prefetch waiting for a free load/store slot.
#[derive(Clone, Copy, Debug)]
pub struct Prefetch {
    /// Block address to fetch into L1.
    pub address: u64,
    /// Fetch cycle at which the prefetch was generated.
    pub gen_cycle: u64,
}

/// Prefetcher activity counters for the final report.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefetchStats {
    /// Training observations (one per load).
    pub trainings: u64,
    /// Prefetches enqueued.
    pub generated: u64,
    /// Prefetches handed to the memory system.
    pub issued: u64,
    /// Prefetches dropped because their line was already queued.
    pub duplicate_filtered: u64,
    /// Prefetches dropped for being generated too long ago.
    pub dropped_untimely: u64,
    /// Prefetches put back because no load/store slot was free.
    pub put_back: u64,
    /// Generation attempts suppressed by a zero stride.
    pub stride_zero: u64,
}

/// The stride prefetcher: RPT plus generation queue.
pub struct StridePrefetcher {
    rpt: Vec<RptEntry>,
    queue: VecDeque<Prefetch>,
    stats: PrefetchStats,
}

impl Default for StridePrefetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StridePrefetcher {
    /// Creates a prefetcher with an empty queue and an LRU-initialized RPT.
    pub fn new() -> Self {
        let mut rpt = vec![RptEntry::default(); NUM_RPT_ENTRIES];
        for (i, entry) in rpt.iter_mut().enumerate() {
            entry.lru = i as u64;
        }
        Self {
            rpt,
            queue: VecDeque::new(),
            stats: PrefetchStats::default(),
        }
    }

    /// Activity counters.
    pub fn stats(&self) -> PrefetchStats {
        self.stats
    }

    fn victim_way(&self) -> usize {
        // lru == 0 is the coldest entry here (NUM_RPT_ENTRIES - 1 is hottest).
        self.rpt
            .iter()
            .position(|e| e.lru == 0)
            .unwrap_or_else(|| unreachable!("RPT LRU ranks must form a permutation"))
    }

    fn update_lru(&mut self, index: usize) {
        let pivot = self.rpt[index].lru;
        for entry in &mut self.rpt {
            if entry.lru > pivot {
                entry.lru -= 1;
            }
        }
        self.rpt[index].lru = (NUM_RPT_ENTRIES - 1) as u64;
    }

    fn find(&self, pc: u64) -> Option<usize> {
        self.rpt.iter().position(|e| e.tag == pc)
    }

    /// Trains the RPT on a load's PC and effective address.
    pub fn train(&mut self, pc: u64, addr: u64) {
        self.stats.trainings += 1;

        let Some(index) = self.find(pc) else {
            let victim = self.victim_way();
            let entry = &mut self.rpt[victim];
            entry.state = PrefetchState::Initial;
            entry.tag = pc;
            entry.prev_addr = crate::common::NO_OPERAND;
            entry.cur_addr = addr;
            entry.stride = 0;
            debug!(pc, addr, "prefetch: installed RPT entry");
            self.update_lru(victim);
            return;
        };

        let entry = &mut self.rpt[index];
        let stride = addr.wrapping_sub(entry.cur_addr) as i64;
        let matched = stride == entry.stride;
        let from = entry.state;
        entry.state = match entry.state {
            PrefetchState::Initial => {
                if !matched {
                    entry.stride = stride;
                }
                if matched {
                    PrefetchState::SteadyState
                } else {
                    PrefetchState::Transient
                }
            }
            PrefetchState::Transient => {
                if !matched {
                    entry.stride = stride;
                }
                if matched {
                    PrefetchState::SteadyState
                } else {
                    PrefetchState::NoPrediction
                }
            }
            PrefetchState::SteadyState => {
                // Keep the trained stride on a single mismatch.
                if matched {
                    PrefetchState::SteadyState
                } else {
                    PrefetchState::Initial
                }
            }
            PrefetchState::NoPrediction => {
                if !matched {
                    entry.stride = stride;
                }
                if matched {
                    PrefetchState::Transient
                } else {
                    PrefetchState::NoPrediction
                }
            }
            PrefetchState::Invalid => unreachable!("tagged RPT entry in Invalid state"),
        };
        entry.prev_addr = entry.cur_addr;
        entry.cur_addr = addr;
        debug!(pc, ?from, to = ?entry.state, stride = entry.stride, "prefetch: trained");

        // Let zero-stride entries age out.
        if self.rpt[index].stride != 0 {
            self.update_lru(index);
        }
    }

    /// Generates a prefetch for `pc` if its entry is in steady state.
    ///
    /// Prefetches are generated when the load is fetched; `cycle` is the
    /// current fetch cycle and stamps the queue entry.
    pub fn lookahead(&mut self, pc: u64, cycle: u64) {
        if let Some(index) = self.find(pc) {
            if self.rpt[index].state == PrefetchState::SteadyState {
                self.generate(index, cycle);
            }
        }
    }

    fn generate(&mut self, index: usize, cycle: u64) {
        let entry = self.rpt[index];
        if entry.stride == 0 {
            self.stats.stride_zero += 1;
            return;
        }

        let address = entry
            .cur_addr
            .wrapping_add((entry.stride * PREFETCH_MULTIPLIER) as u64);
        let duplicate = self
            .queue
            .iter()
            .any(|pf| pf.address & CACHE_LINE_MASK == address & CACHE_LINE_MASK);
        if duplicate {
            debug!(address, "prefetch: dropped, line already queued");
            self.stats.duplicate_filtered += 1;
            return;
        }

        self.queue.push_back(Prefetch {
            address,
            gen_cycle: cycle,
        });
        // Keep the queue ordered oldest-first by generation cycle.
        self.queue
            .make_contiguous()
            .sort_by_key(|pf| pf.gen_cycle);
        debug!(address, cycle, "prefetch: queued");
        self.stats.generated += 1;
    }

    /// Takes the oldest issuable prefetch, dropping untimely ones first.
    ///
    /// A prefetch is untimely when more than [`PF_MUST_ISSUE_BEFORE_CYCLES`]
    /// fetch cycles have passed since generation. Returns `None` when the
    /// queue is empty or the head has not been generated yet at `cycle`.
    pub fn issue(&mut self, cycle: u64) -> Option<Prefetch> {
        while let Some(head) = self.queue.front() {
            if head.gen_cycle + PF_MUST_ISSUE_BEFORE_CYCLES < cycle {
                debug!(
                    address = head.address,
                    generated = head.gen_cycle,
                    cycle,
                    "prefetch: dropped, untimely"
                );
                self.stats.dropped_untimely += 1;
                self.queue.pop_front();
            } else {
                break;
            }
        }

        match self.queue.front() {
            Some(head) if head.gen_cycle <= cycle => {
                let pf = self.queue.pop_front()?;
                self.stats.issued += 1;
                Some(pf)
            }
            _ => None,
        }
    }

    /// Returns an unconsumed prefetch to the head of the queue.
    pub fn put_back(&mut self, pf: Prefetch) {
        self.stats.put_back += 1;
        self.queue.push_front(pf);
    }

    /// Generation cycle of the oldest queued prefetch, or [`MAX_CYCLE`] when
    /// the queue is empty. Resource schedules must not advance past this.
    pub fn oldest_pf_cycle(&self) -> u64 {
        self.queue.front().map_or(MAX_CYCLE, |pf| pf.gen_cycle)
    }
}
