//! ITTAGE indirect-target predictor.
//!
//! Tagged tables indexed with geometrically increasing history lengths; the
//! longest matching bank provides the 64-bit target, with an alternate bank
//! standing by for weakly confident, newly allocated entries. Replacement is
//! governed by per-entry useful counters aged by a global tick.

use crate::common::NO_OPERAND;

use super::history::{
    ctr_update, insert_history, path_mix, FoldedHistory, GlobalHistory, TableRng,
};

/// Number of tagged banks above bank 0.
const NHIST: usize = 8;
/// Shortest non-zero history length.
const MINHIST: usize = 2;
/// Longest history length.
const MAXHIST: usize = 300;
/// Log2 entries per bank.
const LOGG: usize = 10;
/// Tag width in bits.
const TBITS: usize = 11;
/// Extra entries allocated on a misprediction (1 + NNN total).
const NNN: i32 = 1;
/// Path-history width in bits.
const PHISTWIDTH: usize = 27;
/// Useful-counter width.
const UWIDTH: u32 = 2;
/// Prediction-counter width.
const CWIDTH: u32 = 3;
/// Width of the `use_alt_on_na` chooser counter.
const ALTWIDTH: u32 = 5;
/// Tick threshold at which every useful counter is halved.
const BORNTICK: i32 = 1024;

/// One tagged-table entry.
#[derive(Clone, Copy)]
struct IEntry {
    target: u64,
    ctr: i8,
    tag: u32,
    u: i8,
}

impl Default for IEntry {
    fn default() -> Self {
        Self {
            target: NO_OPERAND,
            ctr: 0,
            tag: 0,
            u: 0,
        }
    }
}

/// The ITTAGE predictor.
pub struct IttagePredictor {
    gh: GlobalHistory,
    ch_i: Vec<FoldedHistory>,
    ch_t0: Vec<FoldedHistory>,
    ch_t1: Vec<FoldedHistory>,
    /// Geometric history length per bank.
    m: [usize; NHIST + 1],
    tables: Vec<Vec<IEntry>>,
    use_alt_on_na: i8,
    tick: i32,
    rng: TableRng,

    // Per-lookup state, computed at prediction and reused at update.
    gi: [usize; NHIST + 1],
    gtag: [u32; NHIST + 1],
    hit_bank: i32,
    alt_bank: i32,
    tage_target: u64,
    alt_target: u64,
    longest_match_pred: u64,
}

impl Default for IttagePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl IttagePredictor {
    /// Builds the predictor with geometric history lengths
    /// `m[i] = MINHIST * (MAXHIST/MINHIST)^((i)/NHIST)`.
    pub fn new() -> Self {
        let mut m = [0usize; NHIST + 1];
        m[1] = MINHIST;
        for (i, len) in m.iter_mut().enumerate().skip(2) {
            *len = ((MINHIST as f64)
                * ((MAXHIST as f64) / (MINHIST as f64)).powf((i as f64) / (NHIST as f64))
                + 0.5) as usize;
        }

        let mut ch_i = Vec::with_capacity(NHIST + 1);
        let mut ch_t0 = Vec::with_capacity(NHIST + 1);
        let mut ch_t1 = Vec::with_capacity(NHIST + 1);
        for len in m {
            ch_i.push(FoldedHistory::new(len, LOGG));
            ch_t0.push(FoldedHistory::new(len, TBITS));
            ch_t1.push(FoldedHistory::new(len, TBITS - 1));
        }

        Self {
            gh: GlobalHistory::new(),
            ch_i,
            ch_t0,
            ch_t1,
            m,
            tables: vec![vec![IEntry::default(); 1 << LOGG]; NHIST + 1],
            use_alt_on_na: 0,
            tick: 0,
            rng: TableRng::new(),
            gi: [0; NHIST + 1],
            gtag: [0; NHIST + 1],
            hit_bank: -1,
            alt_bank: -1,
            tage_target: 0,
            alt_target: 0,
            longest_match_pred: 0,
        }
    }

    /// Full hash of PC, folded direction history, and path history.
    fn gindex(&self, pc: u64, bank: usize) -> usize {
        let pc = pc as u32;
        let hist_len = self.m[bank].min(PHISTWIDTH);
        let index = pc
            ^ (pc >> ((LOGG as i32 - bank as i32).unsigned_abs() + 1))
            ^ self.ch_i[bank].comp()
            ^ (path_mix(self.gh.phist, hist_len, bank, LOGG) as u32);
        (index as usize) & ((1 << LOGG) - 1)
    }

    /// Tag hash, orthogonal to the index hash.
    fn gtag_of(&self, pc: u64, bank: usize) -> u32 {
        let tag = (pc as u32) ^ self.ch_t0[bank].comp() ^ (self.ch_t1[bank].comp() << 1);
        tag & ((1 << TBITS) - 1)
    }

    /// Predicts the target for `pc`.
    ///
    /// Leaves the per-bank indices, tags, and the hit/alternate banks in
    /// place for the matching [`Self::update`] call.
    pub fn get_prediction(&mut self, pc: u64) -> u64 {
        self.hit_bank = -1;
        self.alt_bank = -1;
        for i in 0..=NHIST {
            self.gi[i] = self.gindex(pc, i);
            self.gtag[i] = self.gtag_of(pc, i);
        }

        self.alt_target = 0;
        self.tage_target = 0;
        self.longest_match_pred = 0;

        let mut alt_conf = -4i8;
        let mut hit_conf = -4i8;
        for i in (0..=NHIST).rev() {
            let entry = self.tables[i][self.gi[i]];
            if entry.tag == self.gtag[i] {
                self.hit_bank = i as i32;
                hit_conf = entry.ctr;
                self.longest_match_pred = entry.target;
                break;
            }
        }
        if self.hit_bank > 0 {
            for i in (0..self.hit_bank as usize).rev() {
                let entry = self.tables[i][self.gi[i]];
                if entry.tag == self.gtag[i] {
                    self.alt_target = entry.target;
                    self.alt_bank = i as i32;
                    alt_conf = entry.ctr;
                    break;
                }
            }
        }

        if self.hit_bank > 0 {
            let use_alt = self.use_alt_on_na >= 0;
            if !use_alt || hit_conf > 0 || hit_conf >= alt_conf {
                self.tage_target = self.longest_match_pred;
            } else {
                self.tage_target = self.alt_target;
            }
        }
        if self.alt_bank < 0 {
            self.tage_target = self.longest_match_pred;
        }

        self.tage_target
    }

    /// Trains on the resolved target of the branch just predicted.
    pub fn update(&mut self, pc: u64, target: u64) {
        let mut alloc = (self.tage_target != target) && (self.hit_bank < NHIST as i32);

        if self.hit_bank > 0 && self.alt_bank >= 0 {
            // An entry with a weak counter behaves like a fresh allocation;
            // train the chooser on whether the alternate would have done
            // better, and skip allocating if the longest match was right.
            let hit = self.tables[self.hit_bank as usize][self.gi[self.hit_bank as usize]];
            let pseudo_new_alloc = hit.ctr <= 0;
            if pseudo_new_alloc {
                if self.longest_match_pred == target {
                    alloc = false;
                }
                if self.longest_match_pred != self.alt_target
                    && (self.longest_match_pred == target || self.alt_target == target)
                {
                    ctr_update(
                        &mut self.use_alt_on_na,
                        self.alt_target == target,
                        ALTWIDTH,
                    );
                }
            }
        }

        if alloc {
            let mut t = NNN;
            let mut a = 1;
            if (self.rng.next(self.gh.phist, self.gh.ptghist) & 127) < 32 {
                a = 2;
            }
            let mut penalty = 0i32;
            let mut na = 0i32;
            let mut i = (self.hit_bank + a) as usize;
            while i <= NHIST {
                let entry = &mut self.tables[i][self.gi[i]];
                if entry.u == 0 {
                    entry.tag = self.gtag[i];
                    entry.target = target;
                    entry.ctr = 0;
                    na += 1;
                    if t <= 0 {
                        break;
                    }
                    i += 1;
                    t -= 1;
                } else {
                    penalty += 1;
                }
                i += 1;
            }

            self.tick += penalty - 2 * na;
            if self.tick < 0 {
                self.tick = 0;
            }
            if self.tick >= BORNTICK {
                for bank in &mut self.tables {
                    for entry in bank {
                        entry.u >>= 1;
                    }
                }
                self.tick = 0;
            }
        }

        if self.hit_bank >= 0 {
            let hit_idx = self.gi[self.hit_bank as usize];
            if self.tables[self.hit_bank as usize][hit_idx].ctr <= 0
                && self.longest_match_pred != target
                && self.alt_target == target
                && self.alt_bank >= 0
            {
                let alt = &mut self.tables[self.alt_bank as usize][self.gi[self.alt_bank as usize]];
                ctr_update(&mut alt.ctr, true, CWIDTH);
            }

            let hit = &mut self.tables[self.hit_bank as usize][hit_idx];
            ctr_update(&mut hit.ctr, self.longest_match_pred == target, CWIDTH);
            if self.longest_match_pred != target && hit.ctr < 0 {
                hit.target = target;
            }

            if self.longest_match_pred != self.alt_target && self.longest_match_pred == target {
                let hit = &mut self.tables[self.hit_bank as usize][hit_idx];
                if hit.u < ((1i8 << UWIDTH) - 1) {
                    hit.u += 1;
                }
            }
        }

        self.history_update(pc, target);
    }

    /// History-only update for control transfers ITTAGE does not predict.
    pub fn track_other_inst(&mut self, pc: u64, target: u64) {
        self.history_update(pc, target);
    }

    /// Inserts three bits mixing PC and target into the histories.
    fn history_update(&mut self, pc: u64, target: u64) {
        let t = ((pc >> 2) ^ (pc >> 6)) as i32;
        let path = ((target >> 2) ^ (target >> 6)) as i64;
        insert_history(
            &mut self.gh,
            t,
            path,
            3,
            PHISTWIDTH,
            &mut self.ch_i,
            &mut self.ch_t0,
            &mut self.ch_t1,
        );
    }
}
