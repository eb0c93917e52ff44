//! TAGE conditional direction predictor.
//!
//! A bimodal base table backed by tagged banks indexed with geometrically
//! increasing history lengths. The longest matching bank provides the
//! direction; weakly confident entries can defer to the alternate prediction
//! under a dynamically trained chooser. Same folded-history and replacement
//! machinery as the indirect predictor.

use super::history::{
    ctr_update, insert_history, path_mix, FoldedHistory, GlobalHistory, TableRng,
};

/// Number of tagged banks (bank 0 is the bimodal base).
const NHIST: usize = 12;
/// Shortest non-zero history length.
const MINHIST: usize = 4;
/// Longest history length.
const MAXHIST: usize = 640;
/// Log2 entries per tagged bank.
const LOGG: usize = 10;
/// Log2 entries in the bimodal base table.
const LOGB: usize = 13;
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

/// One tagged-bank entry.
#[derive(Clone, Copy, Default)]
struct TEntry {
    tag: u32,
    ctr: i8,
    u: i8,
}

/// The TAGE predictor.
pub struct TagePredictor {
    gh: GlobalHistory,
    ch_i: Vec<FoldedHistory>,
    ch_t0: Vec<FoldedHistory>,
    ch_t1: Vec<FoldedHistory>,
    m: [usize; NHIST + 1],
    /// 2-bit bimodal counters in `[-2, 1]`; >= 0 predicts taken.
    bimodal: Vec<i8>,
    /// Tagged banks; index 0 is unused (the bimodal base stands in for it).
    tables: Vec<Vec<TEntry>>,
    use_alt_on_na: i8,
    tick: i32,
    rng: TableRng,

    // Per-lookup state, computed at prediction and reused at update.
    gi: [usize; NHIST + 1],
    gtag: [u32; NHIST + 1],
    hit_bank: i32,
    alt_bank: i32,
    pred_taken: bool,
    alt_pred: bool,
    longest_match_pred: bool,
}

impl Default for TagePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl TagePredictor {
    /// Builds the predictor with geometric history lengths.
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
            bimodal: vec![0; 1 << LOGB],
            tables: vec![vec![TEntry::default(); 1 << LOGG]; NHIST + 1],
            use_alt_on_na: 0,
            tick: 0,
            rng: TableRng::new(),
            gi: [0; NHIST + 1],
            gtag: [0; NHIST + 1],
            hit_bank: 0,
            alt_bank: 0,
            pred_taken: false,
            alt_pred: false,
            longest_match_pred: false,
        }
    }

    fn gindex(&self, pc: u64, bank: usize) -> usize {
        let pc = pc as u32;
        let hist_len = self.m[bank].min(PHISTWIDTH);
        let index = pc
            ^ (pc >> ((LOGG as i32 - bank as i32).unsigned_abs() + 1))
            ^ self.ch_i[bank].comp()
            ^ (path_mix(self.gh.phist, hist_len, bank, LOGG) as u32);
        (index as usize) & ((1 << LOGG) - 1)
    }

    fn gtag_of(&self, pc: u64, bank: usize) -> u32 {
        let tag = (pc as u32) ^ self.ch_t0[bank].comp() ^ (self.ch_t1[bank].comp() << 1);
        tag & ((1 << TBITS) - 1)
    }

    #[inline]
    fn bimodal_index(pc: u64) -> usize {
        ((pc >> 2) as usize) & ((1 << LOGB) - 1)
    }

    /// True when a counter sits at one of its two weakest values, i.e. the
    /// entry behaves like a fresh allocation.
    #[inline]
    fn weak(ctr: i8) -> bool {
        (2 * i32::from(ctr) + 1).unsigned_abs() == 1
    }

    /// Predicts the direction of the conditional branch at `pc`.
    ///
    /// Leaves the per-bank indices, tags, and the hit/alternate banks in
    /// place for the matching [`Self::update`] call.
    pub fn get_prediction(&mut self, pc: u64) -> bool {
        self.hit_bank = 0;
        self.alt_bank = 0;
        for i in 1..=NHIST {
            self.gi[i] = self.gindex(pc, i);
            self.gtag[i] = self.gtag_of(pc, i);
        }

        for i in (1..=NHIST).rev() {
            if self.tables[i][self.gi[i]].tag == self.gtag[i] {
                if self.hit_bank == 0 {
                    self.hit_bank = i as i32;
                } else {
                    self.alt_bank = i as i32;
                    break;
                }
            }
        }

        let bimodal_taken = self.bimodal[Self::bimodal_index(pc)] >= 0;
        self.alt_pred = if self.alt_bank > 0 {
            self.tables[self.alt_bank as usize][self.gi[self.alt_bank as usize]].ctr >= 0
        } else {
            bimodal_taken
        };

        if self.hit_bank > 0 {
            let hit = self.tables[self.hit_bank as usize][self.gi[self.hit_bank as usize]];
            self.longest_match_pred = hit.ctr >= 0;
            self.pred_taken = if Self::weak(hit.ctr) && self.use_alt_on_na >= 0 {
                self.alt_pred
            } else {
                self.longest_match_pred
            };
        } else {
            self.longest_match_pred = bimodal_taken;
            self.pred_taken = bimodal_taken;
        }

        self.pred_taken
    }

    /// Trains on the resolved direction of the branch just predicted.
    pub fn update(&mut self, pc: u64, taken: bool, target: u64) {
        let mut alloc = (self.pred_taken != taken) && (self.hit_bank < NHIST as i32);

        if self.hit_bank > 0 {
            let hit = self.tables[self.hit_bank as usize][self.gi[self.hit_bank as usize]];
            if Self::weak(hit.ctr) {
                if self.longest_match_pred == taken {
                    alloc = false;
                }
                if self.longest_match_pred != self.alt_pred {
                    ctr_update(&mut self.use_alt_on_na, self.alt_pred == taken, ALTWIDTH);
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
            let mut i = ((self.hit_bank + a) as usize).max(1);
            while i <= NHIST {
                let entry = &mut self.tables[i][self.gi[i]];
                if entry.u == 0 {
                    entry.tag = self.gtag[i];
                    entry.ctr = if taken { 0 } else { -1 };
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

        if self.hit_bank > 0 {
            let hit_idx = self.gi[self.hit_bank as usize];
            let hit_ctr = self.tables[self.hit_bank as usize][hit_idx].ctr;

            // Weak wrong provider: also strengthen whichever structure the
            // alternate prediction came from.
            if Self::weak(hit_ctr) && self.longest_match_pred != taken {
                if self.alt_bank > 0 {
                    let alt =
                        &mut self.tables[self.alt_bank as usize][self.gi[self.alt_bank as usize]];
                    ctr_update(&mut alt.ctr, taken, CWIDTH);
                } else {
                    Self::bimodal_update(&mut self.bimodal[Self::bimodal_index(pc)], taken);
                }
            }

            let hit = &mut self.tables[self.hit_bank as usize][hit_idx];
            ctr_update(&mut hit.ctr, taken, CWIDTH);

            if self.longest_match_pred != self.alt_pred && self.longest_match_pred == taken {
                let hit = &mut self.tables[self.hit_bank as usize][hit_idx];
                if hit.u < ((1i8 << UWIDTH) - 1) {
                    hit.u += 1;
                }
            }
        } else {
            Self::bimodal_update(&mut self.bimodal[Self::bimodal_index(pc)], taken);
        }

        self.update_history(pc, 0, taken, target);
    }

    /// 2-bit bimodal counter in `[-2, 1]`.
    fn bimodal_update(ctr: &mut i8, taken: bool) {
        if taken {
            if *ctr < 1 {
                *ctr += 1;
            }
        } else if *ctr > -2 {
            *ctr -= 1;
        }
    }

    /// History-only update for non-conditional control transfers.
    ///
    /// `brtype` 0 inserts the single direction bit of a conditional branch;
    /// anything else inserts three bits mixing PC and target, matching the
    /// indirect predictor's insertion rate.
    pub fn track_other_inst(&mut self, pc: u64, brtype: u8, taken: bool, target: u64) {
        self.update_history(pc, brtype, taken, target);
    }

    fn update_history(&mut self, pc: u64, brtype: u8, taken: bool, target: u64) {
        let (maxt, t, path) = if brtype == 0 {
            (
                1,
                ((pc ^ (pc >> 2)) as i32) ^ i32::from(taken),
                (pc ^ (pc >> 2) ^ (pc >> 4)) as i64,
            )
        } else {
            (
                3,
                ((pc ^ (pc >> 2)) as i32) ^ ((target >> 2) as i32),
                (pc ^ (pc >> 2) ^ (pc >> 4) ^ (target >> 2) ^ (target >> 4)) as i64,
            )
        };
        insert_history(
            &mut self.gh,
            t,
            path,
            maxt,
            PHISTWIDTH,
            &mut self.ch_i,
            &mut self.ch_t0,
            &mut self.ch_t1,
        );
    }
}
