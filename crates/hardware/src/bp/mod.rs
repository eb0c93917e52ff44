//! Branch prediction.
//!
//! Three structures behind one façade:
//! 1. **TAGE** — conditional direction predictor (bimodal base plus tagged
//!    geometric-history banks).
//! 2. **ITTAGE** — indirect target predictor (same machinery, 64-bit
//!    targets).
//! 3. **RAS** — return-address stack. Return inference is disabled, so the
//!    façade lumps returns in with indirect jumps and the RAS is not
//!    consulted; the structure is kept for configurations that re-enable it.
//!
//! The façade routes each instruction to the right predictor, keeps all
//! per-type misprediction counters, and reports them as an `n/m/mr/mpki`
//! table.

/// Folded-history registers and global history state shared by the tagged
/// predictors.
mod history;
/// ITTAGE indirect target predictor.
mod ittage;
/// Return-address stack.
mod ras;
/// TAGE conditional direction predictor.
mod tage;

pub use ittage::IttagePredictor;
pub use ras::Ras;
pub use tage::TagePredictor;

use crate::common::InstClass;
use crate::config::BranchConfig;

/// The branch-prediction façade.
pub struct BranchUnit {
    tage: TagePredictor,
    ittage: IttagePredictor,
    /// Kept but not consulted: return inference is disabled, so returns are
    /// predicted by ITTAGE like any other indirect jump.
    #[allow(dead_code)]
    ras: Ras,
    perfect_indirect: bool,

    meas_branch_n: u64,
    meas_branch_m: u64,
    meas_jumpdir_n: u64,
    meas_jumpind_n: u64,
    meas_jumpind_m: u64,
    meas_jumpret_n: u64,
    meas_jumpret_m: u64,
    meas_notctrl_n: u64,
    meas_notctrl_m: u64,
}

impl BranchUnit {
    /// Builds the façade and both predictors.
    pub fn new(cfg: &BranchConfig) -> Self {
        Self {
            tage: TagePredictor::new(),
            ittage: IttagePredictor::new(),
            ras: Ras::new(cfg.ras_size),
            perfect_indirect: cfg.perfect_indirect,
            meas_branch_n: 0,
            meas_branch_m: 0,
            meas_jumpdir_n: 0,
            meas_jumpind_n: 0,
            meas_jumpind_m: 0,
            meas_jumpret_n: 0,
            meas_jumpret_m: 0,
            meas_notctrl_n: 0,
            meas_notctrl_m: 0,
        }
    }

    /// Predicts and updates for one instruction; returns true iff it was a
    /// mispredicted branch.
    pub fn predict(&mut self, insn: InstClass, pc: u64, next_pc: u64) -> bool {
        match insn {
            InstClass::CondBranch => {
                let taken = next_pc != pc + 4;
                let pred_taken = self.tage.get_prediction(pc);
                let misp = pred_taken != taken;
                self.tage.update(pc, taken, next_pc);
                self.meas_branch_n += 1;
                self.meas_branch_m += u64::from(misp);
                misp
            }
            InstClass::UncondDirect => {
                // The target of a direct jump is available at fetch (BTB hit)
                // or pre-decode, so these are never mispredicted. Both
                // predictors still see the transfer in their histories.
                self.tage.track_other_inst(pc, 2, true, next_pc);
                self.ittage.track_other_inst(pc, next_pc);
                self.meas_jumpdir_n += 1;
                false
            }
            InstClass::UncondIndirect => {
                let misp = if self.perfect_indirect {
                    self.meas_jumpind_n += 1;
                    false
                } else {
                    let pred_target = self.ittage.get_prediction(pc);
                    let misp = pred_target != next_pc;
                    self.ittage.update(pc, next_pc);
                    self.meas_jumpind_n += 1;
                    self.meas_jumpind_m += u64::from(misp);
                    misp
                };
                self.tage.track_other_inst(pc, 2, true, next_pc);
                misp
            }
            _ => {
                // Not a control transfer; a discontinuous next PC still costs
                // a fetch redirect.
                let misp = next_pc != pc + 4;
                self.meas_notctrl_n += 1;
                self.meas_notctrl_m += u64::from(misp);
                misp
            }
        }
    }

    /// Conditional-branch mispredictions so far.
    pub fn cond_mispredicts(&self) -> u64 {
        self.meas_branch_m
    }

    /// Indirect-jump mispredictions so far.
    pub fn indirect_mispredicts(&self) -> u64 {
        self.meas_jumpind_m
    }

    /// Conditional branches seen so far.
    pub fn cond_branches(&self) -> u64 {
        self.meas_branch_n
    }

    /// Prints the per-type misprediction table.
    pub fn print_report(&self) {
        let num_inst = self.meas_branch_n
            + self.meas_jumpdir_n
            + self.meas_jumpind_n
            + self.meas_jumpret_n
            + self.meas_notctrl_n;
        let num_misp =
            self.meas_branch_m + self.meas_jumpind_m + self.meas_jumpret_m + self.meas_notctrl_m;

        let row = |name: &str, n: u64, m: u64| {
            let mr = if n > 0 {
                100.0 * (m as f64) / (n as f64)
            } else {
                0.0
            };
            let mpki = if num_inst > 0 {
                1000.0 * (m as f64) / (num_inst as f64)
            } else {
                0.0
            };
            println!("{name}{n:>10} {m:>10} {mr:>5.2}% {mpki:>5.2}");
        };

        println!("BRANCH PREDICTION MEASUREMENTS---------------------");
        println!("Type                      n          m     mr  mpki");
        row("All              ", num_inst, num_misp);
        row("Branch           ", self.meas_branch_n, self.meas_branch_m);
        row("Jump: Direct     ", self.meas_jumpdir_n, 0);
        row("Jump: Indirect   ", self.meas_jumpind_n, self.meas_jumpind_m);
        row("Jump: Return     ", self.meas_jumpret_n, self.meas_jumpret_m);
        row("Not control      ", self.meas_notctrl_n, self.meas_notctrl_m);
    }
}
