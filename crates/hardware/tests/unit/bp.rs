//! Branch-prediction tests: façade routing and counters, TAGE direction
//! learning, ITTAGE target learning, and the RAS.
//!
//! Returns are lumped in with indirect jumps (return inference is disabled),
//! so the return row of the report stays zero; the RAS itself is exercised
//! directly here.

use vpsim_core::bp::{BranchUnit, Ras};
use vpsim_core::common::InstClass;
use vpsim_core::config::BranchConfig;

const PC: u64 = 0x40_0000;
const TARGET: u64 = 0x41_0000;

fn unit() -> BranchUnit {
    BranchUnit::new(&BranchConfig::default())
}

#[test]
fn test_always_taken_branch_never_mispredicts() {
    let mut bp = unit();
    for _ in 0..200 {
        bp.predict(InstClass::CondBranch, PC, TARGET);
    }
    assert_eq!(bp.cond_branches(), 200);
    assert_eq!(bp.cond_mispredicts(), 0);
}

#[test]
fn test_always_not_taken_branch_converges() {
    let mut bp = unit();
    for _ in 0..200 {
        bp.predict(InstClass::CondBranch, PC, PC + 4);
    }
    // The fresh bimodal counter starts weakly taken, so the first outcome
    // mispredicts; after that the counters pin not-taken.
    assert!(bp.cond_mispredicts() >= 1);
    assert!(bp.cond_mispredicts() <= 4);
}

#[test]
fn test_alternating_branch_is_learned_from_history() {
    let mut bp = unit();
    for i in 0..800u64 {
        let taken = i % 2 == 0;
        let next = if taken { TARGET } else { PC + 4 };
        bp.predict(InstClass::CondBranch, PC, next);
    }
    let warmup = bp.cond_mispredicts();
    for i in 800..1000u64 {
        let taken = i % 2 == 0;
        let next = if taken { TARGET } else { PC + 4 };
        bp.predict(InstClass::CondBranch, PC, next);
    }
    // Once the tagged banks capture the alternation, the tail is nearly
    // misprediction-free.
    assert!(bp.cond_mispredicts() - warmup < 40);
}

#[test]
fn test_direct_jumps_never_mispredict() {
    let mut bp = unit();
    for _ in 0..50 {
        assert!(!bp.predict(InstClass::UncondDirect, PC, TARGET));
    }
    assert_eq!(bp.cond_mispredicts(), 0);
}

#[test]
fn test_constant_indirect_target_is_learned() {
    let mut bp = unit();
    for _ in 0..100 {
        bp.predict(InstClass::UncondIndirect, PC, TARGET);
    }
    // Early encounters churn while the path history settles; after that
    // the target table is stable.
    assert!(bp.indirect_mispredicts() >= 1);
    assert!(bp.indirect_mispredicts() <= 12);
}

#[test]
fn test_perfect_indirect_suppresses_mispredictions() {
    let cfg = BranchConfig {
        perfect_indirect: true,
        ..BranchConfig::default()
    };
    let mut bp = BranchUnit::new(&cfg);
    for i in 0..50u64 {
        // Even a changing target never counts as mispredicted.
        assert!(!bp.predict(InstClass::UncondIndirect, PC, TARGET + i * 8));
    }
    assert_eq!(bp.indirect_mispredicts(), 0);
}

#[test]
fn test_non_control_with_discontinuous_next_pc() {
    let mut bp = unit();
    assert!(!bp.predict(InstClass::Alu, PC, PC + 4));
    // A non-control instruction with a redirected next PC costs a fetch
    // redirect, reported as a misprediction.
    assert!(bp.predict(InstClass::Alu, PC, PC + 64));
}

#[test]
fn test_ras_is_lifo() {
    let mut ras = Ras::new(8);
    ras.push(0x100);
    ras.push(0x200);
    ras.push(0x300);
    assert_eq!(ras.pop(), 0x300);
    assert_eq!(ras.pop(), 0x200);
    assert_eq!(ras.pop(), 0x100);
}

#[test]
fn test_ras_wraps_over_oldest() {
    let mut ras = Ras::new(2);
    ras.push(1);
    ras.push(2);
    ras.push(3);
    assert_eq!(ras.pop(), 3);
    assert_eq!(ras.pop(), 2);
    // The oldest entry was overwritten by the wrap.
    assert_eq!(ras.pop(), 3);
}
