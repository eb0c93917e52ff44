//! Stride-prefetcher tests: FSM training, generation, dedup, timeliness,
//! and put-back.

use vpsim_core::core::prefetch::StridePrefetcher;

const PC: u64 = 0x400100;

/// Two confirming strides put an entry in steady state.
fn train_to_steady(pf: &mut StridePrefetcher, base: u64, stride: u64) {
    pf.train(PC, base);
    pf.train(PC, base + stride);
    pf.train(PC, base + 2 * stride);
}

#[test]
fn test_steady_state_generates_two_strides_ahead() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 0x100);
    pf.lookahead(PC, 5);
    let issued = pf.issue(5).unwrap();
    assert_eq!(issued.address, 0x1200 + 2 * 0x100);
    assert_eq!(issued.gen_cycle, 5);
}

#[test]
fn test_untrained_pc_generates_nothing() {
    let mut pf = StridePrefetcher::new();
    pf.train(PC, 0x1000);
    pf.train(PC, 0x1100);
    // Transient only: one confirmation is not enough.
    pf.lookahead(PC, 0);
    assert!(pf.issue(0).is_none());
}

#[test]
fn test_zero_stride_never_generates() {
    let mut pf = StridePrefetcher::new();
    pf.train(PC, 0x1000);
    pf.train(PC, 0x1000);
    pf.train(PC, 0x1000);
    pf.lookahead(PC, 0);
    assert!(pf.issue(0).is_none());
    assert_eq!(pf.stats().stride_zero, 1);
}

#[test]
fn test_stride_break_leaves_steady_state() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 0x100);
    // One break falls back to Initial (stride kept), so no generation.
    pf.train(PC, 0x9000);
    pf.lookahead(PC, 0);
    assert!(pf.issue(0).is_none());
}

#[test]
fn test_queue_dedups_by_cache_line() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 8);
    pf.lookahead(PC, 0);
    // The next access moves cur_addr by one stride; the new candidate
    // shares the 64-byte line already queued.
    pf.train(PC, 0x1018);
    pf.lookahead(PC, 0);
    assert_eq!(pf.stats().generated, 1);
    assert_eq!(pf.stats().duplicate_filtered, 1);
}

#[test]
fn test_untimely_prefetches_are_dropped() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 0x100);
    pf.lookahead(PC, 5);
    // 5 + 8 < 20: too stale to be useful.
    assert!(pf.issue(20).is_none());
    assert_eq!(pf.stats().dropped_untimely, 1);
}

#[test]
fn test_put_back_restores_head() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 0x100);
    pf.lookahead(PC, 5);
    let issued = pf.issue(5).unwrap();
    assert_eq!(pf.oldest_pf_cycle(), u64::MAX);
    pf.put_back(issued);
    assert_eq!(pf.oldest_pf_cycle(), 5);
    assert_eq!(pf.issue(5).unwrap().address, issued.address);
    assert_eq!(pf.stats().put_back, 1);
}

#[test]
fn test_training_counters() {
    let mut pf = StridePrefetcher::new();
    train_to_steady(&mut pf, 0x1000, 0x100);
    assert_eq!(pf.stats().trainings, 3);
}
