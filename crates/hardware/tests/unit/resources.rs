//! Resource-schedule tests: bounded search, the try/schedule round-trip
//! law, and base-cycle recycling.

use proptest::prelude::*;
use rstest::rstest;
use std::collections::HashMap;

use vpsim_core::common::MAX_CYCLE;
use vpsim_core::core::resources::ResourceSchedule;

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
fn test_width_bounds_issues_per_cycle(#[case] width: u64) {
    let mut rs = ResourceSchedule::new(width);
    for _ in 0..width {
        assert_eq!(rs.schedule(3, MAX_CYCLE), 3);
    }
    assert_eq!(rs.schedule(3, MAX_CYCLE), 4);
}

#[test]
fn test_schedule_fills_width_then_spills() {
    let mut rs = ResourceSchedule::new(2);
    assert_eq!(rs.schedule(5, MAX_CYCLE), 5);
    assert_eq!(rs.schedule(5, MAX_CYCLE), 5);
    assert_eq!(rs.schedule(5, MAX_CYCLE), 6);
    assert_eq!(rs.count_at(5), 2);
    assert_eq!(rs.count_at(6), 1);
}

#[test]
fn test_schedule_returns_earliest_feasible() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 0);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 1);
    // Cycle 3 is still free even though 0 and 1 are taken.
    assert_eq!(rs.schedule(3, MAX_CYCLE), 3);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 2);
}

#[test]
fn test_bounded_search_returns_sentinel() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 0);
    assert_eq!(rs.schedule(0, 0), MAX_CYCLE);
    // The failed attempt bound nothing.
    assert_eq!(rs.count_at(0), 1);
    assert_eq!(rs.count_at(1), 0);
}

#[test]
fn test_try_schedule_does_not_mutate() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(4, MAX_CYCLE), 4);
    assert_eq!(rs.try_schedule(4), 5);
    assert_eq!(rs.try_schedule(4), 5);
    assert_eq!(rs.count_at(5), 0);
    assert_eq!(rs.schedule(4, MAX_CYCLE), 5);
}

#[test]
fn test_advance_base_cycle_recycles_slots() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 0);
    assert_eq!(rs.schedule(1, MAX_CYCLE), 1);
    rs.advance_base_cycle(2);
    assert_eq!(rs.count_at(2), 0);
    assert_eq!(rs.schedule(2, MAX_CYCLE), 2);
}

#[test]
fn test_advance_past_whole_depth() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 0);
    rs.advance_base_cycle(10_000);
    assert_eq!(rs.schedule(10_000, MAX_CYCLE), 10_000);
}

#[test]
fn test_growth_preserves_pending_counts() {
    let mut rs = ResourceSchedule::new(1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 0);
    // Force a resize far beyond the initial depth.
    assert_eq!(rs.schedule(1000, MAX_CYCLE), 1000);
    assert_eq!(rs.count_at(0), 1);
    assert_eq!(rs.count_at(1000), 1);
    assert_eq!(rs.schedule(0, MAX_CYCLE), 1);
}

proptest! {
    /// Round-trip law: after any schedule sequence, the count at each cycle
    /// equals the number of successful schedules that landed there.
    #[test]
    fn prop_counts_match_successful_schedules(
        width in 1u64..4,
        starts in proptest::collection::vec(0u64..64, 1..80),
    ) {
        let mut rs = ResourceSchedule::new(width);
        let mut model: HashMap<u64, u64> = HashMap::new();
        for start in starts {
            let cycle = rs.schedule(start, MAX_CYCLE);
            prop_assert!(cycle >= start);
            *model.entry(cycle).or_insert(0) += 1;
        }
        for (&cycle, &count) in &model {
            prop_assert!(count <= width);
            prop_assert_eq!(rs.count_at(cycle), count);
        }
    }
}
