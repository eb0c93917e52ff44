//! Trace decoding and cracking tests: record formats, piece expansion,
//! flag synthesis, base-update inference, and error reporting.

use vpsim_core::common::{InstClass, SimError, NO_OPERAND};
use vpsim_core::trace::{MicroOp, TraceReader};

use crate::common::TraceBuilder;

fn read_all(builder: &TraceBuilder) -> (Vec<MicroOp>, u64, u64) {
    let file = builder.finish();
    let mut reader = TraceReader::open(file.path()).unwrap();
    let mut pieces = Vec::new();
    while let Some(op) = reader.next_piece().unwrap() {
        pieces.push(op.clone());
    }
    (pieces, reader.records_read(), reader.pieces_emitted())
}

#[test]
fn test_plain_alu_record() {
    let mut b = TraceBuilder::new();
    b.alu(0x1000, &[1, 2], &[(5, 77)]);
    let (pieces, records, emitted) = read_all(&b);
    assert_eq!(records, 1);
    assert_eq!(emitted, 1);

    let op = &pieces[0];
    assert_eq!(op.class, InstClass::Alu);
    assert_eq!(op.pc, 0x1000);
    assert_eq!(op.next_pc, 0x1004);
    assert!(op.a.valid && op.a.log_reg == 1);
    assert!(op.b.valid && op.b.log_reg == 2);
    assert!(!op.c.valid);
    assert!(op.d.valid && op.d.log_reg == 5 && op.d.value == 77);
    assert!(!op.is_load && !op.is_store && !op.is_base_update);
}

#[test]
fn test_zero_output_alu_produces_flags() {
    let mut b = TraceBuilder::new();
    b.alu(0x1000, &[1, 2], &[]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 1);
    assert!(pieces[0].d.valid);
    assert_eq!(pieces[0].d.log_reg, 64);
    assert_eq!(pieces[0].d.value, NO_OPERAND);
    assert!(pieces[0].d.is_int);
}

#[test]
fn test_zero_input_branch_reads_flags() {
    let mut b = TraceBuilder::new();
    b.cond_branch(0x2000, true, 0x3000, &[]);
    b.cond_branch(0x2004, false, 0, &[]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].next_pc, 0x3000);
    assert!(pieces[0].a.valid && pieces[0].a.log_reg == 64);
    assert_eq!(pieces[1].next_pc, 0x2008);
}

#[test]
fn test_simd_output_cracks_into_two_lanes() {
    let mut b = TraceBuilder::new();
    b.alu_simd(0x1000, &[33], 40, 0x1111, 0x2222);
    let (pieces, records, emitted) = read_all(&b);
    assert_eq!(records, 1);
    assert_eq!(emitted, 2);
    assert_eq!(pieces[0].pc, pieces[1].pc);
    assert!(!pieces[0].d.is_int);
    assert_eq!(pieces[0].d.log_reg, 40);
    assert_eq!(pieces[0].d.value, 0x1111);
    assert_eq!(pieces[1].d.log_reg, 40);
    assert_eq!(pieces[1].d.value, 0x2222);
}

#[test]
fn test_plain_load() {
    let mut b = TraceBuilder::new();
    b.load(0x1000, 0x8000, 8, &[3], &[(7, 0xAAAA_BBBB)]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 1);
    let op = &pieces[0];
    assert!(op.is_load && !op.is_store && !op.is_base_update);
    assert_eq!(op.addr, 0x8000);
    assert_eq!(op.size, 8);
    assert_eq!(op.mem_size, 8);
}

#[test]
fn test_load_with_base_update() {
    let mut b = TraceBuilder::new();
    // Second output holds the post-incremented address: a writeback form,
    // not a load pair.
    b.load(0x1000, 0x8000, 8, &[3], &[(7, 0xAAAA_BBBB), (3, 0x8008)]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 2);

    let data = &pieces[0];
    assert!(data.is_load && !data.is_base_update);
    assert_eq!(data.addr, 0x8000);
    // The base-update output does not widen the access.
    assert_eq!(data.size, 8);
    assert_eq!(data.mem_size, 8);

    let base = &pieces[1];
    assert!(base.is_base_update);
    assert!(!base.is_load && !base.is_store);
    assert_eq!(base.d.log_reg, 3);
    assert_eq!(base.d.value, 0x8008);
    assert_eq!(base.size, 0);
}

#[test]
fn test_load_pair_splits_the_access() {
    let mut b = TraceBuilder::new();
    // Both outputs are data (values unrelated to the address).
    b.load(0x1000, 0x8000, 8, &[3], &[(7, 0xAAAA_0001), (8, 0xAAAA_0002)]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 2);
    assert!(pieces.iter().all(|p| p.is_load && !p.is_base_update));
    assert_eq!(pieces[0].addr, 0x8000);
    assert_eq!(pieces[0].size, 8);
    assert_eq!(pieces[1].addr, 0x8008);
    assert_eq!(pieces[1].size, 8);
    assert_eq!(pieces[0].mem_size, 16);
}

#[test]
fn test_base_update_offset_is_learned_per_pc() {
    let mut b = TraceBuilder::new();
    b.load(0x1000, 0x8000, 8, &[3], &[(7, 0xAAAA_BBBB), (3, 0x8008)]);
    // Same PC later: the cached displacement identifies the base output
    // even though a fresh scan could not tell which output is which.
    b.load(0x1000, 0x9000, 8, &[3], &[(7, 0xAAAA_CCCC), (3, 0x9008)]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 4);
    assert!(pieces[3].is_base_update);
    assert_eq!(pieces[3].d.value, 0x9008);
}

#[test]
fn test_single_lane_vector_load_drops_high_lane() {
    let mut b = TraceBuilder::new();
    b.load_simd(0x1000, 0x8000, 8, 40, 0x1111, 0);
    let (pieces, records, emitted) = read_all(&b);
    assert_eq!(records, 1);
    assert_eq!(emitted, 1);
    assert!(pieces[0].is_load);
    assert_eq!(pieces[0].d.value, 0x1111);
    assert_eq!(pieces[0].size, 8);
}

#[test]
fn test_full_vector_load_keeps_both_lanes() {
    let mut b = TraceBuilder::new();
    b.load_simd(0x1000, 0x8000, 16, 40, 0x1111, 0x2222);
    let (pieces, _, emitted) = read_all(&b);
    assert_eq!(emitted, 2);
    assert_eq!(pieces[0].addr, 0x8000);
    assert_eq!(pieces[1].addr, 0x8008);
    assert!(pieces.iter().all(|p| p.is_load && p.size == 8));
}

#[test]
fn test_plain_store() {
    let mut b = TraceBuilder::new();
    b.store(0x1000, 0x8000, 8, &[2, 5], &[]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 1);
    assert!(pieces[0].is_store);
    assert!(!pieces[0].d.valid);
    assert_eq!(pieces[0].size, 8);
}

#[test]
fn test_writeback_store_keeps_its_memory_piece() {
    let mut b = TraceBuilder::new();
    b.store(0x1000, 0x8000, 8, &[2, 5], &[(5, 0x8008)]);
    let (pieces, _, _) = read_all(&b);
    assert_eq!(pieces.len(), 2);
    assert!(pieces[0].is_store && !pieces[0].is_base_update);
    assert_eq!(pieces[0].size, 8);
    assert!(pieces[1].is_base_update && !pieces[1].is_store);
    assert_eq!(pieces[1].d.log_reg, 5);
}

#[test]
fn test_truncated_record_reports_offset() {
    let mut b = TraceBuilder::new();
    b.raw(&0x4000u64.to_le_bytes());
    let file = b.finish();
    let mut reader = TraceReader::open(file.path()).unwrap();
    match reader.next_piece() {
        Err(SimError::TraceFormat { .. }) => {}
        other => panic!("expected a trace-format error, got {other:?}"),
    }
}

#[test]
fn test_undefined_class_rejected() {
    let mut b = TraceBuilder::new();
    b.raw(&0x4000u64.to_le_bytes());
    b.raw(&[9]);
    let file = b.finish();
    let mut reader = TraceReader::open(file.path()).unwrap();
    assert!(matches!(
        reader.next_piece(),
        Err(SimError::TraceFormat { .. })
    ));
}

#[test]
fn test_record_and_piece_counts() {
    let mut b = TraceBuilder::new();
    b.alu(0x1000, &[], &[(5, 1)]);
    b.alu_simd(0x1004, &[], 40, 2, 3);
    b.load(0x1008, 0x8000, 8, &[], &[(7, 4)]);
    b.store(0x100c, 0x8000, 8, &[7], &[]);
    let (pieces, records, emitted) = read_all(&b);
    assert_eq!(records, 4);
    assert_eq!(emitted, 5);
    assert_eq!(pieces.len(), 5);
}
