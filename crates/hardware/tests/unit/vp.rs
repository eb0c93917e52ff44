//! Value-predictor tests: stride learning with in-order retires, VTAGE
//! constant-value learning, post-misprediction suppression, and
//! determinism.

use vpsim_core::common::{
    HitMissInfo, InstClass, MemData, PredictionRequest, PredictionResult, NO_OPERAND,
};
use vpsim_core::{ValuePredictor, VtageEstride};

/// Drives one instruction through predict, speculative update, and an
/// immediate in-order retire.
fn step_inst(
    p: &mut VtageEstride,
    seq_no: u64,
    pc: u64,
    insn: InstClass,
    value: u64,
    latency: u64,
) -> PredictionResult {
    let req = PredictionRequest {
        seq_no,
        pc,
        piece: 0,
        is_candidate: true,
        cache_hit: HitMissInfo::Invalid,
    };
    let result = p.get_prediction(&req);
    let prediction_result = if result.speculate {
        u8::from(result.predicted_value == value)
    } else {
        2
    };
    p.speculative_update(
        seq_no,
        true,
        prediction_result,
        pc,
        pc + 4,
        insn,
        8,
        false,
        0,
        1,
        NO_OPERAND,
        NO_OPERAND,
        3,
    );
    p.update_predictor(seq_no, 0, value, &MemData::default(), latency);
    result
}

#[test]
fn test_stride_sequence_is_learned() {
    let mut p = VtageEstride::new(0);
    let pc = 0x1234_5678;
    let mut incorrect = 0;
    let mut correct_tail = 0;
    for k in 0..40u64 {
        let value = 0x7000 + 8 * k;
        let result = step_inst(&mut p, k, pc, InstClass::Load, value, 200);
        if result.speculate {
            if result.predicted_value == value {
                if k >= 10 {
                    correct_tail += 1;
                }
            } else {
                incorrect += 1;
            }
        }
    }
    // Long-latency loads allocate and gain confidence unconditionally, so
    // the stride locks in quickly and stays correct.
    assert_eq!(incorrect, 0);
    assert_eq!(correct_tail, 30);
}

#[test]
fn test_inflight_occurrences_scale_the_stride() {
    let mut p = VtageEstride::new(0);
    let pc = 0x4000;
    // Warm the stride entry with in-order retires.
    for k in 0..20u64 {
        step_inst(&mut p, k, pc, InstClass::Load, 0x100 + 8 * k, 200);
    }
    // Two instances of the same PC now in flight (no retire between them):
    // the second must project one stride further than the first.
    let req = |seq_no| PredictionRequest {
        seq_no,
        pc,
        piece: 0,
        is_candidate: true,
        cache_hit: HitMissInfo::Invalid,
    };
    let first = p.get_prediction(&req(20));
    p.speculative_update(
        20,
        true,
        1,
        pc,
        pc + 4,
        InstClass::Load,
        8,
        false,
        0,
        1,
        NO_OPERAND,
        NO_OPERAND,
        3,
    );
    let second = p.get_prediction(&req(21));
    assert!(first.speculate && second.speculate);
    assert_eq!(second.predicted_value, first.predicted_value + 8);
}

#[test]
fn test_constant_value_is_learned_by_vtage() {
    let mut p = VtageEstride::new(0);
    let pc = 0xBEEF_0000;
    let mut got_correct = false;
    let mut got_incorrect = false;
    for k in 0..2000u64 {
        let result = step_inst(&mut p, k, pc, InstClass::Load, 42, 200);
        if result.speculate {
            if result.predicted_value == 42 {
                got_correct = true;
            } else {
                got_incorrect = true;
            }
        }
    }
    // Constant data defeats the stride component (zero strides are
    // rejected); only VTAGE can pick this up.
    assert!(got_correct);
    assert!(!got_incorrect);
}

#[test]
fn test_vtage_mispredictions_suppress_prediction() {
    let mut p = VtageEstride::new(0);
    let pc = 0xBEEF_0000;
    let mut seq = 0u64;
    // Train to the point of speculation.
    let mut speculated = false;
    for _ in 0..3000 {
        let result = step_inst(&mut p, seq, pc, InstClass::Load, 42, 200);
        seq += 1;
        if result.speculate {
            speculated = true;
            break;
        }
    }
    assert!(speculated);

    // The value changes: the pending confident prediction mispredicts.
    let result = step_inst(&mut p, seq, pc, InstClass::Load, 43, 200);
    seq += 1;
    assert!(result.speculate);
    assert_ne!(result.predicted_value, 43);

    // For the next 100 instructions the predictor stays silent.
    for _ in 0..100 {
        let result = step_inst(&mut p, seq, pc, InstClass::Load, 43, 200);
        seq += 1;
        assert!(!result.speculate);
    }
}

#[test]
fn test_identical_runs_are_bit_identical() {
    let mut a = VtageEstride::new(0);
    let mut b = VtageEstride::new(0);
    let mut outcomes_a = Vec::new();
    let mut outcomes_b = Vec::new();
    for k in 0..1000u64 {
        let pc = 0x1000 + (k % 7) * 4;
        let insn = if k % 3 == 0 {
            InstClass::Load
        } else {
            InstClass::Alu
        };
        let value = (k * 7) ^ (k >> 2);
        let latency = [1, 13, 200][(k % 3) as usize];
        let ra = step_inst(&mut a, k, pc, insn, value, latency);
        let rb = step_inst(&mut b, k, pc, insn, value, latency);
        outcomes_a.push((ra.speculate, ra.predicted_value));
        outcomes_b.push((rb.speculate, rb.predicted_value));
    }
    assert_eq!(outcomes_a, outcomes_b);
}
