//! E-Stride: 3-way skewed stride predictor.
//!
//! Each entry tracks the last committed value and a stride learned on the
//! second occurrence of the instruction. Predictions project the stride
//! across every still-in-flight instance of the same PC. A global
//! `safe_stride` counter gates the whole component: any stride misprediction
//! costs 1024, and predictions stop until steady correct behavior earns the
//! credit back.

use crate::common::InstClass;

use super::{
    ForUpdate, LatencyBuckets, PredRng, LOGSTR, LOGSTRIDE, MAXCONFIDSTR, NBWAYSTR, TAGWIDTHSTR,
    WIDTHCONFIDSTR,
};

/// Marker stride stored when the observed stride is zero or out of range.
const INVALID_STRIDE: i64 = 0xffff;

/// One stride-table entry.
#[derive(Clone, Copy, Default)]
pub(crate) struct StrEntry {
    pub last_value: u64,
    pub stride: i64,
    pub conf: u8,
    pub tag: u32,
    /// Zero until the second occurrence; a new stride is learned while zero.
    pub not_first_occ: u16,
    pub u: u8,
}

/// The E-Stride component.
pub(crate) struct EStride {
    pub table: Vec<StrEntry>,
    /// Global gate; negative after a recent stride misprediction.
    pub safe_stride: i32,
}

/// Skewed index and tag per way.
fn ways_of(pc: u64) -> ([u32; NBWAYSTR], [u32; NBWAYSTR]) {
    let mut b = [0u32; NBWAYSTR];
    let mut tags = [0u32; NBWAYSTR];
    for i in 0..NBWAYSTR {
        b[i] = ((((pc
            ^ (pc >> (2 * LOGSTR - i))
            ^ (pc >> (LOGSTR - i))
            ^ (pc >> (3 * LOGSTR - i)))
            .wrapping_mul(NBWAYSTR as u64))
            .wrapping_add(i as u64)
            % (NBWAYSTR << LOGSTR) as u64)) as u32;
        let j = NBWAYSTR - i;
        tags[i] = (((pc >> (LOGSTR - j))
            ^ (pc >> (2 * LOGSTR - j))
            ^ (pc >> (3 * LOGSTR - j))
            ^ (pc >> (4 * LOGSTR - j)))
            & ((1u64 << TAGWIDTHSTR) - 1)) as u32;
    }
    (b, tags)
}

/// Confidence filter on a correct prediction. Larger strides are worth
/// more, so they pass more easily; trivial strides on loads barely pass.
fn update_conf(
    u: &ForUpdate,
    lat: LatencyBuckets,
    stride: i64,
    rng: &mut PredRng,
) -> bool {
    fn draw(u: &ForUpdate, lat: LatencyBuckets, rng: &mut PredRng) -> bool {
        let shift = lat.notllc
            + lat.notl2
            + lat.notl1
            + 2 * lat.mfast
            + 2 * u32::from(u.insttype != InstClass::Load);
        (!u.prediction_result || u.predstride)
            && (rng.next() & ((1u64 << shift) - 1)) == 0
    }
    fn mid(u: &ForUpdate, lat: LatencyBuckets, stride: i64, rng: &mut PredRng) -> bool {
        if stride >= 8 {
            draw(u, lat, rng) || draw(u, lat, rng)
        } else {
            draw(u, lat, rng)
        }
    }
    let passed = if stride >= 64 {
        mid(u, lat, stride, rng) || mid(u, lat, stride, rng)
    } else {
        mid(u, lat, stride, rng)
    };
    passed
        && (stride.abs() > 1
            || u.insttype != InstClass::Load
            || (stride == -1 && rng.next() & 1 == 0)
            || (stride == 1 && rng.next() & 3 == 0))
}

/// Allocation filter when the instruction misses the table.
fn allocate_or_not(u: &ForUpdate, lat: LatencyBuckets, rng: &mut PredRng) -> bool {
    match u.insttype {
        InstClass::Alu | InstClass::Store => (rng.next() & 63) == 0,
        InstClass::Fp | InstClass::SlowAlu => (rng.next() & 15) == 0,
        InstClass::Load => {
            let shift = lat.notllc + lat.notl2 + lat.notl1 + lat.mfast;
            (rng.next() & ((1u64 << shift) - 1)) == 0
        }
        _ => false,
    }
}

impl EStride {
    pub fn new() -> Self {
        Self {
            table: vec![StrEntry::default(); NBWAYSTR << LOGSTR],
            safe_stride: 0,
        }
    }

    /// Emits `last_value + (inflight + 1) * stride` on a confident hit while
    /// the global gate is open.
    pub fn predict(&self, u: &mut ForUpdate, inflight: u64, predicted_value: &mut u64) {
        let (b, tags) = ways_of(u.pc);
        u.b = b;
        u.tagstr = tags;

        let mut sthit = -1i32;
        for i in 0..NBWAYSTR {
            if self.table[b[i] as usize].tag == tags[i] {
                sthit = b[i] as i32;
                break;
            }
        }

        let mut predstride = false;
        if sthit >= 0 && self.safe_stride >= 0 {
            let entry = self.table[sthit as usize];
            if entry.conf >= MAXCONFIDSTR / 4 {
                *predicted_value = (entry.last_value as i64)
                    .wrapping_add(((inflight + 1) as i64).wrapping_mul(entry.stride))
                    as u64;
                predstride = true;
            }
        }
        u.predstride = predstride;
    }

    /// Retire-time training.
    pub fn update(
        &mut self,
        u: &ForUpdate,
        actual_value: u64,
        lat: LatencyBuckets,
        rng: &mut PredRng,
    ) {
        let mut sthit = -1i32;
        for i in 0..NBWAYSTR {
            if self.table[u.b[i] as usize].tag == u.tagstr[i] {
                sthit = u.b[i] as i32;
                break;
            }
        }

        if sthit >= 0 {
            let idx = sthit as usize;
            let last_value = self.table[idx].last_value;
            let next_value =
                (last_value as i64).wrapping_add(self.table[idx].stride) as u64;
            let diff = (actual_value as i64).wrapping_sub(last_value as i64);
            let spread = diff.wrapping_mul(2).wrapping_sub(1).unsigned_abs();
            let stride_to_alloc = if spread < (1 << LOGSTRIDE) { diff } else { 0 };

            self.table[idx].last_value = actual_value;

            if self.table[idx].not_first_occ > 0 {
                if next_value == actual_value {
                    if self.table[idx].conf < MAXCONFIDSTR
                        && update_conf(u, lat, stride_to_alloc, rng)
                    {
                        self.table[idx].conf += 1;
                    }
                    if self.table[idx].u < 3 && update_conf(u, lat, stride_to_alloc, rng) {
                        self.table[idx].u += 1;
                    }
                    if self.table[idx].conf >= MAXCONFIDSTR / 4 {
                        self.table[idx].u = 3;
                    }
                } else {
                    let entry = &mut self.table[idx];
                    let step = 1u8 << (WIDTHCONFIDSTR - 3);
                    if entry.conf > step {
                        entry.conf -= step;
                    } else {
                        entry.conf = 0;
                        entry.u = 0;
                    }
                    // Allow a new sequence with a different stride to start.
                    entry.not_first_occ = 0;
                }
            } else {
                let entry = &mut self.table[idx];
                if stride_to_alloc != 0 {
                    entry.stride = stride_to_alloc;
                } else {
                    // Constant data and out-of-range strides are not worth
                    // an entry.
                    entry.stride = INVALID_STRIDE;
                    entry.conf = 0;
                    entry.u = 0;
                }
                entry.not_first_occ += 1;
            }
        } else if !u.prediction_result && allocate_or_not(u, lat, rng) {
            let start = (rng.next() % NBWAYSTR as u64) as usize;
            let mut done = false;

            // First pass: a way with no confidence at all.
            let mut way = start;
            for _ in 0..NBWAYSTR {
                let victim = u.b[way] as usize;
                if self.table[victim].conf == 0 {
                    Self::install(&mut self.table[victim], u.tagstr[way], actual_value);
                    done = true;
                    break;
                }
                way = (way + 1) % NBWAYSTR;
            }
            // Second pass: a way that has not been useful recently.
            if !done {
                way = start;
                for _ in 0..NBWAYSTR {
                    let victim = u.b[way] as usize;
                    if self.table[victim].u == 0 {
                        Self::install(&mut self.table[victim], u.tagstr[way], actual_value);
                        done = true;
                        break;
                    }
                    way = (way + 1) % NBWAYSTR;
                }
            }
            // Unable to allocate: occasionally age the last way tried.
            if !done {
                let victim = u.b[(start + NBWAYSTR - 1) % NBWAYSTR] as usize;
                let conf = self.table[victim].conf;
                let shift = 2
                    + 2 * u32::from(conf > MAXCONFIDSTR / 8)
                    + 2 * u32::from(conf >= MAXCONFIDSTR / 4);
                if (rng.next() & ((1u64 << shift) - 1)) == 0 {
                    self.table[victim].u -= 1;
                }
            }
        }
    }

    /// Seeds an entry; `conf = 1` keeps it resident until the stride can be
    /// tested on the next occurrence.
    fn install(entry: &mut StrEntry, tag: u32, actual_value: u64) {
        entry.conf = 1;
        entry.u = 0;
        entry.tag = tag;
        entry.stride = 0;
        entry.not_first_occ = 0;
        entry.last_value = actual_value;
    }
}
