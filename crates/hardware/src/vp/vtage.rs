//! VTAGE: tagged-geometric value predictor over a shared value pool.
//!
//! Entries do not store values directly. Each holds `hashpt`: either a
//! pointer into the shared pool (`< 3 * BANKDATA`) or a hash of the last
//! observed value offset by `3 * BANKDATA`. A hash is promoted to a pool
//! pointer once confidence justifies spending a pool slot; the pool is
//! 3-way skewed with its own useful counters.
//!
//! Predictions are emitted only at saturated confidence, and are suppressed
//! wholesale for 128 instructions after any VTAGE misprediction —
//! mispredictions cluster, and the suppression removes most of the cluster.

use crate::common::InstClass;

use super::{
    ForUpdate, LatencyBuckets, PredRng, BANKDATA, BANKSIZE, HL, LOGBANK, LOGLDATA, MAXCONFID,
    MAXTICK, MAXU, NHIST, PREDSIZE, TAGWIDTH,
};

/// One VTAGE entry: a value hash or pool pointer, confidence, tag, and
/// useful counter.
#[derive(Clone, Copy, Default)]
pub(crate) struct VtEntry {
    /// Pool pointer when `< 3 * BANKDATA`, value hash plus `3 * BANKDATA`
    /// otherwise.
    pub hashpt: u32,
    pub conf: u8,
    pub tag: u32,
    pub u: u8,
}

/// One shared-pool slot.
#[derive(Clone, Copy, Default)]
pub(crate) struct PoolSlot {
    pub data: u64,
    pub u: u8,
}

/// The VTAGE component.
pub(crate) struct Vtage {
    pub entries: Vec<VtEntry>,
    pub ldata: Vec<PoolSlot>,
    pub tick: i32,
    /// Instructions since the last VTAGE misprediction.
    pub last_misp: i32,
}

fn mask_bits(x: u64, bits: usize) -> u64 {
    if bits >= 64 {
        x
    } else {
        x & ((1u64 << bits) - 1)
    }
}

/// Index hash for bank `i`: a mix of the PC, up to 512 bits of path
/// history, and up to 64 bits of target history, with per-bank history
/// length `HL[i]`.
fn gi_hash(i: usize, pc: u64, gpath: &[u64; 8], gtargeth: u64) -> u32 {
    let mut hl = if HL[i] < 64 { HL[i] } else { 64 };
    let mut inter = mask_bits(gpath[0], hl);
    let mut res: u64 = 0;

    inter ^= (pc >> i) ^ pc;
    for _ in 0..8 {
        res ^= inter;
        inter ^= (inter & 15) << 16;
        inter >>= LOGBANK - ((NHIST - i + LOGBANK - 1) % (LOGBANK - 1));
    }

    hl = hl.min((HL[NHIST] + 1) / 2);
    inter ^= mask_bits(gtargeth, hl);
    for _ in 0..=(hl / LOGBANK) {
        res ^= inter;
        inter ^= (inter & 15) << 16;
        inter >>= LOGBANK;
    }

    if HL[i] >= 64 {
        let mut remain = HL[i] as i64 - 64;
        let hl = remain as usize;
        let mut pt = 1;
        while remain > 0 {
            inter ^= mask_bits(gpath[pt], hl);
            for _ in 0..8 {
                res ^= inter;
                inter ^= (inter & 15) << 16;
                inter >>= LOGBANK - ((NHIST - i + LOGBANK - 1) % (LOGBANK - 1));
            }
            remain -= 64;
            pt += 1;
        }
    }

    (res as u32) & (BANKSIZE as u32 - 1)
}

/// Tag hash for bank `i`; orthogonal to [`gi_hash`].
fn gtag_hash(i: usize, pc: u64, gpath: &[u64; 8], gtargeth: u64) -> u32 {
    let mut hl = if HL[i] < 64 { HL[i] } else { 64 };
    let mut inter = mask_bits(gpath[0], hl);
    let mut res: u64 = 0;

    inter ^= (pc >> i) ^ (pc >> (5 + i)) ^ pc;
    for _ in 0..8 {
        res ^= inter;
        inter ^= (inter & 31) << 14;
        inter >>= LOGBANK - ((NHIST - i + LOGBANK - 2) % (LOGBANK - 1));
    }

    hl = hl.min((HL[NHIST] + 1) / 2);
    inter ^= mask_bits(gtargeth, hl);
    for _ in 0..=(hl / TAGWIDTH) {
        res ^= inter;
        inter ^= (inter & 15) << 16;
        inter >>= TAGWIDTH;
    }

    if HL[i] >= 64 {
        let mut remain = HL[i] as i64 - 64;
        let hl = remain as usize;
        let mut pt = 1;
        while remain > 0 {
            inter ^= mask_bits(gpath[pt], hl);
            let shift = (TAGWIDTH as i32 - (NHIST as i32 - i as i32 - 1)) as u32;
            for _ in 0..8 {
                res ^= inter;
                inter ^= (inter & 31) << 14;
                inter >>= shift;
            }
            remain -= 64;
            pt += 1;
        }
    }

    (res as u32) & ((1u32 << TAGWIDTH) - 1)
}

/// `(|2v + 1| < 2^16) + (v == 0)`: small and zero values are cheap to
/// re-learn, so their confidence grows more slowly.
fn low_val(v: u64) -> u32 {
    let twice = (v as i64).wrapping_mul(2).wrapping_add(1);
    u32::from(twice.unsigned_abs() < (1 << 16)) + u32::from(v == 0)
}

/// Hash of the actual value used when an entry holds no pool pointer.
fn value_hash(v: u64) -> u32 {
    let h = (v ^ (v >> 7)
        ^ (v >> 13)
        ^ (v >> 21)
        ^ (v >> 29)
        ^ (v >> 34)
        ^ (v >> 43)
        ^ (v >> 52)
        ^ (v >> 57)) & (BANKDATA as u64 - 1);
    h as u32 + (3 * BANKDATA) as u32
}

/// Confidence-increment filter on a correct prediction.
fn update_conf(u: &ForUpdate, v: u64, lat: LatencyBuckets, rng: &mut PredRng) -> bool {
    match u.insttype {
        InstClass::UncondIndirect => true,
        InstClass::CondBranch | InstClass::UncondDirect => false,
        _ => {
            let shift = low_val(v)
                + lat.notllc
                + 2 * lat.fast
                + lat.notl2
                + lat.notl1
                + u32::from(u.insttype != InstClass::Load || lat.notl1 == 1);
            let mut draw = |rng: &mut PredRng| (rng.next() & ((1u64 << shift) - 1)) == 0;
            if u.hit_bank <= 1 {
                draw(rng) || draw(rng)
            } else {
                draw(rng)
            }
        }
    }
}

/// Useful-increment filter on a correct prediction.
fn update_u(u: &ForUpdate, v: u64, lat: LatencyBuckets, rng: &mut PredRng) -> bool {
    match u.insttype {
        InstClass::UncondIndirect => true,
        InstClass::CondBranch | InstClass::UncondDirect => false,
        _ => {
            let shift = low_val(v)
                + 2 * lat.notl1
                + u32::from(u.insttype != InstClass::Load)
                + lat.fast
                + 2 * u32::from(u.insttype == InstClass::Alu && u.nb_operand < 2);
            !u.prediction_result && (rng.next() & ((1u64 << shift) - 1)) == 0
        }
    }
}

/// Allocation filter on a miss or mismatch.
fn allocate_or_not(
    u: &ForUpdate,
    v: u64,
    lat: LatencyBuckets,
    med_conf: bool,
    rng: &mut PredRng,
) -> bool {
    let common = |rng: &mut PredRng| {
        let shift = u32::from(u.insttype != InstClass::Load || lat.notl1 == 1) * low_val(v)
            + lat.notllc
            + lat.notl2
            + lat.notl1
            + 2 * lat.fast;
        ((rng.next() & ((2u64 << shift) - 1)) == 0) || med_conf
    };
    match u.insttype {
        InstClass::Alu | InstClass::Store | InstClass::Undef => {
            let gate = (u.nb_operand >= 2 && (rng.next() & 15) == 0)
                || (u.nb_operand < 2 && (rng.next() & 63) == 0);
            gate && common(rng)
        }
        InstClass::Fp | InstClass::SlowAlu | InstClass::Load => common(rng),
        InstClass::UncondIndirect => true,
        InstClass::CondBranch | InstClass::UncondDirect => false,
    }
}

impl Vtage {
    pub fn new() -> Self {
        Self {
            entries: vec![VtEntry::default(); PREDSIZE],
            ldata: vec![PoolSlot::default(); 3 * BANKDATA],
            tick: 0,
            last_misp: 0,
        }
    }

    /// Computes indices, tags, and the hit bank for this piece, and emits a
    /// prediction when confidence is saturated and the post-misprediction
    /// suppression window has passed.
    pub fn predict(
        &self,
        u: &mut ForUpdate,
        gpath: &[u64; 8],
        gtargeth: u64,
        predicted_value: &mut u64,
    ) {
        let pc = u.pc;
        let pc_index = ((pc ^ (pc >> 2) ^ (pc >> 5)) % PREDSIZE as u64) as u32;
        let pc_bank = (pc_index >> LOGBANK) << LOGBANK;

        for i in 1..=NHIST {
            u.gi[i] = ((u64::from(gi_hash(i, pc, gpath, gtargeth))
                + u64::from(pc_bank)
                + ((i as u64) << LOGBANK))
                % PREDSIZE as u64) as u32;
            u.gtag[i] = gtag_hash(i, pc, gpath, gtargeth);
        }
        u.gtag[0] = ((pc ^ (pc >> 4) ^ (pc >> TAGWIDTH)) & ((1u64 << TAGWIDTH) - 1)) as u32;
        u.gi[0] = pc_index;

        u.hit_bank = -1;
        for i in (0..=NHIST).rev() {
            if self.entries[u.gi[i] as usize].tag == u.gtag[i] {
                u.hit_bank = i as i32;
                break;
            }
        }

        let mut predvtage = false;
        if self.last_misp >= 128 && u.hit_bank >= 0 {
            let entry = self.entries[u.gi[u.hit_bank as usize] as usize];
            let index = entry.hashpt as usize;
            if index < 3 * BANKDATA {
                // The hash has been promoted: the pool holds the value.
                *predicted_value = self.ldata[index].data;
                predvtage = entry.conf >= MAXCONFID;
            }
        }
        u.predvtage = predvtage;
    }

    /// Retire-time training.
    pub fn update(
        &mut self,
        u: &ForUpdate,
        actual_value: u64,
        lat: LatencyBuckets,
        rng: &mut PredRng,
    ) {
        let mut med_conf = false;
        let hash_data = value_hash(actual_value);
        let mut should_allocate = true;

        if u.hit_bank != -1 {
            let index = u.gi[u.hit_bank as usize] as usize;
            // The entry may have been replaced between prediction and commit.
            if self.entries[index].tag == u.gtag[u.hit_bank as usize] {
                let indindex = self.entries[index].hashpt as usize;
                should_allocate = (indindex >= 3 * BANKDATA && indindex != hash_data as usize)
                    || (indindex < 3 * BANKDATA && self.ldata[indindex].data != actual_value);

                if should_allocate {
                    // Mismatch: re-arm the entry with the new value's hash
                    // and demote confidence.
                    let entry = &mut self.entries[index];
                    entry.hashpt = hash_data;
                    if entry.conf > MAXCONFID / 2
                        || (entry.conf == MAXCONFID / 2 && entry.u == 3)
                        || (entry.conf > 0 && entry.conf < MAXCONFID / 2)
                    {
                        med_conf = true;
                    }
                    if entry.conf == MAXCONFID {
                        entry.u = 1;
                        entry.conf -= (MAXCONFID + 1) / 4;
                    } else {
                        entry.conf = 0;
                        entry.u = 0;
                    }
                } else {
                    // Either a matching hash without data, or a pointer at
                    // the correct pool value.
                    if self.entries[index].conf < MAXCONFID
                        && update_conf(u, actual_value, lat, rng)
                    {
                        self.entries[index].conf += 1;
                    }
                    if self.entries[index].u < MAXU
                        && (update_u(u, actual_value, lat, rng)
                            || self.entries[index].conf == MAXCONFID)
                    {
                        self.entries[index].u += 1;
                    }
                    if indindex < 3 * BANKDATA
                        && self.ldata[indindex].u < 3
                        && self.entries[index].conf == MAXCONFID
                    {
                        self.ldata[indindex].u += 1;
                    }

                    if indindex >= 3 * BANKDATA && self.entries[index].conf >= MAXCONFID - 1 {
                        self.try_install_pool(index, actual_value, u, rng);
                    }
                }
            }
        }

        // Don't spend entries on pieces the other component already predicts.
        if !u.prediction_result
            && should_allocate
            && allocate_or_not(u, actual_value, lat, med_conf, rng)
        {
            self.allocate(u, hash_data, rng);
        }
    }

    /// Promotes a confident hash entry to a pool pointer: probe the three
    /// skewed slots for the value, else occasionally steal a useless slot.
    fn try_install_pool(
        &mut self,
        index: usize,
        actual_value: u64,
        u: &ForUpdate,
        rng: &mut PredRng,
    ) {
        let mut slots = [0usize; 3];
        for (i, slot) in slots.iter_mut().enumerate() {
            let k = (LOGLDATA + i + 1) as u32;
            let h = (actual_value
                ^ actual_value.wrapping_shr(k)
                ^ actual_value.wrapping_shr(3 * k)
                ^ actual_value.wrapping_shr(4 * k)
                ^ actual_value.wrapping_shr(5 * k)
                ^ actual_value.wrapping_shr(6 * k)
                ^ actual_value.wrapping_shr(2 * k)) & (BANKDATA as u64 - 1);
            *slot = h as usize + i * BANKDATA;
        }

        for &slot in &slots {
            if self.ldata[slot].data == actual_value {
                self.entries[index].hashpt = slot as u32;
                return;
            }
        }

        if (rng.next() & 3) == 0 {
            let mut i = (rng.next() % 3) as usize;
            let mut done = false;
            for _ in 0..3 {
                if self.ldata[slots[i]].u == 0 {
                    self.ldata[slots[i]].data = actual_value;
                    self.ldata[slots[i]].u = 1;
                    self.entries[index].hashpt = slots[i] as u32;
                    done = true;
                    break;
                }
                i = (i + 1) % 3;
            }
            if u.insttype == InstClass::Load && !done {
                if self.ldata[slots[i]].u == 0 {
                    self.ldata[slots[i]].data = actual_value;
                    self.ldata[slots[i]].u = 1;
                    self.entries[index].hashpt = slots[i] as u32;
                } else if (rng.next() & 3) == 0 {
                    self.ldata[slots[i]].u -= 1;
                }
            }
        }
    }

    /// Allocates a fresh entry in a longer-history bank, slightly favoring
    /// entries whose confidence was earned rather than inherited.
    fn allocate(&mut self, u: &ForUpdate, hash_data: u32, rng: &mut PredRng) {
        let mut all = 0i32;
        let mut na = 0i32;

        let mut dep = (u.hit_bank + 1) + i32::from((rng.next() & 7) == 0);
        if u.hit_bank == 0 {
            dep += 1;
        }
        if u.hit_bank == -1 {
            if rng.next() & 7 != 0 {
                dep = (rng.next() & 1) as i32;
            } else {
                dep = 2 + i32::from((rng.next() & 7) == 0);
            }
        }

        if dep > 1 {
            for i in (dep as usize)..=NHIST {
                let index = u.gi[i] as usize;
                if self.entries[index].u == 0
                    && (self.entries[index].conf == MAXCONFID / 2
                        || u64::from(self.entries[index].conf) <= (rng.next() & u64::from(MAXCONFID)))
                {
                    let entry = &mut self.entries[index];
                    entry.hashpt = hash_data;
                    // Half confidence warms to full speed faster than zero.
                    entry.conf = MAXCONFID / 2;
                    entry.tag = u.gtag[i];
                    all += 1;
                    break;
                }
                na += 1;
            }
        } else {
            for j in 0..=1 {
                let i = ((j + dep) & 1) as usize;
                let index = u.gi[i] as usize;
                if self.entries[index].u == 0
                    && (self.entries[index].conf == MAXCONFID / 2
                        || u64::from(self.entries[index].conf) <= (rng.next() & u64::from(MAXCONFID)))
                {
                    let entry = &mut self.entries[index];
                    entry.hashpt = hash_data;
                    entry.conf = MAXCONFID / 2;
                    if u.nb_operand == 0 && u.insttype == InstClass::Alu {
                        entry.conf = MAXCONFID;
                    }
                    entry.tag = u.gtag[i];
                    all += 1;
                    break;
                }
                na += 1;
            }
        }

        self.tick += na - 5 * all;
        if self.tick < 0 {
            self.tick = 0;
        }
        if self.tick >= MAXTICK {
            for entry in &mut self.entries {
                if entry.u > 0 {
                    entry.u -= 1;
                }
            }
            self.tick = 0;
        }
    }
}
