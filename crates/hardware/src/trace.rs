//! Gzip trace reader and instruction cracking.
//!
//! The wire format is a little-endian record stream (gzip-compressed):
//! PC (8), class (1); loads/stores add effective address (8) and per-register
//! access size (1); branches add a taken flag (1) and, if taken, the target
//! (8); then input-register count and ids, output-register count and ids, and
//! one 8-byte value per integer/flag output or 16 bytes per SIMD output.
//!
//! Records crack into 64-bit *pieces*: one per output register, two for each
//! SIMD output (low/high lanes). Two refinements over naive cracking:
//! - a load or store whose extra output is really an address-mode base
//!   update is recognized by a per-PC learned displacement, and that output
//!   neither counts toward the memory footprint nor accesses memory;
//! - the high lane of a single-lane vector load is not emitted.
//!
//! The reader owns one record buffer and a piece cursor; pieces are built in
//! place and returned by reference, so the hot loop allocates nothing.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::info;

use crate::common::error::{Result, SimError};
use crate::common::{InstClass, NO_OPERAND, RF_FLAGS, VEC_OFFSET};

/// Largest base-update displacement the inference will learn. Covers the
/// pre/post-index immediate ranges of the traced ISA.
const MAX_BASE_UPDATE_OFFSET: i64 = 4096;

/// One source or destination operand of a piece.
#[derive(Clone, Copy, Debug, Default)]
pub struct Operand {
    /// Whether the operand exists.
    pub valid: bool,
    /// Integer or flags register (as opposed to an FP/SIMD lane).
    pub is_int: bool,
    /// Logical register id.
    pub log_reg: u64,
    /// Recorded value; [`NO_OPERAND`] for sources (the trace only records
    /// outputs).
    pub value: u64,
}

/// One cracked 64-bit micro-operation piece.
#[derive(Clone, Debug)]
pub struct MicroOp {
    /// Instruction class of the parent record.
    pub class: InstClass,
    /// Program counter (shared by all pieces of one record).
    pub pc: u64,
    /// Next PC: branch target when taken, `pc + 4` otherwise.
    pub next_pc: u64,
    /// First source operand.
    pub a: Operand,
    /// Second source operand.
    pub b: Operand,
    /// Third source operand.
    pub c: Operand,
    /// Destination operand.
    pub d: Operand,
    /// This piece reads memory.
    pub is_load: bool,
    /// This piece writes memory.
    pub is_store: bool,
    /// This piece is an address-mode base update (no memory access).
    pub is_base_update: bool,
    /// Effective address of this piece's slice of the access.
    pub addr: u64,
    /// Bytes accessed by this piece.
    pub size: u64,
    /// Total access size of the parent record, for the predictor interface.
    pub mem_size: u8,
    /// Pair-form store.
    pub is_pair: bool,
}

impl Default for MicroOp {
    fn default() -> Self {
        Self {
            class: InstClass::Undef,
            pc: NO_OPERAND,
            next_pc: NO_OPERAND,
            a: Operand::default(),
            b: Operand::default(),
            c: Operand::default(),
            d: Operand::default(),
            is_load: false,
            is_store: false,
            is_base_update: false,
            addr: NO_OPERAND,
            size: 0,
            mem_size: 0,
            is_pair: false,
        }
    }
}

#[derive(Clone, Copy)]
struct PieceDesc {
    /// Index into the record's output registers, if the piece has one.
    out_idx: Option<usize>,
    /// Index into the record's value array.
    val_idx: usize,
    is_base_update: bool,
    /// Ordinal among this record's memory pieces, if the piece accesses
    /// memory.
    mem_no: Option<u64>,
}

/// Raw contents of one trace record.
#[derive(Default)]
struct RawRecord {
    pc: u64,
    class: u8,
    next_pc: u64,
    eff_addr: u64,
    mem_size_per_reg: u8,
    mem_total: u64,
    in_regs: Vec<u8>,
    out_regs: Vec<u8>,
    out_vals: Vec<u64>,
    /// Value-array start index per output register.
    val_start: Vec<usize>,
    base_update_idx: Option<usize>,
    /// Single-lane vector load: the high-lane piece is suppressed.
    ignore_hi_lane: bool,
    is_pair: bool,
}

/// Streaming reader over a gzip-compressed trace.
pub struct TraceReader {
    input: GzDecoder<BufReader<File>>,
    /// Uncompressed bytes consumed, for diagnostics.
    offset: u64,
    record: RawRecord,
    pieces: Vec<PieceDesc>,
    piece_cursor: usize,
    piece_size: u64,
    cur: MicroOp,
    /// Learned base-update displacement per load/store PC.
    ldst_offsets: HashMap<u64, i64>,
    n_records: u64,
    n_pieces: u64,
}

impl TraceReader {
    /// Opens a gzip-compressed trace file.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Io`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            input: GzDecoder::new(BufReader::new(file)),
            offset: 0,
            record: RawRecord::default(),
            pieces: Vec::new(),
            piece_cursor: 0,
            piece_size: 0,
            cur: MicroOp::default(),
            ldst_offsets: HashMap::new(),
            n_records: 0,
            n_pieces: 0,
        })
    }

    /// Trace records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.n_records
    }

    /// Pieces emitted so far (after cracking expansion).
    pub fn pieces_emitted(&self) -> u64 {
        self.n_pieces
    }

    /// Returns the next piece, or `None` at a clean end of trace.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::TraceFormat`] for a truncated record or an
    /// undefined instruction class, [`SimError::Io`] for stream failures.
    pub fn next_piece(&mut self) -> Result<Option<&MicroOp>> {
        if self.piece_cursor >= self.pieces.len() {
            if !self.read_record()? {
                return Ok(None);
            }
            self.crack_record();
        }
        self.build_piece();
        self.piece_cursor += 1;
        self.n_pieces += 1;
        Ok(Some(&self.cur))
    }

    /// Fills `buf` completely, or returns `Ok(false)` on a clean EOF at the
    /// first byte.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.input.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(SimError::TraceFormat {
                    offset: self.offset + filled as u64,
                    reason: "record truncated mid-field".into(),
                });
            }
            filled += n;
        }
        self.offset += buf.len() as u64;
        Ok(true)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        if !self.fill(&mut buf)? {
            return Err(SimError::TraceFormat {
                offset: self.offset,
                reason: "unexpected end of trace".into(),
            });
        }
        Ok(buf[0])
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        if !self.fill(&mut buf)? {
            return Err(SimError::TraceFormat {
                offset: self.offset,
                reason: "unexpected end of trace".into(),
            });
        }
        Ok(u64::from_le_bytes(buf))
    }

    /// Decodes one wire record into `self.record`; `Ok(false)` at EOF.
    fn read_record(&mut self) -> Result<bool> {
        let mut pc_buf = [0u8; 8];
        if !self.fill(&mut pc_buf)? {
            return Ok(false);
        }

        let rec = &mut self.record;
        rec.pc = u64::from_le_bytes(pc_buf);
        rec.eff_addr = NO_OPERAND;
        rec.mem_size_per_reg = 0;
        rec.mem_total = 0;
        rec.in_regs.clear();
        rec.out_regs.clear();
        rec.out_vals.clear();
        rec.val_start.clear();
        rec.base_update_idx = None;
        rec.ignore_hi_lane = false;
        rec.is_pair = false;
        rec.next_pc = rec.pc + 4;

        let raw_class = self.read_u8()?;
        let class = InstClass::from_u8(raw_class).ok_or_else(|| SimError::TraceFormat {
            offset: self.offset,
            reason: format!("undefined instruction class {raw_class}"),
        })?;
        self.record.class = raw_class;

        if class == InstClass::Load || class == InstClass::Store {
            self.record.eff_addr = self.read_u64()?;
            self.record.mem_size_per_reg = self.read_u8()?;
        }
        if class.is_branch() {
            let taken = self.read_u8()? != 0;
            if taken {
                self.record.next_pc = self.read_u64()?;
            }
        }

        let num_in = self.read_u8()?;
        for _ in 0..num_in {
            let reg = self.read_u8()?;
            self.record.in_regs.push(reg);
        }

        let num_out = self.read_u8()?;
        for _ in 0..num_out {
            let reg = self.read_u8()?;
            self.record.out_regs.push(reg);
        }
        for i in 0..num_out as usize {
            self.record.val_start.push(self.record.out_vals.len());
            let lo = self.read_u64()?;
            self.record.out_vals.push(lo);
            if is_simd_reg(self.record.out_regs[i]) {
                let hi = self.read_u64()?;
                self.record.out_vals.push(hi);
            }
        }

        // Integer records with no outputs are generally compares; treat them
        // as producing the flags register. The trace has no flags value.
        if class == InstClass::Alu && self.record.out_regs.is_empty() {
            self.record.out_regs.push(RF_FLAGS as u8);
            self.record.val_start.push(self.record.out_vals.len());
            self.record.out_vals.push(NO_OPERAND);
        }
        // Conditional branches with no inputs read the flags register.
        if class == InstClass::CondBranch && self.record.in_regs.is_empty() {
            self.record.in_regs.push(RF_FLAGS as u8);
        }

        self.infer_base_update(class);

        let effective_out = self.record.out_regs.len()
            - usize::from(self.record.base_update_idx.is_some());
        self.record.mem_total =
            u64::from(self.record.mem_size_per_reg) * (effective_out.max(1) as u64);
        self.record.is_pair = class == InstClass::Store && self.record.mem_total > 8;
        self.record.ignore_hi_lane =
            class == InstClass::Load && self.record.mem_size_per_reg <= 8;

        self.n_records += 1;
        if self.n_records % 100_000 == 0 {
            info!(records = self.n_records, "trace progress");
        }
        Ok(true)
    }

    /// Identifies an output register that is really the updated base
    /// address of a pre/post-indexed load or store.
    ///
    /// The first sighting of a PC learns the displacement between the
    /// written value and the effective address; later sightings only accept
    /// the cached displacement.
    fn infer_base_update(&mut self, class: InstClass) {
        let rec = &mut self.record;
        let min_outputs = match class {
            // A plain load's single output is its data.
            InstClass::Load => 2,
            InstClass::Store => 1,
            _ => return,
        };
        if rec.out_regs.len() < min_outputs {
            return;
        }

        if let Some(&offset) = self.ldst_offsets.get(&rec.pc) {
            for k in (0..rec.out_regs.len()).rev() {
                if !is_simd_reg(rec.out_regs[k]) && u64::from(rec.out_regs[k]) != RF_FLAGS {
                    let value = rec.out_vals[rec.val_start[k]];
                    if value == rec.eff_addr.wrapping_add(offset as u64) {
                        rec.base_update_idx = Some(k);
                        return;
                    }
                }
            }
            return;
        }

        for k in (0..rec.out_regs.len()).rev() {
            if !is_simd_reg(rec.out_regs[k]) && u64::from(rec.out_regs[k]) != RF_FLAGS {
                let value = rec.out_vals[rec.val_start[k]];
                let displacement = value.wrapping_sub(rec.eff_addr) as i64;
                if displacement.abs() <= MAX_BASE_UPDATE_OFFSET {
                    rec.base_update_idx = Some(k);
                    self.ldst_offsets.insert(rec.pc, displacement);
                    return;
                }
            }
        }
    }

    /// Lays out the piece descriptors for the current record.
    fn crack_record(&mut self) {
        self.pieces.clear();
        self.piece_cursor = 0;

        let rec = &self.record;
        let pieces = &mut self.pieces;
        let is_mem_class = rec.class == InstClass::Load as u8 || rec.class == InstClass::Store as u8;
        let mut mem_no = 0u64;
        let mut mem_slot = |is_mem: bool| {
            if is_mem {
                let no = mem_no;
                mem_no += 1;
                Some(no)
            } else {
                None
            }
        };

        if rec.out_regs.is_empty() {
            // Stores and branches without outputs still occupy one piece.
            pieces.push(PieceDesc {
                out_idx: None,
                val_idx: 0,
                is_base_update: false,
                mem_no: mem_slot(is_mem_class),
            });
        } else {
            // A writeback store's only output is its base update; the memory
            // access itself still needs a piece.
            let has_regular_out = (0..rec.out_regs.len()).any(|k| rec.base_update_idx != Some(k));
            if is_mem_class && !has_regular_out {
                pieces.push(PieceDesc {
                    out_idx: None,
                    val_idx: 0,
                    is_base_update: false,
                    mem_no: mem_slot(true),
                });
            }
            for k in 0..rec.out_regs.len() {
                let is_base = rec.base_update_idx == Some(k);
                let is_mem = is_mem_class && !is_base;
                pieces.push(PieceDesc {
                    out_idx: Some(k),
                    val_idx: rec.val_start[k],
                    is_base_update: is_base,
                    mem_no: mem_slot(is_mem),
                });
                if is_simd_reg(rec.out_regs[k]) && !rec.ignore_hi_lane {
                    pieces.push(PieceDesc {
                        out_idx: Some(k),
                        val_idx: rec.val_start[k] + 1,
                        is_base_update: false,
                        mem_no: mem_slot(is_mem),
                    });
                }
            }
        }

        drop(mem_slot);
        self.piece_size = if mem_no > 0 {
            (rec.mem_total / mem_no).max(1)
        } else {
            0
        };
    }

    /// Materializes the piece under the cursor into `self.cur`.
    fn build_piece(&mut self) {
        let rec = &self.record;
        let desc = self.pieces[self.piece_cursor];
        let class = InstClass::from_u8(rec.class).unwrap_or(InstClass::Undef);

        let source = |slot: usize| -> Operand {
            match rec.in_regs.get(slot) {
                Some(&reg) => Operand {
                    valid: true,
                    is_int: !is_simd_reg(reg),
                    log_reg: u64::from(reg),
                    value: NO_OPERAND,
                },
                None => Operand::default(),
            }
        };

        let d = match desc.out_idx {
            Some(k) => {
                let reg = rec.out_regs[k];
                Operand {
                    valid: true,
                    is_int: !is_simd_reg(reg),
                    log_reg: u64::from(reg),
                    value: rec.out_vals[desc.val_idx],
                }
            }
            None => Operand::default(),
        };

        let (addr, size) = match desc.mem_no {
            Some(no) => (rec.eff_addr + no * self.piece_size, self.piece_size),
            None => (NO_OPERAND, 0),
        };

        self.cur = MicroOp {
            class,
            pc: rec.pc,
            next_pc: rec.next_pc,
            a: source(0),
            b: source(1),
            c: source(2),
            d,
            is_load: class == InstClass::Load && desc.mem_no.is_some(),
            is_store: class == InstClass::Store && desc.mem_no.is_some(),
            is_base_update: desc.is_base_update,
            addr,
            size,
            mem_size: rec.mem_total.min(255) as u8,
            is_pair: rec.is_pair,
        };
    }
}

#[inline]
fn is_simd_reg(reg: u8) -> bool {
    u64::from(reg) >= VEC_OFFSET && u64::from(reg) != RF_FLAGS
}
