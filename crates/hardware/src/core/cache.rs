//! Set-associative cache levels and the hierarchy arena.
//!
//! Each level models block availability timestamps rather than data: a block
//! records the cycle at which its fill completes, and an access returns the
//! earliest cycle the requester can see the block. Replacement is true LRU
//! with an explicit rank per way (0 = MRU). Writebacks are not modeled.
//!
//! Levels form a DAG (L1 and the instruction cache both fill from L2), so the
//! hierarchy owns all levels in an arena and links them by index.

use tracing::debug;

use crate::config::{CacheGeometry, MemoryConfig};

/// One cache block's bookkeeping.
#[derive(Clone, Copy, Default)]
struct Block {
    valid: bool,
    tag: u64,
    /// Cycle at which the block's fill completes.
    timestamp: u64,
    /// LRU rank within the set; 0 = MRU, assoc-1 = LRU.
    lru: u64,
}

/// Demand and prefetch traffic counters for one level.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    /// Demand accesses.
    pub accesses: u64,
    /// Demand misses.
    pub misses: u64,
    /// Prefetch accesses.
    pub pf_accesses: u64,
    /// Prefetch misses.
    pub pf_misses: u64,
}

/// One set-associative level with availability timestamps.
pub struct CacheLevel {
    blocks: Vec<Block>,
    assoc: u64,
    num_index_bits: u32,
    num_offset_bits: u32,
    index_mask: u64,
    latency: u64,
    /// Arena index of the next level, or `None` for the last level before
    /// main memory.
    next: Option<usize>,
    stats: CacheStats,
}

impl CacheLevel {
    /// Builds one level from its geometry; `next` chains it to a deeper
    /// level by arena index.
    ///
    /// # Panics
    ///
    /// Panics on non-power-of-two block size or set count; [`crate::config::SimConfig::validate`]
    /// rejects such geometry before a simulator is built.
    pub fn new(geom: &CacheGeometry, latency: u64, next: Option<usize>) -> Self {
        assert!(geom.block_size.is_power_of_two());
        let num_sets = geom.size / (geom.assoc * geom.block_size);
        assert!(num_sets.is_power_of_two());

        let mut blocks = vec![Block::default(); (num_sets * geom.assoc) as usize];
        for set in 0..num_sets {
            for way in 0..geom.assoc {
                blocks[(set * geom.assoc + way) as usize].lru = way;
            }
        }

        Self {
            blocks,
            assoc: geom.assoc,
            num_index_bits: num_sets.trailing_zeros(),
            num_offset_bits: geom.block_size.trailing_zeros(),
            index_mask: num_sets - 1,
            latency,
            next,
            stats: CacheStats::default(),
        }
    }

    #[inline]
    fn tag_of(&self, addr: u64) -> u64 {
        addr >> (self.num_index_bits + self.num_offset_bits)
    }

    #[inline]
    fn index_of(&self, addr: u64) -> u64 {
        (addr >> self.num_offset_bits) & self.index_mask
    }

    #[inline]
    fn block(&self, index: u64, way: u64) -> &Block {
        &self.blocks[(index * self.assoc + way) as usize]
    }

    #[inline]
    fn block_mut(&mut self, index: u64, way: u64) -> &mut Block {
        &mut self.blocks[(index * self.assoc + way) as usize]
    }

    /// Makes `mru_way` the MRU way of `index`, aging everything younger.
    fn update_lru(&mut self, index: u64, mru_way: u64) {
        let pivot = self.block(index, mru_way).lru;
        for way in 0..self.assoc {
            let assoc = self.assoc;
            let block = self.block_mut(index, way);
            if block.lru < pivot {
                block.lru += 1;
                debug_assert!(block.lru < assoc);
            }
        }
        self.block_mut(index, mru_way).lru = 0;
    }

    /// Search latency of this level.
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Traffic counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Non-mutating probe: true iff a valid matching block would be
    /// available by `cycle + latency`.
    pub fn is_hit(&self, cycle: u64, addr: u64) -> bool {
        let tag = self.tag_of(addr);
        let index = self.index_of(addr);
        for way in 0..self.assoc {
            let block = self.block(index, way);
            if block.valid && block.tag == tag {
                let avail = block.timestamp.max(cycle + self.latency);
                return cycle + self.latency >= avail;
            }
        }
        false
    }
}

/// The arena of cache levels: L1 → L2 → L3 → main memory, with the
/// instruction cache chained into L2.
pub struct CacheHierarchy {
    levels: Vec<CacheLevel>,
    l1: usize,
    l2: usize,
    l3: usize,
    icache: Option<usize>,
    main_latency: u64,
}

impl CacheHierarchy {
    /// Builds the data hierarchy, and the instruction cache when
    /// `model_icache` is set.
    pub fn new(cfg: &MemoryConfig, model_icache: bool) -> Self {
        let mut levels = Vec::with_capacity(4);
        levels.push(CacheLevel::new(&cfg.l3, cfg.l3.latency, None));
        let l3 = 0;
        levels.push(CacheLevel::new(&cfg.l2, cfg.l2.latency, Some(l3)));
        let l2 = 1;
        levels.push(CacheLevel::new(&cfg.l1, cfg.l1.latency, Some(l2)));
        let l1 = 2;
        let icache = if model_icache {
            // I-cache hit latency is 0: hits do not delay the fetch cycle.
            levels.push(CacheLevel::new(&cfg.icache, 0, Some(l2)));
            Some(3)
        } else {
            None
        };

        Self {
            levels,
            l1,
            l2,
            l3,
            icache,
            main_latency: cfg.main_latency,
        }
    }

    /// Arena index of the L1 data cache.
    pub fn l1(&self) -> usize {
        self.l1
    }

    /// Arena index of the L2 cache.
    pub fn l2(&self) -> usize {
        self.l2
    }

    /// Arena index of the L3 cache.
    pub fn l3(&self) -> usize {
        self.l3
    }

    /// Arena index of the instruction cache, if modeled.
    pub fn icache(&self) -> Option<usize> {
        self.icache
    }

    /// Shared view of one level (stats, latency, probes).
    pub fn level(&self, idx: usize) -> &CacheLevel {
        &self.levels[idx]
    }

    /// Accesses `level` for the block containing `addr` at `cycle`.
    ///
    /// Returns the earliest cycle the block is visible to the requester. On a
    /// hit that is `max(block fill time, cycle + latency)` and the way becomes
    /// MRU; on a miss the LRU way is refilled from the next level (or main
    /// memory) and the fill time is returned. Prefetch traffic (`pf`) is
    /// counted separately and does not affect demand counters.
    pub fn access(&mut self, level: usize, cycle: u64, addr: u64, pf: bool) -> u64 {
        let this = &mut self.levels[level];
        if pf {
            this.stats.pf_accesses += 1;
        } else {
            this.stats.accesses += 1;
        }

        let tag = this.tag_of(addr);
        let index = this.index_of(addr);

        let mut hit_way = None;
        let mut victim_way = 0;
        let mut max_lru = 0;
        for way in 0..this.assoc {
            let block = this.block(index, way);
            if block.valid && block.tag == tag {
                hit_way = Some(way);
                break;
            } else if block.lru >= max_lru {
                max_lru = block.lru;
                victim_way = way;
            }
        }

        if let Some(way) = hit_way {
            let avail = this.block(index, way).timestamp.max(cycle + this.latency);
            this.update_lru(index, way);
            return avail;
        }

        if pf {
            this.stats.pf_misses += 1;
        } else {
            this.stats.misses += 1;
        }
        debug_assert_eq!(max_lru, this.assoc - 1);

        let latency = this.latency;
        let next = this.next;
        let avail = match next {
            Some(deeper) => self.access(deeper, cycle + latency, addr, pf),
            None => cycle + latency + self.main_latency,
        };
        debug!(level, addr, fill = avail, "cache fill");

        let this = &mut self.levels[level];
        let block = this.block_mut(index, victim_way);
        block.valid = true;
        block.tag = tag;
        block.timestamp = avail;
        this.update_lru(index, victim_way);

        avail
    }

    /// Non-mutating probe of one level (see [`CacheLevel::is_hit`]).
    pub fn is_hit(&self, level: usize, cycle: u64, addr: u64) -> bool {
        self.levels[level].is_hit(cycle, addr)
    }
}
