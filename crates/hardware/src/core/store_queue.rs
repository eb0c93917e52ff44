//! Byte-granular store queue with oracle disambiguation.
//!
//! The queue maps each byte address to the executing store's timestamps. No
//! memory-order speculation is modeled: a load simply consults the most
//! recent store to each of its bytes. Entries are never deleted; the map is
//! oracle-sized and bounded in practice by the window plus committed stores.

use std::collections::HashMap;

/// Timestamps of the most recent store to one byte.
#[derive(Clone, Copy, Debug)]
pub struct SqEntry {
    /// Cycle the store executed (data available for forwarding).
    pub exec_cycle: u64,
    /// Cycle the store commits; after this the byte must come from the cache.
    pub ret_cycle: u64,
}

/// The store queue.
#[derive(Default)]
pub struct StoreQueue {
    bytes: HashMap<u64, SqEntry>,
}

impl StoreQueue {
    /// Creates an empty store queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a store's per-byte timestamps for `[addr, addr + size)`.
    pub fn store(&mut self, addr: u64, size: u64, exec_cycle: u64, ret_cycle: u64) {
        for byte in addr..addr + size {
            self.bytes.insert(
                byte,
                SqEntry {
                    exec_cycle,
                    ret_cycle,
                },
            );
        }
    }

    /// Resolves a load byte-by-byte against the queue.
    ///
    /// A byte forwards when a matching entry is still in flight
    /// (`load_exec_cycle < entry.ret_cycle`); it becomes available at
    /// `max(load_exec_cycle, entry.exec_cycle)`. Bytes that do not forward
    /// are served by the cache at `cache_cycle`. Returns the max over all
    /// bytes and whether any byte had to fall back to the cache.
    pub fn load_forward(
        &self,
        addr: u64,
        size: u64,
        load_exec_cycle: u64,
        cache_cycle: u64,
    ) -> (u64, bool) {
        let mut combined = 0;
        let mut missed_any = false;
        for byte in addr..addr + size {
            match self.bytes.get(&byte) {
                Some(entry) if load_exec_cycle < entry.ret_cycle => {
                    combined = combined.max(load_exec_cycle.max(entry.exec_cycle));
                }
                _ => {
                    combined = combined.max(cache_cycle);
                    missed_any = true;
                }
            }
        }
        (combined, missed_any)
    }
}
