use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::TableError;
use crate::record::{ChunkId, ChunkRecord};

/// Bounded, slab-backed chunk cache.
///
/// Callers are expected to hold the device lock for the duration of any
/// call into this table -- it performs no internal synchronization of its
/// own, by design (spec's single per-device lock serializes cache-table
/// mutation and state-machine advancement together).
pub struct ChunkTable {
    slots: Vec<ChunkRecord>,
    index: HashMap<ChunkId, usize>,
    free: Vec<usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    capacity: usize,
}

impl ChunkTable {
    /// `capacity` is the cachesize validated at device construction
    /// (`cachesize >= MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO`).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            lru_head: None,
            lru_tail: None,
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total number of slab slots ever allocated, including currently-free
    /// ones. Used by the periodic sweep to bound a `0..slot_count()` scan
    /// without needing a separate occupied-slot iterator.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn get(&self, cid: ChunkId) -> Option<&ChunkRecord> {
        self.index.get(&cid).map(|&slot| &self.slots[slot])
    }

    #[must_use]
    pub fn get_mut(&mut self, cid: ChunkId) -> Option<&mut ChunkRecord> {
        let slot = *self.index.get(&cid)?;
        Some(&mut self.slots[slot])
    }

    /// Looks up the slot index currently holding `cid`, if any. Used by
    /// callers that received an async reply keyed by cid (an agent message,
    /// a worker-job completion) and need to resume driving that record's
    /// state machine.
    #[must_use]
    pub fn slot_of(&self, cid: ChunkId) -> Option<usize> {
        self.index.get(&cid).copied()
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut ChunkRecord {
        &mut self.slots[slot]
    }

    pub fn slot(&self, slot: usize) -> &ChunkRecord {
        &self.slots[slot]
    }

    /// Returns the existing entry for `cid`, or allocates one: reusing a
    /// free slot, growing the slab if under capacity, or evicting the
    /// least-recently-used evictable chunk. Returns [`TableError::WouldBlock`]
    /// when the table is at capacity and nothing is evictable; the caller
    /// (fan-out layer) is expected to park the request on the device
    /// waitqueue and retry once a chunk becomes `CLEAN`.
    pub fn reserve(&mut self, cid: ChunkId) -> Result<usize, TableError> {
        if let Some(&slot) = self.index.get(&cid) {
            return Ok(slot);
        }

        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else if self.slots.len() < self.capacity {
            self.slots.push(ChunkRecord::new(cid));
            self.slots.len() - 1
        } else if let Some(slot) = self.evict_one() {
            slot
        } else {
            trace!(?cid, "chunk table full, no evictable slot");
            return Err(TableError::WouldBlock);
        };

        self.slots[slot].reset(cid);
        self.index.insert(cid, slot);
        debug!(?cid, slot, "reserved chunk table slot");
        Ok(slot)
    }

    /// Marks a chunk newly `CLEAN`: moves it to the most-recently-used end
    /// of the LRU list so it is the last candidate considered for
    /// eviction. Call whenever a record transitions into `CLEAN`.
    pub fn note_clean(&mut self, slot: usize) {
        self.unlink(slot);
        self.push_mru(slot);
    }

    /// Drops a chunk's table entry entirely (used on eviction and on
    /// shutdown teardown). Does not check evictability -- callers must
    /// have already verified `is_evictable()` or be tearing the whole
    /// table down.
    pub fn remove(&mut self, cid: ChunkId) {
        if let Some(slot) = self.index.remove(&cid) {
            self.unlink(slot);
            self.free.push(slot);
        }
    }

    /// Attempts to evict the least-recently-used `CLEAN` chunk with no
    /// waiters and no pending agent message. Walks from the LRU end since
    /// a chunk blocked from eviction (waiters, pending message) may sit
    /// ahead of otherwise-evictable entries that have not been touched
    /// since.
    fn evict_one(&mut self) -> Option<usize> {
        let mut cursor = self.lru_head;
        while let Some(slot) = cursor {
            let next = self.slots[slot].lru_next;
            if self.slots[slot].is_evictable() {
                let cid = self.slots[slot].cid;
                debug!(?cid, slot, "evicting chunk");
                self.index.remove(&cid);
                self.unlink(slot);
                return Some(slot);
            }
            cursor = next;
        }
        None
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].lru_prev, self.slots[slot].lru_next);
        match prev {
            Some(p) => self.slots[p].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].lru_prev = prev,
            None => self.lru_tail = prev,
        }
        self.slots[slot].lru_prev = None;
        self.slots[slot].lru_next = None;
    }

    fn push_mru(&mut self, slot: usize) {
        self.slots[slot].lru_prev = self.lru_tail;
        self.slots[slot].lru_next = None;
        if let Some(tail) = self.lru_tail {
            self.slots[tail].lru_next = Some(slot);
        } else {
            self.lru_head = Some(slot);
        }
        self.lru_tail = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChunkState;

    #[test]
    fn reserve_reuses_existing_entry() {
        let mut table = ChunkTable::new(4);
        let a = table.reserve(ChunkId(1)).unwrap();
        let b = table.reserve(ChunkId(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reserve_fails_when_full_and_nothing_evictable() {
        let mut table = ChunkTable::new(2);
        table.reserve(ChunkId(1)).unwrap();
        table.reserve(ChunkId(2)).unwrap();
        // Neither chunk has reached CLEAN, so neither is evictable.
        assert!(matches!(table.reserve(ChunkId(3)), Err(TableError::WouldBlock)));
    }

    #[test]
    fn eviction_picks_least_recently_clean() {
        let mut table = ChunkTable::new(2);
        let s1 = table.reserve(ChunkId(1)).unwrap();
        table.slot_mut(s1).state = ChunkState::Clean;
        table.note_clean(s1);

        let s2 = table.reserve(ChunkId(2)).unwrap();
        table.slot_mut(s2).state = ChunkState::Clean;
        table.note_clean(s2);

        // Both clean; chunk 1 is older, so reserving a third evicts it.
        let s3 = table.reserve(ChunkId(3)).unwrap();
        assert!(table.get(ChunkId(1)).is_none());
        assert!(table.get(ChunkId(2)).is_some());
        assert_eq!(table.slot(s3).cid, ChunkId(3));
    }

    #[test]
    fn chunk_with_waiters_is_not_evicted() {
        use crate::record::WaiterId;
        let mut table = ChunkTable::new(1);
        let s1 = table.reserve(ChunkId(1)).unwrap();
        table.slot_mut(s1).state = ChunkState::Clean;
        table.slot_mut(s1).waiters.push_back(WaiterId(1));
        table.note_clean(s1);

        assert!(matches!(table.reserve(ChunkId(2)), Err(TableError::WouldBlock)));
    }
}
