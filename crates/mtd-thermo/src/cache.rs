// crates/mtd-thermo/src/cache.rs

//! Byte-budgeted LRU cache of kernel records.
//!
//! Keyed by `(complex sequence, depth)`. Reads take a shared lock and clone
//! an `Arc`, so eviction never invalidates a record a reader already holds.
//! Two threads may race to compute the same key; the last writer wins and
//! the loser's record is dropped.

use crate::kernel::ThermoRecord;
use mtd_core::types::ComplexSequence;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Cache key: the sub-complex sequence (rotation-canonicalized by its
/// `Hash`/`Eq`) and the evaluation depth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Sequence of the evaluated (sub-)complex.
    pub seq: ComplexSequence,
    /// Remaining traversal depth the record was computed at.
    pub depth: u32,
}

#[derive(Default)]
struct Lru {
    map: HashMap<CacheKey, Arc<ThermoRecord>>,
    order: VecDeque<CacheKey>, // front = LRU, back = MRU
    bytes: usize,
    capacity: usize,
}

impl Lru {
    fn touch_back(&mut self, k: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|x| x == k) {
            self.order.remove(pos);
        }
        self.order.push_back(k.clone());
    }

    fn shrink_to_fit(&mut self) {
        while self.bytes > self.capacity {
            let Some(evict) = self.order.pop_front() else { break };
            if let Some(rec) = self.map.remove(&evict) {
                self.bytes = self.bytes.saturating_sub(rec.memory_bytes());
            }
        }
    }
}

/// Concurrent LRU record cache.
pub struct RecordCache {
    inner: RwLock<Lru>,
}

impl RecordCache {
    /// A cache bounded by `capacity_bytes` of record storage. A zero
    /// budget disables storage entirely (every lookup misses).
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self { inner: RwLock::new(Lru { capacity: capacity_bytes, ..Lru::default() }) }
    }

    /// Look up a record; refreshes recency on hit.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ThermoRecord>> {
        let hit = {
            let guard = self.inner.read().ok()?;
            guard.map.get(key).cloned()
        };
        if hit.is_some() {
            if let Ok(mut guard) = self.inner.write() {
                guard.touch_back(key);
            }
        }
        hit
    }

    /// Insert a record, evicting least-recently-used entries past the byte
    /// budget. Last writer wins on a racing key.
    pub fn put(&self, key: CacheKey, record: Arc<ThermoRecord>) {
        let Ok(mut guard) = self.inner.write() else { return };
        if guard.capacity == 0 {
            return; // effectively disabled
        }
        if let Some(old) = guard.map.insert(key.clone(), record.clone()) {
            guard.bytes = guard.bytes.saturating_sub(old.memory_bytes());
        }
        guard.bytes += record.memory_bytes();
        guard.touch_back(&key);
        guard.shrink_to_fit();
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.map.clear();
            guard.order.clear();
            guard.bytes = 0;
        }
    }

    /// Bytes currently accounted to stored records.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.inner.read().map(|g| g.bytes).unwrap_or(0)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.map.len()).unwrap_or(0)
    }

    /// True iff nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtd_core::sparse::SparseAccum;
    use mtd_core::types::Sequence;

    fn record(nnz: usize) -> Arc<ThermoRecord> {
        let mut acc = SparseAccum::new(nnz + 1);
        for i in 0..nnz {
            acc.add_sym(i, i + 1, 0.5);
        }
        Arc::new(ThermoRecord { log_q: -1.0, probabilities: acc.finish(0.0) })
    }

    fn key(tag: &str, depth: u32) -> CacheKey {
        CacheKey { seq: ComplexSequence::new(vec![Sequence::parse(tag).unwrap()]), depth }
    }

    #[test]
    fn hit_and_miss() {
        let cache = RecordCache::new(1 << 20);
        let k = key("ACGT", 0);
        assert!(cache.get(&k).is_none());
        cache.put(k.clone(), record(4));
        assert!(cache.get(&k).is_some());
        assert!(cache.get(&key("ACGT", 1)).is_none());
    }

    #[test]
    fn eviction_is_lru() {
        let one = record(8).memory_bytes();
        let cache = RecordCache::new(2 * one + one / 2);
        cache.put(key("AAAA", 0), record(8));
        cache.put(key("CCCC", 0), record(8));
        let _ = cache.get(&key("AAAA", 0)); // refresh AAAA
        cache.put(key("GGGG", 0), record(8));
        assert!(cache.get(&key("AAAA", 0)).is_some());
        assert!(cache.get(&key("CCCC", 0)).is_none(), "LRU entry evicted");
    }

    #[test]
    fn reader_keeps_evicted_record() {
        let one = record(8).memory_bytes();
        let cache = RecordCache::new(one);
        let k = key("AAAA", 0);
        cache.put(k.clone(), record(8));
        let held = cache.get(&k).unwrap();
        cache.put(key("CCCC", 0), record(8)); // evicts AAAA
        assert!((held.log_q + 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_budget_disables_storage() {
        let cache = RecordCache::new(0);
        cache.put(key("AAAA", 0), record(2));
        assert!(cache.is_empty());
    }
}
