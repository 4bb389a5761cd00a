//! Strong Tier - Byte-Bounded LRU
//!
//! Holds payloads by strong reference, ordered by recency. Capacity is
//! measured in approximate payload bytes, not entries.
//!
//! # Design
//!
//! - `put` keeps the first writer: an existing key is left untouched
//! - An insert that pushes the sum over capacity trims down to the memory
//!   low watermark (90% by default)
//! - Trimmed entries are handed back to the caller, never dropped here, so
//!   the facade can demote them after this tier's lock is released

use lru::LruCache;
use parking_lot::Mutex;

use super::entry::MemoryEntry;
use super::policy::Watermark;
use crate::fingerprint::Fingerprint;

/// Entries removed from the strong tier, oldest first
pub type Demoted<V> = Vec<(Fingerprint, MemoryEntry<V>)>;

struct StrongInner<V> {
    map: LruCache<Fingerprint, MemoryEntry<V>>,
    /// Sum of `size` over every entry in `map`
    sum: u64,
}

impl<V> StrongInner<V> {
    fn trim_to(&mut self, target: u64) -> Demoted<V> {
        let mut demoted = Vec::new();
        while self.sum > target {
            match self.map.pop_lru() {
                Some((fp, entry)) => {
                    self.sum -= entry.size();
                    demoted.push((fp, entry));
                }
                None => break,
            }
        }
        demoted
    }
}

/// Strong memory tier
pub struct StrongCache<V> {
    inner: Mutex<StrongInner<V>>,
    /// Capacity in bytes; zero disables the tier
    capacity: u64,
    low_watermark: Watermark,
}

impl<V> StrongCache<V> {
    pub fn new(capacity: u64, low_watermark: Watermark) -> Self {
        Self {
            inner: Mutex::new(StrongInner {
                map: LruCache::unbounded(),
                sum: 0,
            }),
            capacity,
            low_watermark,
        }
    }

    /// Look up and mark as most recently used
    pub fn get(&self, fp: &Fingerprint) -> Option<MemoryEntry<V>> {
        self.inner.lock().map.get(fp).cloned()
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.inner.lock().map.contains(fp)
    }

    /// Insert unless the key exists or the tier is disabled.
    ///
    /// Returns the entries trimmed to bring the tier back under its low
    /// watermark. The new entry itself can be among them when it alone
    /// exceeds the watermark.
    pub fn put(&self, fp: Fingerprint, entry: MemoryEntry<V>) -> Demoted<V> {
        if self.capacity == 0 {
            return Vec::new();
        }
        let mut inner = self.inner.lock();
        if inner.map.contains(&fp) {
            return Vec::new();
        }
        inner.sum += entry.size();
        inner.map.put(fp, entry);
        if inner.sum > self.capacity {
            let target = self.low_watermark.scale(self.capacity);
            inner.trim_to(target)
        } else {
            Vec::new()
        }
    }

    pub fn remove(&self, fp: &Fingerprint) -> Option<MemoryEntry<V>> {
        let mut inner = self.inner.lock();
        let entry = inner.map.pop(fp)?;
        inner.sum -= entry.size();
        Some(entry)
    }

    /// Evict least recently used entries until the sum is at or below `target`
    pub fn trim_to(&self, target: u64) -> Demoted<V> {
        self.inner.lock().trim_to(target)
    }

    /// Current byte sum
    pub fn size(&self) -> u64 {
        self.inner.lock().sum
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sum recomputed from the entries rather than the running counter
    #[cfg(test)]
    pub(crate) fn recomputed_size(&self) -> u64 {
        self.inner.lock().map.iter().map(|(_, e)| e.size()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
