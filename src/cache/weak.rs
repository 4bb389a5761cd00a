//! Weak Tier - Reclaimable Overflow
//!
//! Receives entries demoted from the strong tier and entries explicitly put
//! here by producers. Entries can disappear at any time:
//!
//! - the memory owner marks them reclaimed through a [`Reclaimer`]
//! - the tier's own byte bound (looser than the strong tier's) drops the
//!   least recently used entry
//!
//! Reclaim notifications are queued on a channel and applied lazily at the
//! start of every `get`/`put`; there is no background sweep.

use crossbeam::channel::{unbounded, Receiver, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use super::entry::MemoryEntry;
use crate::fingerprint::Fingerprint;

/// Handle used by the memory owner to reclaim weak-tier entries
#[derive(Clone)]
pub struct Reclaimer {
    tx: Sender<Fingerprint>,
}

impl Reclaimer {
    /// Mark an entry as reclaimed; it is removed on the next tier access
    pub fn reclaim(&self, fp: Fingerprint) {
        // The receiver lives as long as the tier; a send error means the
        // tier is gone and there is nothing left to reclaim.
        let _ = self.tx.send(fp);
    }
}

struct WeakInner<V> {
    map: LruCache<Fingerprint, MemoryEntry<V>>,
    sum: u64,
}

impl<V> WeakInner<V> {
    fn remove(&mut self, fp: &Fingerprint) -> bool {
        match self.map.pop(fp) {
            Some(entry) => {
                self.sum -= entry.size();
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, fp: Fingerprint, entry: MemoryEntry<V>, capacity: u64) {
        if capacity == 0 || entry.size() > capacity {
            return;
        }
        self.remove(&fp);
        self.sum += entry.size();
        self.map.put(fp, entry);
        while self.sum > capacity {
            match self.map.pop_lru() {
                Some((_, old)) => self.sum -= old.size(),
                None => break,
            }
        }
    }
}

/// Weak memory tier
pub struct WeakCache<V> {
    inner: Mutex<WeakInner<V>>,
    /// Byte bound; zero disables the tier
    capacity: u64,
    reclaim_tx: Sender<Fingerprint>,
    reclaim_rx: Receiver<Fingerprint>,
}

impl<V> WeakCache<V> {
    pub fn new(capacity: u64) -> Self {
        let (reclaim_tx, reclaim_rx) = unbounded();
        Self {
            inner: Mutex::new(WeakInner {
                map: LruCache::unbounded(),
                sum: 0,
            }),
            capacity,
            reclaim_tx,
            reclaim_rx,
        }
    }

    /// Handle for the memory owner
    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer {
            tx: self.reclaim_tx.clone(),
        }
    }

    /// Apply pending reclaim notifications; returns how many entries went away
    fn drain_reclaimed(&self, inner: &mut WeakInner<V>) -> u64 {
        let mut removed = 0;
        while let Ok(fp) = self.reclaim_rx.try_recv() {
            if inner.remove(&fp) {
                trace!(fingerprint = %fp, "weak entry reclaimed");
                removed += 1;
            }
        }
        removed
    }

    /// Look up an entry.
    ///
    /// Returns the entry and the number of reclaimed entries cleaned up.
    pub fn get(&self, fp: &Fingerprint) -> (Option<MemoryEntry<V>>, u64) {
        let mut inner = self.inner.lock();
        let reclaimed = self.drain_reclaimed(&mut inner);
        (inner.map.get(fp).cloned(), reclaimed)
    }

    /// Insert or replace an entry.
    ///
    /// Returns the number of reclaimed entries cleaned up.
    pub fn put(&self, fp: Fingerprint, entry: MemoryEntry<V>) -> u64 {
        let mut inner = self.inner.lock();
        let reclaimed = self.drain_reclaimed(&mut inner);
        inner.insert(fp, entry, self.capacity);
        reclaimed
    }

    /// Insert a batch under one lock acquisition
    pub fn put_all(&self, entries: Vec<(Fingerprint, MemoryEntry<V>)>) -> u64 {
        let mut inner = self.inner.lock();
        let reclaimed = self.drain_reclaimed(&mut inner);
        for (fp, entry) in entries {
            inner.insert(fp, entry, self.capacity);
        }
        reclaimed
    }

    pub fn remove(&self, fp: &Fingerprint) -> bool {
        self.inner.lock().remove(fp)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        while self.reclaim_rx.try_recv().is_ok() {}
        inner.map.clear();
        inner.sum = 0;
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().sum
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
