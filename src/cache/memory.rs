//! Tiered Memory Cache
//!
//! Facade over the strong and weak tiers. Lookups go strong first, then weak.
//! Entries leaving the strong tier are always demoted into the weak tier,
//! never dropped outright; the weak tier may then lose them at any time.
//!
//! The two tiers have independent locks and never call into each other. A
//! demotion batch is collected under the strong lock and inserted into the
//! weak tier after that lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::entry::{MemoryEntry, Weighable};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::policy::HysteresisPolicy;
use super::strong::{Demoted, StrongCache};
use super::weak::{Reclaimer, WeakCache};
use crate::config::MemoryCacheConfig;
use crate::fingerprint::Fingerprint;

/// Free memory below which the strong tier is trimmed in the background
pub const LOW_MEMORY: u64 = 10 << 20;

/// Free memory below which the strong tier is emptied
pub const CRITICAL_MEMORY: u64 = 4 << 20;

/// Memory pressure reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrimLevel {
    /// Foreground process, memory critically low
    RunningCritical,
    /// Process moved to the background
    Background,
    /// Process in the middle of the background list
    Moderate,
    /// Process will be killed next
    Complete,
}

/// Point-in-time view of both tiers
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub capacity: u64,
    pub strong_bytes: u64,
    pub strong_entries: usize,
    pub weak_bytes: u64,
    pub weak_entries: usize,
    pub metrics: MetricsSnapshot,
}

/// Two-tier in-memory cache keyed by fingerprint
pub struct MemoryCache<V> {
    strong: StrongCache<V>,
    weak: WeakCache<V>,
    policy: HysteresisPolicy,
    /// Collapses concurrent `on_available_memory` checks into one
    checking: AtomicBool,
    metrics: CacheMetrics,
}

impl<V: Weighable> MemoryCache<V> {
    pub fn new(config: &MemoryCacheConfig, policy: &HysteresisPolicy) -> Self {
        Self {
            strong: StrongCache::new(config.capacity, policy.memory_low_watermark),
            weak: WeakCache::new(config.effective_weak_capacity()),
            policy: policy.clone(),
            checking: AtomicBool::new(false),
            metrics: CacheMetrics::new(),
        }
    }

    /// Look up a payload, strong tier first
    pub fn get(&self, fp: &Fingerprint) -> Option<Arc<V>> {
        if fp.is_empty() {
            return None;
        }
        if let Some(entry) = self.strong.get(fp) {
            self.metrics.record_hit();
            return Some(entry.into_payload());
        }
        let (found, reclaimed) = self.weak.get(fp);
        self.metrics.record_reclaimed(reclaimed);
        match found {
            Some(entry) => {
                self.metrics.record_hit();
                Some(entry.into_payload())
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Store a payload in the requested tier.
    ///
    /// The strong tier keeps the first writer; the weak tier replaces.
    pub fn put(&self, fp: Fingerprint, value: Arc<V>, to_weak: bool) {
        if fp.is_empty() {
            return;
        }
        let entry = MemoryEntry::new(value);
        self.metrics.record_insert();
        if to_weak {
            let reclaimed = self.weak.put(fp, entry);
            self.metrics.record_reclaimed(reclaimed);
        } else {
            let demoted = self.strong.put(fp, entry);
            self.demote(demoted);
        }
    }
}

impl<V> MemoryCache<V> {
    fn demote(&self, demoted: Demoted<V>) {
        if demoted.is_empty() {
            return;
        }
        let count = demoted.len() as u64;
        let reclaimed = self.weak.put_all(demoted);
        self.metrics.record_demotions(count);
        self.metrics.record_reclaimed(reclaimed);
        debug!(
            demoted = count,
            strong_bytes = self.strong.size(),
            "Demoted strong entries to weak tier"
        );
    }

    /// Evict strong entries into the weak tier until at most `target` bytes remain
    pub fn trim(&self, target: u64) {
        let demoted = self.strong.trim_to(target);
        self.demote(demoted);
    }

    /// Move every strong entry into the weak tier
    pub fn clear(&self) {
        self.trim(0);
    }

    /// React to a host memory-pressure signal
    pub fn trim_memory(&self, level: TrimLevel) {
        match level {
            TrimLevel::Moderate | TrimLevel::Complete => self.clear(),
            TrimLevel::RunningCritical | TrimLevel::Background => {
                let half = self.policy.background_trim.scale(self.strong.size());
                let floor = self.policy.min_trim_size(self.strong.capacity());
                self.trim(half.max(floor));
            }
        }
    }

    /// Map a free-memory reading to a trim.
    ///
    /// Returns the level applied, or `None` when memory is fine or another
    /// check is already running.
    pub fn on_available_memory(&self, available: u64) -> Option<TrimLevel> {
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let applied = if available < CRITICAL_MEMORY {
            self.clear();
            Some(TrimLevel::Complete)
        } else if available < LOW_MEMORY {
            self.trim_memory(TrimLevel::Background);
            Some(TrimLevel::Background)
        } else {
            None
        };
        self.checking.store(false, Ordering::Release);
        applied
    }

    /// Remove a key from both tiers
    pub fn invalidate(&self, fp: &Fingerprint) {
        self.strong.remove(fp);
        self.weak.remove(fp);
    }

    /// Drop everything, including the weak tier
    pub fn reset(&self) {
        self.strong.trim_to(0);
        self.weak.clear();
        self.metrics.reset();
    }

    /// Handle for marking weak entries as reclaimed
    pub fn reclaimer(&self) -> Reclaimer {
        self.weak.reclaimer()
    }

    pub fn strong(&self) -> &StrongCache<V> {
        &self.strong
    }

    pub fn weak(&self) -> &WeakCache<V> {
        &self.weak
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            capacity: self.strong.capacity(),
            strong_bytes: self.strong.size(),
            strong_entries: self.strong.len(),
            weak_bytes: self.weak.size(),
            weak_entries: self.weak.len(),
            metrics: self.metrics.snapshot(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
