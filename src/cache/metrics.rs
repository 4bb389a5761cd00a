//! Cache Metrics Collection
//!
//! Lock-free counters shared by the memory and disk caches.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,

    // Memory tiers
    demotions: AtomicU64,
    reclaimed: AtomicU64,

    // Disk reconciliation and journal maintenance
    adopted: AtomicU64,
    dropped: AtomicU64,
    compactions: AtomicU64,
    journal_resets: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_demotions(&self, count: u64) {
        self.demotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reclaimed(&self, count: u64) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_adopted(&self) {
        self.adopted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journal_reset(&self) {
        self.journal_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            adopted: self.adopted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            journal_resets: self.journal_resets.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.demotions,
            &self.reclaimed,
            &self.adopted,
            &self.dropped,
            &self.compactions,
            &self.journal_resets,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub demotions: u64,
    pub reclaimed: u64,
    pub adopted: u64,
    pub dropped: u64,
    pub compactions: u64,
    pub journal_resets: u64,
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_ratio(), 0.0);

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert_eq!(metrics.hit_ratio(), 0.75);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_insert();
        metrics.record_evictions(3);
        metrics.record_adopted();

        let snap = metrics.snapshot();
        assert_eq!(snap.inserts, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.adopted, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["hits"], 1);
    }
}
