//! Two-Level Artifact Cache
//!
//! An in-process memory cache in front of journaled on-disk caches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        MemoryCache<V>                            │
//! │  ┌──────────────────────┐        ┌───────────────────────────┐   │
//! │  │ StrongCache          │ demote │ WeakCache                 │   │
//! │  │ byte-bounded LRU     │ ─────► │ reclaimable, looser LRU   │   │
//! │  └──────────────────────┘        └───────────────────────────┘   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                         DiskCache                                │
//! │  ┌──────────────────────┐        ┌───────────────────────────┐   │
//! │  │ Journal (mmap)       │        │ <hex fingerprint> files   │   │
//! │  │ order + size + flag  │ ◄────► │ reconciled at startup     │   │
//! │  └──────────────────────┘        └───────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both levels are keyed by [`Fingerprint`](crate::fingerprint::Fingerprint)
//! and share the hysteresis thresholds in [`HysteresisPolicy`].

mod disk;
mod entry;
mod journal;
mod memory;
mod metrics;
mod policy;
mod strong;
mod weak;

#[cfg(test)]
mod proptest;

pub use disk::{CacheInfo, DiskCache, DiskEntry, DiskStats, ReconcileReport, STAGING_DIR};
pub use entry::{MemoryEntry, Weighable};
pub use journal::{
    Journal, Record, DATA_START, FLAG_MASK, JOURNAL_NAME, MAGIC, PAGE_SIZE, RECORD_SIZE,
    SIZE_MASK, VERSION,
};
pub use memory::{MemoryCache, MemoryStats, TrimLevel, CRITICAL_MEMORY, LOW_MEMORY};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::{HysteresisPolicy, Watermark};
pub use strong::StrongCache;
pub use weak::{Reclaimer, WeakCache};
