//! Property-Based Tests for the Caches
//!
//! # Test Properties
//!
//! 1. **Fingerprint**: deterministic, hex round-trips
//! 2. **Byte Sum**: the tracked disk sum always equals the recomputed sum
//! 3. **Capacity**: limits hold after every operation, and eviction removes
//!    exactly the least recently used records
//! 4. **Strong Tier**: tracked sum matches entries and stays within capacity

#![cfg(test)]

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;
use tempfile::TempDir;

use super::disk::DiskCache;
use super::entry::MemoryEntry;
use super::policy::Watermark;
use super::strong::StrongCache;
use crate::fingerprint::Fingerprint;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum DiskOp {
    Record { key: u8, size: u16 },
    Lookup { key: u8 },
    Delete { key: u8 },
}

fn disk_op_strategy() -> impl Strategy<Value = DiskOp> {
    prop_oneof![
        4 => (0u8..24, 1u16..400).prop_map(|(key, size)| DiskOp::Record { key, size }),
        2 => (0u8..24).prop_map(|key| DiskOp::Lookup { key }),
        1 => (0u8..24).prop_map(|key| DiskOp::Delete { key }),
    ]
}

fn key_fp(key: u8) -> Fingerprint {
    Fingerprint::of(&format!("prop-key-{}", key))
}

// =============================================================================
// LRU Model
// =============================================================================

/// Reference model: front is least recently used
struct Model {
    entries: VecDeque<(Fingerprint, u64)>,
    max_count: u64,
    capacity: u64,
}

impl Model {
    fn sum(&self) -> u64 {
        self.entries.iter().map(|(_, s)| s).sum()
    }

    fn position(&self, fp: &Fingerprint) -> Option<usize> {
        self.entries.iter().position(|(f, _)| f == fp)
    }

    fn touch(&mut self, fp: &Fingerprint) -> bool {
        match self.position(fp) {
            Some(i) => {
                if let Some(entry) = self.entries.remove(i) {
                    self.entries.push_back(entry);
                }
                true
            }
            None => false,
        }
    }

    fn record(&mut self, fp: Fingerprint, size: u64) {
        if self.touch(&fp) || size == 0 || size >= self.capacity {
            return;
        }
        self.entries.push_back((fp, size));
        if self.sum() > self.capacity || self.entries.len() as u64 > self.max_count {
            let wm = Watermark::new(7, 8);
            let byte_target = wm.scale_ceil(self.capacity);
            let count_target = wm.scale_ceil(self.max_count);
            while self.sum() > byte_target || self.entries.len() as u64 > count_target {
                self.entries.pop_front();
            }
        }
    }

    fn delete(&mut self, fp: &Fingerprint) {
        if let Some(i) = self.position(fp) {
            self.entries.remove(i);
        }
    }
}

// =============================================================================
// Fingerprint Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the same key always yields the same fingerprint.
    #[test]
    fn prop_fingerprint_deterministic(key in ".*") {
        prop_assert_eq!(Fingerprint::of(&key), Fingerprint::of(&key));
    }

    /// Property: hex encoding round-trips for every value.
    #[test]
    fn prop_hex_round_trip(h1 in any::<u64>(), h2 in any::<u64>()) {
        let fp = Fingerprint::new(h1, h2);
        let hex = fp.to_hex();
        prop_assert_eq!(hex.len(), 32);
        prop_assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }

    /// Property: strings that are not 32 lowercase hex digits never parse.
    #[test]
    fn prop_from_hex_rejects_wrong_length(s in "[0-9a-f]{0,31}") {
        prop_assert_eq!(Fingerprint::from_hex(&s), None);
    }
}

// =============================================================================
// Disk Cache Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: after every operation the tracked sum equals both the sum
    /// of live record sizes and the sum of the backing file sizes, limits
    /// hold, and the live set matches an LRU model exactly.
    #[test]
    fn prop_disk_cache_matches_lru_model(
        max_count in 2i64..10,
        capacity in 400i64..2000,
        ops in prop::collection::vec(disk_op_strategy(), 1..40),
    ) {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), max_count, capacity);
        let mut model = Model {
            entries: VecDeque::new(),
            max_count: max_count as u64,
            capacity: capacity as u64,
        };

        for op in ops {
            match op {
                DiskOp::Record { key, size } => {
                    let fp = key_fp(key);
                    let path = cache.key_to_path(&fp);
                    if model.position(&fp).is_none() {
                        fs::create_dir_all(dir.path()).unwrap();
                        fs::write(&path, vec![0u8; size as usize]).unwrap();
                    }
                    let cached = cache.record(&fp, &path, false);
                    model.record(fp, size as u64);
                    prop_assert_eq!(cached, model.position(&fp).is_some());
                    if !cached {
                        let _ = fs::remove_file(&path);
                    }
                }
                DiskOp::Lookup { key } => {
                    let fp = key_fp(key);
                    let found = cache.lookup(&fp).is_some();
                    prop_assert_eq!(found, model.touch(&fp));
                }
                DiskOp::Delete { key } => {
                    let fp = key_fp(key);
                    prop_assert!(cache.delete(&fp));
                    model.delete(&fp);
                }
            }

            let entries = cache.entries();
            let tracked = cache.size();
            let recorded: u64 = entries.iter().map(|e| e.size as u64).sum();
            let on_disk: u64 = entries
                .iter()
                .map(|e| fs::metadata(cache.key_to_path(&e.fingerprint)).unwrap().len())
                .sum();
            prop_assert_eq!(tracked, recorded);
            prop_assert_eq!(tracked, on_disk);
            prop_assert!(entries.len() as i64 <= max_count);
            prop_assert!(tracked as i64 <= capacity);

            let live: Vec<Fingerprint> = entries.iter().map(|e| e.fingerprint).collect();
            let expected: Vec<Fingerprint> = model.entries.iter().map(|(fp, _)| *fp).collect();
            prop_assert_eq!(live, expected);
        }
    }

    /// Property: a reload from the journal reproduces the same index.
    #[test]
    fn prop_reload_preserves_index(
        ops in prop::collection::vec(disk_op_strategy(), 1..30),
    ) {
        let dir = TempDir::new().unwrap();
        let before = {
            let cache = DiskCache::open(dir.path(), 8, 1500);
            for op in ops {
                match op {
                    DiskOp::Record { key, size } => {
                        let fp = key_fp(key);
                        let path = cache.key_to_path(&fp);
                        if cache.needs_save(&fp) {
                            fs::write(&path, vec![1u8; size as usize]).unwrap();
                        }
                        cache.record(&fp, &path, key % 2 == 0);
                    }
                    DiskOp::Lookup { key } => {
                        cache.lookup(&key_fp(key));
                    }
                    DiskOp::Delete { key } => {
                        cache.delete(&key_fp(key));
                    }
                }
            }
            cache.flush();
            cache.entries()
        };

        let cache = DiskCache::open(dir.path(), 8, 1500);
        let after = cache.entries();
        let strip = |v: &[super::disk::DiskEntry]| -> Vec<(Fingerprint, u32, bool)> {
            v.iter().map(|e| (e.fingerprint, e.size, e.flag)).collect()
        };
        prop_assert_eq!(strip(&before[..]), strip(&after[..]));
    }
}

// =============================================================================
// Memory Tier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: the strong tier's running sum matches its entries and never
    /// exceeds capacity once a put returns.
    #[test]
    fn prop_strong_tier_sum_and_capacity(
        capacity in 1u64..5000,
        puts in prop::collection::vec((0u16..64, 1usize..800), 1..100),
    ) {
        let cache: StrongCache<Bytes> = StrongCache::new(capacity, Watermark::new(9, 10));
        for (key, len) in puts {
            let fp = Fingerprint::of(&format!("m{}", key));
            let demoted = cache.put(fp, MemoryEntry::new(Arc::new(Bytes::from(vec![0u8; len]))));
            let demoted_bytes: u64 = demoted.iter().map(|(_, e)| e.size()).sum();
            prop_assert!(demoted.iter().all(|(_, e)| e.size() > 0));
            prop_assert!(demoted_bytes <= capacity + len as u64);
            prop_assert_eq!(cache.size(), cache.recomputed_size());
            prop_assert!(cache.size() <= capacity);
        }
    }
}
