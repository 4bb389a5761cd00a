//! Journaled Disk Cache
//!
//! Tracks a bounded set of cached files in one directory. Each file is named
//! by the hex form of its fingerprint; a memory-mapped [`Journal`] next to
//! them records size, decode flag and access order.
//!
//! # Design
//!
//! - Lazy: nothing touches the filesystem until the first operation
//! - One lock per instance; the map and the in-memory index only change
//!   while it is held
//! - Count and byte limits with LRU eviction down to a low watermark
//! - A record leaves the index only after its file is confirmed gone
//! - Startup reconciliation adopts unindexed files and drops records whose
//!   file vanished, so a lost or corrupt journal costs recency, not data
//!
//! Failures are logged and degrade to cache misses; none of the operations
//! here return errors to the caller.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::journal::{Journal, Record, JOURNAL_NAME, PAGE_SIZE, RECORD_SIZE, SIZE_MASK};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::policy::{HysteresisPolicy, Watermark};
use crate::buffer_pool::{BufferPool, BASIC_BUFFER_SIZE};
use crate::config::DiskCacheConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Once the access counter reaches this value the journal is renumbered
const ORDER_LIMIT: u32 = u32::MAX - 1;

/// Subdirectory holding files being written before they are published.
/// Reconciliation only lists regular files, so it never sees them.
pub const STAGING_DIR: &str = "tmp";

/// Location and decode hint of a cached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub path: PathBuf,
    pub flag: bool,
}

/// A live record, as reported by [`DiskCache::entries`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskEntry {
    pub fingerprint: Fingerprint,
    pub size: u32,
    pub flag: bool,
    pub access_order: u32,
}

/// Outcome of one filesystem reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Unindexed files appended to the journal
    pub adopted: usize,
    /// Stray, empty or oversized files removed
    pub deleted: usize,
    /// Records whose backing file was missing
    pub dropped: usize,
    /// Records evicted by the capacity check after adoption
    pub evicted: usize,
    /// Records whose size was refreshed from the file on disk
    pub resized: usize,
}

/// Point-in-time view of a disk cache
#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    pub dir: PathBuf,
    pub enabled: bool,
    pub loaded: bool,
    pub count: usize,
    pub bytes: u64,
    pub max_count: u64,
    pub capacity: u64,
    pub tombstones: usize,
    pub metrics: MetricsSnapshot,
}

// =============================================================================
// In-memory state
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    slot: usize,
    order: u32,
    size_and_flag: u32,
}

impl IndexEntry {
    fn size(&self) -> u64 {
        (self.size_and_flag & SIZE_MASK) as u64
    }

    fn record(&self, fingerprint: Fingerprint) -> Record {
        Record {
            fingerprint,
            access_order: self.order,
            size_and_flag: self.size_and_flag,
        }
    }
}

#[derive(Default)]
struct DiskState {
    loaded: bool,
    journal: Option<Journal>,
    index: HashMap<Fingerprint, IndexEntry>,
    /// First unused slot
    end: usize,
    tombstones: usize,
    /// Next access order to hand out
    counter: u32,
    /// Sum of live record sizes
    sum: u64,
}

impl DiskState {
    fn journal(&mut self) -> io::Result<&mut Journal> {
        self.journal
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "journal not mapped"))
    }

    /// Rebuild the index from the mapped journal
    fn replay(&mut self) -> Result<()> {
        let records = self.journal()?.scan();
        self.index.clear();
        self.end = records.len();
        self.tombstones = 0;
        self.sum = 0;

        let mut max_order = 0u32;
        // Slots that are live on disk but must not be: empty sizes and the
        // older copy of a duplicated fingerprint
        let mut stale = Vec::new();
        for (slot, record) in records.into_iter().enumerate() {
            if record.is_tombstone() {
                self.tombstones += 1;
                continue;
            }
            if record.size() == 0 {
                stale.push(slot);
                continue;
            }
            max_order = max_order.max(record.access_order);
            let entry = IndexEntry {
                slot,
                order: record.access_order,
                size_and_flag: record.size_and_flag,
            };
            match self.index.get(&record.fingerprint).copied() {
                Some(existing) if existing.order >= entry.order => stale.push(slot),
                Some(existing) => {
                    stale.push(existing.slot);
                    self.sum = self.sum - existing.size() + entry.size();
                    self.index.insert(record.fingerprint, entry);
                }
                None => {
                    self.sum += entry.size();
                    self.index.insert(record.fingerprint, entry);
                }
            }
        }
        if !stale.is_empty() {
            let journal = self.journal()?;
            for slot in &stale {
                journal.tombstone(*slot);
            }
            self.tombstones += stale.len();
        }
        self.counter = max_order.saturating_add(1);
        Ok(())
    }

    /// Hand out the next access order, renumbering first if the counter is
    /// about to overflow
    fn next_order(&mut self) -> Result<u32> {
        if self.counter >= ORDER_LIMIT {
            self.compact()?;
        }
        let order = self.counter.max(1);
        self.counter = order + 1;
        Ok(order)
    }

    /// Rewrite the journal with only live records.
    ///
    /// Access orders are renumbered 1..=n preserving recency; records are
    /// laid out in ascending fingerprint order.
    fn compact(&mut self) -> Result<()> {
        let mut live: Vec<(Fingerprint, IndexEntry)> =
            self.index.iter().map(|(fp, e)| (*fp, *e)).collect();
        live.sort_by_key(|(_, e)| e.order);
        for (rank, (_, entry)) in live.iter_mut().enumerate() {
            entry.order = rank as u32 + 1;
        }
        live.sort_by_key(|(fp, _)| *fp);

        let records: Vec<Record> = live.iter().map(|(fp, e)| e.record(*fp)).collect();
        self.journal()?.rewrite(&records)?;

        for (slot, (fp, mut entry)) in live.into_iter().enumerate() {
            entry.slot = slot;
            self.index.insert(fp, entry);
        }
        self.end = records.len();
        self.tombstones = 0;
        self.counter = records.len() as u32 + 1;
        Ok(())
    }

    fn compact_if_sparse(&mut self) -> Result<bool> {
        if self.tombstones * RECORD_SIZE > PAGE_SIZE {
            self.compact()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn append(&mut self, fp: Fingerprint, size: u32, flag: bool) -> Result<()> {
        let order = self.next_order()?;
        let record = Record::new(fp, order, size, flag);
        let slot = self.end;
        self.journal()?.write(slot, &record)?;
        self.end += 1;
        self.sum += size as u64;
        self.index.insert(
            fp,
            IndexEntry {
                slot,
                order,
                size_and_flag: record.size_and_flag,
            },
        );
        Ok(())
    }

    /// Move a record to the most recently used position
    fn touch(&mut self, fp: &Fingerprint) -> Result<()> {
        let order = self.next_order()?;
        if let Some(entry) = self.index.get_mut(fp) {
            entry.order = order;
            let slot = entry.slot;
            self.journal()?.write_order(slot, order);
        }
        Ok(())
    }

    /// Replace the recorded size of a live record, keeping its flag
    fn resize(&mut self, fp: &Fingerprint, size: u32) -> Result<bool> {
        let Some(entry) = self.index.get(fp).copied() else {
            return Ok(false);
        };
        if entry.size() == size as u64 {
            return Ok(false);
        }
        let record = Record::new(*fp, entry.order, size, entry.record(*fp).flag());
        self.journal()?.write(entry.slot, &record)?;
        self.sum = self.sum - entry.size() + size as u64;
        self.index.insert(
            *fp,
            IndexEntry {
                size_and_flag: record.size_and_flag,
                ..entry
            },
        );
        Ok(true)
    }

    /// Drop a record from the index and tombstone its slot
    fn forget(&mut self, fp: &Fingerprint) -> Option<IndexEntry> {
        let entry = self.index.remove(fp)?;
        self.sum -= entry.size();
        if let Some(journal) = self.journal.as_mut() {
            journal.tombstone(entry.slot);
        }
        self.tombstones += 1;
        Some(entry)
    }
}

// =============================================================================
// Disk cache
// =============================================================================

/// Count- and byte-bounded file cache with an mmap journal
pub struct DiskCache {
    dir: PathBuf,
    /// Zero when disabled
    max_count: u64,
    /// Zero when disabled
    capacity: u64,
    low_watermark: Watermark,
    state: Mutex<DiskState>,
    metrics: CacheMetrics,
    /// Set once leftovers of an earlier process were removed from staging
    staging_swept: AtomicBool,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("max_count", &self.max_count)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DiskCache {
    /// Describe a cache rooted at `dir`. Nothing is read or created until
    /// the first operation.
    ///
    /// A non-positive `max_count` or `max_bytes` disables the cache: every
    /// operation becomes a no-op or a miss.
    pub fn open(dir: impl Into<PathBuf>, max_count: i64, max_bytes: i64) -> Self {
        let enabled = max_count > 0 && max_bytes > 0;
        Self {
            dir: dir.into(),
            max_count: if enabled { max_count as u64 } else { 0 },
            capacity: if enabled { max_bytes as u64 } else { 0 },
            low_watermark: HysteresisPolicy::default().disk_low_watermark,
            state: Mutex::new(DiskState::default()),
            metrics: CacheMetrics::new(),
            staging_swept: AtomicBool::new(false),
        }
    }

    /// Build from configuration
    pub fn from_config(
        dir: impl Into<PathBuf>,
        config: &DiskCacheConfig,
        policy: &HysteresisPolicy,
    ) -> Self {
        Self::open(dir, config.max_count, config.capacity).with_low_watermark(policy.disk_low_watermark)
    }

    /// Override the fraction of each limit eviction stops at
    pub fn with_low_watermark(mut self, watermark: Watermark) -> Self {
        self.low_watermark = watermark;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_count > 0 && self.capacity > 0
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the file for `fp` lives (whether or not it is cached)
    pub fn key_to_path(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(fp.to_hex())
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_NAME)
    }

    /// Where [`store_with`](Self::store_with) writes before publishing
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(STAGING_DIR)
    }

    /// Lock and make sure the journal is mapped and reconciled.
    ///
    /// Returns `None` when the cache is disabled or cannot be loaded.
    fn lock_loaded(&self) -> Option<parking_lot::MutexGuard<'_, DiskState>> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.state.lock();
        if !state.loaded {
            if let Err(e) = self.load(&mut state) {
                warn!(dir = %self.dir.display(), error = %e, "Failed to load disk cache journal");
                *state = DiskState::default();
                return None;
            }
        }
        Some(state)
    }

    fn load(&self, state: &mut DiskState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let (journal, fresh) = Journal::open(&self.journal_path())?;
        if fresh {
            self.metrics.record_journal_reset();
            warn!(
                path = %journal.path().display(),
                "Journal missing or corrupt, initialised a fresh one"
            );
        }
        state.journal = Some(journal);
        state.replay()?;
        if state.compact_if_sparse()? {
            self.metrics.record_compaction();
        }
        self.sweep_staging();
        let report = self.reconcile_locked(state);
        state.loaded = true;
        info!(
            dir = %self.dir.display(),
            entries = state.index.len(),
            bytes = state.sum,
            adopted = report.adopted,
            dropped = report.dropped,
            deleted = report.deleted,
            "Disk cache loaded"
        );
        Ok(())
    }

    /// Remove files a previous process left half-written.
    ///
    /// Only runs on the first load: every store loads the cache before it
    /// stages, so nothing of this instance can be in flight yet.
    fn sweep_staging(&self) {
        if self.staging_swept.swap(true, Ordering::AcqRel) {
            return;
        }
        let staging = self.staging_dir();
        match fs::remove_dir_all(&staging) {
            Ok(()) => debug!(dir = %staging.display(), "Cleared staging directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %staging.display(), error = %e, "Failed to clear staging directory"),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Path of the cached file for `fp`, bumping its recency
    pub fn lookup(&self, fp: &Fingerprint) -> Option<PathBuf> {
        self.cache_info(fp).map(|info| info.path)
    }

    /// Path and decode flag of the cached file for `fp`, bumping its recency.
    ///
    /// A record whose file has vanished is dropped and reported as a miss.
    pub fn cache_info(&self, fp: &Fingerprint) -> Option<CacheInfo> {
        if fp.is_empty() {
            return None;
        }
        let mut state = self.lock_loaded()?;
        let Some(entry) = state.index.get(fp).copied() else {
            self.metrics.record_miss();
            return None;
        };

        let path = self.key_to_path(fp);
        if !path.is_file() {
            state.forget(fp);
            self.metrics.record_dropped();
            self.metrics.record_miss();
            debug!(fingerprint = %fp, "Indexed file vanished, dropping record");
            return None;
        }
        if let Err(e) = state.touch(fp) {
            warn!(fingerprint = %fp, error = %e, "Failed to update access order");
        }
        self.metrics.record_hit();
        Some(CacheInfo {
            path,
            flag: entry.record(*fp).flag(),
        })
    }

    /// True iff a producer should write `fp` (enabled and not yet recorded)
    pub fn needs_save(&self, fp: &Fingerprint) -> bool {
        if fp.is_empty() {
            return false;
        }
        match self.lock_loaded() {
            Some(state) => !state.index.contains_key(fp),
            None => false,
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Record `file` as the cached artifact for `fp`.
    ///
    /// A file outside its canonical location is renamed into place. An
    /// existing record is only refreshed. Returns true when `fp` is cached
    /// afterwards.
    pub fn record(&self, fp: &Fingerprint, file: &Path, flag: bool) -> bool {
        if fp.is_empty() {
            return false;
        }
        let Some(mut state) = self.lock_loaded() else {
            return false;
        };

        if state.index.contains_key(fp) {
            if let Err(e) = state.touch(fp) {
                warn!(fingerprint = %fp, error = %e, "Failed to update access order");
            }
            return true;
        }

        let size = match fs::metadata(file) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return false,
            Err(e) => {
                debug!(path = %file.display(), error = %e, "Nothing to record");
                return false;
            }
        };
        if !self.accepts_size(size) {
            debug!(fingerprint = %fp, size, "File size outside cache bounds");
            return false;
        }

        let target = self.key_to_path(fp);
        if file != target.as_path() {
            if let Err(e) = fs::rename(file, &target) {
                warn!(
                    from = %file.display(),
                    to = %target.display(),
                    error = %e,
                    "Failed to move file into cache"
                );
                return false;
            }
        }

        if let Err(e) = state.append(*fp, size as u32, flag) {
            warn!(fingerprint = %fp, error = %e, "Failed to append journal record");
            return false;
        }
        self.metrics.record_insert();
        self.check_size(&mut state);
        state.index.contains_key(fp)
    }

    fn accepts_size(&self, size: u64) -> bool {
        size > 0 && size < self.capacity && size <= SIZE_MASK as u64
    }

    /// Remove the cached file and its record.
    ///
    /// The record is kept if the file exists but cannot be deleted.
    pub fn delete(&self, fp: &Fingerprint) -> bool {
        if fp.is_empty() {
            return false;
        }
        let Some(mut state) = self.lock_loaded() else {
            return false;
        };
        let path = self.key_to_path(fp);
        match remove_if_present(&path) {
            Ok(()) => {
                state.forget(fp);
                if let Ok(true) = state.compact_if_sparse() {
                    self.metrics.record_compaction();
                }
                true
            }
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Failed to delete cached file");
                false
            }
        }
    }

    /// Write a new artifact for `fp` and publish it atomically.
    ///
    /// The writer fills a uniquely named file under the staging directory;
    /// it is synced, then persisted into place and recorded under the lock.
    /// If another writer published `fp` first, this copy is discarded.
    /// Returns true when `fp` is cached afterwards.
    pub fn store_with<F>(&self, fp: &Fingerprint, flag: bool, write: F) -> bool
    where
        F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
    {
        if fp.is_empty() || !self.is_enabled() {
            return false;
        }
        if !self.needs_save(fp) {
            return self
                .lock_loaded()
                .map(|state| state.index.contains_key(fp))
                .unwrap_or(false);
        }

        match self.stage(fp, write) {
            Ok(staged) => self.publish(fp, staged, flag),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Failed to write cache file");
                false
            }
        }
    }

    /// Write into a fresh temp file. Dropping the result deletes it.
    fn stage<F>(&self, fp: &Fingerprint, write: F) -> anyhow::Result<NamedTempFile>
    where
        F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
    {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        let mut staged = tempfile::Builder::new()
            .prefix(&fp.to_hex())
            .tempfile_in(&staging)?;
        {
            let mut out = BufWriter::new(staged.as_file_mut());
            write(&mut out)?;
            out.flush()?;
        }
        staged.as_file().sync_all()?;
        Ok(staged)
    }

    fn publish(&self, fp: &Fingerprint, staged: NamedTempFile, flag: bool) -> bool {
        let Some(mut state) = self.lock_loaded() else {
            return false;
        };
        if state.index.contains_key(fp) {
            debug!(fingerprint = %fp, "Already published by another writer");
            return true;
        }

        let target = self.key_to_path(fp);
        if let Err(e) = staged.persist(&target) {
            warn!(
                fingerprint = %fp,
                to = %target.display(),
                error = %e.error,
                "Failed to publish cache file"
            );
            return false;
        }
        let size = match fs::metadata(&target) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Published file is unreadable");
                return false;
            }
        };
        if !self.accepts_size(size) {
            debug!(fingerprint = %fp, size, "File size outside cache bounds");
            let _ = remove_if_present(&target);
            return false;
        }

        if let Err(e) = state.append(*fp, size as u32, flag) {
            warn!(fingerprint = %fp, error = %e, "Failed to append journal record");
            let _ = remove_if_present(&target);
            return false;
        }
        self.metrics.record_insert();
        self.check_size(&mut state);
        state.index.contains_key(fp)
    }

    /// Copy a stream into the cache using a pooled buffer
    pub fn store_from_reader(
        &self,
        fp: &Fingerprint,
        flag: bool,
        reader: &mut dyn Read,
        pool: &BufferPool,
    ) -> bool {
        self.store_with(fp, flag, |out| {
            let mut buf = pool.acquire_guard(BASIC_BUFFER_SIZE);
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                out.write_all(&buf[..n])?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Capacity enforcement
    // =========================================================================

    /// Evict least recently used records once a limit is exceeded, down to
    /// the low watermark of both limits
    fn check_size(&self, state: &mut DiskState) -> usize {
        if state.sum <= self.capacity && state.index.len() as u64 <= self.max_count {
            return 0;
        }
        let byte_target = self.low_watermark.scale_ceil(self.capacity);
        let count_target = self.low_watermark.scale_ceil(self.max_count);

        let mut by_age: Vec<(Fingerprint, u32)> =
            state.index.iter().map(|(fp, e)| (*fp, e.order)).collect();
        by_age.sort_by_key(|(_, order)| *order);

        let mut evicted = 0;
        for (fp, _) in by_age {
            if state.sum <= byte_target && state.index.len() as u64 <= count_target {
                break;
            }
            match remove_if_present(&self.key_to_path(&fp)) {
                Ok(()) => {
                    state.forget(&fp);
                    evicted += 1;
                }
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "Eviction failed, keeping record");
                }
            }
        }

        if evicted > 0 {
            self.metrics.record_evictions(evicted as u64);
            match state.compact() {
                Ok(()) => self.metrics.record_compaction(),
                Err(e) => warn!(error = %e, "Failed to compact journal after eviction"),
            }
            debug!(
                evicted,
                remaining = state.index.len(),
                bytes = state.sum,
                "Evicted disk cache entries"
            );
        }
        evicted
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Cross-check the directory listing against the index.
    ///
    /// Running it twice without filesystem changes leaves the index as is.
    pub fn reconcile(&self) -> ReconcileReport {
        match self.lock_loaded() {
            Some(mut state) => self.reconcile_locked(&mut state),
            None => ReconcileReport::default(),
        }
    }

    fn reconcile_locked(&self, state: &mut DiskState) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list cache directory");
                return report;
            }
        };

        let mut on_disk = HashSet::new();
        for dir_entry in listing.flatten() {
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == JOURNAL_NAME {
                continue;
            }
            let meta = match dir_entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let path = dir_entry.path();

            let fp = match Fingerprint::from_hex(name) {
                Some(fp) if !fp.is_empty() => fp,
                _ => {
                    if remove_if_present(&path).is_ok() {
                        report.deleted += 1;
                    }
                    continue;
                }
            };

            let size = meta.len();
            if !self.accepts_size(size) {
                if remove_if_present(&path).is_ok() {
                    report.deleted += 1;
                    if state.forget(&fp).is_some() {
                        report.dropped += 1;
                    }
                }
                continue;
            }

            on_disk.insert(fp);
            if state.index.contains_key(&fp) {
                match state.resize(&fp, size as u32) {
                    Ok(true) => report.resized += 1,
                    Ok(false) => {}
                    Err(e) => warn!(fingerprint = %fp, error = %e, "Failed to refresh size"),
                }
                continue;
            }
            match state.append(fp, size as u32, false) {
                Ok(()) => {
                    report.adopted += 1;
                    self.metrics.record_adopted();
                }
                Err(e) => warn!(fingerprint = %fp, error = %e, "Failed to adopt file"),
            }
        }

        let missing: Vec<Fingerprint> = state
            .index
            .keys()
            .filter(|fp| !on_disk.contains(fp))
            .copied()
            .collect();
        for fp in missing {
            state.forget(&fp);
            report.dropped += 1;
            self.metrics.record_dropped();
        }

        if report.adopted > 0 || report.resized > 0 {
            report.evicted = self.check_size(state);
        }
        if let Ok(true) = state.compact_if_sparse() {
            self.metrics.record_compaction();
        }
        if let Some(journal) = state.journal.as_ref() {
            if let Err(e) = journal.flush() {
                warn!(error = %e, "Failed to flush journal");
            }
        }
        if report != ReconcileReport::default() {
            debug!(
                adopted = report.adopted,
                deleted = report.deleted,
                dropped = report.dropped,
                evicted = report.evicted,
                resized = report.resized,
                "Reconciled disk cache"
            );
        }
        report
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Live records, least recently used first. Does not bump recency.
    pub fn entries(&self) -> Vec<DiskEntry> {
        let Some(state) = self.lock_loaded() else {
            return Vec::new();
        };
        let mut entries: Vec<DiskEntry> = state
            .index
            .iter()
            .map(|(fp, e)| {
                let record = e.record(*fp);
                DiskEntry {
                    fingerprint: *fp,
                    size: record.size(),
                    flag: record.flag(),
                    access_order: record.access_order,
                }
            })
            .collect();
        entries.sort_by_key(|e| e.access_order);
        entries
    }

    pub fn len(&self) -> usize {
        self.lock_loaded().map(|s| s.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked byte sum of live records
    pub fn size(&self) -> u64 {
        self.lock_loaded().map(|s| s.sum).unwrap_or(0)
    }

    /// Flush pending journal writes to disk
    pub fn flush(&self) {
        let state = self.state.lock();
        if let Some(journal) = state.journal.as_ref() {
            if let Err(e) = journal.flush() {
                warn!(error = %e, "Failed to flush journal");
            }
        }
    }

    pub fn stats(&self) -> DiskStats {
        let state = self.state.lock();
        DiskStats {
            dir: self.dir.clone(),
            enabled: self.is_enabled(),
            loaded: state.loaded,
            count: state.index.len(),
            bytes: state.sum,
            max_count: self.max_count,
            capacity: self.capacity,
            tombstones: state.tombstones,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Unmap the journal and forget the index; the next operation reloads
    /// and reconciles from disk
    pub fn unload(&self) {
        let mut state = self.state.lock();
        if let Some(journal) = state.journal.as_ref() {
            let _ = journal.flush();
        }
        *state = DiskState::default();
    }
}

/// Delete a file, treating "already gone" as success
fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================
