//! Doodle Core Integration Tests
//!
//! End-to-end scenarios across the public API:
//! - Disk cache eviction, journal recovery and reconciliation
//! - Scheduler window bounds and tag ordering
//! - Runners (worker pool and Tokio)
//! - The full load flow through `CacheContext`

use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use doodle_core::Fingerprint;

fn write_file(dir: &std::path::Path, fp: &Fingerprint, len: usize) -> std::path::PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(fp.to_hex());
    fs::write(&path, vec![7u8; len]).unwrap();
    path
}

// =============================================================================
// Disk Cache
// =============================================================================

mod disk_tests {
    use super::*;
    use doodle_core::cache::{DiskCache, ReconcileReport, JOURNAL_NAME};

    #[test]
    fn test_count_limit_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 2, 1 << 20);
        let [a, b, c] = ["A", "B", "C"].map(Fingerprint::of);

        for fp in [a, b, c] {
            let path = write_file(dir.path(), &fp, 100);
            assert!(cache.record(&fp, &path, false));
        }

        assert_eq!(cache.lookup(&a), None);
        assert!(cache.lookup(&b).is_some());
        assert!(cache.lookup(&c).is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 200);
        assert!(!dir.path().join(a.to_hex()).exists());
    }

    #[test]
    fn test_lookup_refreshes_recency() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 2, 1 << 20);
        let [a, b, c] = ["A", "B", "C"].map(Fingerprint::of);

        for fp in [a, b] {
            let path = write_file(dir.path(), &fp, 100);
            cache.record(&fp, &path, false);
        }
        assert!(cache.lookup(&a).is_some());
        let path = write_file(dir.path(), &c, 100);
        cache.record(&c, &path, false);

        assert!(cache.lookup(&a).is_some());
        assert_eq!(cache.lookup(&b), None);
    }

    #[test]
    fn test_truncated_journal_readopts_files() {
        let dir = TempDir::new().unwrap();
        let keys: Vec<Fingerprint> = (0..4).map(|i| Fingerprint::of(&format!("k{}", i))).collect();
        {
            let cache = DiskCache::open(dir.path(), 16, 1 << 20);
            for fp in &keys {
                let path = write_file(dir.path(), fp, 64);
                assert!(cache.record(fp, &path, true));
            }
            cache.flush();
        }

        fs::write(dir.path().join(JOURNAL_NAME), b"\x01\x02\x03\x04\x05").unwrap();

        let cache = DiskCache::open(dir.path(), 16, 1 << 20);
        for fp in &keys {
            let info = cache.cache_info(fp).expect("re-adopted");
            assert!(info.path.exists());
            // The decode hint lived in the lost journal.
            assert!(!info.flag);
        }
        assert_eq!(cache.len(), keys.len());
        assert_eq!(cache.size(), 64 * keys.len() as u64);

        let stats = cache.stats();
        assert_eq!(stats.metrics.adopted, keys.len() as u64);
        assert!(stats.metrics.journal_resets >= 1);
        let journal_len = fs::metadata(dir.path().join(JOURNAL_NAME)).unwrap().len();
        assert_eq!(journal_len % 4096, 0);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 16, 1 << 20);
        let kept = Fingerprint::of("kept");
        let path = write_file(dir.path(), &kept, 10);
        cache.record(&kept, &path, false);

        // An orphan to adopt, a stray to delete and a record to drop.
        write_file(dir.path(), &Fingerprint::of("orphan"), 20);
        fs::write(dir.path().join("not-a-fingerprint"), b"junk").unwrap();
        let lost = Fingerprint::of("lost");
        let lost_path = write_file(dir.path(), &lost, 30);
        cache.record(&lost, &lost_path, false);
        fs::remove_file(&lost_path).unwrap();

        let first = cache.reconcile();
        assert_eq!(first.adopted, 1);
        assert_eq!(first.deleted, 1);
        assert_eq!(first.dropped, 1);
        let index = cache.entries();

        let second = cache.reconcile();
        assert_eq!(second, ReconcileReport::default());
        assert_eq!(cache.entries(), index);
        assert_eq!(cache.size(), 30);
    }

    #[test]
    fn test_racing_writers_keep_size_in_sync() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 16, 1 << 20);
        let fp = Fingerprint::of("contended");

        std::thread::scope(|scope| {
            for len in 1..=8usize {
                let cache = &cache;
                scope.spawn(move || {
                    cache.store_with(&fp, false, |w| {
                        for _ in 0..len {
                            w.write_all(&[len as u8; 512])?;
                            std::thread::yield_now();
                        }
                        Ok(())
                    })
                });
            }
        });

        let path = cache.lookup(&fp).expect("one writer published");
        let on_disk = fs::metadata(&path).unwrap().len();
        assert_eq!(cache.size(), on_disk);
        assert_eq!(cache.len(), 1);
        assert_eq!(fs::read_dir(cache.staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unload_during_store_keeps_the_write() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 16, 1 << 20);
        let fp = Fingerprint::of("reloaded");

        assert!(cache.store_with(&fp, true, |w| {
            w.write_all(b"first half ")?;
            cache.unload();
            assert!(cache.is_empty());
            w.write_all(b"second half")?;
            Ok(())
        }));

        let info = cache.cache_info(&fp).unwrap();
        assert!(info.flag);
        assert_eq!(fs::read(info.path).unwrap(), b"first half second half");
        assert_eq!(cache.stats().metrics.adopted, 0);
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path().join("off"), 0, 1 << 20);
        let fp = Fingerprint::of("x");
        let path = write_file(dir.path(), &fp, 10);

        assert!(!cache.is_enabled());
        assert!(!cache.record(&fp, &path, false));
        assert_eq!(cache.lookup(&fp), None);
        assert!(!dir.path().join("off").exists());
    }
}

// =============================================================================
// Scheduler
// =============================================================================

mod scheduler_tests {
    use super::*;
    use doodle_core::config::SchedulerConfig;
    use doodle_core::scheduler::{Scheduler, TokioRunner};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            cpu_window: 2,
            io_window: 2,
            io_max_window: 4,
            worker_threads: 6,
        }
    }

    #[test]
    fn test_same_tag_runs_in_submission_order() {
        let scheduler = Scheduler::new(&config()).unwrap();
        let tag = Fingerprint::of("T");
        let order = Arc::new(Mutex::new(Vec::new()));

        let started = Instant::now();
        let first = {
            let order = Arc::clone(&order);
            scheduler.submit_job(tag, false, move |_| {
                order.lock().push("start-1");
                std::thread::sleep(Duration::from_millis(50));
                order.lock().push("end-1");
                Ok("x")
            })
        };
        let second = {
            let order = Arc::clone(&order);
            scheduler.submit_job(tag, false, move |_| {
                order.lock().push("start-2");
                Ok("y")
            })
        };

        assert_eq!(first.wait().unwrap(), "x");
        assert_eq!(second.wait().unwrap(), "y");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(*order.lock(), vec!["start-1", "end-1", "start-2"]);
    }

    #[test]
    fn test_window_bounds_concurrency() {
        let scheduler = Scheduler::new(&config()).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                let tag = Fingerprint::of(&format!("job-{}", i));
                scheduler.submit_job(tag, false, move |_| {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_extend_then_shrink_restores_window() {
        let scheduler = Scheduler::new(&config()).unwrap();
        let before = scheduler.stats().io.window;
        assert!(scheduler.extend_window());
        assert_eq!(scheduler.stats().io.window, before + 1);
        assert!(scheduler.shrink_window());
        assert_eq!(scheduler.stats().io.window, before);
    }

    #[test]
    fn test_wait_timeout_leaves_job_running() {
        let scheduler = Scheduler::new(&config()).unwrap();
        let handle = scheduler.submit_job(Fingerprint::of("slow"), true, |_| {
            std::thread::sleep(Duration::from_millis(40));
            Ok(5)
        });
        assert!(handle.wait_timeout(Duration::from_millis(1)).is_err());
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)).unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_runner() {
        let runner = TokioRunner::current().expect("inside a runtime");
        let scheduler = Scheduler::with_runner(&config(), Arc::new(runner));
        let handle = scheduler.submit_job(Fingerprint::of("tokio"), false, |_| Ok(21 * 2));
        let value = tokio::task::spawn_blocking(move || handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
    }
}

// =============================================================================
// Load Flow
// =============================================================================

mod context_tests {
    use super::*;
    use doodle_core::config::{CoreConfig, DiskCacheConfig};
    use doodle_core::context::ProduceContext;
    use doodle_core::{ArtifactSource, CacheContext, LoadOrigin, LoadRequest};
    use std::path::Path;

    /// Downloads into the source cache, then "decodes" by reversing bytes
    #[derive(Default)]
    struct ReversingSource {
        downloads: AtomicUsize,
    }

    impl ArtifactSource<Bytes> for ReversingSource {
        fn produce(
            &self,
            request: &LoadRequest,
            ctx: &ProduceContext<'_>,
        ) -> anyhow::Result<Bytes> {
            let url = request.tag.clone().unwrap_or_else(|| request.key.clone());
            let source_fp = Fingerprint::of(&url);
            if ctx.source_cache.needs_save(&source_fp) {
                let _wide = ctx.widen();
                self.downloads.fetch_add(1, Ordering::SeqCst);
                let mut body: &[u8] = url.as_bytes();
                ctx.source_cache
                    .store_from_reader(&source_fp, false, &mut body, ctx.buffers);
            }
            ctx.token.check()?;
            let path = ctx
                .source_cache
                .lookup(&source_fp)
                .ok_or_else(|| anyhow::anyhow!("source missing"))?;
            let mut data = fs::read(path)?;
            data.reverse();
            Ok(Bytes::from(data))
        }

        fn encode(&self, value: &Bytes, out: &mut dyn Write) -> anyhow::Result<()> {
            out.write_all(value)?;
            Ok(())
        }

        fn load_cached(&self, path: &Path, _flag: bool) -> anyhow::Result<Bytes> {
            Ok(Bytes::from(fs::read(path)?))
        }
    }

    #[test]
    fn test_shared_source_downloaded_once() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig {
            cache_dir: dir.path().to_path_buf(),
            source_cache: DiskCacheConfig {
                max_count: 8,
                capacity: 1 << 16,
            },
            ..CoreConfig::default()
        };
        let ctx: Arc<CacheContext<Bytes>> = CacheContext::new(config).unwrap();
        let source = Arc::new(ReversingSource::default());

        let small = ctx.load(
            LoadRequest::new("abc#small").with_tag("abc").wide(),
            source.clone(),
        );
        let large = ctx.load(
            LoadRequest::new("abc#large").with_tag("abc").wide(),
            source.clone(),
        );

        let small = small.wait().unwrap();
        let large = large.wait().unwrap();
        assert_eq!(&small.value[..], b"cba");
        assert_eq!(small.origin, LoadOrigin::Produced);
        assert_eq!(large.origin, LoadOrigin::Produced);
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.source_cache().len(), 1);

        let again = ctx.load(LoadRequest::new("abc#small"), source.clone());
        assert_eq!(again.wait().unwrap().origin, LoadOrigin::Memory);
    }
}
