//! Cache Context - Memory, Disk and Scheduler Behind One Load Call
//!
//! Owns one instance of every cache and the scheduler, and runs the load
//! flow:
//!
//! ```text
//! load(request)
//!   │ memory hit ─────────────────────────────────► completed handle
//!   ▼
//! submit_job(tag) ─► memory re-probe ─► result cache ─► produce
//!                                                        │
//!                                   memory put ◄─────────┤
//!                                   storage job ◄────────┘ (encode to disk)
//! ```
//!
//! Producing a value (fetching, decoding) is left to an [`ArtifactSource`].

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::buffer_pool::{BufferPool, BufferPoolStats};
use crate::cache::{DiskCache, DiskStats, MemoryCache, MemoryStats, TrimLevel, Weighable};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::scheduler::{
    CancelToken, HostId, JobHandle, Runner, Scheduler, SchedulerStats, WindowGuard,
};

/// Where a loaded value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadOrigin {
    Memory,
    ResultCache,
    Produced,
}

/// A loaded value and its origin
#[derive(Debug)]
pub struct Loaded<V> {
    pub value: Arc<V>,
    pub origin: LoadOrigin,
}

/// Which memory tier a request may read and fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryStrategy {
    /// Bypass the memory cache
    None,
    #[default]
    Strong,
    Weak,
}

/// One request for an artifact
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Logical cache key of the final artifact
    pub key: String,
    /// Coarser coalescing identity, e.g. the remote URL shared by several
    /// transformed results. Defaults to the key itself.
    pub tag: Option<String>,
    /// Route to the I/O executor
    pub wants_wide_window: bool,
    pub memory: MemoryStrategy,
    /// Read and fill the result disk cache
    pub disk: bool,
    pub host: Option<HostId>,
}

impl LoadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tag: None,
            wants_wide_window: false,
            memory: MemoryStrategy::Strong,
            disk: true,
            host: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn wide(mut self) -> Self {
        self.wants_wide_window = true;
        self
    }

    pub fn with_memory(mut self, memory: MemoryStrategy) -> Self {
        self.memory = memory;
        self
    }

    pub fn skip_disk(mut self) -> Self {
        self.disk = false;
        self
    }

    pub fn for_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.key)
    }

    fn coalescing_tag(&self) -> Fingerprint {
        match &self.tag {
            Some(tag) => Fingerprint::of(tag),
            None => self.fingerprint(),
        }
    }
}

/// What a producer may use while it runs
pub struct ProduceContext<'a> {
    pub token: &'a CancelToken,
    /// Cache of fetched source files
    pub source_cache: &'a DiskCache,
    pub buffers: &'a BufferPool,
    scheduler: &'a Scheduler,
}

impl ProduceContext<'_> {
    /// Widen the I/O window while blocked on a slow read
    pub fn widen(&self) -> WindowGuard {
        self.scheduler.widen()
    }
}

/// Produces, encodes and decodes artifacts of type `V`
pub trait ArtifactSource<V>: Send + Sync + 'static {
    /// Produce the value from scratch
    fn produce(&self, request: &LoadRequest, ctx: &ProduceContext<'_>) -> anyhow::Result<V>;

    /// Serialize a produced value for the result cache
    fn encode(&self, value: &V, out: &mut dyn Write) -> anyhow::Result<()>;

    /// Decode a value stored by [`encode`](Self::encode)
    fn load_cached(&self, path: &Path, flag: bool) -> anyhow::Result<V>;

    /// Hint bit stored alongside the encoded value
    fn flag(&self, _value: &V) -> bool {
        false
    }
}

/// Snapshot of every component
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub memory: MemoryStats,
    pub source_cache: DiskStats,
    pub result_cache: DiskStats,
    pub scheduler: SchedulerStats,
    pub buffers: BufferPoolStats,
}

/// Process-wide owner of the caches and the scheduler
pub struct CacheContext<V> {
    config: CoreConfig,
    memory: MemoryCache<V>,
    source_cache: DiskCache,
    result_cache: DiskCache,
    scheduler: Scheduler,
    buffers: BufferPool,
}

impl<V> CacheContext<V>
where
    V: Weighable + Send + Sync + 'static,
{
    /// Build every component from configuration, with an owned worker pool
    pub fn new(config: CoreConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let scheduler = Scheduler::new(&config.scheduler)?;
        Ok(Self::assemble(config, scheduler))
    }

    /// Build every component, running jobs on `runner`
    pub fn with_runner(config: CoreConfig, runner: Arc<dyn Runner>) -> Result<Arc<Self>> {
        config.validate()?;
        let scheduler = Scheduler::with_runner(&config.scheduler, runner);
        Ok(Self::assemble(config, scheduler))
    }

    fn assemble(config: CoreConfig, scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryCache::new(&config.memory, &config.policy),
            source_cache: DiskCache::from_config(
                config.source_dir(),
                &config.source_cache,
                &config.policy,
            ),
            result_cache: DiskCache::from_config(
                config.result_dir(),
                &config.result_cache,
                &config.policy,
            ),
            scheduler,
            buffers: BufferPool::new(),
            config,
        })
    }

    /// Load an artifact.
    ///
    /// A memory hit returns an already completed handle. Otherwise a job is
    /// submitted under the request's tag; concurrent requests for the same
    /// tag queue behind it and find its result in memory.
    pub fn load<S>(
        self: &Arc<Self>,
        request: LoadRequest,
        source: Arc<S>,
    ) -> JobHandle<Loaded<V>>
    where
        S: ArtifactSource<V>,
    {
        let fp = request.fingerprint();
        if let Some(value) = self.probe_memory(&request, &fp) {
            return JobHandle::completed(Loaded {
                value,
                origin: LoadOrigin::Memory,
            });
        }

        let tag = request.coalescing_tag();
        let wide = request.wants_wide_window;
        let host = request.host;
        let ctx = Arc::clone(self);
        let handle = self.scheduler.submit_job(tag, wide, move |token| {
            ctx.run_load(&request, fp, &source, token)
        });
        if let Some(host) = host {
            self.scheduler.observe_host(host, handle.ticket());
        }
        handle
    }

    fn probe_memory(&self, request: &LoadRequest, fp: &Fingerprint) -> Option<Arc<V>> {
        match request.memory {
            MemoryStrategy::None => None,
            MemoryStrategy::Strong | MemoryStrategy::Weak => self.memory.get(fp),
        }
    }

    fn remember(&self, request: &LoadRequest, fp: Fingerprint, value: &Arc<V>) {
        match request.memory {
            MemoryStrategy::None => {}
            MemoryStrategy::Strong => self.memory.put(fp, Arc::clone(value), false),
            MemoryStrategy::Weak => self.memory.put(fp, Arc::clone(value), true),
        }
    }

    fn run_load<S>(
        self: &Arc<Self>,
        request: &LoadRequest,
        fp: Fingerprint,
        source: &Arc<S>,
        token: &CancelToken,
    ) -> anyhow::Result<Loaded<V>>
    where
        S: ArtifactSource<V>,
    {
        token.check()?;
        // An earlier job with the same tag may have produced it meanwhile.
        if let Some(value) = self.probe_memory(request, &fp) {
            return Ok(Loaded {
                value,
                origin: LoadOrigin::Memory,
            });
        }

        if request.disk {
            if let Some(info) = self.result_cache.cache_info(&fp) {
                match source.load_cached(&info.path, info.flag) {
                    Ok(value) => {
                        let value = Arc::new(value);
                        self.remember(request, fp, &value);
                        return Ok(Loaded {
                            value,
                            origin: LoadOrigin::ResultCache,
                        });
                    }
                    Err(e) => {
                        warn!(
                            fingerprint = %fp,
                            error = %format!("{:#}", e),
                            "Dropping unreadable cached result"
                        );
                        self.result_cache.delete(&fp);
                    }
                }
            }
        }

        token.check()?;
        let produced = source.produce(
            request,
            &ProduceContext {
                token,
                source_cache: &self.source_cache,
                buffers: &self.buffers,
                scheduler: &self.scheduler,
            },
        )?;
        let value = Arc::new(produced);
        self.remember(request, fp, &value);

        if request.disk && self.result_cache.needs_save(&fp) {
            self.persist(fp, Arc::clone(&value), Arc::clone(source));
        }

        Ok(Loaded {
            value,
            origin: LoadOrigin::Produced,
        })
    }

    /// Encode `value` into the result cache on the storage executor
    fn persist<S>(self: &Arc<Self>, fp: Fingerprint, value: Arc<V>, source: Arc<S>)
    where
        S: ArtifactSource<V>,
    {
        let ctx = Arc::clone(self);
        // Nobody waits on the handle; the job runs regardless.
        drop(self.scheduler.submit_storage(fp, move |_| {
            let flag = source.flag(&value);
            let stored = ctx
                .result_cache
                .store_with(&fp, flag, |out| source.encode(&value, out));
            debug!(fingerprint = %fp, stored, "Persisted result");
            Ok(stored)
        }));
    }
}

impl<V> CacheContext<V> {
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryCache<V> {
        &self.memory
    }

    pub fn source_cache(&self) -> &DiskCache {
        &self.source_cache
    }

    pub fn result_cache(&self) -> &DiskCache {
        &self.result_cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Forward a host memory-pressure signal to the memory cache and pool
    pub fn trim_memory(&self, level: TrimLevel) {
        self.memory.trim_memory(level);
        if matches!(level, TrimLevel::Moderate | TrimLevel::Complete) {
            self.buffers.trim();
        }
    }

    /// Drop all in-memory state. Disk caches are unloaded and reload from
    /// their journals on next use.
    pub fn reset(&self) {
        self.memory.reset();
        self.buffers.clear();
        self.source_cache.unload();
        self.result_cache.unload();
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            memory: self.memory.stats(),
            source_cache: self.source_cache.stats(),
            result_cache: self.result_cache.stats(),
            scheduler: self.scheduler.stats(),
            buffers: self.buffers.stats(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
