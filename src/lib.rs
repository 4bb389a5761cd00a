//! Doodle Core - Caching and Scheduling for a Media Loader
//!
//! Decides whether a requested artifact already exists in memory or on local
//! disk, and if not, schedules the work to produce it under bounded
//! concurrency, then persists the result so the next identical request is
//! free.
//!
//! # Architecture
//!
//! ```text
//! request ──► Fingerprint ──► MemoryCache ── hit ──► value
//!                                 │ miss
//!                                 ▼
//!                            Scheduler (tag-coalesced, windowed)
//!                                 │
//!                                 ▼
//!                  result DiskCache ── hit ──► decode
//!                                 │ miss
//!                                 ▼
//!                       ArtifactSource::produce ──► memory + disk
//! ```
//!
//! # Modules
//!
//! - [`fingerprint`] - 128-bit MurmurHash3 keys
//! - [`buffer_pool`] - Reusable I/O buffers
//! - [`cache`] - Tiered memory cache and journaled disk cache
//! - [`scheduler`] - Windowed executors and tag coalescing
//! - [`context`] - Process-wide owner running the load flow
//! - [`config`] - JSON-loadable configuration
//! - [`logging`] - `tracing` subscriber setup
//! - [`error`] - Error types

pub mod buffer_pool;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod scheduler;

// Re-export commonly used types
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use cache::{DiskCache, MemoryCache, TrimLevel, Weighable};
pub use config::CoreConfig;
pub use context::{ArtifactSource, CacheContext, LoadOrigin, LoadRequest, Loaded, MemoryStrategy};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use scheduler::{CancelToken, JobHandle, Priority, Scheduler};
