//! Core Configuration
//!
//! Everything tunable about the caches and the scheduler, loadable from
//! JSON. Defaults match a typical mobile-class media loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::HysteresisPolicy;
use crate::error::{Error, Result};

/// Default strong memory tier capacity (64 MiB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 64 << 20;

/// Default source cache limits
pub const DEFAULT_SOURCE_MAX_COUNT: i64 = 4096;
pub const DEFAULT_SOURCE_CAPACITY: i64 = 256 << 20;

/// Default result cache limits
pub const DEFAULT_RESULT_MAX_COUNT: i64 = 8192;
pub const DEFAULT_RESULT_CAPACITY: i64 = 128 << 20;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root of the on-disk caches
    pub cache_dir: PathBuf,
    pub memory: MemoryCacheConfig,
    /// Cache of fetched source files
    pub source_cache: DiskCacheConfig,
    /// Cache of encoded results
    pub result_cache: DiskCacheConfig,
    pub scheduler: SchedulerConfig,
    pub policy: HysteresisPolicy,
    pub logging: LogConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("doodle"),
            memory: MemoryCacheConfig::default(),
            source_cache: DiskCacheConfig {
                max_count: DEFAULT_SOURCE_MAX_COUNT,
                capacity: DEFAULT_SOURCE_CAPACITY,
            },
            result_cache: DiskCacheConfig {
                max_count: DEFAULT_RESULT_MAX_COUNT,
                capacity: DEFAULT_RESULT_CAPACITY,
            },
            scheduler: SchedulerConfig::default(),
            policy: HysteresisPolicy::default(),
            logging: LogConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject clearly illegal values.
    ///
    /// Non-positive disk limits are accepted: they switch that cache off.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir must not be empty".into()));
        }
        self.source_cache.validate("source_cache")?;
        self.result_cache.validate("result_cache")?;
        self.scheduler.validate()?;
        self.policy.validate()?;
        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.cache_dir.join("source")
    }

    pub fn result_dir(&self) -> PathBuf {
        self.cache_dir.join("result")
    }
}

/// Memory cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Strong tier capacity in bytes; zero disables it
    pub capacity: u64,
    /// Weak tier bound in bytes; defaults to twice the strong capacity
    pub weak_capacity: Option<u64>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
            weak_capacity: None,
        }
    }
}

impl MemoryCacheConfig {
    pub fn effective_weak_capacity(&self) -> u64 {
        self.weak_capacity
            .unwrap_or_else(|| self.capacity.saturating_mul(2))
    }
}

/// Limits of one disk cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Maximum number of files; non-positive disables the cache
    pub max_count: i64,
    /// Maximum total bytes; non-positive disables the cache
    pub capacity: i64,
}

impl DiskCacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_count > 0 && self.capacity > 0
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.capacity > i32::MAX as i64 {
            return Err(Error::Config(format!(
                "{}.capacity {} exceeds {}",
                name,
                self.capacity,
                i32::MAX
            )));
        }
        if self.max_count > i32::MAX as i64 {
            return Err(Error::Config(format!(
                "{}.max_count {} exceeds {}",
                name,
                self.max_count,
                i32::MAX
            )));
        }
        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrent CPU-bound jobs
    pub cpu_window: usize,
    /// Starting (and minimum) I/O window
    pub io_window: usize,
    /// Upper bound the I/O window may be extended to
    pub io_max_window: usize,
    /// Threads of the built-in pool
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let cpu_window = cpus.clamp(2, 4);
        Self {
            cpu_window,
            io_window: cpu_window,
            io_max_window: cpu_window * 2,
            // CPU + widest I/O window + storage
            worker_threads: cpu_window * 3 + 1,
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.cpu_window == 0 {
            return Err(Error::Config("scheduler.cpu_window must be positive".into()));
        }
        if self.io_window == 0 {
            return Err(Error::Config("scheduler.io_window must be positive".into()));
        }
        if self.io_max_window < self.io_window {
            return Err(Error::Config(format!(
                "scheduler.io_max_window ({}) is below io_window ({})",
                self.io_max_window, self.io_window
            )));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config(
                "scheduler.worker_threads must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level directive (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
