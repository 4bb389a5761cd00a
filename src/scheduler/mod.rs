//! Job Scheduler
//!
//! Bounded-concurrency scheduling with per-tag coalescing.
//!
//! # Architecture
//!
//! ```text
//! submit_job(tag, wide, body)
//!        │
//!        ▼
//! ┌──────────────┐  wide   ┌──────────────────┐
//! │ TagExecutor  │ ──────► │ io  [min..max]   │ ──┐
//! │ one per tag  │         └──────────────────┘   │
//! │ FIFO behind  │ narrow  ┌──────────────────┐   ├──► Runner
//! │ a busy tag   │ ──────► │ cpu [fixed]      │ ──┤   (ThreadPool / Tokio)
//! └──────────────┘         └──────────────────┘   │
//! submit_storage ────────► ┌──────────────────┐   │
//!                          │ storage [1]      │ ──┘
//!                          └──────────────────┘
//! ```
//!
//! Executors add admission rules on top of a [`Runner`]; they own no
//! threads. Every accounting change (window slot, tag release) is tied to a
//! guard that is moved into the task, so a job that fails, panics or is
//! dropped unrun still releases what it holds.

mod host;
mod job;
mod pipe;
mod runner;
mod tag;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

pub use host::{HostEvent, HostId};
pub use job::{CancelToken, JobHandle, JobId, JobStatus, JobTicket, Priority};
pub use pipe::{ExecutorStats, PipeExecutor};
pub use runner::{Runner, Task, ThreadPool, TokioRunner};
pub use tag::TagExecutor;

use host::HostRegistry;
use job::{package, Job};

/// Occupancy of every executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub io: ExecutorStats,
    pub cpu: ExecutorStats,
    pub storage: ExecutorStats,
    pub active_tags: usize,
    pub tag_queued: usize,
    pub hosts: usize,
}

/// Widened I/O window, narrowed again on drop
#[must_use = "the window shrinks as soon as the guard is dropped"]
pub struct WindowGuard {
    executor: Arc<PipeExecutor>,
    widened: bool,
}

impl WindowGuard {
    /// False if the window was already at its maximum
    pub fn widened(&self) -> bool {
        self.widened
    }
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        if self.widened {
            self.executor.shrink_window();
        }
    }
}

/// Owns the executors and hands out job handles
pub struct Scheduler {
    io: Arc<PipeExecutor>,
    cpu: Arc<PipeExecutor>,
    storage: Arc<PipeExecutor>,
    tags: Arc<TagExecutor>,
    hosts: HostRegistry,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Scheduler backed by its own worker pool
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::new(config.worker_threads)?;
        Ok(Self::with_runner(config, Arc::new(pool)))
    }

    /// Scheduler on a caller-supplied runner
    pub fn with_runner(config: &SchedulerConfig, runner: Arc<dyn Runner>) -> Self {
        let io = PipeExecutor::new(
            "io",
            config.io_window,
            config.io_max_window,
            Arc::clone(&runner),
        );
        let cpu = PipeExecutor::fixed("cpu", config.cpu_window, Arc::clone(&runner));
        let storage = PipeExecutor::fixed("storage", 1, runner);
        let tags = TagExecutor::new(Arc::clone(&io), Arc::clone(&cpu));

        info!(
            cpu_window = config.cpu_window,
            io_window = config.io_window,
            io_max_window = config.io_max_window,
            "Scheduler started"
        );

        Self {
            io,
            cpu,
            storage,
            tags,
            hosts: HostRegistry::default(),
            next_id: AtomicU64::new(1),
        }
    }

    fn ticket(&self, tag: Fingerprint) -> JobTicket {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        JobTicket::new(id, tag)
    }

    /// Submit a job.
    ///
    /// Jobs sharing a non-empty `tag` run one at a time in submission order.
    /// An empty tag opts out of coalescing. `wants_wide_window` routes the
    /// job to the I/O executor, whose window can be widened while it blocks.
    pub fn submit_job<T, F>(
        &self,
        tag: Fingerprint,
        wants_wide_window: bool,
        body: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
    {
        let ticket = self.ticket(tag);
        let (run, handle) = package(ticket, body);
        let job = Job {
            id: handle.id(),
            run,
        };
        if tag.is_empty() {
            if wants_wide_window {
                self.io.execute(job);
            } else {
                self.cpu.execute(job);
            }
        } else {
            self.tags.execute(tag, job, wants_wide_window);
        }
        handle
    }

    /// Submit a job to the single-slot storage executor, used to persist
    /// results one at a time off the producing job
    pub fn submit_storage<T, F>(&self, tag: Fingerprint, body: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
    {
        let ticket = self.ticket(tag);
        let (run, handle) = package(ticket, body);
        self.storage.execute(Job {
            id: handle.id(),
            run,
        });
        handle
    }

    /// Cancel a job.
    ///
    /// A job still waiting is removed from its queue and its handle reports
    /// [`Error::JobCancelled`](crate::error::Error::JobCancelled). A running
    /// job only sees its token flip. Returns true if the job had not started.
    pub fn cancel(&self, ticket: &JobTicket) -> bool {
        ticket.token().cancel();
        if ticket.status() != JobStatus::Pending {
            return false;
        }

        let id = ticket.id();
        let tag = ticket.tag();
        let removed = (!tag.is_empty())
            .then(|| self.tags.remove(tag, id))
            .flatten()
            .or_else(|| self.io.remove(id))
            .or_else(|| self.cpu.remove(id))
            .or_else(|| self.storage.remove(id));

        // Not found means the task is already handed to the runner; the
        // cancelled token makes it skip the body.
        let pending = ticket.finish_pending();
        if removed.is_some() {
            debug!(job = %id, tag = %tag, "Cancelled waiting job");
        }
        drop(removed);
        pending
    }

    /// Move a waiting job between the normal and deprioritized lists.
    ///
    /// Returns false if the job is not waiting in an executor.
    pub fn reprioritize(&self, ticket: &JobTicket, priority: Priority) -> bool {
        let id = ticket.id();
        let executors = [&self.io, &self.cpu, &self.storage];
        match priority {
            Priority::Back => executors.iter().any(|e| e.demote(id)),
            Priority::Front => executors.iter().any(|e| e.promote(id)),
        }
    }

    /// Widen the I/O window by one; pair with [`shrink_window`](Self::shrink_window)
    pub fn extend_window(&self) -> bool {
        self.io.extend_window()
    }

    /// Narrow the I/O window by one
    pub fn shrink_window(&self) -> bool {
        self.io.shrink_window()
    }

    /// Widen the I/O window for as long as the guard lives
    pub fn widen(&self) -> WindowGuard {
        let widened = self.io.extend_window();
        WindowGuard {
            executor: Arc::clone(&self.io),
            widened,
        }
    }

    /// Associate a job with a host so host events reach it
    pub fn observe_host(&self, host: HostId, ticket: &JobTicket) {
        self.hosts.observe(host, ticket.clone());
    }

    /// Apply a host lifecycle change to that host's unfinished jobs.
    ///
    /// Returns how many jobs were affected.
    pub fn notify_host(&self, host: HostId, event: HostEvent) -> usize {
        let affected = match event {
            HostEvent::Pause => self
                .hosts
                .tickets(host)
                .iter()
                .filter(|t| self.reprioritize(t, Priority::Back))
                .count(),
            HostEvent::Resume => self
                .hosts
                .tickets(host)
                .iter()
                .filter(|t| self.reprioritize(t, Priority::Front))
                .count(),
            HostEvent::Destroy => self
                .hosts
                .remove(host)
                .iter()
                .filter(|t| self.cancel(t))
                .count(),
        };
        debug!(host = %host, event = ?event, affected, "Host event");
        affected
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            io: self.io.stats(),
            cpu: self.cpu.stats(),
            storage: self.storage.stats(),
            active_tags: self.tags.active_tags(),
            tag_queued: self.tags.queued(),
            hosts: self.hosts.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
