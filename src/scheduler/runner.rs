//! Job Runners
//!
//! The executors decide *when* a job may run; a [`Runner`] decides *where*.
//! Two runners are provided: a fixed pool of OS threads fed by a channel, and
//! an adapter onto a Tokio runtime's blocking pool.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// Type-erased unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run tasks off the caller's thread
pub trait Runner: Send + Sync {
    /// Run `task` eventually. A runner that cannot accept work drops the
    /// task, which releases whatever it holds.
    fn spawn(&self, task: Task);
}

// =============================================================================
// Thread pool
// =============================================================================

/// Fixed set of worker threads sharing one queue
pub struct ThreadPool {
    tx: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Start `threads` workers named `doodle-worker-{i}`
    pub fn new(threads: usize) -> Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("doodle-worker-{}", i))
                .spawn(move || {
                    for task in rx.iter() {
                        // Tasks built by the scheduler already contain their
                        // own panics; this keeps the worker alive for others.
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            warn!("Task panicked on worker thread");
                        }
                    }
                })?;
            workers.push(handle);
        }
        debug!(threads = workers.len(), "Started worker pool");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting work and wait for queued tasks to drain.
    ///
    /// Must not be called from one of the pool's own workers.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Runner for ThreadPool {
    fn spawn(&self, task: Task) {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => {
                if tx.send(task).is_err() {
                    warn!("Worker pool is gone, dropping task");
                }
            }
            None => warn!("Worker pool is shut down, dropping task"),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets workers exit once the queue is empty.
        // Not joining: the last owner may be a task on one of the workers.
        self.tx.get_mut().take();
    }
}

// =============================================================================
// Tokio
// =============================================================================

/// Runs tasks on a Tokio runtime's blocking thread pool
#[derive(Clone)]
pub struct TokioRunner {
    handle: tokio::runtime::Handle,
}

impl TokioRunner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Runner for the runtime the caller is inside, if any
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Runner for TokioRunner {
    fn spawn(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

// =============================================================================
// Tests
// =============================================================================
