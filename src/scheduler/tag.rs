//! Tag Coalescer
//!
//! Jobs carrying the same tag run strictly one after another, in submission
//! order. Different tags proceed independently. When a tag's job finishes
//! the next one queued behind it is dispatched to the windowed executors.
//!
//! A key present in the map means a job with that tag is in flight; its
//! deque holds the jobs waiting behind it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::job::{Job, JobId};
use super::pipe::PipeExecutor;
use crate::fingerprint::Fingerprint;

struct Queued {
    job: Job,
    wide: bool,
}

/// Serializes jobs per tag on top of the I/O and CPU executors
pub struct TagExecutor {
    tags: Mutex<HashMap<Fingerprint, VecDeque<Queued>>>,
    io: Arc<PipeExecutor>,
    cpu: Arc<PipeExecutor>,
}

/// Releases a tag when the job holding it ends, run or dropped
struct TagRelease {
    executor: Arc<TagExecutor>,
    tag: Fingerprint,
}

impl Drop for TagRelease {
    fn drop(&mut self) {
        self.executor.schedule_next(self.tag);
    }
}

impl TagExecutor {
    pub fn new(io: Arc<PipeExecutor>, cpu: Arc<PipeExecutor>) -> Arc<Self> {
        Arc::new(Self {
            tags: Mutex::new(HashMap::new()),
            io,
            cpu,
        })
    }

    /// Dispatch `job` now if its tag is idle, else queue it behind the tag.
    ///
    /// Jobs that want a wide window go to the I/O executor, the rest to CPU.
    pub(crate) fn execute(self: &Arc<Self>, tag: Fingerprint, job: Job, wide: bool) {
        let start = {
            let mut tags = self.tags.lock();
            match tags.get_mut(&tag) {
                Some(waiting) => {
                    trace!(tag = %tag, job = %job.id, depth = waiting.len() + 1, "Tag busy, queueing");
                    waiting.push_back(Queued { job, wide });
                    None
                }
                None => {
                    tags.insert(tag, VecDeque::new());
                    Some(Queued { job, wide })
                }
            }
        };
        if let Some(queued) = start {
            self.start(tag, queued);
        }
    }

    fn start(self: &Arc<Self>, tag: Fingerprint, queued: Queued) {
        let release = TagRelease {
            executor: Arc::clone(self),
            tag,
        };
        let Queued { job, wide } = queued;
        let run = job.run;
        let job = Job {
            id: job.id,
            run: Box::new(move || {
                let _release = release;
                run();
            }),
        };
        if wide {
            self.io.execute(job);
        } else {
            self.cpu.execute(job);
        }
    }

    fn schedule_next(self: &Arc<Self>, tag: Fingerprint) {
        let next = {
            let mut tags = self.tags.lock();
            match tags.get_mut(&tag) {
                Some(waiting) => match waiting.pop_front() {
                    Some(queued) => Some(queued),
                    None => {
                        tags.remove(&tag);
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(queued) = next {
            self.start(tag, queued);
        }
    }

    /// Take a job that is still queued behind its tag.
    ///
    /// A job already dispatched to an executor is not found here.
    pub(crate) fn remove(&self, tag: Fingerprint, id: JobId) -> Option<Job> {
        let mut tags = self.tags.lock();
        let waiting = tags.get_mut(&tag)?;
        let pos = waiting.iter().position(|q| q.job.id == id)?;
        waiting.remove(pos).map(|q| q.job)
    }

    /// Number of tags with a job in flight
    pub fn active_tags(&self) -> usize {
        self.tags.lock().len()
    }

    /// Number of jobs waiting behind busy tags
    pub fn queued(&self) -> usize {
        self.tags.lock().values().map(VecDeque::len).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
