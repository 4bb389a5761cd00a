//! Jobs, Handles and Cancellation
//!
//! A submitted body is wrapped into a type-erased [`Task`] that reports its
//! outcome through a one-shot channel. The caller keeps a [`JobHandle`] to
//! wait for the result and a [`JobTicket`] to cancel or reprioritize.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{error, warn};

use super::runner::Task;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Unique id of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A runnable unit waiting in an executor
pub(crate) struct Job {
    pub id: JobId,
    pub run: Task,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

/// Where a pending job should sit in its executor's wait lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Normal list, drained first
    Front,
    /// Deprioritized list, drained once the normal list is empty
    Back,
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
}

impl JobStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => JobStatus::Pending,
            1 => JobStatus::Running,
            _ => JobStatus::Finished,
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared by a job and its owners
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Error::JobCancelled)` once cancelled; meant for `?` at the
    /// boundaries of a job body
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::JobCancelled)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Ticket and handle
// =============================================================================

/// Cloneable reference to a submitted job
#[derive(Debug, Clone)]
pub struct JobTicket {
    id: JobId,
    tag: Fingerprint,
    token: CancelToken,
    status: Arc<AtomicU8>,
}

impl JobTicket {
    pub(crate) fn new(id: JobId, tag: Fingerprint) -> Self {
        Self {
            id,
            tag,
            token: CancelToken::new(),
            status: Arc::new(AtomicU8::new(JobStatus::Pending as u8)),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn tag(&self) -> Fingerprint {
        self.tag
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Move from pending to finished; false if the job already started
    pub(crate) fn finish_pending(&self) -> bool {
        self.status
            .compare_exchange(
                JobStatus::Pending as u8,
                JobStatus::Finished as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn start(&self) -> bool {
        self.status
            .compare_exchange(
                JobStatus::Pending as u8,
                JobStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Result side of a submitted job
pub struct JobHandle<T> {
    ticket: JobTicket,
    rx: Receiver<Result<T>>,
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.ticket.id)
            .field("status", &self.ticket.status())
            .finish()
    }
}

impl<T> JobHandle<T> {
    /// A handle that is already finished with `value`
    pub fn completed(value: T) -> Self {
        let ticket = JobTicket::new(JobId(0), Fingerprint::EMPTY);
        ticket.set_status(JobStatus::Finished);
        let (tx, rx) = bounded(1);
        // Capacity 1 and a live receiver: cannot fail.
        let _ = tx.send(Ok(value));
        Self { ticket, rx }
    }

    pub fn ticket(&self) -> &JobTicket {
        &self.ticket
    }

    pub fn id(&self) -> JobId {
        self.ticket.id
    }

    pub fn status(&self) -> JobStatus {
        self.ticket.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ticket.is_cancelled()
    }

    /// Block until the job produces a result
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::JobCancelled),
        }
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the job keeps running; calling again continues to wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::JobCancelled),
        }
    }

    /// Non-blocking poll; `None` while the job has not finished
    pub fn try_result(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::JobCancelled)),
        }
    }
}

// =============================================================================
// Task construction
// =============================================================================

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Wrap `body` so that it never unwinds into the executor and always
/// reports through the returned handle.
///
/// Dropping the task without running it disconnects the handle, which then
/// reports [`Error::JobCancelled`].
pub(crate) fn package<T, F>(ticket: JobTicket, body: F) -> (Task, JobHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx): (Sender<Result<T>>, Receiver<Result<T>>) = bounded(1);
    let handle = JobHandle {
        ticket: ticket.clone(),
        rx,
    };

    let task: Task = Box::new(move || {
        if ticket.is_cancelled() || !ticket.start() {
            ticket.set_status(JobStatus::Finished);
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| body(&ticket.token)));
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) if ticket.is_cancelled() => Err(Error::JobCancelled),
            Ok(Err(e)) => {
                warn!(job = %ticket.id, tag = %ticket.tag, error = %format!("{:#}", e), "Job failed");
                Err(Error::JobFailed(format!("{:#}", e)))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job = %ticket.id, tag = %ticket.tag, panic = %message, "Job panicked");
                Err(Error::JobPanicked(message))
            }
        };
        ticket.set_status(JobStatus::Finished);
        // The handle may have been dropped; nobody is waiting then.
        let _ = tx.send(result);
    });

    (task, handle)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ticket() -> JobTicket {
        JobTicket::new(JobId(1), Fingerprint::of("tag"))
    }

    #[test]
    fn test_package_runs_body() {
        let (task, handle) = package(ticket(), |_| Ok(42));
        assert_eq!(handle.status(), JobStatus::Pending);
        task();
        assert_eq!(handle.status(), JobStatus::Finished);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_body_error_becomes_job_failed() {
        let (task, handle) = package::<(), _>(ticket(), |_| anyhow::bail!("decode failed"));
        task();
        assert_matches!(handle.wait(), Err(Error::JobFailed(msg)) if msg.contains("decode failed"));
    }

    #[test]
    fn test_panic_is_contained() {
        let (task, handle) = package::<(), _>(ticket(), |_| panic!("boom"));
        task();
        assert_matches!(handle.wait(), Err(Error::JobPanicked(msg)) if msg == "boom");
    }

    #[test]
    fn test_cancelled_before_start_skips_body() {
        let t = ticket();
        let (task, handle) = package::<(), _>(t.clone(), |_| panic!("must not run"));
        t.token().cancel();
        task();
        assert_matches!(handle.wait(), Err(Error::JobCancelled));
    }

    #[test]
    fn test_dropped_task_reports_cancelled() {
        let (task, handle) = package(ticket(), |_| Ok(1));
        drop(task);
        assert_matches!(handle.wait_timeout(Duration::from_millis(10)), Err(Error::JobCancelled));
    }

    #[test]
    fn test_wait_timeout_then_result() {
        let (task, handle) = package(ticket(), |_| Ok("late"));
        assert_matches!(
            handle.wait_timeout(Duration::from_millis(5)),
            Err(Error::Timeout(_))
        );
        assert!(handle.try_result().is_none());
        task();
        assert_eq!(handle.wait_timeout(Duration::from_secs(1)).unwrap(), "late");
    }

    #[test]
    fn test_completed_handle() {
        let handle = JobHandle::completed(7u32);
        assert_eq!(handle.status(), JobStatus::Finished);
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn test_cancel_token_check() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert_matches!(token.check(), Err(Error::JobCancelled));
    }

    #[test]
    fn test_cooperative_cancel_while_running() {
        let t = ticket();
        let (task, handle) = package::<(), _>(t.clone(), move |token| {
            token.cancel();
            token.check()?;
            Ok(())
        });
        task();
        assert_matches!(handle.wait(), Err(Error::JobCancelled));
        assert!(t.is_cancelled());
    }
}
