//! Windowed Executor
//!
//! Bounds how many jobs run at once. The bound (the window) can be widened
//! up to a maximum while a job blocks on slow I/O, and narrowed back after.
//! Jobs that cannot start wait in one of two FIFO lists:
//!
//! ```text
//!             ┌────────────── window ──────────────┐
//! submit ──►  │ running: 0 .. window               │ ──► runner
//!    │        └────────────────▲───────────────────┘
//!    ▼                         │ on completion / extend
//! front: [j1, j2, ...] ────────┤ front first
//! back:  [j7, j8, ...] ────────┘ then back
//! ```
//!
//! `demote`/`promote` move a waiting job between the lists when its host is
//! paused or resumed.
//!
//! All state is behind one mutex. Decisions are made under it; jobs are
//! handed to the runner after it is released.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::job::{Job, JobId};
use super::runner::Runner;

/// Snapshot of an executor's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub window: usize,
    pub min_window: usize,
    pub max_window: usize,
    pub running: usize,
    pub front: usize,
    pub back: usize,
}

struct PipeState {
    front: VecDeque<Job>,
    back: VecDeque<Job>,
    window: usize,
    running: usize,
}

impl PipeState {
    /// Claim a slot for the next waiting job, front list first
    fn take_next(&mut self) -> Option<Job> {
        if self.running >= self.window {
            return None;
        }
        let job = self.front.pop_front().or_else(|| self.back.pop_front())?;
        self.running += 1;
        Some(job)
    }
}

/// Bounded-concurrency executor with a dynamic window
pub struct PipeExecutor {
    name: &'static str,
    min_window: usize,
    max_window: usize,
    state: Mutex<PipeState>,
    runner: Arc<dyn Runner>,
}

/// Holds one running slot; releasing it admits the next waiting job.
///
/// Moved into the task handed to the runner, so the slot is returned even
/// if the runner drops the task without running it.
struct SlotGuard {
    executor: Arc<PipeExecutor>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.executor.finish_one();
    }
}

impl PipeExecutor {
    /// Executor with a fixed window
    pub fn fixed(name: &'static str, window: usize, runner: Arc<dyn Runner>) -> Arc<Self> {
        Self::new(name, window, window, runner)
    }

    /// Executor whose window starts at `min` and may grow to `max`
    pub fn new(
        name: &'static str,
        min: usize,
        max: usize,
        runner: Arc<dyn Runner>,
    ) -> Arc<Self> {
        let min_window = min.max(1);
        let max_window = max.max(min_window);
        Arc::new(Self {
            name,
            min_window,
            max_window,
            state: Mutex::new(PipeState {
                front: VecDeque::new(),
                back: VecDeque::new(),
                window: min_window,
                running: 0,
            }),
            runner,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `job` now if the window has room, else queue it on the front list
    pub(crate) fn execute(self: &Arc<Self>, job: Job) {
        let start = {
            let mut state = self.state.lock();
            if state.running < state.window {
                state.running += 1;
                Some(job)
            } else {
                trace!(executor = self.name, job = %job.id, "Window full, queueing");
                state.front.push_back(job);
                None
            }
        };
        if let Some(job) = start {
            self.start(job);
        }
    }

    fn start(self: &Arc<Self>, job: Job) {
        let slot = SlotGuard {
            executor: Arc::clone(self),
        };
        let run = job.run;
        self.runner.spawn(Box::new(move || {
            let _slot = slot;
            run();
        }));
    }

    fn finish_one(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            state.take_next()
        };
        if let Some(job) = next {
            self.start(job);
        }
    }

    /// Widen the window by one, up to the maximum, admitting a waiting job
    /// if that frees a slot. Returns false if already at the maximum.
    pub fn extend_window(self: &Arc<Self>) -> bool {
        let next = {
            let mut state = self.state.lock();
            if state.window >= self.max_window {
                return false;
            }
            state.window += 1;
            state.take_next()
        };
        if let Some(job) = next {
            self.start(job);
        }
        true
    }

    /// Narrow the window by one, down to the minimum. Running jobs are not
    /// affected; admission simply waits until the count drops.
    pub fn shrink_window(&self) -> bool {
        let mut state = self.state.lock();
        if state.window > self.min_window {
            state.window -= 1;
            true
        } else {
            false
        }
    }

    /// Move a waiting job to the end of the back list
    pub fn demote(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        let PipeState { front, back, .. } = &mut *state;
        move_job(front, back, id)
    }

    /// Move a waiting job to the end of the front list
    pub fn promote(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        let PipeState { front, back, .. } = &mut *state;
        move_job(back, front, id)
    }

    /// Take a waiting job out of the executor.
    ///
    /// The caller drops the returned job outside of this executor's lock.
    pub(crate) fn remove(&self, id: JobId) -> Option<Job> {
        let mut state = self.state.lock();
        if let Some(pos) = state.front.iter().position(|j| j.id == id) {
            return state.front.remove(pos);
        }
        if let Some(pos) = state.back.iter().position(|j| j.id == id) {
            return state.back.remove(pos);
        }
        None
    }

    pub fn window(&self) -> usize {
        self.state.lock().window
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    pub fn stats(&self) -> ExecutorStats {
        let state = self.state.lock();
        ExecutorStats {
            window: state.window,
            min_window: self.min_window,
            max_window: self.max_window,
            running: state.running,
            front: state.front.len(),
            back: state.back.len(),
        }
    }
}

fn move_job(from: &mut VecDeque<Job>, to: &mut VecDeque<Job>, id: JobId) -> bool {
    match from.iter().position(|j| j.id == id) {
        Some(pos) => match from.remove(pos) {
            Some(job) => {
                to.push_back(job);
                true
            }
            None => false,
        },
        None => false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::runner::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner that parks tasks until the test releases them
    #[derive(Default)]
    struct ManualRunner {
        tasks: Mutex<VecDeque<Task>>,
    }

    impl Runner for ManualRunner {
        fn spawn(&self, task: Task) {
            self.tasks.lock().push_back(task);
        }
    }

    impl ManualRunner {
        fn run_one(&self) -> bool {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    true
                }
                None => false,
            }
        }

        fn pending(&self) -> usize {
            self.tasks.lock().len()
        }
    }

    fn job(id: u64, log: &Arc<Mutex<Vec<u64>>>) -> Job {
        let log = Arc::clone(log);
        Job {
            id: JobId(id),
            run: Box::new(move || log.lock().push(id)),
        }
    }

    #[test]
    fn test_window_bounds_admission() {
        let runner = Arc::new(ManualRunner::default());
        let exec = PipeExecutor::fixed("test", 2, runner.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=5 {
            exec.execute(job(id, &log));
        }
        assert_eq!(exec.running(), 2);
        assert_eq!(runner.pending(), 2);
        assert_eq!(exec.stats().front, 3);

        while runner.run_one() {}
        assert_eq!(*log.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(exec.running(), 0);
    }

    #[test]
    fn test_extend_then_shrink_restores_window() {
        let runner = Arc::new(ManualRunner::default());
        let exec = PipeExecutor::new("io", 1, 3, runner.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        exec.execute(job(1, &log));
        exec.execute(job(2, &log));
        assert_eq!(runner.pending(), 1);

        assert!(exec.extend_window());
        assert_eq!(exec.window(), 2);
        assert_eq!(runner.pending(), 2);

        assert!(exec.extend_window());
        assert!(!exec.extend_window());
        assert_eq!(exec.window(), 3);

        assert!(exec.shrink_window());
        assert!(exec.shrink_window());
        assert!(!exec.shrink_window());
        assert_eq!(exec.window(), 1);
    }

    #[test]
    fn test_back_list_drains_after_front() {
        let runner = Arc::new(ManualRunner::default());
        let exec = PipeExecutor::fixed("test", 1, runner.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=4 {
            exec.execute(job(id, &log));
        }
        assert!(exec.demote(JobId(2)));
        assert!(!exec.demote(JobId(1)), "running job cannot move");
        assert_eq!(exec.stats().back, 1);

        while runner.run_one() {}
        assert_eq!(*log.lock(), vec![1, 3, 4, 2]);
    }

    #[test]
    fn test_promote_moves_to_end_of_front() {
        let runner = Arc::new(ManualRunner::default());
        let exec = PipeExecutor::fixed("test", 1, runner.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=4 {
            exec.execute(job(id, &log));
        }
        exec.demote(JobId(2));
        exec.demote(JobId(3));
        assert!(exec.promote(JobId(3)));
        assert!(!exec.promote(JobId(9)));

        while runner.run_one() {}
        assert_eq!(*log.lock(), vec![1, 4, 3, 2]);
    }

    #[test]
    fn test_remove_waiting_job() {
        let runner = Arc::new(ManualRunner::default());
        let exec = PipeExecutor::fixed("test", 1, runner.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        exec.execute(job(1, &log));
        exec.execute(job(2, &log));
        exec.execute(job(3, &log));

        assert!(exec.remove(JobId(2)).is_some());
        assert!(exec.remove(JobId(2)).is_none());
        while runner.run_one() {}
        assert_eq!(*log.lock(), vec![1, 3]);
    }

    #[test]
    fn test_dropped_task_releases_slot() {
        struct DroppingRunner;
        impl Runner for DroppingRunner {
            fn spawn(&self, task: Task) {
                drop(task);
            }
        }
        let exec = PipeExecutor::fixed("test", 1, Arc::new(DroppingRunner));
        let ran = Arc::new(AtomicUsize::new(0));
        for id in 0..3 {
            let ran = Arc::clone(&ran);
            exec.execute(Job {
                id: JobId(id),
                run: Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(exec.running(), 0);
    }
}
