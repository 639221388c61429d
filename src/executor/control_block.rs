//! Queued units of cancellable work.

use super::cancel::{CancellationPair, Cancelled};
use crate::status::TaskResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a task body did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("{0}")]
    Fault(String),
}

/// Work run on the executor thread. Returns an explanation on success.
pub type TaskBody = Box<dyn FnOnce(&CancellationPair) -> Result<String, TaskFailure> + Send>;

/// Receives the finished result on the event thread.
pub type CompletionCallback = Box<dyn FnOnce(TaskCompletion) + Send>;

/// What a completion callback is told.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub task_id: Uuid,
    pub name: String,
    pub result: TaskResult,
}

#[derive(Debug, Default)]
pub(super) struct Progress {
    started: AtomicBool,
    finished: AtomicBool,
}

impl Progress {
    pub(super) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(super) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Marks a task finished when dropped, so a panicking callback still
/// releases whoever is waiting on the handle.
pub(super) struct FinishOnDrop(pub(super) Arc<Progress>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

/// One task plus everything the executor needs to run and report it.
pub struct ControlBlock {
    pub(super) task_id: Uuid,
    pub(super) name: String,
    pub(super) body: TaskBody,
    pub(super) individual: CancellationToken,
    pub(super) status: TaskResult,
    pub(super) on_complete: CompletionCallback,
    pub(super) progress: Arc<Progress>,
}

impl ControlBlock {
    pub fn new<B, F>(name: impl Into<String>, body: B, on_complete: F) -> Self
    where
        B: FnOnce(&CancellationPair) -> Result<String, TaskFailure> + Send + 'static,
        F: FnOnce(TaskCompletion) + Send + 'static,
    {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            body: Box::new(body),
            individual: CancellationToken::new(),
            status: TaskResult::new(),
            on_complete: Box::new(on_complete),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle that observes and cancels this block once it is queued.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            task_id: self.task_id,
            name: self.name.clone(),
            individual: self.individual.clone(),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("status", &self.status.code())
            .finish_non_exhaustive()
    }
}

/// Caller-side view of a queued task.
///
/// `is_finished` turns true only after the completion callback has run.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: Uuid,
    name: String,
    individual: CancellationToken,
    progress: Arc<Progress>,
}

impl TaskHandle {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fire the task's individual token.
    pub fn cancel(&self) {
        self.individual.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.individual.is_cancelled()
    }

    pub fn has_started(&self) -> bool {
        self.progress.started.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::Acquire)
    }

    /// Busy-poll until the task has started. `false` on timeout.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        poll_until(timeout, || self.has_started())
    }

    /// Busy-poll until the task has finished and reported. `false` on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        poll_until(timeout, || self.is_finished())
    }
}

fn poll_until(timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}
