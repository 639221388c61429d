//! Task execution context.
//!
//! One dedicated worker thread drains a FIFO of [`ControlBlock`]s, so task
//! bodies never run concurrently with each other. Results are delivered to
//! each block's callback on the event thread.

mod cancel;
mod control_block;

pub use cancel::{CancellationPair, Cancelled, Interrupted};
pub use control_block::{
    CompletionCallback, ControlBlock, TaskBody, TaskCompletion, TaskFailure, TaskHandle,
};

use crate::error::{fail_fast, ExecutorError};
use crate::events::EventPump;
use crate::status::TaskResultCode;
use control_block::FinishOnDrop;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const QUEUE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Lifecycle {
    active: AtomicBool,
    faulted: AtomicBool,
    terminated: AtomicBool,
    disposed: AtomicBool,
    in_progress: AtomicBool,
}

/// The task execution context.
pub struct TaskExecutor {
    sender: Mutex<Option<mpsc::Sender<ControlBlock>>>,
    overall: CancellationToken,
    lifecycle: Arc<Lifecycle>,
    handle: Mutex<Option<JoinHandle<()>>>,
    worker: ThreadId,
}

impl TaskExecutor {
    /// Spawn the worker. Completion callbacks are posted to `events`.
    pub fn start(events: Arc<EventPump>) -> Result<Self, ExecutorError> {
        let (sender, receiver) = mpsc::channel::<ControlBlock>();
        let overall = CancellationToken::new();
        let lifecycle = Arc::new(Lifecycle::default());
        lifecycle.active.store(true, Ordering::Release);

        let handle = {
            let overall = overall.clone();
            let lifecycle = Arc::clone(&lifecycle);
            thread::Builder::new()
                .name("laundry-tasks".to_string())
                .spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        work(&receiver, &overall, &lifecycle, &events)
                    }));
                    if outcome.is_err() {
                        error!("task worker crashed");
                        lifecycle.faulted.store(true, Ordering::Release);
                    }
                    lifecycle.active.store(false, Ordering::Release);
                    lifecycle.in_progress.store(false, Ordering::Release);
                    lifecycle.terminated.store(true, Ordering::Release);
                    debug!("task worker terminated");
                })?
        };
        let worker = handle.thread().id();

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            overall,
            lifecycle,
            handle: Mutex::new(Some(handle)),
            worker,
        })
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.active.load(Ordering::Acquire)
    }

    pub fn is_faulted(&self) -> bool {
        self.lifecycle.faulted.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle.terminated.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.disposed.load(Ordering::Acquire)
    }

    pub fn task_in_progress(&self) -> bool {
        self.lifecycle.in_progress.load(Ordering::Acquire)
    }

    /// Queue a block behind any already waiting.
    pub fn enqueue(&self, block: ControlBlock) -> Result<TaskHandle, ExecutorError> {
        if !self.is_active() {
            return Err(ExecutorError::NotActive(self.lifecycle_name()));
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ExecutorError::NotActive("disposed"));
        };
        let handle = block.handle();
        sender
            .send(block)
            .map_err(|_| ExecutorError::NotActive("worker exited"))?;
        debug!(task_id = %handle.task_id(), name = handle.name(), "task queued");
        Ok(handle)
    }

    /// Shorthand for building and queueing a [`ControlBlock`].
    pub fn submit<B, F>(
        &self,
        name: impl Into<String>,
        body: B,
        on_complete: F,
    ) -> Result<TaskHandle, ExecutorError>
    where
        B: FnOnce(&CancellationPair) -> Result<String, TaskFailure> + Send + 'static,
        F: FnOnce(TaskCompletion) + Send + 'static,
    {
        self.enqueue(ControlBlock::new(name, body, on_complete))
    }

    /// Fire the overall token, stop accepting work and wait for the worker.
    ///
    /// Aborts the process if the worker has not stopped within `grace`.
    pub fn dispose(&self, grace: Duration) {
        if self.lifecycle.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifecycle.active.store(false, Ordering::Release);
        self.overall.cancel();
        drop(self.sender.lock().take());

        if thread::current().id() == self.worker {
            warn!("task executor disposed from its own worker; not waiting");
            return;
        }
        let deadline = Instant::now() + grace;
        while !self.is_terminated() {
            if Instant::now() >= deadline {
                fail_fast(&format!("task worker did not stop within {grace:?}"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        debug!("task executor disposed");
    }

    fn lifecycle_name(&self) -> &'static str {
        if self.is_disposed() {
            "disposed"
        } else if self.is_faulted() {
            "faulted"
        } else if self.is_terminated() {
            "terminated"
        } else {
            "inactive"
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.dispose(Duration::from_secs(10));
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("active", &self.is_active())
            .field("task_in_progress", &self.task_in_progress())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn work(
    receiver: &mpsc::Receiver<ControlBlock>,
    overall: &CancellationToken,
    lifecycle: &Lifecycle,
    events: &EventPump,
) {
    loop {
        let block = match receiver.recv_timeout(QUEUE_POLL) {
            Ok(block) => block,
            Err(mpsc::RecvTimeoutError::Timeout) if overall.is_cancelled() => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        if overall.is_cancelled() {
            abandon(block, events);
            break;
        }
        run_block(block, overall, lifecycle, events);
    }
    // Anything still queued is reported as cancelled so no waiter hangs.
    while let Ok(block) = receiver.try_recv() {
        abandon(block, events);
    }
}

fn run_block(block: ControlBlock, overall: &CancellationToken, lifecycle: &Lifecycle, events: &EventPump) {
    let ControlBlock {
        task_id,
        name,
        body,
        individual,
        mut status,
        on_complete,
        progress,
    } = block;

    lifecycle.in_progress.store(true, Ordering::Release);
    if let Err(e) = status.start() {
        fail_fast(&format!("task '{name}' was queued with a used status: {e}"));
    }
    progress.mark_started();
    debug!(%task_id, name = %name, "task started");

    let tokens = CancellationPair::new(overall.clone(), individual);
    let outcome = catch_unwind(AssertUnwindSafe(|| body(&tokens)));
    let (code, explanation) = match outcome {
        Ok(Ok(explanation)) => (TaskResultCode::Success, explanation),
        Ok(Err(TaskFailure::Cancelled(cause))) => (TaskResultCode::Cancelled, cause.to_string()),
        Ok(Err(TaskFailure::Fault(message))) => (TaskResultCode::Failed, message),
        Err(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (TaskResultCode::Failed, (*message).to_string())
            } else if let Some(message) = payload.downcast_ref::<String>() {
                (TaskResultCode::Failed, message.clone())
            } else {
                (TaskResultCode::ErrorUnknown, "task panicked".to_string())
            }
        }
    };
    if let Err(e) = status.finish(code, explanation) {
        fail_fast(&format!("task '{name}' could not record its result: {e}"));
    }
    lifecycle.in_progress.store(false, Ordering::Release);
    info!(%task_id, name = %name, result = %status.code(), "task finished");

    deliver(
        TaskCompletion {
            task_id,
            name,
            result: status,
        },
        on_complete,
        FinishOnDrop(progress),
        events,
    );
}

fn abandon(block: ControlBlock, events: &EventPump) {
    let ControlBlock {
        task_id,
        name,
        mut status,
        on_complete,
        progress,
        ..
    } = block;
    debug!(%task_id, name = %name, "task abandoned at shutdown");
    let recorded = status
        .start()
        .and_then(|_| status.finish(TaskResultCode::Cancelled, Cancelled::Overall.to_string()));
    if let Err(e) = recorded {
        fail_fast(&format!("task '{name}' could not record its result: {e}"));
    }
    deliver(
        TaskCompletion {
            task_id,
            name,
            result: status,
        },
        on_complete,
        FinishOnDrop(progress),
        events,
    );
}

fn deliver(
    completion: TaskCompletion,
    on_complete: CompletionCallback,
    finish: FinishOnDrop,
    events: &EventPump,
) {
    let callback = move || {
        let _finish = finish;
        on_complete(completion);
    };
    if let Err(callback) = events.post(callback) {
        // The event thread is gone; run it here rather than drop the result.
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn executor() -> (TaskExecutor, Arc<EventPump>) {
        let events = Arc::new(EventPump::start().unwrap());
        (TaskExecutor::start(Arc::clone(&events)).unwrap(), events)
    }

    fn recv(rx: &mpsc::Receiver<TaskCompletion>) -> TaskCompletion {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn successful_task_reports_success() {
        let (executor, _events) = executor();
        let (tx, rx) = mpsc::channel();
        let handle = executor
            .submit("ok", |_| Ok("all good".to_string()), move |done| tx.send(done).unwrap())
            .unwrap();

        let done = recv(&rx);
        assert_eq!(done.task_id, handle.task_id());
        assert_eq!(done.result.code(), TaskResultCode::Success);
        assert_eq!(done.result.explanation(), "all good");
        assert!(handle.wait_finished(Duration::from_secs(1)));
        assert!(!executor.task_in_progress());
    }

    #[test]
    fn individual_cancellation_reports_cancelled() {
        let (executor, _events) = executor();
        let (tx, rx) = mpsc::channel();
        let handle = executor
            .submit(
                "long",
                |tokens| {
                    tokens
                        .sleep(Duration::from_secs(5), Duration::from_millis(1))
                        .map_err(|i| TaskFailure::Cancelled(i.cause))?;
                    Ok("finished".to_string())
                },
                move |done| tx.send(done).unwrap(),
            )
            .unwrap();

        assert!(handle.wait_started(Duration::from_secs(1)));
        handle.cancel();
        let done = recv(&rx);
        assert_eq!(done.result.code(), TaskResultCode::Cancelled);
        assert!(executor.is_active());
    }

    #[test]
    fn faults_and_panics_are_captured() {
        let (executor, _events) = executor();
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        executor
            .submit(
                "fault",
                |_| Err(TaskFailure::Fault("motor jammed".to_string())),
                move |done| tx1.send(done).unwrap(),
            )
            .unwrap();
        let tx2 = tx.clone();
        executor
            .submit("panic", |_| panic!("belt snapped"), move |done| tx2.send(done).unwrap())
            .unwrap();
        executor
            .submit(
                "opaque",
                |_| std::panic::panic_any(42_u8),
                move |done| tx.send(done).unwrap(),
            )
            .unwrap();

        let fault = recv(&rx);
        assert_eq!(fault.result.code(), TaskResultCode::Failed);
        assert_eq!(fault.result.explanation(), "motor jammed");

        let panic = recv(&rx);
        assert_eq!(panic.result.code(), TaskResultCode::Failed);
        assert_eq!(panic.result.explanation(), "belt snapped");

        let opaque = recv(&rx);
        assert_eq!(opaque.result.code(), TaskResultCode::ErrorUnknown);
        assert!(executor.is_active());
    }

    #[test]
    fn tasks_run_one_at_a_time_in_fifo_order() {
        let (executor, _events) = executor();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            let tx = tx.clone();
            executor
                .submit(
                    format!("task-{i}"),
                    move |_| {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(String::new())
                    },
                    move |done| tx.send(done.name).unwrap(),
                )
                .unwrap();
        }

        let order: Vec<String> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, (0..5).map(|i| format!("task-{i}")).collect::<Vec<_>>());
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_runs_on_the_event_thread() {
        let (executor, _events) = executor();
        let (tx, rx) = mpsc::channel();
        executor
            .submit("where", |_| Ok(String::new()), move |_| {
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();
        let thread_name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(thread_name.as_deref(), Some("laundry-events"));
    }

    #[test]
    fn enqueue_after_dispose_fails() {
        let (executor, _events) = executor();
        executor.dispose(Duration::from_secs(1));
        assert!(executor.is_terminated());
        assert!(!executor.is_active());

        let err = executor
            .submit("late", |_| Ok(String::new()), |_| {})
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotActive("disposed")));
    }

    #[test]
    fn dispose_cancels_the_running_task_overall() {
        let (executor, _events) = executor();
        let (tx, rx) = mpsc::channel();
        let handle = executor
            .submit(
                "long",
                |tokens| {
                    tokens
                        .sleep(Duration::from_secs(5), Duration::from_millis(1))
                        .map_err(|i| TaskFailure::Cancelled(i.cause))?;
                    Ok(String::new())
                },
                move |done| tx.send(done).unwrap(),
            )
            .unwrap();
        assert!(handle.wait_started(Duration::from_secs(1)));

        executor.dispose(Duration::from_secs(2));
        let done = recv(&rx);
        assert_eq!(done.result.code(), TaskResultCode::Cancelled);
        assert_eq!(done.result.explanation(), Cancelled::Overall.to_string());
    }
}
