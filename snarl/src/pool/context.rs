use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use snarl_api::errors::PoolError;
use snarl_api::event::{Event, EventCategory};
use snarl_api::recorder::EventRecorder;
use tracing::{debug, error};

use super::cancel::CancellationToken;
use super::handle::TaskHandle;
use super::queue::JobStatus;
use super::PoolCore;

/// Identity used on events emitted from the calling thread: the thread name
/// for pool workers and named driver threads, the thread id otherwise.
pub fn current_worker_id() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

/// Execution context handed to a running task.
///
/// Every suspension point a task has goes through here (`sleep`, `wait`,
/// `checkpoint`), so an immediate shutdown turns each of them into
/// `TaskCancelled` instead of an uninterruptible block.
pub struct TaskContext {
    task_id: u64,
    label: String,
    worker_id: Arc<str>,
    core: Arc<PoolCore>,
    started: Instant,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("label", &self.label)
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl TaskContext {
    pub(crate) fn new(task_id: u64, label: String, worker_id: Arc<str>, core: Arc<PoolCore>) -> Self {
        Self {
            task_id,
            label,
            worker_id,
            core,
            started: Instant::now(),
        }
    }

    /// Settle the pool's books for this task: release the active slot,
    /// bump the matching counter and emit the one terminal event.
    pub(crate) fn finish(&self, status: &JobStatus) {
        let counters = &self.core.counters;
        counters.active.fetch_sub(1, Ordering::SeqCst);

        let event = match status {
            JobStatus::Completed => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                self.event(EventCategory::TaskCompleted)
            }
            JobStatus::Cancelled => {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                self.event(EventCategory::TaskCancelled)
            }
            JobStatus::Failed(reason) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %self.worker_id, task_id = self.task_id, reason = %reason, "task failed");
                self.event(EventCategory::TaskFailed).with_field("reason", reason.as_str())
            }
            JobStatus::Panicked(message) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(worker = %self.worker_id, task_id = self.task_id, "panic in task: {}", message);
                self.event(EventCategory::TaskPanicked).with_field("reason", message.as_str())
            }
        };
        self.emit(event.with_field("elapsed_micros", self.started.elapsed().as_micros() as u64));
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancel.is_cancelled()
    }

    /// True once any shutdown has begun. Long-running loops check this at a
    /// safe boundary (never in the middle of a hold) to honour a graceful stop.
    pub fn should_stop(&self) -> bool {
        self.core.queue.is_closed() || self.core.cancel.is_cancelled()
    }

    pub fn checkpoint(&self) -> Result<(), PoolError> {
        self.core.cancel.checkpoint()
    }

    /// Interruptible sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), PoolError> {
        self.core.cancel.sleep(duration)
    }

    /// Block on another task's handle while keeping this worker's slot.
    ///
    /// Waits in slices of the pool's `wait_slice`, checking for cancellation
    /// between slices, and records `nested-wait-begun` / `nested-wait-ended`.
    pub fn wait<T: Clone>(&self, handle: &TaskHandle<T>) -> Result<T, PoolError> {
        let slice = self.core.config.wait_slice;
        self.emit(self.event(EventCategory::NestedWaitBegun).with_field("child_id", handle.task_id()));
        let started = Instant::now();

        let outcome = loop {
            match handle.wait_timeout(slice) {
                Err(PoolError::HandleWaitTimeout(_)) => {
                    if let Err(err) = self.checkpoint() {
                        break Err(err);
                    }
                }
                outcome => break outcome,
            }
        };

        let result = match &outcome {
            Ok(_) => "resolved",
            Err(PoolError::TaskCancelled) => "cancelled",
            Err(_) => "failed",
        };
        self.emit(
            self.event(EventCategory::NestedWaitEnded)
                .with_field("child_id", handle.task_id())
                .with_field("waited_micros", started.elapsed().as_micros() as u64)
                .with_field("result", result),
        );
        outcome
    }

    /// Event pre-filled with this task's label, worker identity and id.
    pub fn event(&self, category: EventCategory) -> Event {
        Event::new(category, self.label.as_str(), self.worker_id.as_ref()).with_field("task_id", self.task_id)
    }

    pub fn emit(&self, event: Event) {
        self.core.emit(event);
    }

    pub fn recorder(&self) -> &Arc<dyn EventRecorder> {
        &self.core.recorder
    }
}
