use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use snarl_api::errors::PoolError;

pub(crate) type Outcome<T> = Result<T, PoolError>;

/// Create the completion pair for one task.
pub(crate) fn completion<T>(task_id: u64, label: &str) -> (Sender<Outcome<T>>, TaskHandle<T>) {
    let (tx, rx) = flume::bounded(1);
    let handle = TaskHandle {
        task_id,
        label: label.to_string(),
        rx,
        resolved: Mutex::new(None),
    };
    (tx, handle)
}

/// Future-like reference to the eventual outcome of a submitted task.
///
/// The outcome is received at most once and then cached, so every later wait
/// returns a clone of the same result with no further side effects. Waiters
/// serialize on the cache: only one caller blocks on the channel at a time.
///
/// If the task is dropped without running (immediate shutdown drained it from
/// the queue) its completion sender goes away and the handle resolves to
/// `TaskCancelled`.
pub struct TaskHandle<T> {
    task_id: u64,
    label: String,
    rx: Receiver<Outcome<T>>,
    resolved: Mutex<Option<Outcome<T>>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("label", &self.label)
            .finish()
    }
}

impl<T: Clone> TaskHandle<T> {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block until the task resolves.
    pub fn wait(&self) -> Outcome<T> {
        let mut slot = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = slot.as_ref() {
            return outcome.clone();
        }
        let outcome = self.rx.recv().unwrap_or(Err(PoolError::TaskCancelled));
        *slot = Some(outcome.clone());
        outcome
    }

    /// Block for at most `timeout`.
    ///
    /// `HandleWaitTimeout` is reported to this caller only; it is not cached,
    /// and the task keeps running (or stays stuck).
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome<T> {
        let mut slot = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = slot.as_ref() {
            return outcome.clone();
        }
        let outcome = match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::TaskCancelled),
            Err(RecvTimeoutError::Timeout) => return Err(PoolError::HandleWaitTimeout(timeout)),
        };
        *slot = Some(outcome.clone());
        outcome
    }

    /// Non-blocking check. Returns `None` while pending, or while another
    /// thread is currently blocked in a wait on this handle.
    pub fn try_result(&self) -> Option<Outcome<T>> {
        let mut slot = self.resolved.try_lock().ok()?;
        if let Some(outcome) = slot.as_ref() {
            return Some(outcome.clone());
        }
        let outcome = match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Disconnected) => Err(PoolError::TaskCancelled),
            Err(TryRecvError::Empty) => return None,
        };
        *slot = Some(outcome.clone());
        Some(outcome)
    }

    pub fn is_resolved(&self) -> bool {
        self.try_result().is_some()
    }
}
