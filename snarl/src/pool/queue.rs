use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender};

use super::TaskContext;

/// Status a job reports back to the worker that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobStatus {
    Completed,
    Failed(String),
    Cancelled,
    Panicked(String),
}

/// A queued unit of work: the type-erased task body plus its identity.
///
/// The body owns the task's completion sender, so dropping an unstarted job
/// resolves its handle as cancelled.
pub(crate) struct Job {
    pub id: u64,
    pub label: String,
    pub run: Box<dyn FnOnce(&TaskContext) -> JobStatus + Send>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

/// Unbounded FIFO of pending jobs shared by the pool and its workers.
///
/// Intake is a single sender guarded by a mutex: `push` and `close` serialize
/// on it, so a submission either lands before the queue closes or is refused.
/// Closing drops the sender; workers keep draining what is already queued and
/// see a disconnect once it is empty.
pub(crate) struct TaskQueue {
    intake: Mutex<Option<Sender<Job>>>,
    jobs: Receiver<Job>,
    closed: AtomicBool,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            intake: Mutex::new(Some(tx)),
            jobs: rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a job. Hands the job back if the queue is closed.
    ///
    /// `accepted` runs under the intake lock once the job is known to be
    /// admitted and before any worker can see it.
    pub fn push(&self, job: Job, accepted: impl FnOnce(&Job)) -> Result<(), Job> {
        let intake = self.intake.lock().unwrap_or_else(PoisonError::into_inner);
        match intake.as_ref() {
            Some(tx) => {
                accepted(&job);
                tx.send(job).map_err(|err| err.into_inner())
            }
            None => Err(job),
        }
    }

    /// Refuse further submissions. Returns `true` for the call that closed it.
    pub fn close(&self) -> bool {
        let mut intake = self.intake.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        intake.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Block until a job is available. `None` once closed and empty.
    pub fn pop(&self) -> Option<Job> {
        self.jobs.recv().ok()
    }

    /// Remove every job still waiting, in FIFO order.
    pub fn drain(&self) -> Vec<Job> {
        self.jobs.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}
