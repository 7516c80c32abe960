//! # Bounded Worker Pool
//!
//! A fixed set of OS worker threads draining one shared, unbounded FIFO of
//! tasks. This is the machinery every scenario runs on.
//!
//! ## Key Concepts
//! - Fixed capacity: at most `pool_size` tasks execute at any instant; the rest
//!   wait in the queue. There is no admission control and no backpressure.
//! - Non-blocking submission: `submit` enqueues and returns a [`TaskHandle`].
//! - Nested submission is ordinary submission: a task that captured a pool
//!   clone can submit into it and block on the child's handle. The blocked
//!   parent keeps its worker slot, and the pool cannot tell a blocked worker
//!   from a busy one. Once every worker holds such a parent, no child can ever
//!   run. That deadlock is the hazard the starvation scenario reproduces.
//! - Two shutdown modes: graceful closes intake and lets queued and running
//!   work continue; immediate also fires the cancellation token and drops
//!   everything still queued.
//!
//! ## Lifecycle
//! create → accept submissions → shutdown → drain → terminated

mod cancel;
mod context;
mod handle;
mod queue;
mod worker;

pub use cancel::CancellationToken;
pub use context::{current_worker_id, TaskContext};
pub use handle::TaskHandle;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use uuid::Uuid;

use snarl_api::errors::PoolError;
use snarl_api::event::{Event, EventCategory};
use snarl_api::recorder::EventRecorder;

use crate::config::PoolConfig;
use crate::log_pool;
use crate::recorder;
use queue::{Job, JobStatus, TaskQueue};
use worker::Worker;

/// How a shutdown treats work already accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting submissions; queued and running tasks continue.
    Graceful,
    /// Stop accepting submissions, interrupt running tasks at their next
    /// suspension point and drop queued tasks.
    Immediate,
}

impl ShutdownMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownMode::Graceful => "graceful",
            ShutdownMode::Immediate => "immediate",
        }
    }
}

/// Status codes for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Accepting submissions.
    Running = 0,

    /// Intake closed; workers still draining or running.
    ShuttingDown = 1,

    /// Every worker has exited.
    Terminated = 2,
}

impl PoolStatus {
    fn from_usize(value: usize) -> Self {
        match value {
            0 => PoolStatus::Running,
            1 => PoolStatus::ShuttingDown,
            _ => PoolStatus::Terminated,
        }
    }
}

/// Snapshot of pool counters. Values may be stale by the time they are read.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub pool_size: usize,
    pub queued: usize,
    pub active: usize,
    pub peak_active: usize,
    pub live_workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub panicked: u64,
    pub dropped: u64,
    pub status: PoolStatus,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub panicked: AtomicU64,
    pub dropped: AtomicU64,
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
}

/// State shared between the pool handle, its workers and running tasks.
///
/// Workers hold this, not the pool handle, so dropping the last
/// `BoundedWorkerPool` still closes intake and lets idle workers exit.
pub(crate) struct PoolCore {
    pub id: Uuid,
    pub config: PoolConfig,
    pub queue: TaskQueue,
    pub cancel: CancellationToken,
    pub recorder: Arc<dyn EventRecorder>,
    pub counters: PoolCounters,
    next_task_id: AtomicU64,
    status: AtomicUsize,
    live_workers: AtomicUsize,
    exits: Sender<usize>,
}

impl fmt::Debug for PoolCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolCore")
            .field("id", &self.id)
            .field("pool_size", &self.config.pool_size)
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolCore {
    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_usize(self.status.load(Ordering::SeqCst))
    }

    pub fn emit(&self, event: Event) {
        self.recorder.emit(event.with_field("pool_id", self.id.to_string()));
    }

    /// Throw away a job that will never run. Dropping it disconnects its
    /// handle, which then resolves as cancelled.
    pub fn discard(&self, job: Job, by: &str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.emit(Event::new(EventCategory::TaskDropped, job.label.as_str(), by).with_field("task_id", job.id));
        log_pool!(self.config.thread_name_prefix.as_str(), "task_dropped", task_id = job.id);
        drop(job);
    }

    pub fn worker_exited(&self, index: usize) {
        if self.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.status.store(PoolStatus::Terminated as usize, Ordering::SeqCst);
        }
        let _ = self.exits.send(index);
    }
}

struct PoolShared {
    core: Arc<PoolCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exits: Receiver<usize>,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        // Last handle gone: nobody can submit or shut down any more.
        self.core.queue.close();
    }
}

/// Fixed-size pool of worker threads draining a shared FIFO of tasks.
///
/// Cloning is cheap and every clone drives the same pool; tasks capture a
/// clone to submit nested work.
#[derive(Clone)]
pub struct BoundedWorkerPool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for BoundedWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedWorkerPool")
            .field("core", &self.shared.core)
            .finish()
    }
}

impl BoundedWorkerPool {
    /// Create a pool that emits into the process-wide recorder.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_recorder(config, recorder::global())
    }

    /// Create a pool and start all `config.pool_size` workers.
    pub fn with_recorder(config: PoolConfig, recorder: Arc<dyn EventRecorder>) -> Result<Self, PoolError> {
        config.validate()?;
        let (exit_tx, exit_rx) = flume::unbounded();
        let pool_size = config.pool_size;

        let core = Arc::new(PoolCore {
            id: Uuid::new_v4(),
            config,
            queue: TaskQueue::new(),
            cancel: CancellationToken::new(),
            recorder,
            counters: PoolCounters::default(),
            next_task_id: AtomicU64::new(1),
            status: AtomicUsize::new(PoolStatus::Running as usize),
            live_workers: AtomicUsize::new(0),
            exits: exit_tx,
        });

        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            core.live_workers.fetch_add(1, Ordering::SeqCst);
            match Worker::new(index, core.clone()).spawn() {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    core.live_workers.fetch_sub(1, Ordering::SeqCst);
                    // Let the workers that did start exit on their own.
                    core.queue.close();
                    core.cancel.cancel();
                    return Err(PoolError::WorkerSpawn(err.to_string()));
                }
            }
        }

        core.emit(
            Event::new(EventCategory::PoolStarted, core.config.thread_name_prefix.as_str(), current_worker_id())
                .with_field("pool_size", pool_size),
        );
        log_pool!(core.config.thread_name_prefix.as_str(), "started", pool_id = %core.id, pool_size = pool_size);

        Ok(Self {
            shared: Arc::new(PoolShared {
                core,
                workers: Mutex::new(workers),
                exits: exit_rx,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.core.id
    }

    pub fn pool_size(&self) -> usize {
        self.shared.core.config.pool_size
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.core.status()
    }

    pub fn recorder(&self) -> Arc<dyn EventRecorder> {
        self.shared.core.recorder.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.core.queue.is_closed()
    }

    /// Enqueue a task and return a handle to its outcome. Never blocks.
    ///
    /// The task body receives a [`TaskContext`]. A panic inside it is caught,
    /// reported as `TaskPanicked`, and the worker carries on.
    pub fn submit<T, F>(&self, label: impl Into<String>, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TaskContext) -> Result<T, PoolError> + Send + 'static,
    {
        let core = &self.shared.core;
        let label = label.into();
        let submitter = current_worker_id();

        if core.queue.is_closed() {
            return Err(self.reject(&label, &submitter));
        }

        let task_id = core.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (tx, handle) = handle::completion(task_id, &label);

        let run = Box::new(move |ctx: &TaskContext| {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(ctx))) {
                Ok(outcome) => outcome,
                Err(payload) => Err(PoolError::TaskPanicked(panic_message(payload))),
            };
            let status = match &outcome {
                Ok(_) => JobStatus::Completed,
                Err(PoolError::TaskCancelled) => JobStatus::Cancelled,
                Err(PoolError::TaskPanicked(msg)) => JobStatus::Panicked(msg.clone()),
                Err(err) => JobStatus::Failed(err.to_string()),
            };
            ctx.finish(&status);
            // The submitter may have dropped its handle; nothing to report to.
            let _ = tx.send(outcome);
            status
        });

        let job = Job { id: task_id, label, run };
        let accepted = |job: &Job| {
            core.emit(
                Event::new(EventCategory::TaskSubmitted, job.label.as_str(), submitter.as_str())
                    .with_field("task_id", job.id),
            );
        };
        match core.queue.push(job, accepted) {
            Ok(()) => {
                core.counters.submitted.fetch_add(1, Ordering::Relaxed);
                log_pool!(core.config.thread_name_prefix.as_str(), "task_queued", task_id = task_id);
                Ok(handle)
            }
            Err(job) => Err(self.reject(&job.label, &submitter)),
        }
    }

    fn reject(&self, label: &str, submitter: &str) -> PoolError {
        let core = &self.shared.core;
        core.emit(Event::new(EventCategory::TaskRejected, label, submitter));
        log_pool!(core.config.thread_name_prefix.as_str(), "task_rejected", label = label);
        PoolError::PoolClosed
    }

    /// Begin shutdown. Returns immediately; see [`Self::await_termination`].
    ///
    /// Calling it again is harmless, and a graceful shutdown can be escalated
    /// to an immediate one.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let core = &self.shared.core;
        let by = current_worker_id();

        let closed_now = core.queue.close();
        let _ = core.status.compare_exchange(
            PoolStatus::Running as usize,
            PoolStatus::ShuttingDown as usize,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let mut cancelled_now = false;
        let mut dropped = 0usize;
        if mode == ShutdownMode::Immediate {
            cancelled_now = core.cancel.cancel();
            for job in core.queue.drain() {
                core.discard(job, &by);
                dropped += 1;
            }
        }

        if closed_now || cancelled_now {
            core.emit(
                Event::new(EventCategory::PoolShutdown, core.config.thread_name_prefix.as_str(), by.as_str())
                    .with_field("mode", mode.as_str())
                    .with_field("dropped", dropped)
                    .with_field("active", core.counters.active.load(Ordering::SeqCst)),
            );
            tracing::info!(
                pool_id = %core.id,
                mode = mode.as_str(),
                dropped = dropped,
                "worker pool shutting down"
            );
        }
    }

    /// Block until every worker has exited, or until `timeout` elapses.
    ///
    /// Returns `false` on timeout. A pool whose workers are deadlocked never
    /// terminates after a graceful shutdown; that is an accepted end state.
    /// Must not be called from one of this pool's own workers.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let core = &self.shared.core;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if core.live_workers.load(Ordering::SeqCst) == 0 {
                let handles: Vec<JoinHandle<()>> = self
                    .shared
                    .workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain(..)
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
                return true;
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(core.config.wait_slice)
                }
                None => core.config.wait_slice,
            };
            let _ = self.shared.exits.recv_timeout(slice);
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        let core = &self.shared.core;
        let counters = &core.counters;
        PoolMetrics {
            pool_size: core.config.pool_size,
            queued: core.queue.len(),
            active: counters.active.load(Ordering::SeqCst),
            peak_active: counters.peak_active.load(Ordering::SeqCst),
            live_workers: core.live_workers.load(Ordering::SeqCst),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            status: core.status(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
