use std::fmt;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use snarl_api::event::{Event, EventCategory};

use super::context::TaskContext;
use super::queue::Job;
use super::PoolCore;

/// One worker thread of a bounded pool.
///
/// ## Core Algorithm
/// 1. Block on the shared queue for the next job
/// 2. Drop it if the pool was cancelled meanwhile
/// 3. Record `task-started` and run it; the task body records its own
///    terminal event before resolving its handle
/// 4. Repeat until the queue is closed and empty
///
/// A worker never gives its slot back while a task runs, even when that task
/// is only blocked waiting on another task.
pub(crate) struct Worker {
    index: usize,
    name: Arc<str>,
    core: Arc<PoolCore>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

impl Worker {
    pub fn new(index: usize, core: Arc<PoolCore>) -> Self {
        let name: Arc<str> = format!("{}-{}", core.config.thread_name_prefix, index).into();
        Self {
            index,
            name,
            core,
        }
    }

    /// Start the worker on its own named OS thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || self.run_loop())
    }

    fn run_loop(self) {
        debug!(worker = %self.name, "worker started");

        while let Some(job) = self.core.queue.pop() {
            if self.core.cancel.is_cancelled() {
                self.core.discard(job, &self.name);
                continue;
            }
            self.execute(job);
        }

        self.core.emit(Event::new(EventCategory::WorkerExited, self.name.as_ref(), self.name.as_ref()));
        debug!(worker = %self.name, "worker exiting");
        self.core.worker_exited(self.index);
    }

    fn execute(&self, job: Job) {
        let Job { id, label, run } = job;
        let counters = &self.core.counters;

        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_active.fetch_max(active, Ordering::SeqCst);

        self.core.emit(
            Event::new(EventCategory::TaskStarted, label.as_str(), self.name.as_ref())
                .with_field("task_id", id)
                .with_field("active", active),
        );
        trace!(worker = %self.name, task_id = id, label = %label, "task started");

        // The task records its own terminal event before publishing its
        // outcome, so a resolved handle implies the counters are current.
        let ctx = TaskContext::new(id, label, self.name.clone(), self.core.clone());
        let status = run(&ctx);
        trace!(worker = %self.name, task_id = id, status = ?status, "task finished");
    }
}
