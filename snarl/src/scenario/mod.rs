//! # Scenarios
//!
//! Each scenario configures one `BoundedWorkerPool`, submits its workload and
//! hands back a run object. The run exposes the process-level controls the
//! external driver calls: stop gracefully, stop immediately, or run to the
//! configured time bound.
//!
//! - [`lock_contention`]: explicit mutex held for a fixed duration
//! - [`starvation`]: nested submission + synchronous wait into the same pool
//! - [`output_contention`]: implicit lock inside a shared output stream

pub mod lock_contention;
pub mod output_contention;
pub mod starvation;

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};

use snarl_api::errors::PoolError;

use crate::log_scenario;
use crate::pool::{BoundedWorkerPool, PoolStatus, ShutdownMode, TaskContext};

/// Controls shared by every running scenario.
#[derive(Debug)]
pub struct ScenarioRun {
    name: &'static str,
    pool: BoundedWorkerPool,
    run_duration: Option<Duration>,
    started_at: Instant,
}

impl ScenarioRun {
    pub(crate) fn new(name: &'static str, pool: BoundedWorkerPool, run_duration: Option<Duration>) -> Self {
        log_scenario!(name, "started", pool_size = pool.pool_size());
        Self {
            name,
            pool,
            run_duration,
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pool(&self) -> &BoundedWorkerPool {
        &self.pool
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.run_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_terminated(&self) -> bool {
        self.pool.status() == PoolStatus::Terminated
    }

    /// Close intake, let running holds finish and wait for every worker to
    /// exit. Looping tasks end at their next cycle boundary.
    ///
    /// Once this returns `Ok`, no further `task-started` event is emitted.
    /// `timeout: None` waits forever, which never returns for a deadlocked
    /// starvation run.
    pub fn stop_graceful(&self, timeout: Option<Duration>) -> Result<(), PoolError> {
        self.stop(ShutdownMode::Graceful, timeout)
    }

    /// Cancel everything: queued tasks are dropped and running tasks are
    /// interrupted at their current suspension point.
    ///
    /// Once this returns `Ok`, every task that had started has emitted its
    /// terminal event.
    pub fn stop_immediate(&self, timeout: Option<Duration>) -> Result<(), PoolError> {
        self.stop(ShutdownMode::Immediate, timeout)
    }

    fn stop(&self, mode: ShutdownMode, timeout: Option<Duration>) -> Result<(), PoolError> {
        self.pool.shutdown(mode);
        if self.pool.await_termination(timeout) {
            let metrics = self.pool.metrics();
            log_scenario!(
                self.name,
                "stopped",
                mode = mode.as_str(),
                elapsed_ms = self.elapsed().as_millis() as u64,
                completed = metrics.completed,
                cancelled = metrics.cancelled,
                dropped = metrics.dropped
            );
            Ok(())
        } else {
            let waited = timeout.unwrap_or_default();
            tracing::warn!(scenario = self.name, mode = mode.as_str(), "workers did not exit within {:?}", waited);
            Err(PoolError::ShutdownTimeout(waited))
        }
    }

    /// Let the scenario run for its configured duration, then stop it
    /// immediately. With no duration configured, block until something else
    /// shuts the pool down and every worker has exited.
    pub fn run_to_bound(&self) -> Result<(), PoolError> {
        match self.run_duration {
            Some(duration) => {
                let remaining = duration.saturating_sub(self.elapsed());
                std::thread::sleep(remaining);
                self.stop_immediate(None)
            }
            None => {
                self.pool.await_termination(None);
                Ok(())
            }
        }
    }
}

/// One-shot barrier that holds tasks back until the driver opens it.
///
/// Opening drops the only sender, so every task blocked in [`StartGate::pass`]
/// wakes at once. Waiting is interruptible by the pool's cancellation.
pub struct StartGate {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl fmt::Debug for StartGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartGate").field("open", &self.is_open()).finish()
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartGate {
    pub fn new() -> Self {
        let (trigger, signal) = flume::bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            signal,
        }
    }

    pub fn open(&self) {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_open(&self) -> bool {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Block the calling task until the gate opens.
    pub fn pass(&self, ctx: &TaskContext, slice: Duration) -> Result<(), PoolError> {
        loop {
            match self.signal.recv_timeout(slice) {
                Err(RecvTimeoutError::Timeout) => ctx.checkpoint()?,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }
}
