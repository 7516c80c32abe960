//! # Lock Contention
//!
//! `worker_load` logical workers, submitted onto a pool with fewer threads,
//! loop forever around one [`SharedLock`]: acquire, hold for
//! `hold_duration`, release. Two kinds of waiting become observable at once:
//! tasks queued for a worker slot, and running tasks blocked on the lock.
//!
//! Nothing here ends on its own. A graceful stop ends each loop after its
//! current hold; an immediate stop interrupts the hold itself.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use snarl_api::errors::PoolError;
use snarl_api::event::EventCategory;
use snarl_api::recorder::EventRecorder;

use super::ScenarioRun;
use crate::config::LockContentionConfig;
use crate::log_scenario;
use crate::pool::{BoundedWorkerPool, TaskContext, TaskHandle};

pub const SCENARIO_NAME: &str = "lock-contention";

/// The single exclusive resource of the scenario.
///
/// A plain, non-reentrant mutex with counters around it. Acquisition order
/// among waiters is whatever the OS mutex gives; there is no fairness.
/// Re-acquiring from the thread that already holds it deadlocks that thread,
/// as a real mutex would.
pub struct SharedLock {
    mutex: Mutex<()>,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
    acquisitions: AtomicU64,
    total_wait_nanos: AtomicU64,
    total_hold_nanos: AtomicU64,
}

impl fmt::Debug for SharedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLock")
            .field("holders", &self.holders.load(Ordering::SeqCst))
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLock {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            holders: AtomicUsize::new(0),
            peak_holders: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
            total_wait_nanos: AtomicU64::new(0),
            total_hold_nanos: AtomicU64::new(0),
        }
    }

    /// Block until the lock is free, recording the request and the grant.
    pub fn acquire<'a>(&'a self, ctx: &'a TaskContext) -> SharedLockGuard<'a> {
        ctx.emit(ctx.event(EventCategory::LockRequested));
        let requested = Instant::now();

        // A task that panicked mid-hold poisons the mutex; the lock itself is
        // still usable.
        let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let waited = requested.elapsed();

        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_holders.fetch_max(holders, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_nanos.fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);

        ctx.emit(
            ctx.event(EventCategory::LockAcquired)
                .with_field("wait_micros", waited.as_micros() as u64)
                .with_field("holders", holders),
        );

        SharedLockGuard {
            lock: self,
            ctx,
            acquired: Instant::now(),
            _guard: guard,
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Most holders ever observed at once. Anything above 1 is a broken lock.
    pub fn peak_holders(&self) -> usize {
        self.peak_holders.load(Ordering::SeqCst)
    }

    pub fn current_holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    pub fn stats(&self, elapsed: Duration) -> LockStats {
        let acquisitions = self.acquisitions();
        let per_acquisition = |total: u64| {
            if acquisitions == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total / acquisitions)
            }
        };
        LockStats {
            acquisitions,
            average_wait: per_acquisition(self.total_wait_nanos.load(Ordering::Relaxed)),
            average_hold: per_acquisition(self.total_hold_nanos.load(Ordering::Relaxed)),
            peak_holders: self.peak_holders(),
            elapsed,
        }
    }
}

/// Ownership of the [`SharedLock`]. Dropping it records `lock-released` and
/// then releases the mutex, so released events never interleave with the
/// next holder's acquired event.
pub struct SharedLockGuard<'a> {
    lock: &'a SharedLock,
    ctx: &'a TaskContext,
    acquired: Instant,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        self.lock.total_hold_nanos.fetch_add(held.as_nanos() as u64, Ordering::Relaxed);
        self.lock.holders.fetch_sub(1, Ordering::SeqCst);
        self.ctx.emit(
            self.ctx
                .event(EventCategory::LockReleased)
                .with_field("held_micros", held.as_micros() as u64),
        );
        // `_guard` drops after this body, releasing the mutex.
    }
}

/// Throughput and latency summary of a run.
#[derive(Debug, Clone)]
pub struct LockStats {
    pub acquisitions: u64,
    pub average_wait: Duration,
    pub average_hold: Duration,
    pub peak_holders: usize,
    pub elapsed: Duration,
}

impl LockStats {
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.acquisitions as f64 / secs
        }
    }
}

/// A started lock-contention scenario.
#[derive(Debug)]
pub struct LockContentionRun {
    run: ScenarioRun,
    lock: Arc<SharedLock>,
    handles: Vec<TaskHandle<u64>>,
}

impl std::ops::Deref for LockContentionRun {
    type Target = ScenarioRun;

    fn deref(&self) -> &ScenarioRun {
        &self.run
    }
}

impl LockContentionRun {
    pub fn lock(&self) -> &SharedLock {
        &self.lock
    }

    pub fn stats(&self) -> LockStats {
        self.lock.stats(self.run.elapsed())
    }

    /// One handle per logical worker. Each resolves to the number of cycles
    /// that worker completed, or to `TaskCancelled` after an immediate stop.
    pub fn handles(&self) -> &[TaskHandle<u64>] {
        &self.handles
    }
}

/// Start the scenario on a fresh pool.
pub fn start(config: LockContentionConfig, recorder: Arc<dyn EventRecorder>) -> Result<LockContentionRun, PoolError> {
    config.validate()?;
    let pool = BoundedWorkerPool::with_recorder(config.pool.clone(), recorder)?;
    let lock = Arc::new(SharedLock::new());

    let mut handles = Vec::with_capacity(config.worker_load);
    for worker in 0..config.worker_load {
        let lock = lock.clone();
        let hold = config.hold_duration;
        let handle = pool.submit(format!("lock-worker-{}", worker), move |ctx| contend(&lock, hold, ctx))?;
        handles.push(handle);
    }

    log_scenario!(
        SCENARIO_NAME,
        "submitted",
        worker_load = config.worker_load,
        hold_ms = config.hold_duration.as_millis() as u64
    );

    Ok(LockContentionRun {
        run: ScenarioRun::new(SCENARIO_NAME, pool, config.run_duration),
        lock,
        handles,
    })
}

/// Body of one logical worker.
fn contend(lock: &SharedLock, hold: Duration, ctx: &TaskContext) -> Result<u64, PoolError> {
    let mut cycles = 0u64;
    while !ctx.should_stop() {
        let guard = lock.acquire(ctx);
        ctx.sleep(hold)?;
        drop(guard);
        cycles += 1;
    }
    Ok(cycles)
}
