use std::time::Duration;

use snarl_api::errors::PoolError;

/// Default granularity at which blocked waits re-check for cancellation.
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Upper bound on the default output-contention pool, whatever the core count.
pub const DEFAULT_OUTPUT_POOL_CAP: usize = 8;

// --- Pool Configuration ---

/// Configuration for a `BoundedWorkerPool`.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads. Fixed for the lifetime of the pool.
    pub pool_size: usize,

    /// Worker threads are named `{thread_name_prefix}-{index}`; the same
    /// string is the worker identity stamped on events.
    pub thread_name_prefix: String,

    /// How often a task blocked in `TaskContext::wait` or the start gate
    /// re-checks the cancellation token.
    pub wait_slice: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            thread_name_prefix: "snarl-worker".to_string(),
            wait_slice: DEFAULT_WAIT_SLICE,
        }
    }
}

impl PoolConfig {
    /// Pool of `pool_size` workers named `{prefix}-{index}`.
    pub fn sized(pool_size: usize, prefix: &str) -> Self {
        Self {
            pool_size,
            thread_name_prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.pool_size == 0 {
            return Err(PoolError::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(PoolError::InvalidConfig("thread_name_prefix must not be empty".into()));
        }
        if self.wait_slice.is_zero() {
            return Err(PoolError::InvalidConfig("wait_slice must be non-zero".into()));
        }
        Ok(())
    }
}

// --- Scenario Configuration ---

/// Lock contention: N looping workers share one mutex through a smaller pool.
#[derive(Clone, Debug)]
pub struct LockContentionConfig {
    pub pool: PoolConfig,

    /// Number of logical workers submitted as tasks. May exceed the pool size,
    /// in which case the surplus waits in the queue for a worker slot.
    pub worker_load: usize,

    /// How long each acquisition holds the lock.
    pub hold_duration: Duration,

    /// `None` runs until an external stop.
    pub run_duration: Option<Duration>,
}

impl Default for LockContentionConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::sized(4, "contention-worker"),
            worker_load: 20,
            hold_duration: Duration::from_millis(1000),
            run_duration: None,
        }
    }
}

impl LockContentionConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        self.pool.validate()?;
        if self.worker_load == 0 {
            return Err(PoolError::InvalidConfig("worker_load must be at least 1".into()));
        }
        Ok(())
    }
}

/// Which way a starvation configuration is expected to behave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StarvationOutcome {
    /// Every worker ends up held by a parent blocked on a queued child.
    Deadlock,
    /// Some worker stays free to run children; throughput degrades but all
    /// parents finish.
    Progress,
}

/// Nested-submission starvation: parents submit children into their own pool
/// and block on them.
#[derive(Clone, Debug)]
pub struct StarvationConfig {
    pub pool: PoolConfig,

    /// Parent tasks submitted up front.
    pub parent_count: usize,

    /// Children each crawl task submits and waits on, one after another.
    pub branching_factor: usize,

    /// Levels of nesting below the parents. Depth 1 means parents spawn
    /// children and children spawn nothing.
    pub depth: usize,

    /// Interruptible sleep every crawl task performs after finishing its
    /// children, keeping the worker visibly occupied.
    pub linger: Duration,

    /// Parent `i` crawls `{url_prefix}{i}`; children append `/link{j}`.
    pub url_prefix: String,

    pub run_duration: Option<Duration>,
}

impl Default for StarvationConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::sized(10, "starving-thread"),
            parent_count: 10,
            branching_factor: 2,
            depth: 1,
            linger: Duration::ZERO,
            url_prefix: "https://example.com/page".to_string(),
            run_duration: None,
        }
    }
}

impl StarvationConfig {
    /// The minimal deadlock: two workers, two parents, one child each.
    pub fn canonical_deadlock() -> Self {
        Self {
            pool: PoolConfig::sized(2, "starving-thread"),
            parent_count: 2,
            branching_factor: 1,
            depth: 1,
            ..Default::default()
        }
    }

    /// Fewer parents than workers: slow but never stuck.
    pub fn progressing() -> Self {
        Self {
            pool: PoolConfig::sized(4, "starving-thread"),
            parent_count: 2,
            branching_factor: 1,
            depth: 1,
            ..Default::default()
        }
    }

    /// Ten workers, ten crawlers, two links per page, each crawler lingering
    /// thirty seconds so the stall is easy to catch in a profiler.
    pub fn crawler() -> Self {
        Self {
            linger: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Each parent's crawl is one chain of blocked tasks at a time, at most
    /// `depth` long, and the leaf at its end needs a free worker to run.
    /// With every worker pinned by some chain no leaf can ever run.
    pub fn expected_outcome(&self) -> StarvationOutcome {
        let pinned = self.parent_count.saturating_mul(self.depth);
        if self.branching_factor >= 1 && self.depth >= 1 && pinned >= self.pool.pool_size {
            StarvationOutcome::Deadlock
        } else {
            StarvationOutcome::Progress
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        self.pool.validate()?;
        if self.parent_count == 0 {
            return Err(PoolError::InvalidConfig("parent_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Output contention: N workers writing lines to one shared stream.
#[derive(Clone, Debug)]
pub struct OutputContentionConfig {
    pub pool: PoolConfig,
    pub worker_load: usize,

    /// Pause between writes. `None` writes in a tight loop.
    pub interval: Option<Duration>,

    pub run_duration: Option<Duration>,
}

impl Default for OutputContentionConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::sized(num_cpus::get().min(DEFAULT_OUTPUT_POOL_CAP), "output-worker"),
            worker_load: 20,
            interval: Some(Duration::from_millis(10)),
            run_duration: None,
        }
    }
}

impl OutputContentionConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        self.pool.validate()?;
        if self.worker_load == 0 {
            return Err(PoolError::InvalidConfig("worker_load must be at least 1".into()));
        }
        Ok(())
    }
}
