//! # Nested-Submission Starvation
//!
//! A crawler where every page task submits its link tasks into the pool it is
//! running on and blocks on each one before moving on. The parent keeps its
//! worker while it waits. With at least as many parents as workers, every
//! worker ends up holding a blocked parent and the children sit in the queue
//! forever: a true deadlock, not a slowdown. With fewer parents than workers
//! a free worker drains the children and everything completes.
//!
//! Which of the two happens is decided by configuration alone: every level of
//! a parent's chain pins a worker, so `parent_count * depth` is weighed
//! against `pool_size`. The crawl code path is the same either way.
//! Parents wait behind a [`StartGate`] that opens only once all of them are
//! queued, so no child can slip into a worker ahead of a parent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use snarl_api::errors::PoolError;
use snarl_api::event::{Event, EventCategory};
use snarl_api::recorder::EventRecorder;

use super::{ScenarioRun, StartGate};
use crate::config::{StarvationConfig, StarvationOutcome};
use crate::log_scenario;
use crate::pool::{current_worker_id, BoundedWorkerPool, TaskContext, TaskHandle};

pub const SCENARIO_NAME: &str = "starvation";

/// Crawl parameters shared by every task of one run.
#[derive(Debug)]
struct CrawlPlan {
    pool: BoundedWorkerPool,
    branching_factor: usize,
    depth: usize,
    linger: Duration,
}

/// What `StarvationRun::inspect` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarvationReport {
    /// Parents that resolved, with their outcome.
    pub resolved: Vec<(String, Result<usize, PoolError>)>,
    /// Labels of parents still pending when the deadline passed.
    pub unresolved: Vec<String>,
}

impl StarvationReport {
    pub fn is_starved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn all_completed(&self) -> bool {
        self.unresolved.is_empty() && self.resolved.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

/// A started starvation scenario.
#[derive(Debug)]
pub struct StarvationRun {
    run: ScenarioRun,
    parents: Vec<TaskHandle<usize>>,
    expected: StarvationOutcome,
}

impl std::ops::Deref for StarvationRun {
    type Target = ScenarioRun;

    fn deref(&self) -> &ScenarioRun {
        &self.run
    }
}

impl StarvationRun {
    /// Handles of the parent tasks. Each resolves to the number of pages its
    /// subtree crawled.
    pub fn parents(&self) -> &[TaskHandle<usize>] {
        &self.parents
    }

    pub fn expected_outcome(&self) -> StarvationOutcome {
        self.expected
    }

    /// Wait on every parent against one shared deadline and report which ones
    /// are still stuck. Emits `starvation-detected` when any are.
    ///
    /// Parents that never resolve are left as they are; inspecting does not
    /// unblock anything.
    pub fn inspect(&self, timeout: Duration) -> StarvationReport {
        let deadline = Instant::now() + timeout;
        let mut report = StarvationReport {
            resolved: Vec::new(),
            unresolved: Vec::new(),
        };

        for parent in &self.parents {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match parent.wait_timeout(remaining) {
                Err(PoolError::HandleWaitTimeout(_)) => report.unresolved.push(parent.label().to_string()),
                outcome => report.resolved.push((parent.label().to_string(), outcome)),
            }
        }

        if report.is_starved() {
            let pool = self.run.pool();
            let metrics = pool.metrics();
            pool.recorder().emit(
                Event::new(EventCategory::StarvationDetected, SCENARIO_NAME, current_worker_id())
                    .with_field("unresolved", report.unresolved.len())
                    .with_field("parents", self.parents.len())
                    .with_field("queued", metrics.queued)
                    .with_field("active", metrics.active)
                    .with_field("waited_ms", timeout.as_millis() as u64),
            );
            tracing::warn!(
                unresolved = report.unresolved.len(),
                parents = self.parents.len(),
                queued = metrics.queued,
                active = metrics.active,
                "starvation: parents still blocked after {:?}",
                timeout
            );
        } else {
            log_scenario!(SCENARIO_NAME, "inspect", resolved = report.resolved.len());
        }
        report
    }
}

/// Start the scenario on a fresh pool.
pub fn start(config: StarvationConfig, recorder: Arc<dyn EventRecorder>) -> Result<StarvationRun, PoolError> {
    config.validate()?;
    let expected = config.expected_outcome();
    let pool = BoundedWorkerPool::with_recorder(config.pool.clone(), recorder)?;
    let slice = config.pool.wait_slice;

    let plan = Arc::new(CrawlPlan {
        pool: pool.clone(),
        branching_factor: config.branching_factor,
        depth: config.depth,
        linger: config.linger,
    });
    let gate = Arc::new(StartGate::new());

    let mut parents = Vec::with_capacity(config.parent_count);
    for i in 0..config.parent_count {
        let url = format!("{}{}", config.url_prefix, i);
        let plan = plan.clone();
        let task_gate = gate.clone();
        let handle = pool.submit(url.clone(), move |ctx| {
            task_gate.pass(ctx, slice)?;
            crawl(&plan, &url, 0, ctx)
        });
        match handle {
            Ok(handle) => parents.push(handle),
            Err(err) => {
                gate.open();
                return Err(err);
            }
        }
    }
    gate.open();

    log_scenario!(
        SCENARIO_NAME,
        "submitted",
        parents = config.parent_count,
        pool_size = config.pool.pool_size,
        branching_factor = config.branching_factor,
        expected = ?expected
    );

    Ok(StarvationRun {
        run: ScenarioRun::new(SCENARIO_NAME, pool, config.run_duration),
        parents,
        expected,
    })
}

/// Crawl one page: submit each link into the same pool and block on it.
fn crawl(plan: &Arc<CrawlPlan>, url: &str, level: usize, ctx: &TaskContext) -> Result<usize, PoolError> {
    ctx.emit(
        ctx.event(EventCategory::CrawlStarted)
            .with_field("url", url)
            .with_field("level", level),
    );
    tracing::debug!(worker = ctx.worker_id(), url = url, "crawling");

    let mut pages = 1;
    if level < plan.depth {
        for i in 0..plan.branching_factor {
            let link = format!("{}/link{}", url, i);
            ctx.emit(ctx.event(EventCategory::NestedTaskSubmitted).with_field("url", link.as_str()));

            let child_plan = plan.clone();
            let child_url = link.clone();
            let child = plan
                .pool
                .submit(link, move |ctx| crawl(&child_plan, &child_url, level + 1, ctx))?;
            pages += ctx.wait(&child)?;
        }
    }

    ctx.emit(
        ctx.event(EventCategory::CrawlFinished)
            .with_field("url", url)
            .with_field("pages", pages),
    );
    if !plan.linger.is_zero() {
        ctx.sleep(plan.linger)?;
    }
    Ok(pages)
}
