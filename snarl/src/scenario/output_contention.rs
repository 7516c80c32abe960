//! # Output Contention
//!
//! Many workers writing lines to one shared output stream. The scenario takes
//! no lock of its own: every write goes through the stream's internal lock,
//! and that implicit critical section is the contended resource. It shares
//! the pool machinery with the lock-contention scenario but never touches a
//! `SharedLock`, so the two sources of contention stay distinguishable.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use snarl_api::errors::PoolError;
use snarl_api::event::{now_millis, EventCategory};
use snarl_api::recorder::EventRecorder;

use super::ScenarioRun;
use crate::config::OutputContentionConfig;
use crate::{log_error, log_scenario};
use crate::pool::{BoundedWorkerPool, TaskContext, TaskHandle};

pub const SCENARIO_NAME: &str = "output-contention";

/// A line-oriented output shared by every worker of the scenario.
pub trait LineSink: fmt::Debug + Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Process stdout or stderr, written through the standard library's own
/// stream lock and flushed per line.
#[derive(Debug, Clone, Copy)]
pub struct StdStreamSink {
    stream: Stream,
}

impl StdStreamSink {
    pub fn stdout() -> Self {
        Self { stream: Stream::Stdout }
    }

    pub fn stderr() -> Self {
        Self { stream: Stream::Stderr }
    }
}

impl LineSink for StdStreamSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        match self.stream {
            Stream::Stdout => {
                let mut out = io::stdout().lock();
                writeln!(out, "{}", line)?;
                out.flush()
            }
            Stream::Stderr => writeln!(io::stderr().lock(), "{}", line),
        }
    }

    fn name(&self) -> &str {
        match self.stream {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Collects lines in memory; the internal mutex stands in for the stream
/// lock.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// A started output-contention scenario.
#[derive(Debug)]
pub struct OutputContentionRun {
    run: ScenarioRun,
    sink: Arc<dyn LineSink>,
    lines_written: Arc<AtomicU64>,
    handles: Vec<TaskHandle<u64>>,
}

impl std::ops::Deref for OutputContentionRun {
    type Target = ScenarioRun;

    fn deref(&self) -> &ScenarioRun {
        &self.run
    }
}

impl OutputContentionRun {
    pub fn sink(&self) -> &Arc<dyn LineSink> {
        &self.sink
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// One handle per writer, resolving to the lines it wrote.
    pub fn handles(&self) -> &[TaskHandle<u64>] {
        &self.handles
    }
}

/// Start the scenario on a fresh pool, writing to `sink`.
pub fn start(
    config: OutputContentionConfig,
    sink: Arc<dyn LineSink>,
    recorder: Arc<dyn EventRecorder>,
) -> Result<OutputContentionRun, PoolError> {
    config.validate()?;
    let pool = BoundedWorkerPool::with_recorder(config.pool.clone(), recorder)?;
    let lines_written = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::with_capacity(config.worker_load);
    for writer in 0..config.worker_load {
        let sink = sink.clone();
        let lines_written = lines_written.clone();
        let interval = config.interval;
        let handle = pool.submit(format!("output-writer-{}", writer), move |ctx| {
            write_loop(writer, sink.as_ref(), interval, &lines_written, ctx)
        })?;
        handles.push(handle);
    }

    log_scenario!(
        SCENARIO_NAME,
        "submitted",
        worker_load = config.worker_load,
        sink = sink.name(),
        interval_ms = config.interval.map(|d| d.as_millis() as u64).unwrap_or(0)
    );

    Ok(OutputContentionRun {
        run: ScenarioRun::new(SCENARIO_NAME, pool, config.run_duration),
        sink,
        lines_written,
        handles,
    })
}

fn write_loop(
    writer: usize,
    sink: &dyn LineSink,
    interval: Option<Duration>,
    lines_written: &AtomicU64,
    ctx: &TaskContext,
) -> Result<u64, PoolError> {
    let mut written = 0u64;
    while !ctx.should_stop() {
        let line = format!("Thread-{} logging at {}", writer, now_millis());
        let started = Instant::now();
        sink.write_line(&line).map_err(|err| {
            log_error!(err, scenario = SCENARIO_NAME, sink = sink.name());
            PoolError::TaskFailed(format!("{} write failed: {}", sink.name(), err))
        })?;
        let write_micros = started.elapsed().as_micros() as u64;

        written += 1;
        lines_written.fetch_add(1, Ordering::Relaxed);
        ctx.emit(
            ctx.event(EventCategory::SinkWrite)
                .with_field("sink", sink.name())
                .with_field("write_micros", write_micros),
        );

        match interval {
            Some(interval) => ctx.sleep(interval)?,
            None => ctx.checkpoint()?,
        }
    }
    Ok(written)
}
