//! # Observation Events
//!
//! An [`Event`] is an immutable, timestamped record of one discrete occurrence
//! inside the harness: a task being submitted or started, a lock being
//! acquired, a parent beginning to wait on its child, and so on.
//!
//! Events carry no identity beyond emission order and timestamp. Across
//! workers there is no ordering guarantee; for a single worker, timestamps are
//! non-decreasing because they are read from [`now_millis`], a monotonic clock
//! anchored to wall-clock time once per process.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    static ref CLOCK_ANCHOR: (Instant, u64) = {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        (Instant::now(), wall)
    };
}

/// Milliseconds since the Unix epoch, derived from a monotonic clock.
///
/// The wall-clock offset is sampled once; afterwards only `Instant` elapsed
/// time is added, so the value never decreases within a process even if the
/// system clock is adjusted.
pub fn now_millis() -> u64 {
    let (anchor, wall) = *CLOCK_ANCHOR;
    wall + anchor.elapsed().as_millis() as u64
}

/// Kind of occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    PoolStarted,
    PoolShutdown,
    WorkerExited,
    TaskSubmitted,
    TaskRejected,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskPanicked,
    TaskDropped,
    LockRequested,
    LockAcquired,
    LockReleased,
    NestedTaskSubmitted,
    NestedWaitBegun,
    NestedWaitEnded,
    CrawlStarted,
    CrawlFinished,
    SinkWrite,
    StarvationDetected,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::PoolStarted => "pool-started",
            EventCategory::PoolShutdown => "pool-shutdown",
            EventCategory::WorkerExited => "worker-exited",
            EventCategory::TaskSubmitted => "task-submitted",
            EventCategory::TaskRejected => "task-rejected",
            EventCategory::TaskStarted => "task-started",
            EventCategory::TaskCompleted => "task-completed",
            EventCategory::TaskFailed => "task-failed",
            EventCategory::TaskCancelled => "task-cancelled",
            EventCategory::TaskPanicked => "task-panicked",
            EventCategory::TaskDropped => "task-dropped",
            EventCategory::LockRequested => "lock-requested",
            EventCategory::LockAcquired => "lock-acquired",
            EventCategory::LockReleased => "lock-released",
            EventCategory::NestedTaskSubmitted => "nested-task-submitted",
            EventCategory::NestedWaitBegun => "nested-wait-begun",
            EventCategory::NestedWaitEnded => "nested-wait-ended",
            EventCategory::CrawlStarted => "crawl-started",
            EventCategory::CrawlFinished => "crawl-finished",
            EventCategory::SinkWrite => "sink-write",
            EventCategory::StarvationDetected => "starvation-detected",
        }
    }

    /// Categories that end a started task. Every `task-started` is followed
    /// by exactly one of these for the same task.
    pub fn is_task_terminal(&self) -> bool {
        matches!(
            self,
            EventCategory::TaskCompleted
                | EventCategory::TaskFailed
                | EventCategory::TaskCancelled
                | EventCategory::TaskPanicked
        )
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive payload value attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInt(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::UInt(value as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Immutable observation record.
///
/// Built with [`Event::new`] and the consuming `with_*` builders; once handed
/// to a recorder it is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    category: EventCategory,
    label: String,
    worker_id: String,
    timestamp_millis: u64,
    fields: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Create an event stamped with the current monotonic time.
    pub fn new(category: EventCategory, label: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            category,
            label: label.into(),
            worker_id: worker_id.into(),
            timestamp_millis: now_millis(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a payload field, replacing any previous value under `key`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Unsigned field lookup; task ids and counters are stored this way.
    pub fn field_u64(&self, key: &str) -> Option<u64> {
        match self.fields.get(key) {
            Some(FieldValue::UInt(v)) => Some(*v),
            Some(FieldValue::Int(v)) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.timestamp_millis, self.category, self.label, self.worker_id
        )?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}
