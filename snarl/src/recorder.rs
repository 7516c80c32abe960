//! # Event Recorder Implementations
//!
//! Concrete sinks for the [`EventRecorder`] contract, plus the process-wide
//! recorder that pools use when none is given explicitly.
//!
//! | recorder            | use                                                    |
//! |---------------------|--------------------------------------------------------|
//! | [`NoopRecorder`]    | observation disabled (the global default)              |
//! | [`TracingRecorder`] | one structured log line per event                      |
//! | [`MemoryRecorder`]  | in-process buffer, unbounded or a ring; used by tests  |
//! | [`ChannelRecorder`] | live stream to a consumer thread, drops when full      |
//! | [`JsonLinesRecorder`] | replayable JSON line per event to any writer         |
//! | [`FanoutRecorder`]  | several of the above at once                           |
//!
//! Recorders that serialize on a lock of their own (`JsonLinesRecorder`) add
//! a contention source to the run they observe. Prefer `MemoryRecorder` or
//! `ChannelRecorder` when measuring contention.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crossbeam_queue::{ArrayQueue, SegQueue};
use flume::{Receiver, Sender, TrySendError};
use lazy_static::lazy_static;

use snarl_api::errors::RecorderError;
use snarl_api::event::{Event, EventCategory};
pub use snarl_api::recorder::{EventRecorder, NoopRecorder};

lazy_static! {
    static ref GLOBAL_RECORDER: RwLock<Arc<dyn EventRecorder>> = RwLock::new(Arc::new(NoopRecorder));
}

/// Replace the process-wide recorder. Pools created afterwards pick it up.
pub fn install_global(recorder: Arc<dyn EventRecorder>) {
    *GLOBAL_RECORDER.write().unwrap_or_else(PoisonError::into_inner) = recorder;
}

/// The process-wide recorder; a `NoopRecorder` unless one was installed.
pub fn global() -> Arc<dyn EventRecorder> {
    GLOBAL_RECORDER.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Disable global recording again.
pub fn reset_global() {
    install_global(Arc::new(NoopRecorder));
}

// --- Tracing ---

/// Writes each event as a structured `tracing` record under the
/// `snarl::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) -> Result<(), RecorderError> {
        let fields = event
            .fields()
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            target: "snarl::events",
            category = %event.category(),
            label = event.label(),
            worker = event.worker_id(),
            ts = event.timestamp_millis(),
            fields = %fields,
            "event"
        );
        Ok(())
    }
}

// --- Memory ---

enum MemoryBuffer {
    Unbounded(SegQueue<Event>),
    Ring(ArrayQueue<Event>),
}

/// In-process event buffer.
///
/// `unbounded()` keeps everything. `ring(capacity)` keeps the most recent
/// `capacity` events, evicting the oldest. Reading with [`Self::take`]
/// removes what it returns, so consecutive calls see disjoint batches.
pub struct MemoryRecorder {
    buffer: MemoryBuffer,
    recorded: AtomicU64,
    evicted: AtomicU64,
}

impl fmt::Debug for MemoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecorder")
            .field("len", &self.len())
            .field("recorded", &self.recorded())
            .field("evicted", &self.evicted())
            .finish()
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MemoryRecorder {
    pub fn unbounded() -> Self {
        Self {
            buffer: MemoryBuffer::Unbounded(SegQueue::new()),
            recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// # Panics
    /// If `capacity` is zero.
    pub fn ring(capacity: usize) -> Self {
        Self {
            buffer: MemoryBuffer::Ring(ArrayQueue::new(capacity)),
            recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Remove and return every buffered event in recording order.
    pub fn take(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        match &self.buffer {
            MemoryBuffer::Unbounded(queue) => {
                while let Some(event) = queue.pop() {
                    events.push(event);
                }
            }
            MemoryBuffer::Ring(queue) => {
                while let Some(event) = queue.pop() {
                    events.push(event);
                }
            }
        }
        events
    }

    /// Buffered events of one category, removing every buffered event.
    pub fn take_category(&self, category: EventCategory) -> Vec<Event> {
        self.take().into_iter().filter(|e| e.category() == category).collect()
    }

    pub fn len(&self) -> usize {
        match &self.buffer {
            MemoryBuffer::Unbounded(queue) => queue.len(),
            MemoryBuffer::Ring(queue) => queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events accepted since creation, including evicted ones.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) -> Result<(), RecorderError> {
        match &self.buffer {
            MemoryBuffer::Unbounded(queue) => queue.push(event),
            MemoryBuffer::Ring(queue) => {
                if queue.force_push(event).is_some() {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// --- Channel ---

/// Streams events to a consumer over a bounded channel without ever blocking
/// the emitter. A full channel drops the event and reports `Full`.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: Sender<Event>,
    capacity: usize,
}

impl ChannelRecorder {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx, capacity }, rx)
    }
}

impl EventRecorder for ChannelRecorder {
    fn record(&self, event: Event) -> Result<(), RecorderError> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => RecorderError::Full { capacity: self.capacity },
            TrySendError::Disconnected(_) => RecorderError::Disconnected,
        })
    }
}

// --- JSON lines ---

/// Serializes each event as one JSON object per line.
pub struct JsonLinesRecorder<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> fmt::Debug for JsonLinesRecorder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesRecorder").finish()
    }
}

impl<W: Write + Send> JsonLinesRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Flush and hand back the writer.
    pub fn into_inner(self) -> W {
        let mut writer = self.writer.into_inner().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.flush();
        writer
    }
}

impl<W: Write + Send> EventRecorder for JsonLinesRecorder<W> {
    fn record(&self, event: Event) -> Result<(), RecorderError> {
        let mut line = serde_json::to_vec(&event).map_err(|e| RecorderError::Serialize(e.to_string()))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line).map_err(|e| RecorderError::Io(e.to_string()))
    }
}

// --- Fan-out ---

/// Forwards every event to each inner recorder. All recorders see the event
/// even if an earlier one fails; the first failure is reported.
#[derive(Debug, Default)]
pub struct FanoutRecorder {
    recorders: Vec<Arc<dyn EventRecorder>>,
}

impl FanoutRecorder {
    pub fn new(recorders: Vec<Arc<dyn EventRecorder>>) -> Self {
        Self { recorders }
    }

    pub fn with(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorders.push(recorder);
        self
    }
}

impl EventRecorder for FanoutRecorder {
    fn record(&self, event: Event) -> Result<(), RecorderError> {
        let mut first_error = None;
        for recorder in &self.recorders {
            if let Err(err) = recorder.record(event.clone()) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_enabled(&self) -> bool {
        self.recorders.iter().any(|r| r.is_enabled())
    }
}
