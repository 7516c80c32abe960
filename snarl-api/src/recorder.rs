//! # Event Recorder Contract
//!
//! A recorder is the process-wide sink events are emitted into. The contract
//! is small on purpose:
//!
//! - `record` may fail (buffer full, consumer gone, I/O error)
//! - `emit` never fails; a failed record is logged at debug level and dropped
//! - both must be safe to call from any number of workers at once
//!
//! Recording is a side channel. Task correctness never depends on it, and a
//! disabled harness simply uses [`NoopRecorder`].

use std::fmt;

use crate::errors::RecorderError;
use crate::event::Event;

/// Sink for observation events.
pub trait EventRecorder: fmt::Debug + Send + Sync {
    /// Append an event to the observation stream.
    fn record(&self, event: Event) -> Result<(), RecorderError>;

    /// Best-effort emission. Recorder failures are swallowed here so that the
    /// emitting task never observes them.
    fn emit(&self, event: Event) {
        let category = event.category();
        if let Err(err) = self.record(event) {
            tracing::debug!(error = %err, category = %category, "event dropped by recorder");
        }
    }

    /// Whether emitted events go anywhere. Callers may skip building
    /// expensive payloads when this is false.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Recorder used when observation is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _event: Event) -> Result<(), RecorderError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
