use std::time::Duration;

use snarl_api::errors::{PoolError, RecorderError};
use snarl_api::event::{Event, EventCategory};
use snarl_api::recorder::{EventRecorder, NoopRecorder};

#[test]
fn test_pool_error_messages() {
    assert_eq!(PoolError::PoolClosed.to_string(), "Worker pool is closed to new submissions");
    assert!(PoolError::HandleWaitTimeout(Duration::from_secs(5)).to_string().contains("5s"));
    assert!(PoolError::TaskPanicked("boom".into()).to_string().contains("boom"));
}

#[test]
fn test_cancellation_classification() {
    assert!(PoolError::TaskCancelled.is_cancellation());
    assert!(!PoolError::PoolClosed.is_cancellation());
    assert!(!PoolError::HandleWaitTimeout(Duration::from_millis(1)).is_cancellation());
}

#[test]
fn test_pool_error_clone_equality() {
    let err = PoolError::TaskFailed("sink closed".into());
    assert_eq!(err.clone(), err);
}

#[test]
fn test_recorder_error_messages() {
    assert!(RecorderError::Full { capacity: 16 }.to_string().contains("16"));
    assert_eq!(RecorderError::Disconnected.to_string(), "Recorder stream consumer has gone away");
}

#[derive(Debug)]
struct FailingRecorder;

impl EventRecorder for FailingRecorder {
    fn record(&self, _event: Event) -> Result<(), RecorderError> {
        Err(RecorderError::Disconnected)
    }
}

#[test]
fn test_emit_swallows_record_failures() {
    let recorder = FailingRecorder;
    assert!(recorder.record(Event::new(EventCategory::TaskStarted, "t", "w")).is_err());
    // Must not panic or propagate.
    recorder.emit(Event::new(EventCategory::TaskStarted, "t", "w"));
}

#[test]
fn test_noop_recorder_is_disabled() {
    let recorder = NoopRecorder;
    assert!(!recorder.is_enabled());
    assert!(recorder.record(Event::new(EventCategory::PoolStarted, "p", "driver")).is_ok());
}
