// Integration tests for snarl::recorder

use std::sync::Arc;
use std::time::Duration;

use snarl::config::PoolConfig;
use snarl::pool::{BoundedWorkerPool, ShutdownMode};
use snarl::recorder::{
    self, ChannelRecorder, EventRecorder, FanoutRecorder, JsonLinesRecorder, MemoryRecorder, TracingRecorder,
};
use snarl_api::errors::RecorderError;
use snarl_api::event::{Event, EventCategory};

fn event(label: &str) -> Event {
    Event::new(EventCategory::SinkWrite, label, "test-thread").with_field("n", 1u64)
}

#[test]
fn test_ring_recorder_evicts_oldest() {
    let recorder = MemoryRecorder::ring(3);
    for i in 0..5 {
        recorder.record(event(&format!("e{}", i))).unwrap();
    }

    assert_eq!(recorder.recorded(), 5);
    assert_eq!(recorder.evicted(), 2);
    let labels: Vec<String> = recorder.take().iter().map(|e| e.label().to_string()).collect();
    assert_eq!(labels, vec!["e2", "e3", "e4"]);
    assert!(recorder.is_empty());
}

#[test]
fn test_channel_recorder_drops_when_full() {
    let (recorder, rx) = ChannelRecorder::bounded(2);
    recorder.record(event("a")).unwrap();
    recorder.record(event("b")).unwrap();
    assert_eq!(recorder.record(event("c")), Err(RecorderError::Full { capacity: 2 }));

    // emit never fails the caller
    recorder.emit(event("d"));

    assert_eq!(rx.recv().unwrap().label(), "a");
    assert_eq!(rx.recv().unwrap().label(), "b");
    assert!(rx.try_recv().is_err());

    drop(rx);
    assert_eq!(recorder.record(event("e")), Err(RecorderError::Disconnected));
}

#[test]
fn test_json_lines_recorder_writes_one_object_per_line() {
    let recorder = JsonLinesRecorder::new(Vec::new());
    recorder.record(event("first")).unwrap();
    recorder
        .record(Event::new(EventCategory::LockAcquired, "lock-worker-0", "contention-worker-1").with_field("holders", 1u64))
        .unwrap();

    let output = String::from_utf8(recorder.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = output.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["category"], "sink-write");
    assert_eq!(lines[0]["label"], "first");
    assert_eq!(lines[1]["category"], "lock-acquired");
    assert_eq!(lines[1]["workerId"], "contention-worker-1");
    assert_eq!(lines[1]["fields"]["holders"], 1);
}

#[test]
fn test_fanout_reaches_every_recorder() {
    let first = Arc::new(MemoryRecorder::unbounded());
    let second = Arc::new(MemoryRecorder::unbounded());
    let (full, _rx) = ChannelRecorder::bounded(0);

    let fanout = FanoutRecorder::new(vec![first.clone() as Arc<dyn EventRecorder>])
        .with(Arc::new(full))
        .with(second.clone());

    assert!(fanout.record(event("x")).is_err());
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(fanout.is_enabled());
}

#[test]
fn test_tracing_recorder_accepts_events() {
    snarl::logging::init_test();
    assert!(TracingRecorder.record(event("logged")).is_ok());
}

#[test]
fn test_global_recorder_is_used_by_default() {
    assert!(!recorder::global().is_enabled());

    let memory = Arc::new(MemoryRecorder::unbounded());
    recorder::install_global(memory.clone());

    let pool = BoundedWorkerPool::new(PoolConfig::sized(1, "global")).unwrap();
    pool.submit("via-global", |_ctx| Ok(())).unwrap().wait().unwrap();
    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(Duration::from_secs(5))));

    recorder::reset_global();
    assert!(!recorder::global().is_enabled());

    let events = memory.take();
    assert!(events.iter().any(|e| e.category() == EventCategory::PoolStarted));
    assert!(events
        .iter()
        .any(|e| e.category() == EventCategory::TaskCompleted && e.label() == "via-global"));
    assert!(events.iter().all(|e| e.field("pool_id").is_some()));
}
