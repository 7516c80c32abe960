// Integration tests for snarl::pool

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use snarl::config::PoolConfig;
use snarl::pool::{BoundedWorkerPool, PoolStatus, ShutdownMode};
use snarl::recorder::MemoryRecorder;
use snarl_api::errors::PoolError;
use snarl_api::event::{Event, EventCategory};

const SETTLE: Duration = Duration::from_secs(5);

fn pool_with_memory(pool_size: usize, prefix: &str) -> (BoundedWorkerPool, Arc<MemoryRecorder>) {
    let recorder = Arc::new(MemoryRecorder::unbounded());
    let pool = BoundedWorkerPool::with_recorder(PoolConfig::sized(pool_size, prefix), recorder.clone())
        .expect("pool should start");
    (pool, recorder)
}

fn task_ids(events: &[Event], pred: impl Fn(EventCategory) -> bool) -> BTreeSet<u64> {
    events
        .iter()
        .filter(|e| pred(e.category()))
        .filter_map(|e| e.field_u64("task_id"))
        .collect()
}

#[test]
fn test_submit_and_wait() {
    let (pool, _recorder) = pool_with_memory(2, "basic");
    let handle = pool.submit("answer", |_ctx| Ok(21 * 2)).unwrap();

    assert_eq!(handle.wait(), Ok(42));
    assert_eq!(handle.label(), "answer");

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_zero_sized_pool_is_rejected() {
    let result = BoundedWorkerPool::with_recorder(PoolConfig::sized(0, "empty"), Arc::new(MemoryRecorder::unbounded()));
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}

#[test]
fn test_single_worker_runs_tasks_in_fifo_order() {
    let (pool, _recorder) = pool_with_memory(1, "fifo");
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let order = order.clone();
            pool.submit(format!("task-{}", i), move |_ctx| {
                order.lock().unwrap().push(i);
                Ok(())
            })
            .unwrap()
        })
        .collect();

    for handle in &handles {
        assert_eq!(handle.wait(), Ok(()));
    }
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_concurrency_never_exceeds_pool_size() {
    let (pool, recorder) = pool_with_memory(3, "bounded");

    let handles: Vec<_> = (0..12)
        .map(|i| {
            pool.submit(format!("sleeper-{}", i), |ctx| {
                ctx.sleep(Duration::from_millis(20))?;
                Ok(())
            })
            .unwrap()
        })
        .collect();
    for handle in &handles {
        assert_eq!(handle.wait(), Ok(()));
    }

    let metrics = pool.metrics();
    assert!(metrics.peak_active <= 3, "peak_active was {}", metrics.peak_active);
    assert_eq!(metrics.completed, 12);
    assert_eq!(metrics.submitted, 12);

    for event in recorder.take_category(EventCategory::TaskStarted) {
        assert!(event.field_u64("active").unwrap() <= 3);
    }

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_submission_after_shutdown_fails() {
    let (pool, recorder) = pool_with_memory(1, "closed");
    pool.shutdown(ShutdownMode::Graceful);

    let result = pool.submit("late", |_ctx| Ok(()));
    assert_eq!(result.unwrap_err(), PoolError::PoolClosed);
    assert!(pool.is_shutdown());

    let rejected = recorder.take_category(EventCategory::TaskRejected);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].label(), "late");

    assert!(pool.await_termination(Some(SETTLE)));
    assert_eq!(pool.status(), PoolStatus::Terminated);
}

#[test]
fn test_graceful_shutdown_lets_queued_tasks_finish() {
    let (pool, _recorder) = pool_with_memory(1, "graceful");

    let handles: Vec<_> = (0..3)
        .map(|i| {
            pool.submit(format!("queued-{}", i), move |ctx| {
                ctx.sleep(Duration::from_millis(20))?;
                Ok(i)
            })
            .unwrap()
        })
        .collect();

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.wait(), Ok(i));
    }
    assert_eq!(pool.metrics().dropped, 0);
}

#[test]
fn test_immediate_shutdown_interrupts_and_drops() {
    let (pool, recorder) = pool_with_memory(1, "immediate");
    let (started_tx, started_rx) = flume::bounded(1);

    let sleeper = pool
        .submit("sleeper", move |ctx| {
            started_tx.send(()).unwrap();
            ctx.sleep(Duration::from_secs(30))?;
            Ok(())
        })
        .unwrap();
    let queued: Vec<_> = (0..3)
        .map(|i| pool.submit(format!("queued-{}", i), |_ctx| Ok(())).unwrap())
        .collect();

    started_rx.recv_timeout(SETTLE).expect("sleeper should start");
    let stop_started = Instant::now();
    pool.shutdown(ShutdownMode::Immediate);
    assert!(pool.await_termination(Some(SETTLE)));
    assert!(stop_started.elapsed() < SETTLE);

    assert_eq!(sleeper.wait(), Err(PoolError::TaskCancelled));
    for handle in &queued {
        assert_eq!(handle.wait(), Err(PoolError::TaskCancelled));
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.dropped, 3);

    let events = recorder.take();
    let dropped = events.iter().filter(|e| e.category() == EventCategory::TaskDropped).count();
    assert_eq!(dropped, 3);
    let shutdown: Vec<_> = events
        .iter()
        .filter(|e| e.category() == EventCategory::PoolShutdown)
        .collect();
    assert_eq!(shutdown.len(), 1);
}

#[test]
fn test_every_started_task_reaches_a_terminal_event() {
    let (pool, recorder) = pool_with_memory(2, "terminal");

    for i in 0..6 {
        pool.submit(format!("looper-{}", i), |ctx| -> Result<(), PoolError> {
            loop {
                ctx.sleep(Duration::from_millis(5))?;
            }
        })
        .unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));

    pool.shutdown(ShutdownMode::Immediate);
    assert!(pool.await_termination(Some(SETTLE)));

    let events = recorder.take();
    let started = task_ids(&events, |c| c == EventCategory::TaskStarted);
    let terminal = task_ids(&events, |c| c.is_task_terminal());
    assert!(!started.is_empty());
    assert_eq!(started, terminal);
}

#[test]
fn test_panicking_task_does_not_kill_worker() {
    let (pool, recorder) = pool_with_memory(1, "panicky");

    let bad = pool.submit("bad", |_ctx| -> Result<(), PoolError> { panic!("boom") }).unwrap();
    assert_eq!(bad.wait(), Err(PoolError::TaskPanicked("boom".into())));

    let good = pool.submit("good", |_ctx| Ok("still alive")).unwrap();
    assert_eq!(good.wait(), Ok("still alive"));

    assert_eq!(pool.metrics().panicked, 1);
    assert_eq!(recorder.take_category(EventCategory::TaskPanicked).len(), 1);

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_task_failure_is_reported() {
    let (pool, recorder) = pool_with_memory(1, "failing");
    let handle = pool
        .submit("failing", |_ctx| -> Result<(), PoolError> { Err(PoolError::TaskFailed("no route".into())) })
        .unwrap();

    assert_eq!(handle.wait(), Err(PoolError::TaskFailed("no route".into())));
    let failed = recorder.take_category(EventCategory::TaskFailed);
    assert_eq!(failed.len(), 1);

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_nested_submission_with_free_worker_completes() {
    let (pool, recorder) = pool_with_memory(2, "nested");
    let inner_pool = pool.clone();

    let parent = pool
        .submit("parent", move |ctx| {
            let child = inner_pool.submit("child", |_ctx| Ok(5))?;
            Ok(ctx.wait(&child)? + 1)
        })
        .unwrap();

    assert_eq!(parent.wait_timeout(SETTLE), Ok(6));
    let events = recorder.take();
    assert!(events.iter().any(|e| e.category() == EventCategory::NestedWaitBegun));
    assert!(events.iter().any(|e| e.category() == EventCategory::NestedWaitEnded));

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_nested_submission_on_single_worker_deadlocks() {
    let (pool, _recorder) = pool_with_memory(1, "self-deadlock");
    let inner_pool = pool.clone();

    let parent = pool
        .submit("parent", move |ctx| {
            let child = inner_pool.submit("child", |_ctx| Ok(()))?;
            ctx.wait(&child)
        })
        .unwrap();

    assert_eq!(
        parent.wait_timeout(Duration::from_millis(500)),
        Err(PoolError::HandleWaitTimeout(Duration::from_millis(500)))
    );
    assert!(!parent.is_resolved());

    // Graceful shutdown cannot break the cycle.
    pool.shutdown(ShutdownMode::Graceful);
    assert!(!pool.await_termination(Some(Duration::from_millis(300))));

    pool.shutdown(ShutdownMode::Immediate);
    assert!(pool.await_termination(Some(SETTLE)));
    assert_eq!(parent.wait(), Err(PoolError::TaskCancelled));
}

#[test]
fn test_handle_wait_is_idempotent() {
    let (pool, _recorder) = pool_with_memory(1, "idempotent");
    let runs = Arc::new(Mutex::new(0));
    let counter = runs.clone();

    let handle = pool
        .submit("once", move |_ctx| {
            *counter.lock().unwrap() += 1;
            Ok(String::from("done"))
        })
        .unwrap();

    assert_eq!(handle.wait(), Ok("done".to_string()));
    assert_eq!(handle.wait(), Ok("done".to_string()));
    assert_eq!(handle.wait_timeout(Duration::from_millis(1)), Ok("done".to_string()));
    assert_eq!(*runs.lock().unwrap(), 1);

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_per_worker_timestamps_are_monotonic() {
    let (pool, recorder) = pool_with_memory(4, "clock");

    let handles: Vec<_> = (0..40)
        .map(|i| {
            pool.submit(format!("tick-{}", i), |ctx| {
                for _ in 0..5 {
                    ctx.emit(ctx.event(EventCategory::SinkWrite));
                }
                Ok(())
            })
            .unwrap()
        })
        .collect();
    for handle in &handles {
        handle.wait().unwrap();
    }
    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));

    let mut last_seen: HashMap<String, u64> = HashMap::new();
    for event in recorder.take() {
        let last = last_seen.entry(event.worker_id().to_string()).or_insert(0);
        assert!(event.timestamp_millis() >= *last, "timestamps went backwards for {}", event.worker_id());
        *last = event.timestamp_millis();
    }
}

#[test]
fn test_workers_are_named_after_prefix() {
    let (pool, _recorder) = pool_with_memory(2, "named");
    let handle = pool.submit("whoami", |ctx| Ok(ctx.worker_id().to_string())).unwrap();
    let name = handle.wait().unwrap();
    assert!(name == "named-0" || name == "named-1", "unexpected worker id {}", name);

    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));
}

#[test]
fn test_racing_shutdown_never_reports_a_task_both_submitted_and_rejected() {
    let (pool, recorder) = pool_with_memory(2, "racing");

    let submitters: Vec<_> = (0..4)
        .map(|t| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut accepted = 0u64;
                for i in 0..500 {
                    if pool.submit(format!("t{}-{}", t, i), |_ctx| Ok(())).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();
    std::thread::sleep(Duration::from_millis(1));
    pool.shutdown(ShutdownMode::Graceful);

    let accepted: u64 = submitters.into_iter().map(|s| s.join().unwrap()).sum();
    assert!(pool.await_termination(Some(SETTLE)));

    let events = recorder.take();
    let labels = |category: EventCategory| -> BTreeSet<String> {
        events
            .iter()
            .filter(|e| e.category() == category)
            .map(|e| e.label().to_string())
            .collect()
    };
    let submitted = labels(EventCategory::TaskSubmitted);
    let rejected = labels(EventCategory::TaskRejected);

    assert!(submitted.is_disjoint(&rejected));
    assert_eq!(submitted.len() as u64, accepted);
    assert_eq!(pool.metrics().submitted, accepted);
    assert_eq!(submitted.len() + rejected.len(), 2000);
}

#[test]
fn test_submitted_event_precedes_started_event() {
    let (pool, recorder) = pool_with_memory(4, "ordered");
    let handles: Vec<_> = (0..50)
        .map(|i| pool.submit(format!("quick-{}", i), |_ctx| Ok(())).unwrap())
        .collect();
    for handle in &handles {
        handle.wait().unwrap();
    }
    pool.shutdown(ShutdownMode::Graceful);
    assert!(pool.await_termination(Some(SETTLE)));

    let mut submitted = BTreeSet::new();
    for event in recorder.take() {
        match event.category() {
            EventCategory::TaskSubmitted => {
                submitted.insert(event.field_u64("task_id").unwrap());
            }
            EventCategory::TaskStarted => {
                assert!(submitted.contains(&event.field_u64("task_id").unwrap()));
            }
            _ => {}
        }
    }
    assert_eq!(submitted.len(), 50);
}
