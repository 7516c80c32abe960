/// # Lock Contention Demo
///
/// Twenty logical workers on a four-thread pool, all looping around one mutex
/// held for a second at a time. Run it and attach a thread dump or profiler:
/// one worker holds the lock, three are blocked acquiring it and sixteen more
/// wait in the queue for a worker slot.
///
/// ```text
/// cargo run --example lock_contention -- [seconds]
/// ```
///
/// Without an argument it runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use snarl::config::LockContentionConfig;
use snarl::logging;
use snarl::recorder::TracingRecorder;
use snarl::scenario::lock_contention;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_default();

    let run_duration = std::env::args()
        .nth(1)
        .map(|s| s.parse::<u64>().context("duration must be whole seconds"))
        .transpose()?
        .map(Duration::from_secs);
    let config = LockContentionConfig {
        run_duration,
        ..Default::default()
    };

    let run = Arc::new(lock_contention::start(config, Arc::new(TracingRecorder))?);
    tracing::info!(pool_id = %run.pool().id(), "lock contention running");

    match run.run_duration() {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    let stopping = run.clone();
    tokio::task::spawn_blocking(move || stopping.stop_immediate(Some(Duration::from_secs(10)))).await??;

    let stats = run.stats();
    tracing::info!(
        acquisitions = stats.acquisitions,
        avg_wait_ms = stats.average_wait.as_millis() as u64,
        avg_hold_ms = stats.average_hold.as_millis() as u64,
        peak_holders = stats.peak_holders,
        "done: {:.2} acquisitions/sec",
        stats.ops_per_sec()
    );
    Ok(())
}
