/// # Output Contention Demo
///
/// Twenty writers sharing stdout through a pool sized to the machine (capped
/// at eight). No explicit lock anywhere; the contention lives inside the
/// stream's own lock, which is why lines never interleave mid-line.
///
/// ```text
/// cargo run --example output_contention -- [seconds]
/// ```
///
/// Operational logs go to stderr so they do not compete with the writers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use snarl::config::OutputContentionConfig;
use snarl::logging;
use snarl::recorder::NoopRecorder;
use snarl::scenario::output_contention::{self, StdStreamSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_default();

    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u64>().context("duration must be whole seconds")?,
        None => 5,
    };
    let config = OutputContentionConfig::default();

    let run = Arc::new(output_contention::start(
        config,
        Arc::new(StdStreamSink::stdout()),
        Arc::new(NoopRecorder),
    )?);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    let stopping = run.clone();
    tokio::task::spawn_blocking(move || stopping.stop_immediate(Some(Duration::from_secs(10)))).await??;

    tracing::info!(lines = run.lines_written(), elapsed_ms = run.elapsed().as_millis() as u64, "done");
    Ok(())
}
