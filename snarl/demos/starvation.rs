/// # Starvation Demo
///
/// Crawler tasks that submit their links into their own pool and block on
/// them. With the default crawler preset (ten workers, ten crawlers) every
/// worker ends up holding a parent that waits on a child nobody will ever run.
///
/// ```text
/// cargo run --example starvation -- [deadlock|progress|crawler]
/// ```
///
/// The demo watches the parents for five seconds, reports what it found and then stops the
/// pool immediately, since nothing else can free a deadlocked worker.

use std::sync::Arc;
use std::time::Duration;

use snarl::config::StarvationConfig;
use snarl::logging;
use snarl::recorder::{EventRecorder, FanoutRecorder, MemoryRecorder, TracingRecorder};
use snarl::scenario::starvation;
use snarl::EventCategory;

fn main() -> anyhow::Result<()> {
    logging::init_default();

    let config = match std::env::args().nth(1).as_deref() {
        Some("progress") => StarvationConfig::progressing(),
        Some("crawler") => StarvationConfig::crawler(),
        Some("deadlock") | None => StarvationConfig::canonical_deadlock(),
        Some(other) => anyhow::bail!("unknown preset {:?}; expected deadlock, progress or crawler", other),
    };

    let memory = Arc::new(MemoryRecorder::unbounded());
    let recorder = FanoutRecorder::new(vec![memory.clone() as Arc<dyn EventRecorder>]).with(Arc::new(TracingRecorder));
    let run = starvation::start(config, Arc::new(recorder))?;
    tracing::info!(expected = ?run.expected_outcome(), "starvation running");

    let report = run.inspect(Duration::from_secs(5));
    if report.is_starved() {
        let metrics = run.pool().metrics();
        tracing::warn!(
            stuck = ?report.unresolved,
            active = metrics.active,
            queued = metrics.queued,
            "every worker is blocked on a queued child"
        );
    } else {
        for (url, pages) in &report.resolved {
            tracing::info!(url = url.as_str(), pages = ?pages, "crawl finished");
        }
    }

    run.stop_immediate(Some(Duration::from_secs(10)))?;
    let waits = memory
        .take()
        .into_iter()
        .filter(|e| e.category() == EventCategory::NestedWaitBegun)
        .count();
    tracing::info!(nested_waits = waits, "stopped");
    Ok(())
}
