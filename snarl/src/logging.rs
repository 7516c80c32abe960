// Logging for snarl
//
// Operational logs (pool lifecycle, scenario progress, starvation warnings) go
// through the `tracing` ecosystem. They are separate from the observation
// events handed to an `EventRecorder`; `TracingRecorder` bridges the two when
// a run should show both in one stream.
//
// ```rust
// use snarl::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: true,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// `RUST_LOG` directives are honoured on top of the configured level. Logs
// go to stderr; stdout belongs to the output-contention writers.

use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging subscriber.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id. Worker threads are named after
    /// their pool, so this is on by default.
    pub show_thread_info: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: false,
            show_thread_info: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

/// Install the global subscriber. Only the first call in a process has any
/// effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        if let Some(filters) = config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            )
        } else {
            Box::new(
                registry.with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(atty::is(atty::Stream::Stderr))
                        .with_file(config.show_file_line)
                        .with_line_number(config.show_file_line)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// INFO level, plain console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for the harness, TRACE for the pool internals, with file/line info.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        target_filters: Some("snarl=debug,snarl::pool=trace".to_string()),
    });
}

/// JSON lines at INFO, suitable for feeding a log aggregator next to a
/// profiler recording.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        target_filters: None,
    });
}

/// Warnings and errors only, to keep test output readable.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        target_filters: None,
    });
}

/// Capture the current dispatcher so a thread spawned outside the pool can
/// log through the same subscriber.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

/// Log pool-level events
///
/// # Examples
///
/// ```rust
/// use snarl::log_pool;
///
/// log_pool!("starving-thread", "task_queued");
/// log_pool!("contention-worker", "task_queued", task_id = 4, queued = 16);
/// ```
#[macro_export]
macro_rules! log_pool {
    ($pool:expr, $event:expr) => {
        tracing::debug!(pool = $pool, event = $event);
    };
    ($pool:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(pool = $pool, event = $event, $($fields)*);
    };
}

/// Log scenario state changes
///
/// # Examples
///
/// ```rust
/// use snarl::log_scenario;
///
/// log_scenario!("lock-contention", "started");
/// log_scenario!("starvation", "inspect", unresolved = 2, parents = 2);
/// ```
#[macro_export]
macro_rules! log_scenario {
    ($scenario:expr, $status:expr) => {
        tracing::info!(scenario = $scenario, status = $status);
    };
    ($scenario:expr, $status:expr, $($fields:tt)*) => {
        tracing::info!(scenario = $scenario, status = $status, $($fields)*);
    };
}

/// Log error events
///
/// # Examples
///
/// ```rust
/// use snarl::log_error;
///
/// let error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed");
/// log_error!(error, scenario = "output-contention");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error);
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*);
    };
}
