// Snarl: a concurrency-pathology harness
//
// Reproduces three failure modes of bounded worker pools on demand, with an
// event stream to watch them happen:
//
// - lock contention under work that holds one mutex for a fixed time
// - starvation (and outright deadlock) from tasks that submit children into
//   their own pool and block on them
// - contention on the implicit lock of a shared output stream

pub mod config;
pub mod logging;
pub mod pool;
pub mod recorder;
pub mod scenario;

// Re-export commonly used types
pub use config::*;
pub use pool::{BoundedWorkerPool, PoolMetrics, PoolStatus, ShutdownMode, TaskContext, TaskHandle};
pub use scenario::ScenarioRun;
pub use snarl_api::{Event, EventCategory, EventRecorder, FieldValue, PoolError, RecorderError};
