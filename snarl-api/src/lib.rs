//! # Snarl Observation API
//!
//! The shared contract between the snarl worker pool, its stress scenarios and
//! whatever observes them. Scenarios never produce a data product; the only
//! externally consumed output is a stream of [`Event`]s handed to an
//! [`EventRecorder`].
//!
//! ## Module Organization
//!
//! - [`event`]: the immutable event record, its categories and the event clock
//! - [`recorder`]: the recorder trait and the disabled (no-op) recorder
//! - [`errors`]: pool and recorder error types

pub mod errors;
pub mod event;
pub mod recorder;

pub use errors::{PoolError, RecorderError};
pub use event::{Event, EventCategory, FieldValue};
pub use recorder::{EventRecorder, NoopRecorder};
