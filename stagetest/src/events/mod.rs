//! Event sink system for observing stage runs.
//!
//! The runner emits one event per stage transition. Sinks are passed to the
//! runner explicitly; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink};

/// Emitted when a stage body starts.
pub const STAGE_STARTED: &str = "stage.started";
/// Emitted when a stage is skipped by configuration.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// Emitted when a stage body completes.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// Emitted when a stage body fails.
pub const STAGE_FAILED: &str = "stage.failed";
/// Emitted when a stage is deferred to cleanup.
pub const STAGE_DEFERRED: &str = "stage.deferred";
/// Emitted after all release actions ran.
pub const RUN_FINISHED: &str = "run.finished";
