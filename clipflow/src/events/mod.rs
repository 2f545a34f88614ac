//! Event sink system for observability.
//!
//! The runner reports run and stage lifecycle through an [`EventSink`]
//! injected at build time. Event type names live in [`names`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the pipeline.
pub mod names {
    /// A run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run finished without error.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run finished with a terminal error.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A stage entered `Running`.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage committed primary output.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage committed fallback output.
    pub const STAGE_DEGRADED: &str = "stage.degraded";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
}
