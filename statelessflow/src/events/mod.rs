//! Event sink system for flow observability.
//!
//! A flow graph reports its lifecycle to an [`EventSink`]; by default events
//! are discarded.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Event type names emitted by the flow graph.
pub mod event_types {
    /// The run passed validation and started sweeping.
    pub const FLOW_STARTED: &str = "flow.started";
    /// The run quiesced.
    pub const FLOW_COMPLETED: &str = "flow.completed";
    /// The run ended because of a failure.
    pub const FLOW_FAILED: &str = "flow.failed";
    /// The run stopped on a shutdown request.
    pub const FLOW_SHUTDOWN: &str = "flow.shutdown";
    /// The graph failed its start-of-run validation.
    pub const FLOW_VALIDATION_FAILED: &str = "flow.validation_failed";
    /// A stage invocation failed.
    pub const STAGE_FAILED: &str = "stage.failed";
}
