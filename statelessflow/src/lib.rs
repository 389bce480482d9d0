//! # Statelessflow
//!
//! A stateless dataflow execution engine.
//!
//! A flow is a directed acyclic graph of stages connected by named outcome
//! labels. It is built once, validated, driven to completion (or until shut
//! down) by a single scheduling task, and never reused:
//!
//! - **Stage wrappers**: per-stage configuration resolved through variable and
//!   service collaborators, plus a routing table for every declared outcome
//! - **Bounded queues**: offers are rejected when full, so a slow consumer
//!   pushes back on its producers without blocking the scheduler
//! - **Validation**: an outcome with no destination stops the run before any
//!   record moves
//! - **Cooperative shutdown**: an atomic flag checked between stage invocations
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use statelessflow::prelude::*;
//!
//! let mut graph = FlowGraph::new("upper", VecSource::from_texts("source", ["a", "b"]));
//! let upper = graph.attach_child(graph.root(), UpperStage::new(), "success")?;
//! graph.mark_auto_terminated(upper, "failure")?;
//! graph.designate_terminal_egress(upper, "success")?;
//!
//! let mut output = Vec::new();
//! let completed = graph.run(&mut output).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod flow;
pub mod observability;
pub mod queue;
pub mod registry;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, ShutdownHandle};
    pub use crate::config::{FlowConfig, LoggingConfig};
    pub use crate::core::{attributes, FlowRecord, FlowState, Outcome, Route, StageId, StageKind};
    pub use crate::errors::{
        ConfigurationError, FlowError, StageError, StageExecutionFailure, UnroutedOutcomeError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::flow::{FlowGraph, FlowHandle, FlowRun, Invocation, RunSummary, StageWrapper};
    pub use crate::observability::init_tracing;
    pub use crate::queue::BoundedQueue;
    pub use crate::registry::{
        Collaborators, InMemoryServiceLookup, MapVariableRegistry, ServiceLookup, VariableRegistry,
    };
    pub use crate::stages::{
        FnStage, PropertyDescriptor, PropertyValidator, Stage, StageContext, Transfer,
    };
}
