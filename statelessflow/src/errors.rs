//! Error types for the statelessflow engine.
//!
//! Wiring mistakes surface synchronously as [`ConfigurationError`]. Structural
//! defects found when a run starts, and stage failures during a run, surface as
//! [`FlowError`] from [`crate::flow::FlowGraph::try_run`]; the boolean
//! [`crate::flow::FlowGraph::run`] folds them into `false`.

use crate::core::{FlowState, Route, StageId};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for flow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A wiring call was rejected.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// An outcome has no route, no auto-termination and no egress designation.
    #[error("{0}")]
    UnroutedOutcome(#[from] UnroutedOutcomeError),

    /// A required property has neither a value nor a default.
    #[error("Stage '{stage}' ({stage_id}) is missing required property '{property}'")]
    MissingProperty {
        /// The stage id.
        stage_id: StageId,
        /// The stage name.
        stage: String,
        /// The property name.
        property: String,
    },

    /// A stage failed while the flow was running.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionFailure),

    /// The flow was asked to run from a state other than `Building`.
    #[error("Flow '{flow}' cannot run from state '{state}'")]
    InvalidState {
        /// The flow name.
        flow: String,
        /// The state the flow was in.
        state: FlowState,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Returns a stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(err) => err.code(),
            Self::UnroutedOutcome(_) => "FLOW-010-UNROUTED_OUTCOME",
            Self::MissingProperty { .. } => "FLOW-011-MISSING_PROPERTY",
            Self::StageExecution(_) => "FLOW-020-STAGE_FAILED",
            Self::InvalidState { .. } => "FLOW-030-INVALID_STATE",
            Self::Serialization(_) => "FLOW-040-SERIALIZATION",
            Self::Internal(_) => "FLOW-050-INTERNAL",
            Self::Io(_) => "FLOW-060-IO",
        }
    }

    /// Returns true if the error is a structural defect of the graph.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::UnroutedOutcome(_) | Self::MissingProperty { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::UnroutedOutcome(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.stage));
                map.insert("outcome".to_string(), serde_json::json!(err.outcome));
            }
            Self::MissingProperty { stage, property, .. } => {
                map.insert("stage".to_string(), serde_json::json!(stage));
                map.insert("property".to_string(), serde_json::json!(property));
            }
            Self::StageExecution(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.stage));
                map.insert("phase".to_string(), serde_json::json!(err.phase));
            }
            Self::InvalidState { state, .. } => {
                map.insert("state".to_string(), serde_json::json!(state));
            }
            _ => {}
        }

        map
    }
}

/// Errors raised synchronously by graph-building calls.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// The stage does not know the property.
    #[error("Stage '{stage}' does not support property '{property}'")]
    UnknownProperty {
        /// The stage name.
        stage: String,
        /// The property name.
        property: String,
    },

    /// The stage rejected the property value.
    #[error("Stage '{stage}' rejected value '{value}' for property '{property}': {reason}")]
    InvalidProperty {
        /// The stage name.
        stage: String,
        /// The property name.
        property: String,
        /// The rejected value (after variable substitution).
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A `${name}` reference did not resolve.
    #[error("Property '{property}' of stage '{stage}' references undefined variable '{variable}'")]
    UndefinedVariable {
        /// The stage name.
        stage: String,
        /// The property name.
        property: String,
        /// The variable name.
        variable: String,
    },

    /// A property names a service the lookup does not know.
    #[error("Property '{property}' of stage '{stage}' names unknown service '{service}'")]
    ServiceNotFound {
        /// The stage name.
        stage: String,
        /// The property name.
        property: String,
        /// The service name.
        service: String,
    },

    /// The outcome is not among the stage's declared outcomes.
    #[error("Stage '{stage}' does not declare outcome '{outcome}'")]
    UndeclaredOutcome {
        /// The stage name.
        stage: String,
        /// The outcome label.
        outcome: String,
    },

    /// The outcome already has a route.
    #[error("Outcome '{outcome}' of stage '{stage}' is already routed to {existing}")]
    DuplicateRoute {
        /// The stage name.
        stage: String,
        /// The outcome label.
        outcome: String,
        /// The route already in place.
        existing: Route,
    },

    /// No stage with this id exists in the graph.
    #[error("Unknown stage {stage_id}")]
    UnknownStage {
        /// The missing id.
        stage_id: StageId,
    },

    /// Wiring calls are only accepted while the flow is building.
    #[error("Flow '{flow}' is no longer accepting wiring calls (state '{state}')")]
    NotBuilding {
        /// The flow name.
        flow: String,
        /// The current state.
        state: FlowState,
    },
}

impl ConfigurationError {
    /// Returns a stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownProperty { .. } => "FLOW-001-UNKNOWN_PROPERTY",
            Self::InvalidProperty { .. } => "FLOW-002-INVALID_PROPERTY",
            Self::UndefinedVariable { .. } => "FLOW-003-UNDEFINED_VARIABLE",
            Self::ServiceNotFound { .. } => "FLOW-004-SERVICE_NOT_FOUND",
            Self::UndeclaredOutcome { .. } => "FLOW-005-UNDECLARED_OUTCOME",
            Self::DuplicateRoute { .. } => "FLOW-006-DUPLICATE_ROUTE",
            Self::UnknownStage { .. } => "FLOW-007-UNKNOWN_STAGE",
            Self::NotBuilding { .. } => "FLOW-008-NOT_BUILDING",
        }
    }

    /// Returns a hint for fixing the error, if one applies.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        match self {
            Self::UndeclaredOutcome { .. } => {
                Some("Use one of the labels returned by declared_outcomes().")
            }
            Self::DuplicateRoute { .. } => Some(
                "Each outcome has one destination; fork records inside the stage to fan out.",
            ),
            Self::UndefinedVariable { .. } => {
                Some("Register the variable or escape the reference in the property value.")
            }
            Self::NotBuilding { .. } => Some("Build a new flow graph; a graph runs only once."),
            _ => None,
        }
    }
}

/// A declared outcome left without any destination.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' ({stage_id}) has no route for outcome '{outcome}'; attach a child, auto-terminate it or designate it as terminal egress")]
pub struct UnroutedOutcomeError {
    /// The stage id.
    pub stage_id: StageId,
    /// The stage name.
    pub stage: String,
    /// The unrouted outcome label.
    pub outcome: String,
}

impl UnroutedOutcomeError {
    /// Creates a new unrouted outcome error.
    #[must_use]
    pub fn new(stage_id: StageId, stage: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            stage_id,
            stage: stage.into(),
            outcome: outcome.into(),
        }
    }
}

/// Error returned by a stage implementation.
#[derive(Debug, Error)]
pub enum StageError {
    /// A plain failure message.
    #[error("{0}")]
    Message(String),

    /// An I/O failure inside the stage.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The stage emitted a record under an outcome it never declared.
    #[error("emitted undeclared outcome '{0}'")]
    UndeclaredOutcome(String),

    /// Any other cause.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a message error.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// A stage failure that ended a run.
#[derive(Debug, Error)]
#[error("Stage '{stage}' ({stage_id}) failed during {phase}: {cause}")]
pub struct StageExecutionFailure {
    /// The stage id.
    pub stage_id: StageId,
    /// The stage name.
    pub stage: String,
    /// Where the failure happened (`on_scheduled`, `transform`).
    pub phase: &'static str,
    /// The underlying cause.
    #[source]
    pub cause: StageError,
}

impl StageExecutionFailure {
    /// Creates a new stage execution failure.
    #[must_use]
    pub fn new(stage_id: StageId, stage: impl Into<String>, phase: &'static str, cause: StageError) -> Self {
        Self {
            stage_id,
            stage: stage.into(),
            phase,
            cause,
        }
    }
}
