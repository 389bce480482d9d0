//! Stage kind and flow state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces records without input (e.g. tailing a file).
    Source,
    /// Turns input records into output records.
    #[default]
    Transform,
    /// Delivers records to an external target.
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Lifecycle state of a flow graph.
///
/// `Building -> Running -> {Completed, Failed, ShutDown}`; the last three are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Accepting wiring calls.
    #[default]
    Building,
    /// The scheduling loop is active.
    Running,
    /// Every record reached egress or was auto-terminated.
    Completed,
    /// A stage failed or the graph failed validation.
    Failed,
    /// Stopped by a shutdown request before quiescing.
    ShutDown,
}

impl FlowState {
    /// Returns true if the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::ShutDown)
    }

    /// Returns true if the state counts as success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::ShutDown => write!(f, "shut_down"),
        }
    }
}
