//! Outcome labels, stage ids and routing table entries.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Index of a stage wrapper in its flow graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub(crate) usize);

impl StageId {
    /// Returns the arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named result category a stage can produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(String);

impl Outcome {
    /// Creates an outcome label.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The conventional label for successfully processed records.
    #[must_use]
    pub fn success() -> Self {
        Self::new("success")
    }

    /// The conventional label for records a stage could not process.
    #[must_use]
    pub fn failure() -> Self {
        Self::new("failure")
    }

    /// The label sink-type stages use for records delivered to their write target.
    #[must_use]
    pub fn written() -> Self {
        Self::new("written")
    }

    /// Returns the label text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Outcome {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Outcome {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for Outcome {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Destination of the records a stage emits under one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "stage", rename_all = "snake_case")]
pub enum Route {
    /// Deliver to the incoming queue of another stage.
    Forward(StageId),
    /// Discard.
    AutoTerminate,
    /// Collect as flow output.
    TerminalEgress,
    /// Not wired yet; a flow with unresolved routes cannot run.
    #[default]
    Unresolved,
}

impl Route {
    /// Returns true unless the route is [`Route::Unresolved`].
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward(id) => write!(f, "forward({id})"),
            Self::AutoTerminate => write!(f, "auto_terminate"),
            Self::TerminalEgress => write!(f, "terminal_egress"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}
