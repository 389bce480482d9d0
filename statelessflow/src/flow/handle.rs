//! Background runs: the task handle and what a finished run hands back.

use crate::cancellation::{CancellationToken, ShutdownHandle};
use crate::core::{FlowRecord, FlowState};
use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

/// Accounting for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// The flow name.
    pub flow: String,
    /// The terminal state.
    pub state: FlowState,
    /// Full passes over the stages.
    pub sweeps: u64,
    /// Stage `transform` calls.
    pub invocations: u64,
    /// Records collected as output.
    pub egressed: u64,
    /// Records discarded under auto-terminated outcomes.
    pub auto_terminated: u64,
    /// Records left queued when the run stopped early.
    pub abandoned: u64,
    /// Wall-clock duration.
    pub duration_ms: f64,
}

impl RunSummary {
    /// Serializes the summary to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, FlowError> {
        serde_json::to_string(self).map_err(|e| FlowError::Serialization(e.to_string()))
    }
}

/// Everything a background run hands back.
#[derive(Debug)]
pub struct FlowRun {
    /// True only if the run completed.
    pub success: bool,
    /// The terminal state.
    pub state: FlowState,
    /// The output collection, including anything it held before the run.
    pub output: Vec<FlowRecord>,
    /// Why the run failed, if it did.
    pub error: Option<FlowError>,
    /// Run accounting, absent if the run never started.
    pub summary: Option<RunSummary>,
}

/// Handle to a flow running on its own task.
///
/// Dropping the handle does not stop the run; call [`FlowHandle::shutdown`].
#[derive(Debug)]
pub struct FlowHandle {
    name: String,
    token: Arc<CancellationToken>,
    task: JoinHandle<FlowRun>,
}

impl FlowHandle {
    pub(crate) fn new(name: String, token: Arc<CancellationToken>, task: JoinHandle<FlowRun>) -> Self {
        Self { name, token, task }
    }

    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests shutdown of the run. Never blocks.
    pub fn shutdown(&self) {
        self.token.cancel("shutdown requested");
    }

    /// Returns a cloneable handle for requesting shutdown from elsewhere.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.token))
    }

    /// Returns true once the run task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to end and returns its success flag.
    pub async fn wait(self) -> bool {
        self.join().await.success
    }

    /// Waits for the run to end and returns everything it produced.
    pub async fn join(self) -> FlowRun {
        match self.task.await {
            Ok(run) => run,
            Err(join_error) => {
                error!(flow = %self.name, error = %join_error, "flow task did not finish");
                FlowRun {
                    success: false,
                    state: FlowState::Failed,
                    output: Vec::new(),
                    error: Some(FlowError::Internal(format!("flow task did not finish: {join_error}"))),
                    summary: None,
                }
            }
        }
    }
}
