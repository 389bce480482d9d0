//! The flow graph: wiring API, validation and the scheduling loop.

use super::handle::{FlowHandle, FlowRun, RunSummary};
use super::queues::QueueSet;
use super::validation;
use super::wrapper::{Invocation, StageWrapper};
use crate::cancellation::{CancellationToken, ShutdownHandle};
use crate::config::FlowConfig;
use crate::core::{FlowRecord, FlowState, Outcome, Route, StageId};
use crate::errors::{ConfigurationError, FlowError, StageExecutionFailure, UnroutedOutcomeError};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::registry::Collaborators;
use crate::stages::Stage;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How the scheduling loop ended.
enum LoopEnd {
    Quiesced,
    Shutdown,
    Failed(StageExecutionFailure),
}

/// A directed acyclic graph of stages, run once.
///
/// Built from a root stage by attaching fresh children under outcome labels,
/// so the graph is acyclic and stage ids are already in producer-before-consumer
/// order.
pub struct FlowGraph {
    name: String,
    run_id: Uuid,
    config: FlowConfig,
    collaborators: Collaborators,
    event_sink: Arc<dyn EventSink>,
    wrappers: Vec<StageWrapper>,
    state: FlowState,
    token: Arc<CancellationToken>,
    summary: Option<RunSummary>,
}

impl std::fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraph")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("stages", &self.wrappers.len())
            .finish_non_exhaustive()
    }
}

impl FlowGraph {
    /// Creates a graph holding only `root`.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Stage + 'static) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            config: FlowConfig::default(),
            collaborators: Collaborators::default(),
            event_sink: Arc::new(NoOpEventSink),
            wrappers: vec![StageWrapper::new(StageId(0), Box::new(root))],
            state: FlowState::Building,
            token: Arc::new(CancellationToken::new()),
            summary: None,
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the collaborators properties are resolved against.
    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id identifying this graph in logs and events.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Returns the root stage id.
    #[must_use]
    pub fn root(&self) -> StageId {
        StageId(0)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.wrappers.len()
    }

    /// Returns a stage wrapper.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&StageWrapper> {
        self.wrappers.get(id.index())
    }

    /// Iterates over every stage wrapper in id order.
    pub fn stages(&self) -> impl Iterator<Item = &StageWrapper> {
        self.wrappers.iter()
    }

    /// Returns the accounting of the finished run.
    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Returns the outcomes a stage declares.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownStage`] for an unknown id.
    pub fn declared_outcomes(&self, id: StageId) -> Result<Vec<Outcome>, ConfigurationError> {
        self.wrapper(id).map(StageWrapper::declared_outcomes)
    }

    /// Resolves and stores a property of a stage.
    ///
    /// # Errors
    ///
    /// Fails if the graph is not building, the stage is unknown or the stage
    /// rejects the property.
    pub fn set_property(
        &mut self,
        id: StageId,
        name: &str,
        value: &str,
    ) -> Result<(), ConfigurationError> {
        self.ensure_building()?;
        let collaborators = &self.collaborators;
        let wrapper = self
            .wrappers
            .get_mut(id.index())
            .ok_or(ConfigurationError::UnknownStage { stage_id: id })?;
        wrapper.set_property(name, value, collaborators)
    }

    /// Attaches a new stage receiving the records `parent` emits under `outcome`.
    ///
    /// # Errors
    ///
    /// Fails if the graph is not building, `parent` is unknown, or the outcome
    /// is undeclared or already routed. The child is not added on failure.
    pub fn attach_child(
        &mut self,
        parent: StageId,
        child: impl Stage + 'static,
        outcome: impl Into<Outcome>,
    ) -> Result<StageId, ConfigurationError> {
        self.ensure_building()?;
        let outcome = outcome.into();
        self.wrapper(parent)?.check_routable(&outcome)?;

        let child_id = StageId(self.wrappers.len());
        let child = StageWrapper::new(child_id, Box::new(child));
        debug!(
            flow = %self.name,
            parent = %parent,
            child = %child_id,
            stage = child.name(),
            kind = %child.kind(),
            outcome = %outcome,
            "stage attached"
        );
        self.wrapper_mut(parent)?.set_route(outcome, Route::Forward(child_id))?;
        self.wrappers.push(child);
        Ok(child_id)
    }

    /// Declares that records a stage emits under `outcome` are discarded.
    ///
    /// # Errors
    ///
    /// Fails if the graph is not building, the stage is unknown, or the
    /// outcome is undeclared or already routed.
    pub fn mark_auto_terminated(
        &mut self,
        id: StageId,
        outcome: impl Into<Outcome>,
    ) -> Result<(), ConfigurationError> {
        self.ensure_building()?;
        self.wrapper_mut(id)?.mark_auto_terminated(outcome)
    }

    /// Declares that records a stage emits under `outcome` are flow output.
    ///
    /// # Errors
    ///
    /// Fails if the graph is not building, the stage is unknown, or the
    /// outcome is undeclared or already routed.
    pub fn designate_terminal_egress(
        &mut self,
        id: StageId,
        outcome: impl Into<Outcome>,
    ) -> Result<(), ConfigurationError> {
        self.ensure_building()?;
        self.wrapper_mut(id)?.designate_terminal_egress(outcome)
    }

    /// Returns every outcome that still has no destination.
    #[must_use]
    pub fn unrouted_outcomes(&self) -> Vec<UnroutedOutcomeError> {
        validation::unrouted_outcomes(&self.wrappers)
    }

    /// Runs the start-of-run checks without running.
    ///
    /// # Errors
    ///
    /// Returns the first structural defect found.
    pub fn validate(&self) -> Result<(), FlowError> {
        validation::validate(&self.wrappers)
    }

    /// Returns stage ids with every producer before its consumers.
    ///
    /// Ties are broken by id, so the order is stable.
    #[must_use]
    pub fn topological_order(&self) -> Vec<StageId> {
        let mut in_degree: HashMap<StageId, usize> =
            self.wrappers.iter().map(|w| (w.id(), 0)).collect();
        for wrapper in &self.wrappers {
            for child in wrapper.children() {
                *in_degree.entry(child).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeSet<StageId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.wrappers.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            if let Some(wrapper) = self.stage(id) {
                for child in wrapper.children() {
                    if let Some(degree) = in_degree.get_mut(&child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(child);
                        }
                    }
                }
            }
        }

        order
    }

    /// Requests shutdown. Idempotent; a no-op once the run has ended.
    pub fn shutdown(&self) {
        self.token.cancel("shutdown requested");
    }

    /// Returns a cloneable handle for requesting shutdown from another task or thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.token))
    }

    /// Runs the graph once, appending egressed records to `output`.
    ///
    /// Returns true only if the flow quiesced. Failures and shutdowns return
    /// false; records already in `output` are never removed.
    pub async fn run(&mut self, output: &mut Vec<FlowRecord>) -> bool {
        match self.try_run(output).await {
            Ok(summary) => summary.state.is_success(),
            Err(err) => {
                warn!(flow = %self.name, code = err.code(), error = %err, "flow run failed");
                false
            }
        }
    }

    /// Runs the graph once and reports why it stopped.
    ///
    /// A shutdown is not an error: it returns a summary in state
    /// [`FlowState::ShutDown`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidState`] if the graph already ran, a
    /// structural error if validation fails, or the stage failure that ended
    /// the run.
    pub async fn try_run(&mut self, output: &mut Vec<FlowRecord>) -> Result<RunSummary, FlowError> {
        if self.state != FlowState::Building {
            return Err(FlowError::InvalidState {
                flow: self.name.clone(),
                state: self.state,
            });
        }

        let timer = SpanTimer::start(self.name.clone());
        self.state = FlowState::Running;

        if let Err(err) = self.validate() {
            error!(flow = %self.name, code = err.code(), error = %err, "flow validation failed");
            self.event_sink.try_emit(
                event_types::FLOW_VALIDATION_FAILED,
                Some(serde_json::json!({
                    "flow": self.name,
                    "run_id": self.run_id.to_string(),
                    "error": err.to_dict(),
                })),
            );
            self.state = FlowState::Failed;
            self.summary = Some(self.summarize(&timer, 0, 0));
            return Err(err);
        }

        info!(
            flow = %self.name,
            run_id = %self.run_id,
            stages = self.wrappers.len(),
            "flow started"
        );
        self.event_sink.try_emit(
            event_types::FLOW_STARTED,
            Some(serde_json::json!({
                "flow": self.name,
                "run_id": self.run_id.to_string(),
                "stages": self.wrappers.len(),
            })),
        );

        let mut queues = QueueSet::new(self.wrappers.len(), self.config.default_queue_capacity);
        let mut sweeps = 0;
        let mut scheduled = 0;

        let end = match self.schedule_all(&mut scheduled).await {
            Ok(()) => self.sweep_until_done(&mut queues, &mut sweeps).await,
            Err(failure) => LoopEnd::Failed(failure),
        };

        // Only stages whose `on_scheduled` succeeded are stopped.
        for wrapper in self.wrappers.iter_mut().take(scheduled) {
            wrapper.stop().await;
        }

        queues.drain_egress_into(output);
        let abandoned = queues.abandon_all()
            + self
                .wrappers
                .iter_mut()
                .map(StageWrapper::abandon_pending)
                .sum::<usize>();

        self.state = match &end {
            LoopEnd::Quiesced => FlowState::Completed,
            LoopEnd::Shutdown => FlowState::ShutDown,
            LoopEnd::Failed(_) => FlowState::Failed,
        };
        let summary = self.summarize(&timer, sweeps, abandoned as u64);
        self.summary = Some(summary.clone());
        let summary_json = serde_json::to_value(&summary).unwrap_or_default();

        match end {
            LoopEnd::Quiesced => {
                info!(
                    flow = %self.name,
                    sweeps = summary.sweeps,
                    egressed = summary.egressed,
                    duration_ms = summary.duration_ms,
                    "flow completed"
                );
                self.event_sink
                    .try_emit(event_types::FLOW_COMPLETED, Some(summary_json));
                Ok(summary)
            }
            LoopEnd::Shutdown => {
                info!(
                    flow = %self.name,
                    reason = %self.token.reason().unwrap_or_default(),
                    abandoned = summary.abandoned,
                    "flow shut down"
                );
                self.event_sink
                    .try_emit(event_types::FLOW_SHUTDOWN, Some(summary_json));
                Ok(summary)
            }
            LoopEnd::Failed(failure) => {
                error!(
                    flow = %self.name,
                    stage = %failure.stage,
                    phase = failure.phase,
                    error = %failure,
                    "stage failed"
                );
                self.event_sink.try_emit(
                    event_types::STAGE_FAILED,
                    Some(serde_json::json!({
                        "flow": self.name,
                        "stage": failure.stage,
                        "stage_id": failure.stage_id,
                        "phase": failure.phase,
                        "error": failure.cause.to_string(),
                    })),
                );
                self.event_sink
                    .try_emit(event_types::FLOW_FAILED, Some(summary_json));
                Err(failure.into())
            }
        }
    }

    /// Moves the graph onto its own task and starts running it.
    ///
    /// `output` is handed back, with egressed records appended, by
    /// [`FlowHandle::join`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(mut self, mut output: Vec<FlowRecord>) -> FlowHandle {
        let name = self.name.clone();
        let token = Arc::clone(&self.token);
        let task = tokio::spawn(async move {
            let result = self.try_run(&mut output).await;
            let (success, error) = match result {
                Ok(summary) => (summary.state.is_success(), None),
                Err(err) => (false, Some(err)),
            };
            FlowRun {
                success,
                state: self.state,
                output,
                error,
                summary: self.summary,
            }
        });
        FlowHandle::new(name, token, task)
    }

    /// Schedules wrappers in id order, counting each success in `scheduled`.
    async fn schedule_all(&mut self, scheduled: &mut usize) -> Result<(), StageExecutionFailure> {
        for wrapper in &mut self.wrappers {
            wrapper.schedule().await?;
            *scheduled += 1;
        }
        Ok(())
    }

    async fn sweep_until_done(&mut self, queues: &mut QueueSet, sweeps: &mut u64) -> LoopEnd {
        let order = self.topological_order();
        let max_batch = self.config.max_batch_size;

        loop {
            if self.token.is_cancelled() {
                return LoopEnd::Shutdown;
            }
            *sweeps += 1;

            let mut progressed = false;
            for &id in &order {
                if self.token.is_cancelled() {
                    return LoopEnd::Shutdown;
                }
                let Some(wrapper) = self.wrappers.get_mut(id.index()) else {
                    continue;
                };
                match wrapper.invoke_once(queues, max_batch).await {
                    Invocation::Progressed => progressed = true,
                    Invocation::Idle => {}
                    Invocation::Failed(failure) => return LoopEnd::Failed(failure),
                }
            }

            if progressed {
                if self.config.yield_every_sweep {
                    tokio::task::yield_now().await;
                }
                continue;
            }

            if self.is_quiescent(queues) {
                return LoopEnd::Quiesced;
            }

            debug!(flow = %self.name, sweep = *sweeps, "idle sweep, backing off");
            tokio::select! {
                () = tokio::time::sleep(self.config.idle_backoff()) => {}
                () = self.token.cancelled() => {}
            }
        }
    }

    fn is_quiescent(&self, queues: &QueueSet) -> bool {
        queues.queued() == 0
            && self
                .wrappers
                .iter()
                .all(|w| w.pending_len() == 0 && !w.has_more_input())
    }

    fn summarize(&self, timer: &SpanTimer, sweeps: u64, abandoned: u64) -> RunSummary {
        let (invocations, egressed, auto_terminated) =
            self.wrappers.iter().fold((0, 0, 0), |(i, e, a), w| {
                let stats = w.stats();
                (i + stats.invocations, e + stats.egressed, a + stats.auto_terminated)
            });
        RunSummary {
            flow: self.name.clone(),
            state: self.state,
            sweeps,
            invocations,
            egressed,
            auto_terminated,
            abandoned,
            duration_ms: timer.elapsed_ms(),
        }
    }

    fn ensure_building(&self) -> Result<(), ConfigurationError> {
        if self.state == FlowState::Building {
            Ok(())
        } else {
            Err(ConfigurationError::NotBuilding {
                flow: self.name.clone(),
                state: self.state,
            })
        }
    }

    fn wrapper(&self, id: StageId) -> Result<&StageWrapper, ConfigurationError> {
        self.wrappers
            .get(id.index())
            .ok_or(ConfigurationError::UnknownStage { stage_id: id })
    }

    fn wrapper_mut(&mut self, id: StageId) -> Result<&mut StageWrapper, ConfigurationError> {
        self.wrappers
            .get_mut(id.index())
            .ok_or(ConfigurationError::UnknownStage { stage_id: id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{passthrough, VecSource};
    use pretty_assertions::assert_eq;

    fn linear() -> FlowGraph {
        let mut graph = FlowGraph::new("linear", VecSource::from_texts("source", ["a"]));
        let mid = graph
            .attach_child(graph.root(), passthrough("mid"), "success")
            .unwrap();
        graph.attach_child(mid, passthrough("tail"), "success").unwrap();
        graph
    }

    #[test]
    fn test_attach_child_assigns_fresh_ids() {
        let graph = linear();
        assert_eq!(graph.stage_count(), 3);
        assert_eq!(
            graph.stage(graph.root()).unwrap().route_of("success"),
            Some(Route::Forward(StageId(1)))
        );
        assert_eq!(graph.topological_order(), vec![StageId(0), StageId(1), StageId(2)]);
    }

    #[test]
    fn test_attach_child_rejects_bad_outcomes() {
        let mut graph = linear();

        let dup = graph
            .attach_child(graph.root(), passthrough("again"), "success")
            .unwrap_err();
        assert!(matches!(dup, ConfigurationError::DuplicateRoute { .. }));

        let undeclared = graph
            .attach_child(StageId(1), passthrough("x"), "splits")
            .unwrap_err();
        assert!(matches!(undeclared, ConfigurationError::UndeclaredOutcome { .. }));

        let unknown = graph
            .attach_child(StageId(9), passthrough("x"), "success")
            .unwrap_err();
        assert!(matches!(unknown, ConfigurationError::UnknownStage { .. }));

        assert_eq!(graph.stage_count(), 3);
    }

    #[test]
    fn test_topological_order_with_branches() {
        let mut graph = FlowGraph::new("branches", VecSource::from_texts("source", ["a"]));
        let left = graph.attach_child(graph.root(), passthrough("left"), "success").unwrap();
        let right = graph.attach_child(left, passthrough("right"), "failure").unwrap();
        let leaf = graph.attach_child(left, passthrough("leaf"), "success").unwrap();

        let order = graph.topological_order();
        let position = |id: StageId| order.iter().position(|&o| o == id).unwrap();
        assert!(position(graph.root()) < position(left));
        assert!(position(left) < position(right));
        assert!(position(left) < position(leaf));
    }

    #[test]
    fn test_unrouted_outcomes_listed() {
        let graph = linear();
        let unrouted: Vec<String> = graph
            .unrouted_outcomes()
            .into_iter()
            .map(|e| format!("{}:{}", e.stage, e.outcome))
            .collect();
        assert_eq!(
            unrouted,
            vec!["mid:failure", "tail:failure", "tail:success"]
        );
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_declared_outcomes() {
        let graph = linear();
        assert_eq!(
            graph.declared_outcomes(StageId(1)).unwrap(),
            vec![Outcome::failure(), Outcome::success()]
        );
        assert!(graph.declared_outcomes(StageId(7)).is_err());
    }

    #[tokio::test]
    async fn test_wiring_rejected_after_run() {
        let mut graph = linear();
        graph.mark_auto_terminated(StageId(1), "failure").unwrap();
        graph.mark_auto_terminated(StageId(2), "failure").unwrap();
        graph.designate_terminal_egress(StageId(2), "success").unwrap();

        let mut output = Vec::new();
        assert!(graph.run(&mut output).await);

        let err = graph.mark_auto_terminated(StageId(0), "success").unwrap_err();
        assert!(matches!(err, ConfigurationError::NotBuilding { state: FlowState::Completed, .. }));
    }
}
