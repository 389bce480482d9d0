//! The per-stage wrapper: configuration, routing table and single invocations.

use super::queues::QueueSet;
use crate::core::{FlowRecord, Outcome, Route, StageId, StageKind};
use crate::errors::{ConfigurationError, StageError, StageExecutionFailure};
use crate::queue::BoundedQueue;
use crate::registry::{substitute_variables, Collaborators};
use crate::stages::{PropertyRejection, PropertyValue, Stage, StageContext, StageProperties, Transfer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};
use uuid::Uuid;

/// Result of one [`StageWrapper::invoke_once`] call.
#[derive(Debug)]
pub enum Invocation {
    /// Records were consumed, produced or flushed.
    Progressed,
    /// No input, or no room downstream.
    Idle,
    /// The stage failed; the run must stop.
    Failed(StageExecutionFailure),
}

impl Invocation {
    /// Returns true for [`Invocation::Progressed`].
    #[must_use]
    pub fn is_progressed(&self) -> bool {
        matches!(self, Self::Progressed)
    }
}

/// Per-wrapper traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperStats {
    /// Calls to the stage's `transform`.
    pub invocations: u64,
    /// Records handed to the stage.
    pub consumed: u64,
    /// Records the stage produced.
    pub produced: u64,
    /// Produced records discarded under auto-terminated outcomes.
    pub auto_terminated: u64,
    /// Produced records that reached the egress queue.
    pub egressed: u64,
    /// Produced records held back behind a full downstream queue.
    pub deferred: u64,
}

/// Wraps one stage with its resolved configuration and outgoing routes.
#[derive(Debug)]
pub struct StageWrapper {
    id: StageId,
    identifier: Uuid,
    name: String,
    kind: StageKind,
    stage: Box<dyn Stage>,
    properties: StageProperties,
    routes: BTreeMap<Outcome, Route>,
    /// Produced records a full queue rejected, in production order.
    pending: VecDeque<(Route, FlowRecord)>,
    stats: WrapperStats,
}

impl StageWrapper {
    pub(crate) fn new(id: StageId, stage: Box<dyn Stage>) -> Self {
        let routes = stage
            .declared_outcomes()
            .into_iter()
            .map(|outcome| (outcome, Route::Unresolved))
            .collect();

        Self {
            id,
            identifier: Uuid::new_v4(),
            name: stage.name().to_string(),
            kind: stage.kind(),
            properties: StageProperties::new(stage.property_descriptors()),
            stage,
            routes,
            pending: VecDeque::new(),
            stats: WrapperStats::default(),
        }
    }

    /// Returns the arena id.
    #[must_use]
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Returns the unique identifier used in logs.
    #[must_use]
    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage role.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Returns the resolved configuration.
    #[must_use]
    pub fn properties(&self) -> &StageProperties {
        &self.properties
    }

    /// Returns the outcomes the wrapped stage can produce, sorted.
    #[must_use]
    pub fn declared_outcomes(&self) -> Vec<Outcome> {
        self.routes.keys().cloned().collect()
    }

    /// Returns the route of an outcome, if declared.
    #[must_use]
    pub fn route_of(&self, outcome: &str) -> Option<Route> {
        self.routes.get(outcome).copied()
    }

    /// Returns the full routing table.
    #[must_use]
    pub fn routes(&self) -> &BTreeMap<Outcome, Route> {
        &self.routes
    }

    /// Returns declared outcomes that are still unresolved.
    #[must_use]
    pub fn unresolved_outcomes(&self) -> Vec<&Outcome> {
        self.routes
            .iter()
            .filter(|(_, route)| !route.is_resolved())
            .map(|(outcome, _)| outcome)
            .collect()
    }

    /// Returns the stages this wrapper forwards to.
    pub fn children(&self) -> impl Iterator<Item = StageId> + '_ {
        self.routes.values().filter_map(|route| match route {
            Route::Forward(child) => Some(*child),
            _ => None,
        })
    }

    /// Returns the traffic counters.
    #[must_use]
    pub fn stats(&self) -> WrapperStats {
        self.stats
    }

    /// Returns the number of produced records waiting for downstream room.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true while the stage may produce records without input.
    #[must_use]
    pub fn has_more_input(&self) -> bool {
        self.stage.has_more_input()
    }

    /// Resolves and stores one property.
    ///
    /// `${name}` references are substituted for properties that support
    /// variables, the stage validates the resolved value, and service
    /// properties are looked up.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the name is unknown, a variable is
    /// undefined, the value is rejected or the named service does not exist.
    pub fn set_property(
        &mut self,
        name: &str,
        value: &str,
        collaborators: &Collaborators,
    ) -> Result<(), ConfigurationError> {
        let descriptor = self.properties.descriptor(name).cloned();

        let resolved = match &descriptor {
            Some(d) if d.supports_variables => {
                substitute_variables(value, collaborators.variables.as_ref()).map_err(|variable| {
                    ConfigurationError::UndefinedVariable {
                        stage: self.name.clone(),
                        property: name.to_string(),
                        variable,
                    }
                })?
            }
            _ => value.to_string(),
        };

        self.stage
            .validate_property(name, &resolved)
            .map_err(|rejection| match rejection {
                PropertyRejection::Unknown => ConfigurationError::UnknownProperty {
                    stage: self.name.clone(),
                    property: name.to_string(),
                },
                PropertyRejection::Invalid(reason) => ConfigurationError::InvalidProperty {
                    stage: self.name.clone(),
                    property: name.to_string(),
                    value: resolved.clone(),
                    reason,
                },
            })?;

        let service = match &descriptor {
            Some(d) if d.identifies_service => Some(
                collaborators.services.resolve_service(&resolved).ok_or_else(|| {
                    ConfigurationError::ServiceNotFound {
                        stage: self.name.clone(),
                        property: name.to_string(),
                        service: resolved.clone(),
                    }
                })?,
            ),
            _ => None,
        };

        debug!(stage = %self.name, property = name, value = %resolved, "property set");
        self.properties.insert(
            name,
            PropertyValue {
                raw: value.to_string(),
                resolved,
                service,
            },
        );
        Ok(())
    }

    /// Checks that `outcome` is declared and still unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UndeclaredOutcome`] or
    /// [`ConfigurationError::DuplicateRoute`].
    pub fn check_routable(&self, outcome: &Outcome) -> Result<(), ConfigurationError> {
        match self.routes.get(outcome) {
            None => Err(ConfigurationError::UndeclaredOutcome {
                stage: self.name.clone(),
                outcome: outcome.to_string(),
            }),
            Some(existing) if existing.is_resolved() => Err(ConfigurationError::DuplicateRoute {
                stage: self.name.clone(),
                outcome: outcome.to_string(),
                existing: *existing,
            }),
            Some(_) => Ok(()),
        }
    }

    pub(crate) fn set_route(&mut self, outcome: Outcome, route: Route) -> Result<(), ConfigurationError> {
        self.check_routable(&outcome)?;
        debug!(stage = %self.name, outcome = %outcome, route = %route, "outcome routed");
        self.routes.insert(outcome, route);
        Ok(())
    }

    /// Declares that records under `outcome` are discarded.
    ///
    /// # Errors
    ///
    /// Fails if the outcome is undeclared or already routed.
    pub fn mark_auto_terminated(&mut self, outcome: impl Into<Outcome>) -> Result<(), ConfigurationError> {
        self.set_route(outcome.into(), Route::AutoTerminate)
    }

    /// Declares that records under `outcome` are collected as flow output.
    ///
    /// # Errors
    ///
    /// Fails if the outcome is undeclared or already routed.
    pub fn designate_terminal_egress(
        &mut self,
        outcome: impl Into<Outcome>,
    ) -> Result<(), ConfigurationError> {
        self.set_route(outcome.into(), Route::TerminalEgress)
    }

    pub(crate) async fn schedule(&mut self) -> Result<(), StageExecutionFailure> {
        let ctx = StageContext::new(self.id, &self.name, &self.properties);
        self.stage
            .on_scheduled(&ctx)
            .await
            .map_err(|cause| StageExecutionFailure::new(self.id, self.name.clone(), "on_scheduled", cause))
    }

    pub(crate) async fn stop(&mut self) {
        self.stage.on_stopped().await;
    }

    /// Drops records held for a full downstream queue, returning how many.
    pub(crate) fn abandon_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Runs the stage at most once.
    ///
    /// Held-back records are flushed first. The stage is only called when
    /// every queue it forwards to has room, and either its incoming queue has
    /// records or it reports more input. A record produced under an outcome
    /// without a route fails the invocation before anything is routed.
    pub async fn invoke_once(&mut self, queues: &mut QueueSet, max_batch: usize) -> Invocation {
        let flushed = self.flush_pending(queues);
        if !self.pending.is_empty() {
            return if flushed > 0 {
                Invocation::Progressed
            } else {
                Invocation::Idle
            };
        }

        let blocked = self
            .routes
            .values()
            .any(|route| matches!(route, Route::Forward(_)) && !queues.accepts(*route));
        if blocked {
            trace!(stage = %self.name, "downstream full");
            return progress_or_idle(flushed > 0);
        }

        let available = queues.incoming(self.id).map_or(0, BoundedQueue::len);
        if available == 0 && !self.stage.has_more_input() {
            return progress_or_idle(flushed > 0);
        }

        let batch_size = self.stage.preferred_batch_size().clamp(1, max_batch.max(1));
        let batch = queues
            .incoming_mut(self.id)
            .map(|queue| queue.poll_batch(batch_size))
            .unwrap_or_default();
        let consumed = batch.len();

        let ctx = StageContext::new(self.id, &self.name, &self.properties);
        let result = self.stage.transform(&ctx, batch).await;
        self.stats.invocations += 1;
        self.stats.consumed += consumed as u64;
        let transfers = match result {
            Ok(transfers) => transfers,
            Err(cause) => return self.failed(cause),
        };

        let mut routed = Vec::with_capacity(transfers.len());
        for Transfer { record, outcome } in transfers {
            match self.routes.get(&outcome) {
                Some(route) if route.is_resolved() => routed.push((*route, record)),
                _ => return self.failed(StageError::UndeclaredOutcome(outcome.to_string())),
            }
        }

        let produced = routed.len();
        self.route_all(queues, routed);

        trace!(stage = %self.name, consumed, produced, "stage invoked");
        progress_or_idle(flushed > 0 || consumed > 0 || produced > 0)
    }

    fn flush_pending(&mut self, queues: &mut QueueSet) -> usize {
        let mut flushed = 0;
        while let Some((route, record)) = self.pending.pop_front() {
            if let Err(record) = queues.deliver(route, record) {
                self.pending.push_front((route, record));
                break;
            }
            if route == Route::TerminalEgress {
                self.stats.egressed += 1;
            }
            flushed += 1;
        }
        flushed
    }

    /// Routes records whose outcomes are already known to be resolved.
    ///
    /// `egressed` counts a record only once it is in the egress queue; a
    /// record still pending when the run ends is abandoned instead.
    fn route_all(&mut self, queues: &mut QueueSet, routed: Vec<(Route, FlowRecord)>) {
        for (route, record) in routed {
            self.stats.produced += 1;
            if route == Route::AutoTerminate {
                self.stats.auto_terminated += 1;
                continue;
            }
            // Keep per-queue order once anything is held back.
            if !self.pending.is_empty() {
                self.stats.deferred += 1;
                self.pending.push_back((route, record));
                continue;
            }
            match queues.deliver(route, record) {
                Ok(()) if route == Route::TerminalEgress => self.stats.egressed += 1,
                Ok(()) => {}
                Err(record) => {
                    self.stats.deferred += 1;
                    self.pending.push_back((route, record));
                }
            }
        }
    }

    fn failed(&self, cause: StageError) -> Invocation {
        Invocation::Failed(StageExecutionFailure::new(self.id, self.name.clone(), "transform", cause))
    }
}

fn progress_or_idle(progressed: bool) -> Invocation {
    if progressed {
        Invocation::Progressed
    } else {
        Invocation::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        InMemoryServiceLookup, MapVariableRegistry, MockServiceLookup, Service, ServiceHandle,
    };
    use crate::stages::{PropertyDescriptor, PropertyValidator};
    use crate::testing::{FailingStage, FanOutStage, FnStage, VecSource};
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Writer {
        target: String,
    }

    impl Service for Writer {
        fn identifier(&self) -> &str {
            &self.target
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Configured;

    #[async_trait]
    impl Stage for Configured {
        fn name(&self) -> &str {
            "configured"
        }

        fn declared_outcomes(&self) -> Vec<Outcome> {
            vec![Outcome::success()]
        }

        fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
            vec![
                PropertyDescriptor::new("dir")
                    .supports_variables()
                    .with_validator(PropertyValidator::NonEmpty),
                PropertyDescriptor::new("writer").identifies_service(),
            ]
        }

        async fn transform(
            &mut self,
            _ctx: &StageContext<'_>,
            batch: Vec<FlowRecord>,
        ) -> Result<Vec<Transfer>, StageError> {
            Ok(batch.into_iter().map(Transfer::success).collect())
        }
    }

    fn wrapper(stage: impl Stage + 'static) -> StageWrapper {
        StageWrapper::new(StageId(0), Box::new(stage))
    }

    fn passthrough(name: &str) -> StageWrapper {
        wrapper(FnStage::new(name, |r: FlowRecord| Ok(Transfer::success(r))))
    }

    #[test]
    fn test_set_property_substitutes_variables() {
        let variables = MapVariableRegistry::new().with_variable("out", "/data/out");
        let collaborators = Collaborators::new().with_variables(Arc::new(variables));
        let mut w = wrapper(Configured);

        w.set_property("dir", "${out}/today", &collaborators).unwrap();

        assert_eq!(w.properties().get("dir"), Some("/data/out/today"));
        let (_, stored) = w.properties().iter().next().unwrap();
        assert_eq!(stored.raw, "${out}/today");
    }

    #[test]
    fn test_set_property_errors() {
        let collaborators = Collaborators::new();
        let mut w = wrapper(Configured);

        let unknown = w.set_property("nope", "x", &collaborators).unwrap_err();
        assert!(matches!(unknown, ConfigurationError::UnknownProperty { .. }));

        let invalid = w.set_property("dir", " ", &collaborators).unwrap_err();
        assert!(matches!(invalid, ConfigurationError::InvalidProperty { .. }));

        let undefined = w.set_property("dir", "${missing}", &collaborators).unwrap_err();
        assert!(matches!(
            undefined,
            ConfigurationError::UndefinedVariable { ref variable, .. } if variable == "missing"
        ));

        let service = w.set_property("writer", "disk", &collaborators).unwrap_err();
        assert!(matches!(service, ConfigurationError::ServiceNotFound { .. }));
        assert!(!w.properties().is_set("writer"));
    }

    #[test]
    fn test_set_property_resolves_service() {
        let lookup = InMemoryServiceLookup::new();
        let handle: ServiceHandle = Arc::new(Writer {
            target: "disk".to_string(),
        });
        lookup.register(handle);
        let collaborators = Collaborators::new().with_services(Arc::new(lookup));
        let mut w = wrapper(Configured);

        w.set_property("writer", "disk", &collaborators).unwrap();

        assert_eq!(w.properties().service("writer").unwrap().identifier(), "disk");
    }

    #[test]
    fn test_service_lookup_is_consulted_once() {
        let mut lookup = MockServiceLookup::new();
        lookup
            .expect_resolve_service()
            .times(1)
            .returning(|_| None);
        let collaborators = Collaborators::new().with_services(Arc::new(lookup));

        let mut w = wrapper(Configured);
        assert!(w.set_property("writer", "disk", &collaborators).is_err());
    }

    #[test]
    fn test_routing_rules() {
        let mut w = passthrough("p");
        assert_eq!(w.declared_outcomes(), vec![Outcome::failure(), Outcome::success()]);
        assert_eq!(w.unresolved_outcomes().len(), 2);

        w.mark_auto_terminated("failure").unwrap();
        let dup = w.designate_terminal_egress("failure").unwrap_err();
        assert!(matches!(
            dup,
            ConfigurationError::DuplicateRoute { existing: Route::AutoTerminate, .. }
        ));

        let undeclared = w.mark_auto_terminated("splits").unwrap_err();
        assert!(matches!(undeclared, ConfigurationError::UndeclaredOutcome { .. }));

        w.set_route(Outcome::success(), Route::Forward(StageId(4))).unwrap();
        assert_eq!(w.route_of("success"), Some(Route::Forward(StageId(4))));
        assert_eq!(w.children().collect::<Vec<_>>(), vec![StageId(4)]);
        assert!(w.unresolved_outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_once_routes_records() {
        let mut queues = QueueSet::new(1, 0);
        let mut w = passthrough("p");
        w.mark_auto_terminated("failure").unwrap();
        w.designate_terminal_egress("success").unwrap();

        assert!(matches!(w.invoke_once(&mut queues, 10).await, Invocation::Idle));

        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("a")).unwrap();
        assert!(w.invoke_once(&mut queues, 10).await.is_progressed());

        assert_eq!(queues.egress().len(), 1);
        assert_eq!(w.stats().egressed, 1);
        assert_eq!(w.stats().invocations, 1);
    }

    #[tokio::test]
    async fn test_invoke_once_holds_back_on_full_queue() {
        let mut queues = QueueSet::new(2, 1);
        let mut source = StageWrapper::new(StageId(0), Box::new(VecSource::from_texts("src", ["a", "b"])));
        source.set_route(Outcome::success(), Route::Forward(StageId(1))).unwrap();

        // Batch of one per invocation; the second record finds the queue full.
        assert!(source.invoke_once(&mut queues, 1).await.is_progressed());
        assert!(matches!(source.invoke_once(&mut queues, 1).await, Invocation::Idle));
        assert_eq!(source.pending_len(), 0);

        queues.incoming_mut(StageId(1)).unwrap().poll();
        assert!(source.invoke_once(&mut queues, 1).await.is_progressed());
        assert_eq!(queues.incoming(StageId(1)).unwrap().peek().unwrap().content_text(), "b");
    }

    #[tokio::test]
    async fn test_pending_records_flush_first() {
        let mut queues = QueueSet::new(2, 1);
        let mut source = StageWrapper::new(
            StageId(0),
            Box::new(VecSource::from_texts("src", ["a", "b", "c"]).with_batch_size(3)),
        );
        source.set_route(Outcome::success(), Route::Forward(StageId(1))).unwrap();

        assert!(source.invoke_once(&mut queues, 10).await.is_progressed());
        assert_eq!(source.pending_len(), 2);
        assert_eq!(source.stats().deferred, 2);

        queues.incoming_mut(StageId(1)).unwrap().poll();
        assert!(source.invoke_once(&mut queues, 10).await.is_progressed());
        assert_eq!(source.pending_len(), 1);
        assert_eq!(queues.incoming(StageId(1)).unwrap().peek().unwrap().content_text(), "b");
    }

    #[tokio::test]
    async fn test_undeclared_outcome_fails_before_routing() {
        let mut queues = QueueSet::new(1, 0);
        let mut w = wrapper(FnStage::new("liar", |r: FlowRecord| Ok(Transfer::new(r, "elsewhere"))));
        w.designate_terminal_egress("success").unwrap();
        w.mark_auto_terminated("failure").unwrap();
        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("x")).unwrap();

        match w.invoke_once(&mut queues, 10).await {
            Invocation::Failed(failure) => {
                assert!(matches!(failure.cause, StageError::UndeclaredOutcome(ref o) if o == "elsewhere"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(queues.egress().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_outcome_fails_instead_of_dropping() {
        let mut queues = QueueSet::new(1, 0);
        let mut w = wrapper(FnStage::new("reject", |r: FlowRecord| Ok(Transfer::failure(r))));
        w.designate_terminal_egress("success").unwrap();
        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("x")).unwrap();

        let Invocation::Failed(failure) = w.invoke_once(&mut queues, 10).await else {
            panic!("expected failure");
        };
        assert!(matches!(failure.cause, StageError::UndeclaredOutcome(ref o) if o == "failure"));
        assert_eq!(w.stats().produced, 0);
        assert!(queues.egress().is_empty());
    }

    #[tokio::test]
    async fn test_stage_error_becomes_failure() {
        let mut queues = QueueSet::new(1, 0);
        let mut w = wrapper(FailingStage::new("broken", "disk on fire"));
        w.mark_auto_terminated("success").unwrap();
        w.mark_auto_terminated("failure").unwrap();
        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("x")).unwrap();

        let Invocation::Failed(failure) = w.invoke_once(&mut queues, 10).await else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, "broken");
        assert_eq!(failure.phase, "transform");
        assert_eq!(failure.cause.to_string(), "disk on fire");
        assert_eq!(w.stats().invocations, 1);
        assert_eq!(w.stats().consumed, 1);
    }

    #[tokio::test]
    async fn test_egress_counted_only_when_delivered() {
        let mut queues = QueueSet::new(2, 1);
        let mut fan = wrapper(FanOutStage::new("fan", 2));
        fan.set_route(Outcome::success(), Route::Forward(StageId(1))).unwrap();
        fan.designate_terminal_egress("failure").unwrap();
        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("x")).unwrap();

        // "x#0" fills the child queue; "x#1" and the egress record wait behind it.
        assert!(fan.invoke_once(&mut queues, 10).await.is_progressed());
        assert_eq!(fan.pending_len(), 2);
        assert!(queues.egress().is_empty());
        assert_eq!(fan.stats().egressed, 0);
        assert_eq!(fan.stats().deferred, 2);

        queues.incoming_mut(StageId(1)).unwrap().poll();
        assert!(fan.invoke_once(&mut queues, 10).await.is_progressed());
        assert_eq!(fan.pending_len(), 0);
        assert_eq!(queues.egress().len(), 1);
        assert_eq!(fan.stats().egressed, 1);
    }

    #[tokio::test]
    async fn test_abandoned_egress_record_is_not_counted() {
        let mut queues = QueueSet::new(2, 1);
        let mut fan = wrapper(FanOutStage::new("fan", 2));
        fan.set_route(Outcome::success(), Route::Forward(StageId(1))).unwrap();
        fan.designate_terminal_egress("failure").unwrap();
        queues.incoming_mut(StageId(0)).unwrap().offer(FlowRecord::from_text("x")).unwrap();

        assert!(fan.invoke_once(&mut queues, 10).await.is_progressed());
        assert_eq!(fan.abandon_pending(), 2);
        assert_eq!(fan.stats().egressed, 0);
        assert_eq!(fan.stats().produced, 3);
    }
}
