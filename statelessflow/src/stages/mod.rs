//! Stage trait and the types stages exchange with the engine.
//!
//! Stages are opaque units of work. The engine only relies on the capability
//! contract below: declared outcomes, property validation, a batch transform
//! and, for sources, a signal telling it whether more input may arrive.

mod properties;

pub use properties::{
    PropertyDescriptor, PropertyRejection, PropertyValidator, PropertyValue, StageProperties,
};

use crate::core::{FlowRecord, Outcome, StageId, StageKind};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// A record paired with the outcome it was produced under.
#[derive(Debug)]
pub struct Transfer {
    /// The produced record.
    pub record: FlowRecord,
    /// The outcome selecting its destination.
    pub outcome: Outcome,
}

impl Transfer {
    /// Creates a transfer.
    #[must_use]
    pub fn new(record: FlowRecord, outcome: impl Into<Outcome>) -> Self {
        Self {
            record,
            outcome: outcome.into(),
        }
    }

    /// Routes the record under `success`.
    #[must_use]
    pub fn success(record: FlowRecord) -> Self {
        Self::new(record, Outcome::success())
    }

    /// Routes the record under `failure`.
    #[must_use]
    pub fn failure(record: FlowRecord) -> Self {
        Self::new(record, Outcome::failure())
    }
}

/// What a stage sees of the engine while it runs.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    stage_id: StageId,
    stage_name: &'a str,
    properties: &'a StageProperties,
}

impl<'a> StageContext<'a> {
    /// Creates a stage context.
    #[must_use]
    pub fn new(stage_id: StageId, stage_name: &'a str, properties: &'a StageProperties) -> Self {
        Self {
            stage_id,
            stage_name,
            properties,
        }
    }

    /// Returns the id of the wrapper running the stage.
    #[must_use]
    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &'a str {
        self.stage_name
    }

    /// Returns the resolved configuration.
    #[must_use]
    pub fn properties(&self) -> &'a StageProperties {
        self.properties
    }

    /// Shorthand for `properties().get(name)`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&'a str> {
        self.properties.get(name)
    }
}

/// Trait for processing stages.
///
/// A stage is driven by exactly one wrapper on the scheduling task, so
/// `transform` takes `&mut self` and needs no interior locking.
#[async_trait]
pub trait Stage: Send + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the role of the stage.
    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    /// Returns the fixed set of outcomes the stage can produce.
    fn declared_outcomes(&self) -> Vec<Outcome>;

    /// Returns the properties the stage accepts.
    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        Vec::new()
    }

    /// Checks a property before it is stored.
    ///
    /// The default looks the name up in [`Stage::property_descriptors`] and
    /// applies its validator.
    fn validate_property(&self, name: &str, value: &str) -> Result<(), PropertyRejection> {
        let descriptors = self.property_descriptors();
        let descriptor = descriptors
            .iter()
            .find(|d| d.name == name)
            .ok_or(PropertyRejection::Unknown)?;
        descriptor.validator.validate(value).map_err(PropertyRejection::Invalid)
    }

    /// Returns how many records the stage wants per invocation.
    fn preferred_batch_size(&self) -> usize {
        1
    }

    /// Returns true while a source may still produce records without input.
    fn has_more_input(&self) -> bool {
        false
    }

    /// Called once after validation, before the first sweep.
    async fn on_scheduled(&mut self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
        Ok(())
    }

    /// Transforms a batch of input records into routed output records.
    ///
    /// Sources are called with an empty batch while [`Stage::has_more_input`]
    /// is true and their queue is empty.
    async fn transform(
        &mut self,
        ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError>;

    /// Called once when the run ends, whatever the outcome.
    async fn on_stopped(&mut self) {}
}

/// A stage mapping each input record to one transfer with a closure.
pub struct FnStage<F>
where
    F: FnMut(FlowRecord) -> Result<Transfer, StageError> + Send,
{
    name: String,
    outcomes: Vec<Outcome>,
    func: F,
}

impl<F> FnStage<F>
where
    F: FnMut(FlowRecord) -> Result<Transfer, StageError> + Send,
{
    /// Creates a function-based stage declaring `success` and `failure`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            outcomes: vec![Outcome::success(), Outcome::failure()],
            func,
        }
    }

    /// Replaces the declared outcomes.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: impl IntoIterator<Item = impl Into<Outcome>>) -> Self {
        self.outcomes = outcomes.into_iter().map(Into::into).collect();
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: FnMut(FlowRecord) -> Result<Transfer, StageError> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: FnMut(FlowRecord) -> Result<Transfer, StageError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        self.outcomes.clone()
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        batch.into_iter().map(|record| (self.func)(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Configurable;

    #[async_trait]
    impl Stage for Configurable {
        fn name(&self) -> &str {
            "configurable"
        }

        fn declared_outcomes(&self) -> Vec<Outcome> {
            vec![Outcome::success()]
        }

        fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
            vec![PropertyDescriptor::new("count").with_validator(PropertyValidator::PositiveInteger)]
        }

        async fn transform(
            &mut self,
            _ctx: &StageContext<'_>,
            batch: Vec<FlowRecord>,
        ) -> Result<Vec<Transfer>, StageError> {
            Ok(batch.into_iter().map(Transfer::success).collect())
        }
    }

    #[test]
    fn test_default_validate_property() {
        let stage = Configurable;
        assert_eq!(stage.validate_property("count", "3"), Ok(()));
        assert_eq!(stage.validate_property("other", "3"), Err(PropertyRejection::Unknown));
        assert!(matches!(
            stage.validate_property("count", "zero"),
            Err(PropertyRejection::Invalid(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let stage = Configurable;
        assert_eq!(stage.kind(), StageKind::Transform);
        assert_eq!(stage.preferred_batch_size(), 1);
        assert!(!stage.has_more_input());
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let mut stage = FnStage::new("upper", |mut record: FlowRecord| {
            let upper = record.content_text().to_uppercase();
            record.replace_content(upper);
            Ok(Transfer::success(record))
        });

        let props = StageProperties::default();
        let ctx = StageContext::new(StageId(0), "upper", &props);
        let out = stage
            .transform(&ctx, vec![FlowRecord::from_text("abc")])
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].outcome, Outcome::success());
        assert_eq!(out[0].record.content_text(), "ABC");
    }

    #[test]
    fn test_fn_stage_outcomes() {
        let stage = FnStage::new("x", |r: FlowRecord| Ok(Transfer::success(r)))
            .with_outcomes(["matched", "unmatched"]);

        assert_eq!(
            stage.declared_outcomes(),
            vec![Outcome::new("matched"), Outcome::new("unmatched")]
        );
    }
}
