//! Start-of-run structural checks.

use super::wrapper::StageWrapper;
use crate::errors::{FlowError, UnroutedOutcomeError};

/// Every unrouted outcome across the graph, in stage then outcome order.
#[must_use]
pub fn unrouted_outcomes(wrappers: &[StageWrapper]) -> Vec<UnroutedOutcomeError> {
    wrappers
        .iter()
        .flat_map(|w| {
            w.unresolved_outcomes()
                .into_iter()
                .map(move |outcome| UnroutedOutcomeError::new(w.id(), w.name(), outcome.as_str()))
        })
        .collect()
}

/// Checks the graph can run: every outcome routed, every required property present.
///
/// # Errors
///
/// Returns the first [`FlowError::UnroutedOutcome`], then the first
/// [`FlowError::MissingProperty`].
pub fn validate(wrappers: &[StageWrapper]) -> Result<(), FlowError> {
    if let Some(unrouted) = unrouted_outcomes(wrappers).into_iter().next() {
        return Err(unrouted.into());
    }

    for wrapper in wrappers {
        if let Some(property) = wrapper.properties().missing_required().into_iter().next() {
            return Err(FlowError::MissingProperty {
                stage_id: wrapper.id(),
                stage: wrapper.name().to_string(),
                property,
            });
        }
    }

    Ok(())
}
