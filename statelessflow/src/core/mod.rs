//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Flow records and well-known attribute names
//! - Outcome labels, stage ids and routes
//! - Stage kind and flow state enums

mod outcome;
mod record;
mod status;

pub use outcome::{Outcome, Route, StageId};
pub use record::{attributes, FlowRecord};
pub use status::{FlowState, StageKind};
