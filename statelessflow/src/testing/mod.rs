//! Testing utilities for flow graphs.
//!
//! This module provides:
//! - Mock stages (sources, failing and recording stages)
//! - File-backed fixture stages for end-to-end flows
//! - Assertions over run output and summaries

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_fully_accounted, assert_output_texts, assert_run_state, output_texts,
};
pub use fixtures::{properties, PutFileStage, ReplaceTextStage, SplitTextStage, TailFileStage};
pub use mocks::{
    outcomes, passthrough, EndlessSource, FailingStage, FanOutStage, RecordingStage, VecSource,
};

pub use crate::stages::FnStage;
