//! Flow graph construction and execution.
//!
//! This module provides:
//! - StageWrapper, which owns one stage's configuration and routing table
//! - QueueSet, the per-run incoming queues and egress collection
//! - FlowGraph, the wiring API and the single-task scheduling loop
//! - FlowHandle, for runs spawned onto their own task

mod graph;
mod handle;
mod queues;
pub mod validation;
mod wrapper;


pub use graph::FlowGraph;
pub use handle::{FlowHandle, FlowRun, RunSummary};
pub use queues::QueueSet;
pub use wrapper::{Invocation, StageWrapper, WrapperStats};
