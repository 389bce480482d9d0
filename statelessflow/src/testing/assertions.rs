//! Test assertions for flow runs.

use crate::core::{FlowRecord, FlowState};
use crate::flow::RunSummary;

/// Returns the text content of each record, in order.
#[must_use]
pub fn output_texts(output: &[FlowRecord]) -> Vec<String> {
    output.iter().map(FlowRecord::content_text).collect()
}

/// Asserts that the output holds exactly these texts, in order.
pub fn assert_output_texts(output: &[FlowRecord], expected: &[&str]) {
    let actual = output_texts(output);
    assert_eq!(
        actual, expected,
        "Expected output {expected:?}, got {actual:?}"
    );
}

/// Asserts that the run ended in `expected`.
pub fn assert_run_state(summary: &RunSummary, expected: FlowState) {
    assert_eq!(
        summary.state, expected,
        "Expected state {:?}, got {:?}",
        expected, summary.state
    );
}

/// Asserts that every produced record was egressed or auto-terminated.
pub fn assert_fully_accounted(summary: &RunSummary, created: u64) {
    assert_eq!(
        summary.egressed + summary.auto_terminated,
        created,
        "Expected {created} records accounted for, got {} egressed and {} auto-terminated",
        summary.egressed,
        summary.auto_terminated
    );
    assert_eq!(summary.abandoned, 0, "Expected no abandoned records");
}
