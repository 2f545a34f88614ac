//! Test assertions for run reports.

use crate::core::{StageName, StageStatus};
use crate::errors::ErrorKind;
use crate::pipeline::RunReport;

/// Asserts that the run finished without error.
pub fn assert_run_succeeded(report: &RunReport) {
    assert!(
        report.is_success(),
        "Expected success, got error: {:?}",
        report.error()
    );
}

/// Asserts that the run failed in `stage` with an error of `kind`.
pub fn assert_run_failed_at(report: &RunReport, stage: StageName, kind: ErrorKind) {
    let error = report
        .error()
        .unwrap_or_else(|| panic!("Expected failure at {stage}, but the run succeeded"));
    assert_eq!(error.stage, Some(stage), "Failed in the wrong stage: {error:?}");
    assert_eq!(error.kind, kind, "Wrong error kind: {error:?}");
}

/// Asserts that `stage` has the expected status in the trace.
pub fn assert_stage_status(report: &RunReport, stage: StageName, expected: StageStatus) {
    let trace = report
        .trace_for(stage)
        .unwrap_or_else(|| panic!("No trace entry for {stage}"));
    assert_eq!(
        trace.status, expected,
        "Expected status {:?} for {stage}, got {:?}",
        expected, trace.status
    );
}

/// Asserts that `stage` committed fallback content.
pub fn assert_stage_degraded(report: &RunReport, stage: StageName) {
    assert!(
        report.state.degraded_stages().contains(&stage),
        "Expected {stage} to be degraded, degraded stages: {:?}",
        report.state.degraded_stages()
    );
}

/// Asserts that the trace lists stages in exactly this order.
pub fn assert_trace_order(report: &RunReport, expected: &[StageName]) {
    let actual: Vec<&str> = report.trace.iter().map(|t| t.stage.as_str()).collect();
    let expected: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
    assert_eq!(actual, expected, "Unexpected trace order");
}
