//! Overall status of a test run, derived from its spec runs.
//!
//! Failure dominates: a single failed spec makes the run FAILED. Otherwise
//! any skipped spec makes it SKIPPED, and everything else (including an empty
//! run and unrecognized statuses) is PASSED.

use crate::models::{RunStatus, SpecOutcome, TestRun};

/// Derive the status of a materialized test run.
pub fn derive_status(test_run: &TestRun) -> RunStatus {
    derive_from_statuses(test_run.spec_runs().map(|s| s.status.as_str()))
}

/// Derive a run status from raw spec status strings.
pub fn derive_from_statuses<'a, I>(statuses: I) -> RunStatus
where
    I: IntoIterator<Item = &'a str>,
{
    let mut status = RunStatus::Passed;
    for raw in statuses {
        match SpecOutcome::classify(raw) {
            SpecOutcome::Failed => return RunStatus::Failed,
            // Keep scanning: a later failure still wins.
            SpecOutcome::Skipped => status = RunStatus::Skipped,
            SpecOutcome::Passed | SpecOutcome::Pending => {}
        }
    }
    status
}
