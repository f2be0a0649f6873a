//! Progress callbacks for long-running workflows.

use crate::workflow::RunOutcome;

/// Progress callback for workflow runs.
pub trait ProgressReporter: Send + Sync {
    /// A stage (step or parallel group) is about to run.
    fn stage_started(&self, name: &str, index: usize, total: usize);
    /// One member of a parallel group finished, successfully or not.
    fn member_finished(&self, group: &str, index: usize, ok: bool);
    /// The workflow completed.
    fn done(&self, outcome: &RunOutcome);
}

/// A no-op progress reporter.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _name: &str, _index: usize, _total: usize) {}
    fn member_finished(&self, _group: &str, _index: usize, _ok: bool) {}
    fn done(&self, _outcome: &RunOutcome) {}
}
