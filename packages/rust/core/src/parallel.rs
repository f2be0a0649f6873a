//! Concurrent fan-out with an order-preserving join.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use scholarflow_shared::{Fragment, JoinedOutput, StepResult, missing_notice};

use crate::progress::ProgressReporter;
use crate::step::{NamedInputs, Step};

/// A member that failed. Its slot holds the missing-output sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub group: String,
    pub index: usize,
    pub step: String,
    pub message: String,
}

/// What a group run produced. `results[i]` and `joined.fragments[i]` always
/// belong to member `i`.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub results: Vec<StepResult>,
    pub joined: JoinedOutput,
    pub failures: Vec<MemberFailure>,
}

/// A fixed set of steps run concurrently against one shared input.
#[derive(Debug, Clone)]
pub struct ParallelGroup {
    name: String,
    members: Vec<Step>,
}

impl ParallelGroup {
    pub fn new(name: impl Into<String>, members: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Step] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Dispatch every member, then join in member order.
    ///
    /// Never fails as a whole: a member error or panic is logged, recorded in
    /// [`GroupOutcome::failures`] and replaced by a sentinel in its own slot.
    #[instrument(skip_all, fields(group = %self.name, members = self.members.len()))]
    pub async fn run(&self, input: &StepResult, progress: &dyn ProgressReporter) -> GroupOutcome {
        let shared = Arc::new(input.clone());

        let mut handles = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let member = member.clone();
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                member.run(&shared, &NamedInputs::new()).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut fragments = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();

        for (index, (handle, member)) in handles.into_iter().zip(&self.members).enumerate() {
            let outcome = match handle.await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("member task panicked: {e}")),
            };

            match outcome {
                Ok(result) => {
                    progress.member_finished(&self.name, index, true);
                    let mut fragment = Fragment::new(index, member.name(), result.as_text());
                    if let Some(title) = member.fragment_title(input) {
                        fragment = fragment.with_title(title);
                    }
                    fragments.push(fragment);
                    results.push(result);
                }
                Err(message) => {
                    warn!(index, step = member.name(), error = %message, "parallel member failed");
                    progress.member_finished(&self.name, index, false);
                    fragments.push(Fragment::missing(index, member.name()));
                    results.push(StepResult::text(missing_notice(index)));
                    failures.push(MemberFailure {
                        group: self.name.clone(),
                        index,
                        step: member.name().to_string(),
                        message,
                    });
                }
            }
        }

        info!(
            succeeded = results.len() - failures.len(),
            failed = failures.len(),
            "parallel group joined"
        );

        GroupOutcome {
            results,
            joined: JoinedOutput::new(fragments),
            failures,
        }
    }
}
