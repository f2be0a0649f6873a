//! Sequential composition of steps and parallel groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument};

use scholarflow_shared::{Result, ScholarflowError, StepResult};

use crate::parallel::{MemberFailure, ParallelGroup};
use crate::progress::{ProgressReporter, SilentProgress};
use crate::schedule::SchedulingContext;
use crate::step::{NamedInputs, Step};

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Binds the output of an earlier stage to a step under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: String,
    pub from: String,
    pub required: bool,
}

impl InputBinding {
    pub fn required(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, from)
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Step { step: Step, inputs: Vec<InputBinding> },
    Parallel(ParallelGroup),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Self::Step { step, .. } => step.name(),
            Self::Parallel(group) => group.name(),
        }
    }
}

/// An ordered, immutable sequence of stages.
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    name: String,
    stages: Vec<Stage>,
}

impl WorkflowSpec {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }
}

pub struct WorkflowBuilder {
    name: String,
    stages: Vec<Stage>,
}

impl WorkflowBuilder {
    pub fn step(self, step: impl Into<Step>) -> Self {
        self.step_with_inputs(step, Vec::new())
    }

    pub fn step_with_inputs(mut self, step: impl Into<Step>, inputs: Vec<InputBinding>) -> Self {
        self.stages.push(Stage::Step {
            step: step.into(),
            inputs,
        });
        self
    }

    pub fn parallel(mut self, group: ParallelGroup) -> Self {
        self.stages.push(Stage::Parallel(group));
        self
    }

    /// Check stage names and input bindings. Misconfiguration here is fatal.
    pub fn build(self) -> Result<WorkflowSpec> {
        if self.stages.is_empty() {
            return Err(ScholarflowError::validation(format!(
                "workflow '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            match stage {
                Stage::Step { step, inputs } => {
                    for binding in inputs {
                        if !seen.contains(binding.from.as_str()) {
                            return Err(ScholarflowError::validation(format!(
                                "step '{}' binds input '{}' to '{}', which is not an earlier stage",
                                step.name(),
                                binding.name,
                                binding.from
                            )));
                        }
                    }
                }
                Stage::Parallel(group) if group.is_empty() => {
                    return Err(ScholarflowError::validation(format!(
                        "parallel group '{}' has no members",
                        group.name()
                    )));
                }
                Stage::Parallel(_) => {}
            }

            if !seen.insert(stage.name()) {
                return Err(ScholarflowError::validation(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }

        Ok(WorkflowSpec {
            name: self.name,
            stages: self.stages,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// The result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Output of the last stage.
    pub output: StepResult,
    /// Parallel members that were replaced by sentinels.
    pub failures: Vec<MemberFailure>,
    pub duration: Duration,
}

/// Runs a [`WorkflowSpec`], threading each stage's output into the next.
pub struct Workflow {
    spec: WorkflowSpec,
    progress: Arc<dyn ProgressReporter>,
}

impl Workflow {
    pub fn new(spec: WorkflowSpec) -> Self {
        Self {
            spec,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    /// Run every stage in order. Stage `k` receives exactly stage `k-1`'s
    /// output. A failing step ends the run; a failing parallel member does not.
    #[instrument(skip_all, fields(workflow = %self.spec.name, stages = self.spec.stages.len()))]
    pub async fn run(&self, initial: StepResult) -> Result<RunOutcome> {
        let start = Instant::now();
        let total = self.spec.stages.len();
        let mut outputs: HashMap<&str, StepResult> = HashMap::new();
        let mut failures = Vec::new();
        let mut previous = initial;

        info!("starting workflow");

        for (index, stage) in self.spec.stages.iter().enumerate() {
            self.progress.stage_started(stage.name(), index, total);

            let result = match stage {
                Stage::Step { step, inputs } => {
                    let named = resolve_inputs(step.name(), inputs, &outputs)?;
                    step.run(&previous, &named).await.inspect_err(|e| {
                        error!(stage = step.name(), error = %e, "stage failed, aborting run");
                    })?
                }
                Stage::Parallel(group) => {
                    let outcome = group.run(&previous, self.progress.as_ref()).await;
                    failures.extend(outcome.failures);
                    outcome.joined.into_result()
                }
            };

            outputs.insert(stage.name(), result.clone());
            previous = result;
        }

        let outcome = RunOutcome {
            output: previous,
            failures,
            duration: start.elapsed(),
        };
        info!(
            failures = outcome.failures.len(),
            duration_ms = outcome.duration.as_millis() as u64,
            "workflow complete"
        );
        self.progress.done(&outcome);
        Ok(outcome)
    }

    /// [`Workflow::run`] for callers that cannot `.await`.
    pub fn run_blocking(&self, initial: StepResult) -> Result<RunOutcome> {
        SchedulingContext::current().drive(self.run(initial))?
    }
}

fn resolve_inputs(
    step: &str,
    bindings: &[InputBinding],
    outputs: &HashMap<&str, StepResult>,
) -> Result<NamedInputs> {
    let mut named = NamedInputs::new();
    for binding in bindings {
        match outputs.get(binding.from.as_str()) {
            Some(result) => {
                named.insert(binding.name.clone(), result.clone());
            }
            None if binding.required => {
                return Err(ScholarflowError::malformed_input(
                    step,
                    format!(
                        "required input '{}' from stage '{}' is unavailable",
                        binding.name, binding.from
                    ),
                ));
            }
            None => {}
        }
    }
    Ok(named)
}
