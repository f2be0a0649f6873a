//! The uniform step abstraction.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::instrument;

use scholarflow_shared::{Result, ScholarflowError, StepResult};

use crate::adapter;
use crate::generation::GenerationStep;
use crate::schedule::SchedulingContext;

/// Results of earlier stages bound to a step by name.
pub type NamedInputs = BTreeMap<String, StepResult>;

/// One pipeline stage. Every variant turns the previous result (plus any
/// named inputs) into exactly one [`StepResult`].
#[derive(Clone)]
pub enum Step {
    Generation(GenerationStep),
    Function(FunctionStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Self::Generation(step) => step.name(),
            Self::Function(step) => step.name(),
        }
    }

    pub async fn run(&self, previous: &StepResult, named: &NamedInputs) -> Result<StepResult> {
        match self {
            Self::Generation(step) => step.run(previous, named).await,
            Self::Function(step) => step.run(previous, named).await,
        }
    }

    /// Title for this step's slot in a joined output, if it has one.
    pub(crate) fn fragment_title(&self, input: &StepResult) -> Option<String> {
        match self {
            Self::Generation(step) => step.fragment_title(input),
            Self::Function(_) => None,
        }
    }
}

impl From<GenerationStep> for Step {
    fn from(step: GenerationStep) -> Self {
        Self::Generation(step)
    }
}

impl From<FunctionStep> for Step {
    fn from(step: FunctionStep) -> Self {
        Self::Function(step)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation(step) => f.debug_tuple("Generation").field(&step.name()).finish(),
            Self::Function(step) => f.debug_tuple("Function").field(step).finish(),
        }
    }
}

/// Keep step-level errors as they are; anything else becomes an invocation
/// failure of `step`.
pub(crate) fn as_invocation(step: &str, err: ScholarflowError) -> ScholarflowError {
    match err {
        err @ (ScholarflowError::Invocation { .. } | ScholarflowError::MalformedInput { .. }) => {
            err
        }
        other => ScholarflowError::invocation(step, other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// FunctionStep
// ---------------------------------------------------------------------------

pub type BlockingFn = Arc<dyn Fn(String) -> Result<Value> + Send + Sync>;
pub type SuspendingFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum FunctionKind {
    /// Receives text, returns immediately.
    Blocking(BlockingFn),
    /// Receives a structured value and completes asynchronously.
    Suspending(SuspendingFn),
}

/// A deterministic transformation wrapped as a step.
#[derive(Clone)]
pub struct FunctionStep {
    name: String,
    kind: FunctionKind,
}

impl FunctionStep {
    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Blocking(Arc::new(f)),
        }
    }

    pub fn suspending<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Suspending(Arc::new(
                move |value: Value| -> BoxFuture<'static, Result<Value>> { f(value).boxed() },
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self.kind, FunctionKind::Suspending(_))
    }

    #[instrument(skip_all, fields(step = %self.name, suspending = self.is_suspending()))]
    pub async fn run(&self, previous: &StepResult, named: &NamedInputs) -> Result<StepResult> {
        let input = adapter::derive_input(&self.name, previous, named);
        let value = match &self.kind {
            FunctionKind::Blocking(f) => f(adapter::text_input(input)),
            FunctionKind::Suspending(f) => f(adapter::structured_input(&self.name, input)).await,
        };
        value
            .map(adapter::wrap_output)
            .map_err(|e| as_invocation(&self.name, e))
    }

    /// Run from a caller that cannot `.await`. A suspending function is driven
    /// to completion on whatever scheduling context the caller is in.
    pub fn run_blocking(&self, previous: &StepResult, named: &NamedInputs) -> Result<StepResult> {
        let input = adapter::derive_input(&self.name, previous, named);
        let value = match &self.kind {
            FunctionKind::Blocking(f) => f(adapter::text_input(input)),
            FunctionKind::Suspending(f) => {
                let fut = f(adapter::structured_input(&self.name, input));
                SchedulingContext::current().drive(fut)?
            }
        };
        value
            .map(adapter::wrap_output)
            .map_err(|e| as_invocation(&self.name, e))
    }
}

impl std::fmt::Debug for FunctionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionStep")
            .field("name", &self.name)
            .field("suspending", &self.is_suspending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn keys_of() -> FunctionStep {
        FunctionStep::suspending("keys", |value: Value| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let keys: Vec<String> = value
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            Ok(json!(keys))
        })
    }

    #[tokio::test]
    async fn blocking_function_receives_serialized_data() {
        let step = FunctionStep::blocking("len", |text| Ok(json!(text.len())));
        let out = step
            .run(&StepResult::data(json!({"a": 1})), &NamedInputs::new())
            .await
            .unwrap();
        assert_eq!(out, StepResult::text("7"));
    }

    #[tokio::test]
    async fn suspending_function_gets_empty_object_for_free_text() {
        let out = keys_of()
            .run(&StepResult::text("not structured"), &NamedInputs::new())
            .await
            .unwrap();
        assert_eq!(out, StepResult::text("[]"));
    }

    #[tokio::test]
    async fn string_results_are_not_quoted() {
        let step = FunctionStep::blocking("upper", |text| Ok(json!(text.to_uppercase())));
        let out = step
            .run(&StepResult::text("abc"), &NamedInputs::new())
            .await
            .unwrap();
        assert_eq!(out, StepResult::text("ABC"));
    }

    #[tokio::test]
    async fn function_errors_become_invocation_errors() {
        let step = FunctionStep::blocking("broken", |_| Err(ScholarflowError::parse("nope")));
        let err = step
            .run(&StepResult::empty(), &NamedInputs::new())
            .await
            .unwrap_err();
        match err {
            ScholarflowError::Invocation { step, message } => {
                assert_eq!(step, "broken");
                assert!(message.contains("nope"));
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn run_blocking_without_runtime() {
        let out = keys_of()
            .run_blocking(&StepResult::text(r#"{"b": 1, "a": 2}"#), &NamedInputs::new())
            .unwrap();
        assert_eq!(out, StepResult::text(r#"["a","b"]"#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_blocking_inside_multi_thread_runtime() {
        let out = keys_of()
            .run_blocking(&StepResult::text(r#"{"x": 0}"#), &NamedInputs::new())
            .unwrap();
        assert_eq!(out, StepResult::text(r#"["x"]"#));
    }

    #[tokio::test]
    async fn run_blocking_inside_current_thread_runtime() {
        let out = keys_of()
            .run_blocking(&StepResult::text(r#"{"y": 0}"#), &NamedInputs::new())
            .unwrap();
        assert_eq!(out, StepResult::text(r#"["y"]"#));
    }
}
