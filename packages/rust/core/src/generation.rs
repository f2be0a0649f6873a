//! Steps that delegate to a generation capability.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use scholarflow_shared::{
    IdentityKey, Interaction, JoinedOutput, PlanningOutput, Result, ScholarflowError, StepResult,
};

use crate::capability::GenerationCapability;
use crate::history::InteractionHistory;
use crate::step::{NamedInputs, as_invocation};

/// Prior interactions fed back as context when no window is set.
const DEFAULT_WINDOW: usize = 3;

/// A fixed instruction bound to a capability and an identity.
///
/// Between runs the step holds no state beyond the identity's append-only
/// history: it reads the last `window` interactions as context and appends
/// the exchange it just performed.
#[derive(Clone)]
pub struct GenerationStep {
    name: String,
    identity: IdentityKey,
    instruction: String,
    capability: Arc<dyn GenerationCapability>,
    history: Arc<dyn InteractionHistory>,
    window: usize,
    subtopic: Option<usize>,
}

impl GenerationStep {
    pub fn new(
        name: impl Into<String>,
        identity: IdentityKey,
        instruction: impl Into<String>,
        capability: Arc<dyn GenerationCapability>,
        history: Arc<dyn InteractionHistory>,
    ) -> Self {
        Self {
            name: name.into(),
            identity,
            instruction: instruction.into(),
            capability,
            history,
            window: DEFAULT_WINDOW,
            subtopic: None,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Focus on one zero-based subtopic of a planning output received as input.
    pub fn with_subtopic(mut self, index: usize) -> Self {
        self.subtopic = Some(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub(crate) fn fragment_title(&self, input: &StepResult) -> Option<String> {
        let index = self.subtopic?;
        let plan = PlanningOutput::parse(&input.as_text()).ok()?;
        plan.subtopic(index).map(|s| s.topic.clone())
    }

    fn compose_input(&self, previous: &StepResult, named: &NamedInputs) -> Result<String> {
        let base = render_input(previous);

        let mut input = match self.subtopic {
            Some(index) => {
                let plan = PlanningOutput::parse(&base)
                    .map_err(|e| ScholarflowError::malformed_input(&self.name, e.to_string()))?;
                let subtopic = plan.subtopic(index).ok_or_else(|| {
                    ScholarflowError::malformed_input(
                        &self.name,
                        format!("planning output has no subtopic at index {index}"),
                    )
                })?;
                format!(
                    "{}\n## Research plan: {}\n\n{}",
                    subtopic.render_assignment(index),
                    plan.title,
                    base.trim()
                )
            }
            None => base,
        };

        for (name, result) in named {
            input.push_str(&format!("\n\n## {name}\n\n{}", render_input(result)));
        }
        Ok(input)
    }

    #[instrument(skip_all, fields(step = %self.name, identity = %self.identity))]
    pub async fn run(&self, previous: &StepResult, named: &NamedInputs) -> Result<StepResult> {
        let input = self.compose_input(previous, named)?;

        let context = if self.window == 0 {
            Vec::new()
        } else {
            self.history
                .recent(&self.identity, self.window)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "failed to read interaction history, continuing without it");
                    Vec::new()
                })
        };

        let output = self
            .capability
            .generate(&self.instruction, &context, &input)
            .await
            .map_err(|e| as_invocation(&self.name, e))?;

        for interaction in [Interaction::user(input), Interaction::assistant(output.clone())] {
            if let Err(e) = self.history.append(&self.identity, interaction).await {
                warn!(error = %e, "failed to append interaction history");
            }
        }

        debug!(
            capability = self.capability.name(),
            chars = output.len(),
            "generation step finished"
        );
        Ok(StepResult::Text(output))
    }
}

/// Joined parallel output renders as sections; anything else as text.
fn render_input(result: &StepResult) -> String {
    match JoinedOutput::from_result(result) {
        Some(joined) if !joined.is_empty() => joined.render(),
        _ => result.as_text().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use scholarflow_shared::Fragment;

    use super::*;
    use crate::capability::ScriptedCapability;
    use crate::history::MemoryHistory;

    const PLAN: &str = r#"Here is the plan:
{"title": "Spin crossover", "topics": [
  {"topic": "Ligand field", "key_ideas": ["splitting"], "writing_guideline": "explain", "word_count": 300},
  {"topic": "Hysteresis", "key_ideas": [], "writing_guideline": "", "word_count": "200-300"}
]}"#;

    fn step(capability: Arc<ScriptedCapability>, history: Arc<MemoryHistory>) -> GenerationStep {
        GenerationStep::new(
            "researcher_1",
            IdentityKey::new("user", "researcher_1"),
            "research",
            capability,
            history,
        )
    }

    #[tokio::test]
    async fn appends_exchange_and_reads_window() {
        let capability = Arc::new(ScriptedCapability::echo());
        let history = Arc::new(MemoryHistory::new());
        let step = step(capability.clone(), history.clone()).with_window(1);

        step.run(&StepResult::text("first"), &NamedInputs::new())
            .await
            .unwrap();
        step.run(&StepResult::text("second"), &NamedInputs::new())
            .await
            .unwrap();

        let log = history.log(step.identity()).await;
        assert_eq!(log.len(), 4);
        assert_eq!(log[3].content, "second");

        let calls = capability.calls();
        assert_eq!(calls[0].context_len, 0);
        assert_eq!(calls[1].context_len, 1);
    }

    #[tokio::test]
    async fn subtopic_focus_prepends_assignment() {
        let capability = Arc::new(ScriptedCapability::echo());
        let step = step(capability, Arc::new(MemoryHistory::new())).with_subtopic(1);

        let out = step
            .run(&StepResult::text(PLAN), &NamedInputs::new())
            .await
            .unwrap();
        let text = out.as_text();
        assert!(text.starts_with("## Assigned subtopic (index 1)"));
        assert!(text.contains("Topic: Hysteresis"));
        assert!(text.contains("## Research plan: Spin crossover"));
        assert_eq!(
            step.fragment_title(&StepResult::text(PLAN)).as_deref(),
            Some("Hysteresis")
        );
    }

    #[tokio::test]
    async fn missing_subtopic_is_malformed_input() {
        let step = step(Arc::new(ScriptedCapability::echo()), Arc::new(MemoryHistory::new()))
            .with_subtopic(5);
        let err = step
            .run(&StepResult::text(PLAN), &NamedInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScholarflowError::MalformedInput { .. }));
    }

    #[tokio::test]
    async fn joined_input_and_named_inputs_are_rendered() {
        let step = step(Arc::new(ScriptedCapability::echo()), Arc::new(MemoryHistory::new()));
        let joined = JoinedOutput::new(vec![
            Fragment::new(0, "researcher_0", "alpha").with_title("A"),
            Fragment::missing(1, "researcher_1"),
        ])
        .into_result();
        let mut named = NamedInputs::new();
        named.insert("style".into(), StepResult::text("ACS"));

        let out = step.run(&joined, &named).await.unwrap();
        assert_eq!(
            out.as_text(),
            "# researcher_0: A\n\nalpha\n\n# researcher_1\n\n> **Warning:** Output 2 is missing or malformed.\n\n## style\n\nACS"
        );
    }

    #[tokio::test]
    async fn capability_failure_is_invocation_error() {
        let capability = Arc::new(ScriptedCapability::new(|_| {
            Err(ScholarflowError::Network("down".into()))
        }));
        let step = step(capability, Arc::new(MemoryHistory::new()));
        let err = step
            .run(&StepResult::text("x"), &NamedInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScholarflowError::Invocation { ref step, .. } if step == "researcher_1"));
    }
}
