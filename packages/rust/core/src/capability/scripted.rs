//! A deterministic in-process capability.
//!
//! Responses come from a closure over the call, optionally after a per-call
//! delay, which makes completion-order permutations easy to stage.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use scholarflow_shared::{Interaction, Result};

use super::GenerationCapability;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub instruction: String,
    pub input: String,
    pub context_len: usize,
}

type Responder = Box<dyn Fn(&ScriptedCall) -> Result<String> + Send + Sync>;
type Delay = Box<dyn Fn(&ScriptedCall) -> Duration + Send + Sync>;

pub struct ScriptedCapability {
    responder: Responder,
    delay: Option<Delay>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedCapability {
    pub fn new(responder: impl Fn(&ScriptedCall) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the input unchanged.
    pub fn echo() -> Self {
        Self::new(|call| Ok(call.input.clone()))
    }

    /// Sleep before answering each call.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&ScriptedCall) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationCapability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        instruction: &str,
        context: &[Interaction],
        input: &str,
    ) -> Result<String> {
        let call = ScriptedCall {
            instruction: instruction.to_string(),
            input: input.to_string(),
            context_len: context.len(),
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&call)).await;
        }
        (self.responder)(&call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_records_calls() {
        let capability = ScriptedCapability::echo();
        let out = capability
            .generate("inst", &[Interaction::user("x")], "hello")
            .await
            .unwrap();
        assert_eq!(out, "hello");
        assert_eq!(
            capability.calls(),
            vec![ScriptedCall {
                instruction: "inst".into(),
                input: "hello".into(),
                context_len: 1,
            }]
        );
    }
}
