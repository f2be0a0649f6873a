//! Opaque text-generation capabilities behind generation steps.
//!
//! - [`openrouter`]: OpenRouter chat completions over HTTP
//! - [`bridge`]: JSON-lines subprocess speaking the generation protocol
//! - `scripted`: deterministic in-process responder (tests only)

pub mod bridge;
pub mod openrouter;
#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use async_trait::async_trait;

use scholarflow_shared::{AppConfig, Interaction, Result};

pub use bridge::BridgeCapability;
pub use openrouter::OpenRouterCapability;
#[cfg(test)]
pub(crate) use scripted::{ScriptedCall, ScriptedCapability};

/// Text in, text out. Retry, backoff and timeouts belong to implementations.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Produce text for `input` under `instruction`, with prior interactions
    /// of the calling identity as context (oldest first).
    async fn generate(
        &self,
        instruction: &str,
        context: &[Interaction],
        input: &str,
    ) -> Result<String>;
}

/// Build the capability selected by configuration: the subprocess bridge when
/// `[bridge]` is set, otherwise OpenRouter.
pub async fn from_config(config: &AppConfig) -> Result<Arc<dyn GenerationCapability>> {
    match &config.bridge {
        Some(bridge) => Ok(Arc::new(BridgeCapability::spawn(bridge).await?)),
        None => Ok(Arc::new(OpenRouterCapability::from_config(config)?)),
    }
}
