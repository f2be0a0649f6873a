//! OpenRouter chat-completions capability.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use scholarflow_shared::{
    AppConfig, Interaction, InteractionRole, OpenRouterConfig, Result, ScholarflowError,
    validate_api_key,
};

use super::GenerationCapability;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Calls `{base_url}/chat/completions` with the instruction as the system
/// message, the identity's history, then the step input as the final user turn.
#[derive(Debug, Clone)]
pub struct OpenRouterCapability {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterCapability {
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScholarflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.default_model.clone(),
        })
    }

    /// Read the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        validate_api_key(config)?;
        let api_key = std::env::var(&config.openrouter.api_key_env).unwrap_or_default();
        Self::new(&config.openrouter, api_key)
    }

    /// Use a different model than the configured default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationCapability for OpenRouterCapability {
    fn name(&self) -> &str {
        "openrouter"
    }

    #[instrument(skip_all, fields(model = %self.model, history = context.len()))]
    async fn generate(
        &self,
        instruction: &str,
        context: &[Interaction],
        input: &str,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: instruction,
        });
        messages.extend(context.iter().map(|interaction| ChatMessage {
            role: match interaction.role {
                InteractionRole::User => "user",
                InteractionRole::Assistant => "assistant",
            },
            content: &interaction.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: input,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScholarflowError::Network(format!("OpenRouter request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScholarflowError::Network(format!(
                "OpenRouter returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScholarflowError::parse(format!("invalid OpenRouter response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ScholarflowError::parse("OpenRouter returned no choices"))?;

        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }
}
