//! OpenRouter provider, speaking the OpenAI-style chat-completions wire.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use reagent_core::error::{Error, Result};
use reagent_core::message::{Message, Role};
use reagent_core::types::{FinishReason, LlmResponse, TokenUsage};

use crate::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional attribution headers OpenRouter uses for rankings.
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Maps conversation turns onto the wire. The chat-completions API has no
    /// tool role for free-text outcomes, so tool turns are downgraded to user
    /// turns here; the conversation itself keeps the real role.
    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|message| WireMessage {
                role: match message.role {
                    Role::Tool => "user",
                    other => other.as_str(),
                },
                content: message.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::wire_messages(messages),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        info!(url = %url, model = %self.config.model, messages_count = messages.len(), "Calling model");

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {e}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Model API error");
            return Err(Error::Provider(format!("API error {status}: {raw_body}")));
        }
        debug!(body_len = raw_body.len(), "Model response received");

        let parsed: ChatResponse = serde_json::from_str(&raw_body)
            .map_err(|e| Error::Provider(format!("Failed to parse response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let mut result = LlmResponse::assistant(&choice.message.content.unwrap_or_default());
        result.finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or(FinishReason::Stop);
        if let Some(usage) = parsed.usage {
            result = result.with_usage(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }
        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
