//! Anthropic provider, speaking the messages API.
//!
//! The messages API takes the system prompt as a top-level field rather than
//! a conversation turn, and returns content as a list of blocks.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use reagent_core::error::{Error, Result};
use reagent_core::message::{Message, Role};
use reagent_core::types::{FinishReason, LlmResponse, TokenUsage};

use crate::Provider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Splits the conversation into the top-level system string and the wire
    /// turn list. Tool turns become user turns; consecutive system turns are
    /// concatenated.
    fn wire_parts(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                Role::Assistant => turns.push(WireMessage {
                    role: "assistant",
                    content: message.content.clone(),
                }),
                Role::User | Role::Tool => turns.push(WireMessage {
                    role: "user",
                    content: message.content.clone(),
                }),
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.config.api_base.trim_end_matches('/'));
        let (system, turns) = Self::wire_parts(messages);
        let request = MessagesRequest {
            model: self.config.model.clone(),
            system,
            messages: turns,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        info!(url = %url, model = %self.config.model, messages_count = messages.len(), "Calling model");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
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

        let parsed: MessagesResponse = serde_json::from_str(&raw_body)
            .map_err(|e| Error::Provider(format!("Failed to parse response: {e}")))?;
        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let mut result = LlmResponse::assistant(&content);
        result.finish_reason = parsed
            .stop_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or(FinishReason::Stop);
        if let Some(usage) = parsed.usage {
            let total = usage.input_tokens + usage.output_tokens;
            result = result.with_usage(TokenUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: total,
            });
        }
        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
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
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
