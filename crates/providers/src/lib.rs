//! Model-provider boundary.
//!
//! The runtime talks to language models only through [`Provider`]; everything
//! vendor-specific (endpoints, auth headers, wire shapes, role quirks) lives
//! behind it. Conversations are always submitted whole; providers keep no
//! per-conversation state.

pub mod anthropic;
pub mod mock;
pub mod openrouter;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use reagent_core::error::{Error, Result};
use reagent_core::message::Message;
use reagent_core::registry::{self, ComponentInfo};
use reagent_core::schema;
use reagent_core::types::LlmResponse;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use mock::MockProvider;
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Model identifier this instance is bound to.
    fn model(&self) -> &str;

    /// Submits the full conversation and returns one assistant response.
    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse>;

    /// Streams the response in chunks. The default adapter wraps `complete`
    /// in a single-chunk stream so non-streaming providers satisfy streaming
    /// callers unchanged.
    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.complete(messages).await?;
        Ok(futures::stream::once(async move { Ok(response.content) }).boxed())
    }

    /// Requests a response conforming to `response_schema` and returns the
    /// parsed, validated value. The default strategy instructs the model via
    /// an appended message and validates what comes back; providers with
    /// native structured output may override.
    async fn complete_structured(
        &self,
        messages: &[Message],
        response_schema: &Value,
    ) -> Result<Value> {
        structured_via_instruction(self, messages, response_schema).await
    }
}

/// Instruct-and-validate strategy behind the default `complete_structured`:
/// append a schema instruction, parse the reply, validate it.
pub async fn structured_via_instruction<P>(
    provider: &P,
    messages: &[Message],
    response_schema: &Value,
) -> Result<Value>
where
    P: Provider + ?Sized,
{
    let mut augmented = messages.to_vec();
    augmented.push(Message::user(&schema_instruction(response_schema)));

    let response = provider.complete(&augmented).await?;
    let body = strip_code_fences(&response.content);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::Provider(format!("structured response is not valid JSON: {e}")))?;

    let violations = schema::validate(&value, response_schema);
    if !violations.is_empty() {
        return Err(Error::Provider(format!(
            "structured response does not match the requested schema: {}",
            schema::describe(&violations)
        )));
    }
    Ok(value)
}

fn schema_instruction(response_schema: &Value) -> String {
    format!(
        "Respond with a single JSON object that conforms to this schema. \
         Output only the JSON object, no prose and no code fences.\n\n{}",
        serde_json::to_string_pretty(response_schema).unwrap_or_else(|_| "{}".to_string())
    )
}

/// Removes a surrounding markdown code fence if the model added one anyway.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Rough token estimate for one text: four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64) / 4
}

/// Rough token estimate for a conversation: per-message text plus a flat
/// overhead for message framing.
pub fn estimate_conversation_tokens(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|message| estimate_tokens(&message.content) + 10)
        .sum()
}

/// Registers the built-in provider types in the process-wide catalog.
pub fn register_builtin_providers() -> Result<()> {
    registry::register(
        ComponentInfo::provider("OpenRouterProvider", "OpenRouter chat-completions API")
            .with_config("OpenRouterConfig"),
    )?;
    registry::register(
        ComponentInfo::provider("AnthropicProvider", "Anthropic messages API")
            .with_config("AnthropicConfig"),
    )?;
    registry::register(ComponentInfo::provider(
        "MockProvider",
        "Scripted responses for tests and offline runs",
    ))?;
    Ok(())
}
