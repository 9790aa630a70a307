use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::message::Role;

/// Why the model stopped generating. Providers map their wire values onto
/// this closed set; anything unrecognized becomes `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl FinishReason {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

/// Token accounting reported by a provider, or estimated when it reports none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One model response as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            usage: None,
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One `<TOOL>` directive extracted from model output. `tool` is a registered
/// name or alias; `input` is untrusted until validated against the resolved
/// capability's input contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub input: Value,
}

/// Result of one dispatched call. `index` correlates the outcome to its
/// originating ToolCall within the response, since the same tool may be
/// called several times in one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub index: usize,
    pub tool: String,
    pub result: CallResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallResult {
    Success { output: Value },
    Error { kind: String, message: String },
}

impl ToolOutcome {
    pub fn success(index: usize, tool: &str, output: Value) -> Self {
        Self { index, tool: tool.to_string(), result: CallResult::Success { output } }
    }

    pub fn failure(index: usize, tool: &str, error: &Error) -> Self {
        Self {
            index,
            tool: tool.to_string(),
            result: CallResult::Error {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, CallResult::Error { .. })
    }

    /// Default rendering used for the tool-role conversation message.
    pub fn render(&self) -> String {
        match &self.result {
            CallResult::Success { output } => {
                format!("Tool '{}' result: {}", self.tool, output)
            }
            CallResult::Error { kind, message } => {
                format!("Tool '{}' error ({}): {}", self.tool, kind, message)
            }
        }
    }
}
