//! Scripted provider for tests and offline runs.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use std::time::Duration;

use reagent_core::error::Result;
use reagent_core::message::Message;
use reagent_core::types::{LlmResponse, TokenUsage};

use crate::{estimate_conversation_tokens, estimate_tokens, structured_via_instruction, Provider};

/// Plays back a fixed script of responses in order, repeating the last one
/// once the script runs out. Records every conversation it is handed so tests
/// can assert on what the runtime actually sent.
pub struct MockProvider {
    responses: Vec<String>,
    cursor: Mutex<usize>,
    requests: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
    fabricate_structured: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            cursor: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
            fabricate_structured: false,
        }
    }

    /// Adds a fixed latency before each response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Structured requests skip the script and fabricate a value that
    /// conforms to the requested schema.
    pub fn with_fabricated_structured(mut self) -> Self {
        self.fabricate_structured = true;
        self
    }

    /// Conversations seen so far, one entry per `complete` call.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    pub fn calls(&self) -> usize {
        *self.cursor.lock().expect("cursor lock poisoned")
    }

    fn next_response(&self) -> String {
        let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
        let index = (*cursor).min(self.responses.len().saturating_sub(1));
        *cursor += 1;
        self.responses.get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse> {
        self.requests.lock().expect("requests lock poisoned").push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.next_response();
        let prompt_tokens = estimate_conversation_tokens(messages);
        let completion_tokens = estimate_tokens(&content);
        Ok(LlmResponse::assistant(&content).with_usage(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }))
    }

    async fn complete_structured(&self, messages: &[Message], response_schema: &Value) -> Result<Value> {
        if self.fabricate_structured {
            self.requests.lock().expect("requests lock poisoned").push(messages.to_vec());
            return Ok(fabricate(response_schema));
        }
        structured_via_instruction(self, messages, response_schema).await
    }
}

/// Builds a value that satisfies a structural schema, placeholder by type.
fn fabricate(schema: &Value) -> Value {
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(head) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return head.clone();
    }
    match schema.get("type").and_then(Value::as_str) {
        Some("object") | None => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    let mut value = fabricate(property);
                    if value == json!("mock_value") {
                        value = json!(format!("mock_{name}_value"));
                    }
                    object.insert(name.clone(), value);
                }
            }
            Value::Object(object)
        }
        Some("string") => json!("mock_value"),
        Some("integer") => json!(42),
        Some("number") => json!(42.0),
        Some("boolean") => json!(true),
        Some("array") => {
            let item = schema.get("items").map(fabricate).unwrap_or(json!("mock_item"));
            json!([item])
        }
        _ => Value::Null,
    }
}
