//! Capability contract and built-in capabilities.
//!
//! Every capability implements [`Tool`]: a stable identity, an immutable
//! configuration fixed at construction, declared input/output contracts, and
//! an `execute` operation that is safe to invoke concurrently. The runtime
//! never calls `execute` directly; it goes through [`checked_execute`], which
//! enforces the validation order of the contract (input before execution,
//! output after).

pub mod calculator;
pub mod record_check;
pub mod web_search;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use reagent_core::error::{Error, Result};
use reagent_core::registry::{self, ComponentInfo};
use reagent_core::schema;

pub use calculator::{CalculatorConfig, CalculatorTool};
pub use record_check::{RecordCheckConfig, RecordCheckTool};
pub use web_search::{SearchEngine, WebSearchConfig, WebSearchTool};

/// Identity and declared contracts of one capability type, as rendered into
/// prompts and validated at the call boundary.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Registered name, also the default alias.
    pub name: &'static str,
    pub short_description: &'static str,
    pub long_description: &'static str,
    /// Structural contract the call input must satisfy.
    pub input_schema: Value,
    /// Structural contract the execution output must satisfy.
    pub output_schema: Value,
}

/// The polymorphic capability interface.
///
/// Implementations hold no hidden shared mutable state: the runtime invokes
/// several capabilities in parallel within one iteration, and the same
/// instance may be invoked repeatedly. Configuration is fixed at
/// construction; reconfiguring means replacing the instance.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Instance identity within one runtime. Defaults to the registered name;
    /// construction may override it so several differently-configured
    /// instances of one type can coexist.
    fn alias(&self) -> &str {
        self.spec().name
    }

    /// Runs the capability against already-validated input. Operational
    /// failures are returned as [`Error::Execution`], never smuggled out as
    /// an empty or partial output.
    async fn execute(&self, input: Value) -> Result<Value>;
}

/// Validates input, executes, validates output. This is the only path the
/// runtime uses to invoke a capability; each failure category maps to its own
/// error so the outcome recorded in the conversation names what went wrong.
pub async fn checked_execute(tool: &dyn Tool, input: Value) -> Result<Value> {
    let spec = tool.spec();

    let input_violations = schema::validate(&input, &spec.input_schema);
    if !input_violations.is_empty() {
        return Err(Error::InputValidation(format!(
            "input for '{}' does not match its contract: {}",
            tool.alias(),
            schema::describe(&input_violations)
        )));
    }

    let output = tool.execute(input).await?;

    let output_violations = schema::validate(&output, &spec.output_schema);
    if !output_violations.is_empty() {
        // The capability produced it, so the capability is presumed buggy.
        return Err(Error::OutputValidation(format!(
            "output of '{}' does not match its contract: {}",
            tool.alias(),
            schema::describe(&output_violations)
        )));
    }

    Ok(output)
}

/// Derives an example invocation input from an input contract: declared
/// defaults and enum heads first, then type-appropriate placeholders. Used
/// when rendering capability documentation into the system prompt.
pub fn example_input(input_schema: &Value) -> Value {
    let mut example = Map::new();
    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(example);
    };
    let required: Vec<&str> = input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, field) in properties {
        let value = if let Some(default) = field.get("default") {
            default.clone()
        } else if let Some(head) = field.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
            head.clone()
        } else {
            match field.get("type").and_then(Value::as_str) {
                Some("string") => {
                    if field.get("format").and_then(Value::as_str) == Some("uri") {
                        json!("https://example.com")
                    } else {
                        json!(format!("example_{name}"))
                    }
                }
                Some("integer") => json!(10),
                Some("number") => json!(10.0),
                Some("boolean") => json!(true),
                Some("array") => {
                    match field.get("items").and_then(|i| i.get("type")).and_then(Value::as_str) {
                        Some("string") | None => json!(["item1", "item2"]),
                        _ => json!([]),
                    }
                }
                Some("object") => json!({}),
                _ => {
                    if required.contains(&name.as_str()) {
                        json!(format!("<{name}>"))
                    } else {
                        continue;
                    }
                }
            }
        };
        example.insert(name.clone(), value);
    }

    Value::Object(example)
}

/// Registers the built-in capability types in the process-wide catalog.
/// Explicit call during process setup; registering twice is an error.
pub fn register_builtin_tools() -> Result<()> {
    registry::register(
        ComponentInfo::capability("CalculatorTool", "Evaluates mathematical expressions")
            .with_contracts("CalculatorConfig", "CalculatorInput", "CalculatorOutput"),
    )?;
    registry::register(
        ComponentInfo::capability("WebSearchTool", "Searches the web for information")
            .with_contracts("WebSearchConfig", "WebSearchInput", "WebSearchOutput"),
    )?;
    registry::register(
        ComponentInfo::capability("RecordCheckTool", "Validates records against a schema")
            .with_contracts("RecordCheckConfig", "RecordCheckInput", "RecordCheckOutput"),
    )?;
    Ok(())
}

/// Converts a derived contract document into a plain `Value` schema.
pub(crate) fn schema_value(schema: schemars::schema::RootSchema) -> Value {
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "upper",
                short_description: "Uppercases text",
                long_description: "Uppercases the given text.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let text = input["text"].as_str().unwrap_or_default();
            Ok(json!({"text": text.to_uppercase()}))
        }
    }

    struct BrokenOutputTool;

    #[async_trait]
    impl Tool for BrokenOutputTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "broken",
                short_description: "Violates its own output contract",
                long_description: "Always returns output missing a required field.",
                input_schema: json!({"type": "object"}),
                output_schema: json!({
                    "type": "object",
                    "properties": {"value": {"type": "integer"}},
                    "required": ["value"]
                }),
            }
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_checked_execute_happy_path() {
        let output = checked_execute(&UpperTool, json!({"text": "ok"})).await.unwrap();
        assert_eq!(output, json!({"text": "OK"}));
    }

    #[tokio::test]
    async fn test_checked_execute_rejects_bad_input_before_running() {
        let err = checked_execute(&UpperTool, json!({"text": 5})).await.unwrap_err();
        assert!(matches!(err, Error::InputValidation(_)));
        assert!(err.to_string().contains("'upper'"));
    }

    #[tokio::test]
    async fn test_checked_execute_flags_contract_breaking_output() {
        let err = checked_execute(&BrokenOutputTool, json!({})).await.unwrap_err();
        assert!(matches!(err, Error::OutputValidation(_)));
    }

    #[test]
    fn test_example_input_prefers_defaults_and_enum_heads() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "default": 5},
                "mode": {"type": "string", "enum": ["fast", "thorough"]},
                "url": {"type": "string", "format": "uri"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "strict": {"type": "boolean"}
            },
            "required": ["query"]
        });
        let example = example_input(&schema);
        assert_eq!(example["query"], "example_query");
        assert_eq!(example["max_results"], 5);
        assert_eq!(example["mode"], "fast");
        assert_eq!(example["url"], "https://example.com");
        assert_eq!(example["tags"], json!(["item1", "item2"]));
        assert_eq!(example["strict"], true);
    }

    #[test]
    fn test_example_input_without_properties_is_empty_object() {
        assert_eq!(example_input(&json!({"type": "object"})), json!({}));
    }

    #[test]
    fn test_default_alias_is_registered_name() {
        assert_eq!(UpperTool.alias(), "upper");
    }
}
