//! System-prompt rendering.
//!
//! Rendering is a pure function over (template, task, capability list); the
//! runtime re-renders every iteration so capability changes become visible to
//! the model on its next turn. Nothing here touches runtime state.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use reagent_core::error::{Error, Result};
use reagent_tools::{example_input, Tool};

pub const DEFAULT_SYSTEM_PROMPT_TEMPLATE: &str = r#"You are an autonomous agent. Work through the task below step by step, using the available tools to gather whatever you cannot determine yourself.

# Task
{{ task_description }}

{{ tools_documentation }}

# Calling tools
To invoke a tool, emit a block of this exact form anywhere in your response:
<TOOL>
{"tool": "<alias>", "input": { ... }}
</TOOL>
You may emit several blocks in one response; they run concurrently. After emitting tool calls, stop and wait for their results. Never fabricate a tool result.

# Recording results
When you have a finding that answers the task, record it as:
<RESULT>
{ ... }
</RESULT>
{% if result_schema %}Every result must conform to this schema:
```json
{{ result_schema }}
```
{% endif %}
# Finishing
When the task is fully answered and every result is recorded, include the literal marker {{ completion_sentinel }} in your response."#;

/// Variables the template is rendered against.
#[derive(Debug, Serialize)]
pub struct PromptVars {
    pub task_description: String,
    pub tools_documentation: String,
    /// Pretty-printed result schema, absent when results are unconstrained.
    pub result_schema: Option<String>,
    pub completion_sentinel: String,
}

impl PromptVars {
    pub fn new(
        task_description: &str,
        tools: &[Arc<dyn Tool>],
        result_schema: Option<&Value>,
        completion_sentinel: &str,
    ) -> Self {
        Self {
            task_description: task_description.to_string(),
            tools_documentation: tools_documentation(tools),
            result_schema: result_schema
                .map(|schema| serde_json::to_string_pretty(schema).unwrap_or_default()),
            completion_sentinel: completion_sentinel.to_string(),
        }
    }
}

/// Renders the system prompt. Undefined variables are an error, not silent
/// empties, so a typo in a custom template surfaces immediately.
pub fn render_system_prompt(template: &str, vars: &PromptVars) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("system_prompt", template)
        .map_err(|e| Error::Config(format!("invalid system prompt template: {e}")))?;

    let output = env
        .get_template("system_prompt")
        .map_err(|e| Error::Config(format!("invalid system prompt template: {e}")))?
        .render(vars)
        .map_err(|e| Error::Config(format!("system prompt rendering failed: {e}")))?;

    let normalized = output.replace("\r\n", "\n");
    Ok(normalized.trim().to_string())
}

/// Builds the capability documentation block: identity, descriptions, a
/// ready-to-copy usage example derived from the input contract, and the
/// contract itself.
pub fn tools_documentation(tools: &[Arc<dyn Tool>]) -> String {
    if tools.is_empty() {
        return "No tools are currently available.".to_string();
    }

    let mut docs = String::from("## Available Tools\n\nYou have access to the following tools:\n");
    for tool in tools {
        let spec = tool.spec();
        let example = example_input(&spec.input_schema);
        let usage = serde_json::to_string_pretty(&serde_json::json!({
            "tool": tool.alias(),
            "input": example,
        }))
        .unwrap_or_default();
        let input_schema = serde_json::to_string_pretty(&spec.input_schema).unwrap_or_default();
        let required = spec
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|joined| !joined.is_empty())
            .unwrap_or_else(|| "None".to_string());

        docs.push_str(&format!(
            "\n### Tool: {alias}\n\
             **Name**: {name}\n\
             **Description**: {long}\n\n\
             **Usage**:\n```\n<TOOL>\n{usage}\n</TOOL>\n```\n\n\
             **Input Schema**:\n```json\n{input_schema}\n```\n\n\
             **Required Fields**: {required}\n\
             **Output**: {short}\n",
            alias = tool.alias(),
            name = spec.name,
            long = spec.long_description,
            usage = usage,
            input_schema = input_schema,
            required = required,
            short = spec.short_description,
        ));
    }
    docs
}
