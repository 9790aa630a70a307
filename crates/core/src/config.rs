use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Configuration surface of one runtime instance. Serializable so embedding
/// collaborators can load it from their own sources; the core does no file
/// I/O itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// System-prompt template. `None` selects the built-in default template.
    #[serde(default)]
    pub system_prompt_template: Option<String>,
    /// Schema a `<RESULT>` payload must satisfy to be retained. `None`
    /// retains every object payload.
    #[serde(default)]
    pub result_schema: Option<Value>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Timeout for one model call. Expiry ends the whole run.
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,
    /// Timeout for one capability invocation. Expiry is isolated to that call.
    #[serde(default = "default_tool_call_timeout_secs")]
    pub tool_call_timeout_secs: u64,
    /// Overall wall-clock budget for one run.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    /// Upper bound on concurrently executing tool calls within one iteration.
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    /// Literal marker whose presence in a response signals intent to finish.
    #[serde(default = "default_completion_sentinel")]
    pub completion_sentinel: String,
}

fn default_max_iterations() -> u32 {
    50
}

fn default_iteration_timeout_secs() -> u64 {
    120
}

fn default_tool_call_timeout_secs() -> u64 {
    60
}

fn default_run_deadline_secs() -> u64 {
    300
}

fn default_token_budget() -> u64 {
    100_000
}

fn default_max_parallel_tools() -> usize {
    5
}

fn default_completion_sentinel() -> String {
    "TASK_COMPLETE".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_prompt_template: None,
            result_schema: None,
            max_iterations: default_max_iterations(),
            iteration_timeout_secs: default_iteration_timeout_secs(),
            tool_call_timeout_secs: default_tool_call_timeout_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            token_budget: default_token_budget(),
            max_parallel_tools: default_max_parallel_tools(),
            completion_sentinel: default_completion_sentinel(),
        }
    }
}

impl RuntimeConfig {
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}
