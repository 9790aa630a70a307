//! The agent runtime: a ReAct loop over one conversation.
//!
//! One `AgentRuntime` owns one conversation, one capability table and one
//! result set. The loop is cooperative: exactly one iteration executes at a
//! time and state mutates only between suspension points. Tool dispatch is
//! the single place with real parallelism and it is a join barrier, never a
//! race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reagent_core::config::RuntimeConfig;
use reagent_core::error::{Error, Result};
use reagent_core::message::Message;
use reagent_core::parser::{self, ParseDiagnostic};
use reagent_core::schema;
use reagent_core::types::{TokenUsage, ToolCall, ToolOutcome};
use reagent_providers::{estimate_conversation_tokens, estimate_tokens, Provider};
use reagent_tools::{checked_execute, Tool};

use crate::prompt::{render_system_prompt, PromptVars, DEFAULT_SYSTEM_PROMPT_TEMPLATE};

/// Loop lifecycle. The three right-hand states are terminal; no iteration
/// occurs once one is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Running,
    Complete,
    Failed,
    TimedOut,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed | RunState::TimedOut)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunState::Init => "INIT",
            RunState::Running => "RUNNING",
            RunState::Complete => "COMPLETE",
            RunState::Failed => "FAILED",
            RunState::TimedOut => "TIMED_OUT",
        };
        f.write_str(label)
    }
}

/// What a finished run hands back to the embedding collaborator: always a
/// terminal state plus whatever was accumulated, never a crash.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub results: Vec<Value>,
    pub iterations: u32,
    pub usage: TokenUsage,
}

/// Point-in-time snapshot of one runtime instance.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub id: Uuid,
    pub state: RunState,
    pub iteration: u32,
    pub conversation_len: usize,
    pub result_count: usize,
    pub aliases: Vec<String>,
    pub usage: TokenUsage,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<f64>,
}

pub type CompletionPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
pub type ResultProcessor = Box<dyn Fn(Value) -> Option<Value> + Send + Sync>;
pub type ErrorFormatter = Box<dyn Fn(&ToolOutcome) -> String + Send + Sync>;

pub struct AgentRuntime {
    id: Uuid,
    config: RuntimeConfig,
    provider: Arc<dyn Provider>,
    tools: HashMap<String, Arc<dyn Tool>>,
    task: String,
    /// User/assistant/tool turns only; the system message is rendered fresh
    /// and prepended each iteration.
    transcript: Vec<Message>,
    results: Vec<Value>,
    iteration: u32,
    state: RunState,
    usage: TokenUsage,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    completion_predicate: Option<CompletionPredicate>,
    result_processor: Option<ResultProcessor>,
    error_formatter: Option<ErrorFormatter>,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn Provider>, config: RuntimeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            provider,
            tools: HashMap::new(),
            task: String::new(),
            transcript: Vec::new(),
            results: Vec::new(),
            iteration: 0,
            state: RunState::Init,
            usage: TokenUsage::default(),
            started_at: None,
            started_instant: None,
            completion_predicate: None,
            result_processor: None,
            error_formatter: None,
        }
    }

    /// Replaces the sentinel check with a custom completion signal.
    pub fn with_completion_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.completion_predicate = Some(Box::new(predicate));
        self
    }

    /// Maps each conformant result record before insertion; returning `None`
    /// rejects the record.
    pub fn with_result_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.result_processor = Some(Box::new(processor));
        self
    }

    /// Overrides how per-call errors are rendered into the conversation.
    pub fn with_error_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&ToolOutcome) -> String + Send + Sync + 'static,
    {
        self.error_formatter = Some(Box::new(formatter));
        self
    }

    // ---- capability table -------------------------------------------------

    /// Registers a capability under its own alias. Duplicate aliases are
    /// rejected, never silently replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let alias = tool.alias().to_string();
        if self.tools.contains_key(&alias) {
            return Err(Error::Registry(format!("alias '{alias}' is already registered")));
        }
        info!(alias = %alias, tool = %tool.spec().name, "Registered capability");
        self.tools.insert(alias, tool);
        Ok(())
    }

    /// Registers a batch atomically: a duplicate alias anywhere in the batch
    /// (against the table or within the batch) rejects the whole batch.
    pub fn register_many(&mut self, tools: Vec<Arc<dyn Tool>>) -> Result<()> {
        let mut incoming = Vec::with_capacity(tools.len());
        for tool in &tools {
            let alias = tool.alias().to_string();
            if self.tools.contains_key(&alias) || incoming.contains(&alias) {
                return Err(Error::Registry(format!(
                    "alias '{alias}' is already registered; batch rejected"
                )));
            }
            incoming.push(alias);
        }
        for (alias, tool) in incoming.into_iter().zip(tools) {
            info!(alias = %alias, tool = %tool.spec().name, "Registered capability");
            self.tools.insert(alias, tool);
        }
        Ok(())
    }

    pub fn unregister(&mut self, alias: &str) -> Result<()> {
        if self.tools.remove(alias).is_none() {
            return Err(Error::CapabilityNotFound(alias.to_string()));
        }
        info!(alias = %alias, "Unregistered capability");
        Ok(())
    }

    /// Swaps the instance under an existing alias. Configurations are fixed
    /// at construction, so this is how a capability gets reconfigured.
    pub fn replace(&mut self, alias: &str, tool: Arc<dyn Tool>) -> Result<()> {
        if !self.tools.contains_key(alias) {
            return Err(Error::CapabilityNotFound(alias.to_string()));
        }
        info!(alias = %alias, tool = %tool.spec().name, "Replaced capability");
        self.tools.insert(alias.to_string(), tool);
        Ok(())
    }

    pub fn capability(&self, alias: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(alias).cloned()
    }

    pub fn capability_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.tools.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    // ---- between-run configuration ----------------------------------------

    pub fn set_result_schema(&mut self, result_schema: Option<Value>) {
        self.config.result_schema = result_schema;
    }

    pub fn set_task(&mut self, task: &str) {
        self.task = task.to_string();
    }

    /// Wholesale reset back to the seeded state: conversation reseeded from
    /// the task, results, counters, usage and terminal outcome cleared.
    pub fn reset(&mut self) {
        self.transcript.clear();
        if !self.task.is_empty() {
            self.transcript.push(Message::user(&self.task));
        }
        self.results.clear();
        self.iteration = 0;
        self.usage = TokenUsage::default();
        self.state = RunState::Init;
        self.started_at = None;
        self.started_instant = None;
    }

    // ---- observation ------------------------------------------------------

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn conversation(&self) -> &[Message] {
        &self.transcript
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            id: self.id,
            state: self.state,
            iteration: self.iteration,
            conversation_len: self.transcript.len(),
            result_count: self.results.len(),
            aliases: self.capability_aliases(),
            usage: self.usage,
            started_at: self.started_at,
            elapsed_secs: self.started_instant.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    // ---- the loop ---------------------------------------------------------

    /// Seeds the conversation with `task`, loops to a terminal state, and
    /// reports what was accumulated. A fresh call always starts a fresh run.
    pub async fn run(&mut self, task: &str) -> RunReport {
        self.set_task(task);
        self.reset();
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        // tokio's clock so the deadline tracks virtual time under test.
        let deadline = tokio::time::Instant::now() + self.config.run_deadline();
        info!(id = %self.id, task = %task, "Run started");

        while self.state == RunState::Running {
            self.iteration += 1;
            debug!(iteration = self.iteration, "Iteration started");

            // Prepare: prompt re-rendered every iteration so capability
            // changes are visible on the model's next turn.
            let system = match self.render_prompt() {
                Ok(system) => system,
                Err(err) => {
                    error!(error = %err, "Prompt rendering failed");
                    self.state = RunState::Failed;
                    break;
                }
            };
            let mut outgoing = Vec::with_capacity(self.transcript.len() + 1);
            outgoing.push(Message::system(&system));
            outgoing.extend(self.transcript.iter().cloned());

            // Model call, the loop's single external suspension point.
            let response =
                match tokio::time::timeout(self.config.iteration_timeout(), self.provider.complete(&outgoing))
                    .await
                {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => {
                        error!(error = %err, "Provider failed; run aborted");
                        self.state = RunState::Failed;
                        break;
                    }
                    Err(_) => {
                        warn!(timeout_secs = self.config.iteration_timeout_secs, "Model call timed out");
                        self.state = RunState::TimedOut;
                        break;
                    }
                };

            match response.usage {
                Some(usage) => self.usage.add(&usage),
                None => {
                    let prompt_tokens = estimate_conversation_tokens(&outgoing);
                    let completion_tokens = estimate_tokens(&response.content);
                    self.usage.add(&TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    });
                }
            }

            // Response ingestion.
            let content = response.content;
            self.transcript.push(Message::assistant(&content));
            let extraction = parser::extract_all(&content);

            // Tool dispatch: bounded fan-out, join barrier, outcomes recorded
            // in call order regardless of completion order.
            if !extraction.tool_calls.is_empty() {
                let outcomes = self.dispatch(extraction.tool_calls).await;
                for outcome in &outcomes {
                    let rendered = match (&self.error_formatter, outcome.is_error()) {
                        (Some(formatter), true) => formatter(outcome),
                        _ => outcome.render(),
                    };
                    self.transcript.push(Message::tool(&rendered));
                }
            }

            // Parse diagnostics become corrective feedback, not failures.
            if !extraction.diagnostics.is_empty() {
                let feedback = render_diagnostics(&extraction.diagnostics);
                warn!(count = extraction.diagnostics.len(), "Malformed directives in response");
                self.transcript.push(Message::user(&feedback));
            }

            // Result ingestion.
            for record in extraction.results {
                self.ingest_result(record);
            }

            // Completion check, then budgets. Tool calls found in the same
            // response were already resolved above, so a completion signal is
            // honored immediately.
            let completed = match &self.completion_predicate {
                Some(predicate) => predicate(&content),
                None => content.contains(&self.config.completion_sentinel),
            };
            if completed {
                info!(iterations = self.iteration, results = self.results.len(), "Run complete");
                self.state = RunState::Complete;
                break;
            }
            if self.iteration >= self.config.max_iterations {
                warn!(max_iterations = self.config.max_iterations, "Iteration budget exhausted");
                self.state = RunState::TimedOut;
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(deadline_secs = self.config.run_deadline_secs, "Run deadline exceeded");
                self.state = RunState::TimedOut;
                break;
            }
            if self.usage.total_tokens >= self.config.token_budget {
                warn!(
                    total_tokens = self.usage.total_tokens,
                    token_budget = self.config.token_budget,
                    "Token budget exhausted"
                );
                self.state = RunState::TimedOut;
                break;
            }
        }

        RunReport {
            state: self.state,
            results: self.results.clone(),
            iterations: self.iteration,
            usage: self.usage,
        }
    }

    fn render_prompt(&self) -> Result<String> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.alias().cmp(b.alias()));
        let vars = PromptVars::new(
            &self.task,
            &tools,
            self.config.result_schema.as_ref(),
            &self.config.completion_sentinel,
        );
        let template = self
            .config
            .system_prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT_TEMPLATE);
        render_system_prompt(template, &vars)
    }

    /// Resolves and executes one turn's tool calls. Unknown aliases become
    /// not-found outcomes without spawning; resolved calls run concurrently,
    /// at most `max_parallel_tools` in flight, each under its own timeout.
    async fn dispatch(&self, calls: Vec<ToolCall>) -> Vec<ToolOutcome> {
        let mut join_set: JoinSet<(usize, ToolOutcome)> = JoinSet::new();
        let mut outcomes: Vec<Option<ToolOutcome>> = (0..calls.len()).map(|_| None).collect();
        let names: Vec<String> = calls.iter().map(|call| call.tool.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tools.max(1)));
        let call_timeout = self.config.tool_call_timeout();

        for (index, call) in calls.into_iter().enumerate() {
            let Some(tool) = self.tools.get(&call.tool).cloned() else {
                warn!(tool = %call.tool, "Unknown capability reference");
                outcomes[index] = Some(ToolOutcome::failure(
                    index,
                    &call.tool,
                    &Error::CapabilityNotFound(call.tool.clone()),
                ));
                continue;
            };

            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                debug!(tool = %call.tool, index, "Tool call started");
                let outcome =
                    match tokio::time::timeout(call_timeout, checked_execute(tool.as_ref(), call.input))
                        .await
                    {
                        Ok(Ok(output)) => ToolOutcome::success(index, &call.tool, output),
                        Ok(Err(err)) => ToolOutcome::failure(index, &call.tool, &err),
                        Err(_) => ToolOutcome::failure(
                            index,
                            &call.tool,
                            &Error::Timeout(format!(
                                "tool call '{}' exceeded {}s",
                                call.tool,
                                call_timeout.as_secs()
                            )),
                        ),
                    };
                (index, outcome)
            });
        }

        // Join barrier: every dispatched call produces an outcome before the
        // loop proceeds.
        while let Some(joined) = join_set.join_next().await {
            if let Ok((index, outcome)) = joined {
                outcomes[index] = Some(outcome);
            }
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ToolOutcome::failure(
                        index,
                        &names[index],
                        &Error::Execution("tool task aborted".to_string()),
                    )
                })
            })
            .collect()
    }

    /// Validates, optionally processes, and de-duplicates one RESULT record.
    /// Nonconformant records are dropped with a diagnostic, never fatal.
    fn ingest_result(&mut self, record: Value) {
        if !record.is_object() {
            warn!("Result record dropped: not a structured object");
            return;
        }
        if let Some(result_schema) = &self.config.result_schema {
            let violations = schema::validate(&record, result_schema);
            if !violations.is_empty() {
                warn!(detail = %schema::describe(&violations), "Result record dropped: schema violation");
                return;
            }
        }
        let record = match &self.result_processor {
            Some(processor) => match processor(record) {
                Some(mapped) => mapped,
                None => {
                    debug!("Result record rejected by processor");
                    return;
                }
            },
            None => record,
        };
        // Structural de-duplication across the whole run.
        if self.results.contains(&record) {
            debug!("Duplicate result record collapsed");
            return;
        }
        self.results.push(record);
    }
}

fn render_diagnostics(diagnostics: &[ParseDiagnostic]) -> String {
    let mut feedback =
        String::from("Some directives in your last response could not be parsed:\n");
    for diagnostic in diagnostics {
        feedback.push_str(&format!(
            "- <{}> at byte {}: {}\n",
            diagnostic.tag, diagnostic.offset, diagnostic.message
        ));
    }
    feedback.push_str("Re-emit the corrected tags in your next response.");
    feedback
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reagent_core::types::LlmResponse;
    use reagent_providers::MockProvider;
    use reagent_tools::{CalculatorConfig, CalculatorTool, ToolSpec};
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig { max_iterations: 5, ..Default::default() }
    }

    fn runtime_with(provider: Arc<dyn Provider>, config: RuntimeConfig) -> AgentRuntime {
        let mut runtime = AgentRuntime::new(provider, config);
        runtime
            .register(Arc::new(CalculatorTool::new(CalculatorConfig::default())))
            .unwrap();
        runtime
    }

    struct SleepTool {
        alias: String,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "sleep",
                short_description: "Sleeps for a given number of milliseconds",
                long_description: "Sleeps, then echoes how long it slept.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"ms": {"type": "integer"}},
                    "required": ["ms"]
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {"slept": {"type": "integer"}},
                    "required": ["slept"]
                }),
            }
        }

        fn alias(&self) -> &str {
            &self.alias
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let ms = input["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({"slept": ms}))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "flaky",
                short_description: "Always fails",
                long_description: "Fails with an operational error on every call.",
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            Err(Error::Execution("disk on fire".to_string()))
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl Provider for BrokenProvider {
        fn model(&self) -> &str {
            "broken"
        }

        async fn complete(&self, _messages: &[Message]) -> Result<LlmResponse> {
            Err(Error::Provider("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_max_iterations_exhaustion_is_timed_out() {
        let provider = Arc::new(MockProvider::new(vec!["still thinking".to_string()]));
        let mut runtime = runtime_with(
            provider.clone(),
            RuntimeConfig { max_iterations: 3, ..Default::default() },
        );

        let report = runtime.run("never finishes").await;
        assert_eq!(report.state, RunState::TimedOut);
        assert_eq!(report.iterations, 3);
        assert_eq!(provider.calls(), 3);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_calculator_run() {
        let provider = Arc::new(MockProvider::new(vec![
            "I'll compute it.\n<TOOL>{\"tool\": \"calculator\", \"input\": {\"expression\": \"2+2\"}}</TOOL>"
                .to_string(),
            "<RESULT>{\"answer\": 4}</RESULT> TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = runtime_with(provider.clone(), test_config());
        runtime.set_result_schema(Some(json!({
            "type": "object",
            "properties": {"answer": {"type": "integer"}},
            "required": ["answer"]
        })));

        let report = runtime.run("compute 2+2").await;
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.results, vec![json!({"answer": 4})]);
        assert_eq!(report.iterations, 2);

        // The tool outcome was fed back before the second model call.
        let second_request = &provider.requests()[1];
        assert!(second_request
            .iter()
            .any(|m| m.content.contains("Tool 'calculator' result:") && m.content.contains("\"4")));
    }

    #[tokio::test]
    async fn test_tool_execution_error_does_not_fail_the_run() {
        let provider = Arc::new(MockProvider::new(vec![
            "<TOOL>{\"tool\": \"flaky\", \"input\": {}}</TOOL>".to_string(),
            "giving up politely. TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = AgentRuntime::new(provider.clone(), test_config());
        runtime.register(Arc::new(FailTool)).unwrap();

        let report = runtime.run("use the flaky tool").await;
        assert_eq!(report.state, RunState::Complete);
        let second_request = &provider.requests()[1];
        assert!(second_request
            .iter()
            .any(|m| m.content.contains("execution_error") && m.content.contains("disk on fire")));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_not_found_outcome() {
        let provider = Arc::new(MockProvider::new(vec![
            "<TOOL>{\"tool\": \"teleporter\", \"input\": {}}</TOOL>".to_string(),
            "TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = runtime_with(provider.clone(), test_config());

        let report = runtime.run("teleport").await;
        assert_eq!(report.state, RunState::Complete);
        let second_request = &provider.requests()[1];
        assert!(second_request
            .iter()
            .any(|m| m.content.contains("capability_not_found") && m.content.contains("teleporter")));
    }

    #[tokio::test]
    async fn test_provider_error_fails_the_run() {
        let mut runtime = runtime_with(Arc::new(BrokenProvider), test_config());
        let report = runtime.run("anything").await;
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.iterations, 1);
        assert!(report.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_recorded_in_call_order() {
        // Three calls to the same capability; the first sleeps longest so
        // completion order is the reverse of call order.
        let provider = Arc::new(MockProvider::new(vec![
            concat!(
                "<TOOL>{\"tool\": \"sleep\", \"input\": {\"ms\": 300}}</TOOL>",
                "<TOOL>{\"tool\": \"sleep\", \"input\": {\"ms\": 200}}</TOOL>",
                "<TOOL>{\"tool\": \"sleep\", \"input\": {\"ms\": 100}}</TOOL>"
            )
            .to_string(),
            "TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = AgentRuntime::new(provider.clone(), test_config());
        runtime.register(Arc::new(SleepTool { alias: "sleep".to_string() })).unwrap();

        let report = runtime.run("sleep three times").await;
        assert_eq!(report.state, RunState::Complete);

        let tool_messages: Vec<&str> = runtime
            .conversation()
            .iter()
            .filter(|m| m.role == reagent_core::message::Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_messages.len(), 3);
        assert!(tool_messages[0].contains("\"slept\":300"));
        assert!(tool_messages[1].contains("\"slept\":200"));
        assert!(tool_messages[2].contains("\"slept\":100"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout_is_isolated() {
        let provider = Arc::new(MockProvider::new(vec![
            concat!(
                "<TOOL>{\"tool\": \"sleep\", \"input\": {\"ms\": 5000}}</TOOL>",
                "<TOOL>{\"tool\": \"sleep\", \"input\": {\"ms\": 10}}</TOOL>"
            )
            .to_string(),
            "TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = AgentRuntime::new(
            provider.clone(),
            RuntimeConfig { tool_call_timeout_secs: 1, max_iterations: 5, ..Default::default() },
        );
        runtime.register(Arc::new(SleepTool { alias: "sleep".to_string() })).unwrap();

        let report = runtime.run("one slow, one fast").await;
        assert_eq!(report.state, RunState::Complete);

        let second_request = &provider.requests()[1];
        let contents: Vec<&str> = second_request.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.iter().any(|c| c.contains("timeout") && c.contains("exceeded 1s")));
        assert!(contents.iter().any(|c| c.contains("\"slept\":10")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_call_timeout_is_timed_out() {
        let provider = Arc::new(
            MockProvider::new(vec!["never arrives".to_string()]).with_delay(Duration::from_secs(10)),
        );
        let mut runtime = runtime_with(
            provider,
            RuntimeConfig { iteration_timeout_secs: 1, ..Default::default() },
        );

        let report = runtime.run("slow model").await;
        assert_eq!(report.state, RunState::TimedOut);
        assert_eq!(report.iterations, 1);
        assert!(report.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_preserves_accumulated_results() {
        // Each model call takes 60s of virtual time against a 90s deadline:
        // the run ends TIMED_OUT after the second iteration with the first
        // iteration's result intact.
        let provider = Arc::new(
            MockProvider::new(vec![
                "<RESULT>{\"answer\": 4}</RESULT>".to_string(),
                "still working".to_string(),
            ])
            .with_delay(Duration::from_secs(60)),
        );
        let mut runtime = runtime_with(
            provider,
            RuntimeConfig { run_deadline_secs: 90, max_iterations: 50, ..Default::default() },
        );

        let report = runtime.run("answers").await;
        assert_eq!(report.state, RunState::TimedOut);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.results, vec![json!({"answer": 4})]);
    }

    #[tokio::test]
    async fn test_duplicate_results_collapse_across_iterations() {
        let provider = Arc::new(MockProvider::new(vec![
            "<RESULT>{\"answer\": 4}</RESULT>".to_string(),
            "<RESULT>{\"answer\": 4}</RESULT><RESULT>{\"answer\": 5}</RESULT> TASK_COMPLETE"
                .to_string(),
        ]));
        let mut runtime = runtime_with(provider, test_config());

        let report = runtime.run("answers").await;
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.results, vec![json!({"answer": 4}), json!({"answer": 5})]);
    }

    #[tokio::test]
    async fn test_nonconformant_results_are_dropped() {
        let provider = Arc::new(MockProvider::new(vec![
            "<RESULT>{\"answer\": \"four\"}</RESULT><RESULT>{\"answer\": 4}</RESULT> TASK_COMPLETE"
                .to_string(),
        ]));
        let mut runtime = runtime_with(provider, test_config());
        runtime.set_result_schema(Some(json!({
            "type": "object",
            "properties": {"answer": {"type": "integer"}},
            "required": ["answer"]
        })));

        let report = runtime.run("answers").await;
        assert_eq!(report.results, vec![json!({"answer": 4})]);
    }

    #[tokio::test]
    async fn test_parse_diagnostics_become_corrective_feedback() {
        let provider = Arc::new(MockProvider::new(vec![
            "<TOOL>{\"tool\": \"calculator\", \"input\": broken}</TOOL>".to_string(),
            "TASK_COMPLETE".to_string(),
        ]));
        let mut runtime = runtime_with(provider.clone(), test_config());

        let report = runtime.run("compute").await;
        assert_eq!(report.state, RunState::Complete);
        let second_request = &provider.requests()[1];
        assert!(second_request
            .iter()
            .any(|m| m.content.contains("could not be parsed") && m.content.contains("<TOOL>")));
    }

    #[tokio::test]
    async fn test_alias_collision_rejected_and_batch_atomic() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let mut runtime = AgentRuntime::new(provider, test_config());
        runtime
            .register(Arc::new(CalculatorTool::new(CalculatorConfig::default())))
            .unwrap();

        let err = runtime
            .register(Arc::new(CalculatorTool::new(CalculatorConfig { precision: 2 })))
            .unwrap_err();
        assert!(matches!(err, Error::Registry(_)));

        // Batch with one colliding alias registers nothing.
        let batch: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SleepTool { alias: "sleep".to_string() }),
            Arc::new(CalculatorTool::new(CalculatorConfig::default())),
        ];
        assert!(runtime.register_many(batch).is_err());
        assert_eq!(runtime.capability_aliases(), vec!["calculator"]);

        // Same batch minus the collision goes through.
        runtime
            .register_many(vec![Arc::new(SleepTool { alias: "sleep".to_string() })])
            .unwrap();
        assert_eq!(runtime.capability_aliases(), vec!["calculator", "sleep"]);
    }

    #[tokio::test]
    async fn test_replace_swaps_instance_under_alias() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let mut runtime = AgentRuntime::new(provider, test_config());
        runtime
            .register(Arc::new(CalculatorTool::new(CalculatorConfig::default())))
            .unwrap();

        runtime
            .replace("calculator", Arc::new(CalculatorTool::new(CalculatorConfig { precision: 2 })))
            .unwrap();
        assert_eq!(runtime.capability_aliases(), vec!["calculator"]);

        let err = runtime
            .replace("missing", Arc::new(CalculatorTool::new(CalculatorConfig::default())))
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityNotFound(_)));

        runtime.unregister("calculator").unwrap();
        assert!(runtime.capability_aliases().is_empty());
        assert!(matches!(runtime.unregister("calculator"), Err(Error::CapabilityNotFound(_))));
    }

    #[tokio::test]
    async fn test_custom_completion_predicate_replaces_sentinel() {
        let provider = Arc::new(MockProvider::new(vec!["ALL DONE HERE".to_string()]));
        let mut runtime = runtime_with(provider, test_config())
            .with_completion_predicate(|content| content.contains("ALL DONE"));

        let report = runtime.run("finish fast").await;
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_result_processor_maps_and_rejects() {
        let provider = Arc::new(MockProvider::new(vec![
            "<RESULT>{\"answer\": 4}</RESULT><RESULT>{\"answer\": -1}</RESULT> TASK_COMPLETE"
                .to_string(),
        ]));
        let mut runtime = runtime_with(provider, test_config()).with_result_processor(|record| {
            let answer = record["answer"].as_i64()?;
            if answer < 0 {
                return None;
            }
            Some(json!({"answer": answer, "checked": true}))
        });

        let report = runtime.run("answers").await;
        assert_eq!(report.results, vec![json!({"answer": 4, "checked": true})]);
    }

    #[tokio::test]
    async fn test_token_budget_exhaustion_is_timed_out() {
        let provider = Arc::new(MockProvider::new(vec!["a long answer without an end".to_string()]));
        let mut runtime = runtime_with(
            provider,
            RuntimeConfig { token_budget: 1, max_iterations: 50, ..Default::default() },
        );

        let report = runtime.run("talk forever").await;
        assert_eq!(report.state, RunState::TimedOut);
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_reset_and_status_snapshot() {
        let provider = Arc::new(MockProvider::new(vec!["TASK_COMPLETE".to_string()]));
        let mut runtime = runtime_with(provider, test_config());

        let before = runtime.status();
        assert_eq!(before.state, RunState::Init);
        assert_eq!(before.iteration, 0);
        assert!(before.started_at.is_none());

        runtime.run("quick task").await;
        let after = runtime.status();
        assert_eq!(after.state, RunState::Complete);
        assert_eq!(after.iteration, 1);
        assert_eq!(after.aliases, vec!["calculator"]);
        assert!(after.started_at.is_some());
        assert!(after.usage.total_tokens > 0);

        runtime.reset();
        let reset = runtime.status();
        assert_eq!(reset.state, RunState::Init);
        assert_eq!(reset.iteration, 0);
        assert_eq!(reset.result_count, 0);
        assert_eq!(reset.usage, TokenUsage::default());
        // Conversation reseeded from the task.
        assert_eq!(runtime.conversation().len(), 1);
        assert_eq!(runtime.conversation()[0].content, "quick task");
    }

    #[tokio::test]
    async fn test_system_prompt_rerendered_with_capability_changes() {
        let provider = Arc::new(MockProvider::new(vec!["TASK_COMPLETE".to_string()]));
        let mut runtime = runtime_with(provider.clone(), test_config());
        runtime.run("task one").await;

        let first_system = &provider.requests()[0][0];
        assert_eq!(first_system.role, reagent_core::message::Role::System);
        assert!(first_system.content.contains("### Tool: calculator"));

        runtime.register(Arc::new(SleepTool { alias: "sleep".to_string() })).unwrap();
        runtime.run("task two").await;
        let second_system = &provider.requests()[1][0];
        assert!(second_system.content.contains("### Tool: sleep"));
    }
}
