//! Agent execution runtime: the ReAct loop, system-prompt rendering, and the
//! run lifecycle around them.

pub mod prompt;
pub mod runtime;

use reagent_core::error::Result;
use reagent_core::registry::{self, ComponentInfo};

pub use prompt::{render_system_prompt, PromptVars, DEFAULT_SYSTEM_PROMPT_TEMPLATE};
pub use runtime::{
    AgentRuntime, CompletionPredicate, ErrorFormatter, ResultProcessor, RunReport, RunState,
    RuntimeStatus,
};

/// The registered name of the runtime as an agent type.
pub type TaskAgent = AgentRuntime;

/// Registers the built-in agent types in the process-wide catalog.
pub fn register_builtin_agents() -> Result<()> {
    registry::register(ComponentInfo::agent(
        "TaskAgent",
        "ReAct loop driving a model conversation with tool dispatch",
    ))
}

/// Installs the default subscriber: env-filtered, `info` unless `RUST_LOG`
/// says otherwise. Call once from the embedding process.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
