pub mod config;
pub mod error;
pub mod message;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use types::{CallResult, FinishReason, LlmResponse, TokenUsage, ToolCall, ToolOutcome};
