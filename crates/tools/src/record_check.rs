//! Record-validation capability.
//!
//! Checks a batch of records against a caller-supplied structural schema and
//! reports per-record violations. It never repairs records; the caller decides
//! what to do with the report.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use reagent_core::error::Result;
use reagent_core::schema;

use crate::{schema_value, Tool, ToolSpec};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordCheckConfig {
    /// Upper bound on violations listed per record. Excess is counted but
    /// not itemized.
    #[serde(default = "default_max_violations_per_record")]
    pub max_violations_per_record: usize,
}

fn default_max_violations_per_record() -> usize {
    20
}

impl Default for RecordCheckConfig {
    fn default() -> Self {
        Self { max_violations_per_record: default_max_violations_per_record() }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecordCheckInput {
    /// Records to validate.
    pub records: Vec<Value>,
    /// Structural schema every record must satisfy.
    pub schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordViolation {
    /// Index of the offending record in the input batch.
    pub record_index: usize,
    /// Path within the record, e.g. `$.name`.
    pub path: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecordCheckOutput {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub violations: Vec<RecordViolation>,
    /// One-line human-readable verdict.
    pub summary: String,
}

pub struct RecordCheckTool {
    config: RecordCheckConfig,
    alias: Option<String>,
}

impl RecordCheckTool {
    pub fn new(config: RecordCheckConfig) -> Self {
        Self { config, alias: None }
    }

    pub fn with_alias(config: RecordCheckConfig, alias: &str) -> Self {
        Self { config, alias: Some(alias.to_string()) }
    }
}

impl Default for RecordCheckTool {
    fn default() -> Self {
        Self::new(RecordCheckConfig::default())
    }
}

#[async_trait]
impl Tool for RecordCheckTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "record_check",
            short_description: "Validates records against a schema",
            long_description: "Validates a batch of JSON records against a provided schema and \
                reports which records fail and why. Does not modify records.",
            input_schema: schema_value(schemars::schema_for!(RecordCheckInput)),
            output_schema: schema_value(schemars::schema_for!(RecordCheckOutput)),
        }
    }

    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or("record_check")
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let input: RecordCheckInput = serde_json::from_value(input)?;
        let total = input.records.len();
        let mut violations = Vec::new();
        let mut invalid = 0usize;

        for (record_index, record) in input.records.iter().enumerate() {
            let found = schema::validate(record, &input.schema);
            if found.is_empty() {
                continue;
            }
            invalid += 1;
            let listed = found.len().min(self.config.max_violations_per_record);
            for violation in found.into_iter().take(listed) {
                violations.push(RecordViolation {
                    record_index,
                    path: violation.path,
                    message: violation.message,
                });
            }
        }

        let valid = total - invalid;
        let summary = if invalid == 0 {
            format!("all {total} records valid")
        } else {
            format!("{invalid} of {total} records invalid ({} violations)", violations.len())
        };
        debug!(total, valid, invalid, "Record check finished");

        let output = RecordCheckOutput { total, valid, invalid, violations, summary };
        Ok(serde_json::to_value(output)?)
    }
}
