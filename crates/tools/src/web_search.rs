//! Web-search capability.
//!
//! Two engines behind one contract: a deterministic mock for offline runs and
//! tests, and Brave Search over HTTP. The engine is picked by configuration at
//! construction.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use reagent_core::error::{Error, Result};

use crate::{schema_value, Tool, ToolSpec};

/// Which backend serves queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchEngine {
    /// Deterministic canned results, no network.
    Mock,
    /// Brave Search API. Requires `api_key`.
    Brave,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebSearchConfig {
    #[serde(default = "default_engine")]
    pub engine: SearchEngine,
    /// API key for the remote engine. Ignored by the mock engine.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_safe_search")]
    pub safe_search: bool,
}

fn default_engine() -> SearchEngine {
    SearchEngine::Mock
}

fn default_region() -> String {
    "us-en".to_string()
}

fn default_safe_search() -> bool {
    true
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            api_key: None,
            region: default_region(),
            safe_search: default_safe_search(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WebSearchInput {
    /// Search query.
    #[schemars(length(min = 1))]
    pub query: String,
    /// Maximum number of results to return.
    #[serde(default = "default_max_results")]
    #[schemars(range(min = 1, max = 50))]
    pub max_results: u32,
}

fn default_max_results() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WebSearchOutput {
    /// Query as executed.
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Total matches the engine reported, when it reports one.
    pub total_results: u64,
    /// Number of results actually returned.
    pub count: u32,
}

pub struct WebSearchTool {
    config: WebSearchConfig,
    alias: Option<String>,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        Self { config, alias: None, client: reqwest::Client::new() }
    }

    pub fn with_alias(config: WebSearchConfig, alias: &str) -> Self {
        Self { config, alias: Some(alias.to_string()), client: reqwest::Client::new() }
    }

    pub fn config(&self) -> &WebSearchConfig {
        &self.config
    }

    fn mock_search(&self, query: &str, max_results: u32) -> WebSearchOutput {
        let total = 3u32.min(max_results);
        let results = (1..=total)
            .map(|rank| SearchResult {
                title: format!("Mock result {rank} for '{query}'"),
                url: format!("https://example.com/search/{rank}"),
                snippet: format!(
                    "This is mock search result number {rank} matching the query '{query}'."
                ),
            })
            .collect::<Vec<_>>();
        WebSearchOutput {
            query: query.to_string(),
            total_results: 3,
            count: results.len() as u32,
            results,
        }
    }

    async fn brave_search(&self, query: &str, max_results: u32) -> Result<WebSearchOutput> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            Error::Config("web_search: engine 'brave' requires an api_key".to_string())
        })?;

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&[
                ("q", query),
                ("count", &max_results.to_string()),
                ("country", &self.config.region),
                ("safesearch", if self.config.safe_search { "moderate" } else { "off" }),
            ])
            .send()
            .await
            .map_err(|e| Error::Execution(format!("web_search: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Execution(format!(
                "web_search: brave returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Execution(format!("web_search: invalid response body: {e}")))?;

        let raw = body
            .pointer("/web/results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let results: Vec<SearchResult> = raw
            .iter()
            .take(max_results as usize)
            .map(|item| SearchResult {
                title: item["title"].as_str().unwrap_or("Untitled").to_string(),
                url: item["url"].as_str().unwrap_or_default().to_string(),
                snippet: item["description"].as_str().unwrap_or_default().to_string(),
            })
            .collect();
        let total_results = body
            .pointer("/web/total")
            .and_then(Value::as_u64)
            .unwrap_or(results.len() as u64);

        Ok(WebSearchOutput {
            query: query.to_string(),
            count: results.len() as u32,
            total_results,
            results,
        })
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new(WebSearchConfig::default())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search",
            short_description: "Searches the web for information",
            long_description: "Searches the web and returns ranked results with titles, URLs \
                and snippets. Use for looking up current information.",
            input_schema: schema_value(schemars::schema_for!(WebSearchInput)),
            output_schema: schema_value(schemars::schema_for!(WebSearchOutput)),
        }
    }

    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or("web_search")
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let input: WebSearchInput = serde_json::from_value(input)?;
        debug!(query = %input.query, engine = ?self.config.engine, "Executing web search");

        let output = match self.config.engine {
            SearchEngine::Mock => self.mock_search(&input.query, input.max_results),
            SearchEngine::Brave => self.brave_search(&input.query, input.max_results).await?,
        };
        Ok(serde_json::to_value(output)?)
    }
}
