//! Process-wide catalog of component types.
//!
//! The registry records every capability, provider and agent type the process
//! knows about, keyed by type name. Registration happens explicitly during
//! process setup; reads are safe from any number of runtime instances. Aliases
//! are a runtime-instance concept and never appear here.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// What kind of component a registry entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Capability,
    Provider,
    Agent,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Capability => f.write_str("capability"),
            ComponentKind::Provider => f.write_str("provider"),
            ComponentKind::Agent => f.write_str("agent"),
        }
    }
}

/// Metadata for one registered component type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub type_name: String,
    pub kind: ComponentKind,
    pub description: String,
    /// Companion contract type names, where the component has them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

impl ComponentInfo {
    pub fn capability(type_name: &str, description: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            kind: ComponentKind::Capability,
            description: description.to_string(),
            config_type: None,
            input_type: None,
            output_type: None,
        }
    }

    pub fn provider(type_name: &str, description: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            kind: ComponentKind::Provider,
            description: description.to_string(),
            config_type: None,
            input_type: None,
            output_type: None,
        }
    }

    pub fn agent(type_name: &str, description: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            kind: ComponentKind::Agent,
            description: description.to_string(),
            config_type: None,
            input_type: None,
            output_type: None,
        }
    }

    pub fn with_contracts(mut self, config: &str, input: &str, output: &str) -> Self {
        self.config_type = Some(config.to_string());
        self.input_type = Some(input.to_string());
        self.output_type = Some(output.to_string());
        self
    }

    pub fn with_config(mut self, config: &str) -> Self {
        self.config_type = Some(config.to_string());
        self
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, ComponentInfo>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Records a component type exactly once. Re-registration under the same type
/// name is an error; nothing is replaced silently.
pub fn register(info: ComponentInfo) -> Result<()> {
    let mut registry = REGISTRY.write().expect("registry lock poisoned");
    if registry.contains_key(&info.type_name) {
        return Err(Error::Registry(format!(
            "component '{}' is already registered",
            info.type_name
        )));
    }
    info!(type_name = %info.type_name, kind = %info.kind, "Registered component");
    registry.insert(info.type_name.clone(), info);
    Ok(())
}

/// Returns metadata for a type name, or `None` if unregistered.
pub fn lookup(type_name: &str) -> Option<ComponentInfo> {
    REGISTRY.read().expect("registry lock poisoned").get(type_name).cloned()
}

pub fn is_registered(type_name: &str) -> bool {
    REGISTRY.read().expect("registry lock poisoned").contains_key(type_name)
}

/// Order-irrelevant snapshot of the catalog, materialized on demand.
pub fn list_all() -> Vec<ComponentInfo> {
    REGISTRY.read().expect("registry lock poisoned").values().cloned().collect()
}

pub fn list_kind(kind: ComponentKind) -> Vec<ComponentInfo> {
    REGISTRY
        .read()
        .expect("registry lock poisoned")
        .values()
        .filter(|info| info.kind == kind)
        .cloned()
        .collect()
}

/// Tears the catalog down. Test-visible escape hatch; production setup
/// registers once per process and never calls this.
pub fn reset() {
    REGISTRY.write().expect("registry lock poisoned").clear();
}

/// Checks the naming relationship across every registered family and returns
/// the violations found. Diagnostic only; registration never gates on it.
///
/// Rules: capability types end in `Tool` and their companion contract types
/// share the capability's stem with `Config`/`Input`/`Output` suffixes;
/// provider types end in `Provider`; agent types end in `Agent`.
pub fn validate_naming() -> Vec<String> {
    let registry = REGISTRY.read().expect("registry lock poisoned");
    let mut violations = Vec::new();

    for info in registry.values() {
        match info.kind {
            ComponentKind::Capability => {
                let Some(stem) = info.type_name.strip_suffix("Tool") else {
                    violations.push(format!(
                        "capability type '{}' should end with 'Tool'",
                        info.type_name
                    ));
                    continue;
                };
                let companions = [
                    (&info.config_type, "Config"),
                    (&info.input_type, "Input"),
                    (&info.output_type, "Output"),
                ];
                for (companion, suffix) in companions {
                    if let Some(name) = companion {
                        if name != &format!("{stem}{suffix}") {
                            violations.push(format!(
                                "capability '{}' {} type '{}' should be named '{}{}'",
                                info.type_name,
                                suffix.to_lowercase(),
                                name,
                                stem,
                                suffix
                            ));
                        }
                    }
                }
            }
            ComponentKind::Provider => {
                if !info.type_name.ends_with("Provider") {
                    violations.push(format!(
                        "provider type '{}' should end with 'Provider'",
                        info.type_name
                    ));
                }
            }
            ComponentKind::Agent => {
                if !info.type_name.ends_with("Agent") {
                    violations.push(format!(
                        "agent type '{}' should end with 'Agent'",
                        info.type_name
                    ));
                }
            }
        }
    }

    violations
}

/// Renders the catalog contents and naming violations as human-readable text.
pub fn summary_report() -> String {
    let mut entries = list_all();
    entries.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    let mut report = String::from("# Component Registry\n");
    for kind in [ComponentKind::Capability, ComponentKind::Provider, ComponentKind::Agent] {
        let of_kind: Vec<_> = entries.iter().filter(|info| info.kind == kind).collect();
        report.push_str(&format!("\n## {kind} ({})\n", of_kind.len()));
        for info in of_kind {
            report.push_str(&format!("- {}: {}\n", info.type_name, info.description));
            if let (Some(config), Some(input), Some(output)) =
                (&info.config_type, &info.input_type, &info.output_type)
            {
                report.push_str(&format!("  contracts: {config} / {input} / {output}\n"));
            }
        }
    }

    let violations = validate_naming();
    if violations.is_empty() {
        report.push_str("\nNaming: all components follow conventions\n");
    } else {
        report.push_str(&format!("\nNaming violations ({})\n", violations.len()));
        for violation in &violations {
            report.push_str(&format!("- {violation}\n"));
        }
    }
    report
}
