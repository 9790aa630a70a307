//! Structural validation of untrusted JSON values against a declarative
//! object schema.
//!
//! The supported vocabulary is the subset actually used by capability
//! contracts and result schemas: `type`, `properties`, `required`, `items`,
//! `enum`, `additionalProperties`, numeric bounds (`minimum`/`maximum`),
//! string bounds (`minLength`/`maxLength`) and array bounds
//! (`minItems`/`maxItems`). `$ref` pointers into the root document's
//! `definitions`/`$defs` are resolved so derived contract documents validate
//! as-is. Unknown keywords are ignored rather than rejected.

use serde_json::Value;

/// One failed constraint, annotated with the path of the offending value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validates `value` against `schema`, returning every violation found. An
/// empty vector means the value conforms.
pub fn validate(value: &Value, schema: &Value) -> Vec<Violation> {
    let mut out = Vec::new();
    check(value, schema, schema, "$", &mut out);
    out
}

/// Convenience predicate over [`validate`].
pub fn is_valid(value: &Value, schema: &Value) -> bool {
    validate(value, schema).is_empty()
}

/// Renders violations into one diagnostic line, for error messages.
pub fn describe(violations: &[Violation]) -> String {
    violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
}

fn check(value: &Value, schema: &Value, root: &Value, path: &str, out: &mut Vec<Violation>) {
    let Value::Object(schema) = schema else {
        // A non-object schema constrains nothing.
        return;
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        match resolve_ref(reference, root) {
            Some(target) => check(value, target, root, path, out),
            None => out.push(Violation {
                path: path.to_string(),
                message: format!("unresolvable schema reference '{reference}'"),
            }),
        }
        return;
    }

    if let Some(expected) = schema.get("type") {
        if !type_matches(value, expected) {
            out.push(Violation {
                path: path.to_string(),
                message: format!("expected type {}, got {}", render_type(expected), type_name(value)),
            });
            // Remaining keywords assume the right shape.
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            out.push(Violation {
                path: path.to_string(),
                message: format!("value {value} is not one of the allowed values"),
            });
        }
    }

    match value {
        Value::Object(map) => {
            let properties = schema.get("properties").and_then(Value::as_object);

            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        out.push(Violation {
                            path: path.to_string(),
                            message: format!("missing required property '{name}'"),
                        });
                    }
                }
            }

            if let Some(properties) = properties {
                for (name, prop_schema) in properties {
                    if let Some(prop_value) = map.get(name) {
                        check(prop_value, prop_schema, root, &format!("{path}.{name}"), out);
                    }
                }
            }

            match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    for name in map.keys() {
                        if !properties.is_some_and(|p| p.contains_key(name)) {
                            out.push(Violation {
                                path: path.to_string(),
                                message: format!("unexpected property '{name}'"),
                            });
                        }
                    }
                }
                Some(additional @ Value::Object(_)) => {
                    for (name, extra) in map {
                        if !properties.is_some_and(|p| p.contains_key(name)) {
                            check(extra, additional, root, &format!("{path}.{name}"), out);
                        }
                    }
                }
                _ => {}
            }
        }
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("expected at least {min} items, got {}", items.len()),
                    });
                }
            }
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                if (items.len() as u64) > max {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("expected at most {max} items, got {}", items.len()),
                    });
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item, item_schema, root, &format!("{path}[{i}]"), out);
                }
            }
        }
        Value::String(s) => {
            let chars = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if chars < min {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("string shorter than minLength {min}"),
                    });
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if chars > max {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("string longer than maxLength {max}"),
                    });
                }
            }
        }
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("{n} is below minimum {min}"),
                    });
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    out.push(Violation {
                        path: path.to_string(),
                        message: format!("{n} is above maximum {max}"),
                    });
                }
            }
        }
        _ => {}
    }
}

/// Resolves `#/definitions/X` and `#/$defs/X` pointers against the root
/// document. Anything else is unsupported.
fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(value, name)),
        _ => true,
    }
}

fn single_type_matches(value: &Value, name: &str) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        _ => true,
    }
}

fn render_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "answer": {"type": "number"},
                "source": {"type": "string", "minLength": 1}
            },
            "required": ["answer"]
        })
    }

    #[test]
    fn test_conformant_object() {
        assert!(is_valid(&json!({"answer": 4}), &answer_schema()));
        assert!(is_valid(&json!({"answer": 4.5, "source": "calc"}), &answer_schema()));
    }

    #[test]
    fn test_missing_required_property() {
        let violations = validate(&json!({"source": "calc"}), &answer_schema());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$");
        assert!(violations[0].message.contains("missing required property 'answer'"));
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let violations = validate(&json!({"answer": "four"}), &answer_schema());
        assert_eq!(violations[0].path, "$.answer");
        assert!(violations[0].message.contains("expected type number"));
    }

    #[test]
    fn test_type_union() {
        let schema = json!({"type": ["string", "null"]});
        assert!(is_valid(&json!("x"), &schema));
        assert!(is_valid(&Value::Null, &schema));
        assert!(!is_valid(&json!(1), &schema));
    }

    #[test]
    fn test_integer_vs_number() {
        assert!(is_valid(&json!(3), &json!({"type": "integer"})));
        assert!(!is_valid(&json!(3.5), &json!({"type": "integer"})));
        assert!(is_valid(&json!(3.5), &json!({"type": "number"})));
    }

    #[test]
    fn test_enum_constraint() {
        let schema = json!({"type": "string", "enum": ["mock", "brave"]});
        assert!(is_valid(&json!("mock"), &schema));
        let violations = validate(&json!("google"), &schema);
        assert!(violations[0].message.contains("not one of the allowed values"));
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = json!({"type": "integer", "minimum": 1, "maximum": 50});
        assert!(is_valid(&json!(5), &schema));
        assert!(!is_valid(&json!(0), &schema));
        assert!(!is_valid(&json!(51), &schema));
    }

    #[test]
    fn test_array_items_and_bounds() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "required": ["id"], "properties": {"id": {"type": "integer"}}},
            "minItems": 1
        });
        assert!(is_valid(&json!([{"id": 1}, {"id": 2}]), &schema));
        assert!(!is_valid(&json!([]), &schema));

        let violations = validate(&json!([{"id": 1}, {}]), &schema);
        assert_eq!(violations[0].path, "$[1]");
    }

    #[test]
    fn test_additional_properties_false() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "additionalProperties": false
        });
        assert!(is_valid(&json!({"a": 1}), &schema));
        let violations = validate(&json!({"a": 1, "b": 2}), &schema);
        assert!(violations[0].message.contains("unexpected property 'b'"));
    }

    #[test]
    fn test_ref_resolution() {
        let schema = json!({
            "type": "object",
            "properties": {
                "results": {"type": "array", "items": {"$ref": "#/definitions/Entry"}}
            },
            "definitions": {
                "Entry": {"type": "object", "required": ["title"], "properties": {"title": {"type": "string"}}}
            }
        });
        assert!(is_valid(&json!({"results": [{"title": "x"}]}), &schema));
        let violations = validate(&json!({"results": [{}]}), &schema);
        assert_eq!(violations[0].path, "$.results[0]");
    }

    #[test]
    fn test_unknown_keywords_ignored() {
        let schema = json!({"type": "string", "format": "uri", "description": "a link"});
        assert!(is_valid(&json!("https://example.com"), &schema));
    }

    #[test]
    fn test_describe_joins_violations() {
        let violations = validate(&json!({}), &answer_schema());
        assert_eq!(describe(&violations), "$: missing required property 'answer'");
    }
}
