//! Extraction of structured directives from free-form model output.
//!
//! Two tag pairs are recognized: `<TOOL>{...}</TOOL>` for capability
//! invocations and `<RESULT>{...}</RESULT>` for result records. Free text may
//! surround tags, tags are matched non-nested left-to-right, and a bad
//! payload in one region never blocks extraction of its siblings. No schema
//! validation happens here; that belongs to the capability contract and the
//! runtime.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::types::ToolCall;

const TOOL_START: &str = "<TOOL>";
const TOOL_END: &str = "</TOOL>";
const RESULT_START: &str = "<RESULT>";
const RESULT_END: &str = "</RESULT>";

static TOOL_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<TOOL>.*?</TOOL>").expect("valid pattern"));
static RESULT_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<RESULT>.*?</RESULT>").expect("valid pattern"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid pattern"));

/// Which tag pair a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Tool,
    Result,
}

impl TagKind {
    fn tags(&self) -> (&'static str, &'static str) {
        match self {
            TagKind::Tool => (TOOL_START, TOOL_END),
            TagKind::Result => (RESULT_START, RESULT_END),
        }
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagKind::Tool => f.write_str("TOOL"),
            TagKind::Result => f.write_str("RESULT"),
        }
    }
}

/// A localized parse failure: one tagged region that could not be extracted.
/// `offset` is the byte position of the offending start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub tag: TagKind,
    pub offset: usize,
    pub message: String,
}

/// Everything one pass over a response yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub tool_calls: Vec<ToolCall>,
    pub results: Vec<Value>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.results.is_empty() && self.diagnostics.is_empty()
    }
}

/// Extracts tool calls and result records in one left-to-right pass.
/// Ordering within each sequence is identical to what [`parse_tool_calls`]
/// and [`parse_results`] would produce individually.
pub fn extract_all(text: &str) -> Extraction {
    let mut out = Extraction::default();
    let mut cursor = 0;

    loop {
        let next_tool = text[cursor..].find(TOOL_START).map(|i| (cursor + i, TagKind::Tool));
        let next_result = text[cursor..].find(RESULT_START).map(|i| (cursor + i, TagKind::Result));

        let (start, kind) = match (next_tool, next_result) {
            (Some(t), Some(r)) => {
                if t.0 <= r.0 {
                    t
                } else {
                    r
                }
            }
            (Some(t), None) => t,
            (None, Some(r)) => r,
            (None, None) => break,
        };

        cursor = extract_region(text, start, kind, &mut out);
    }

    out
}

/// Extracts only `<TOOL>` directives. Diagnostics are logged, not returned;
/// callers that need them as data use [`extract_all`].
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut out = Extraction::default();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(TOOL_START) {
        cursor = extract_region(text, cursor + rel, TagKind::Tool, &mut out);
    }
    out.tool_calls
}

/// Extracts only `<RESULT>` payloads.
pub fn parse_results(text: &str) -> Vec<Value> {
    let mut out = Extraction::default();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(RESULT_START) {
        cursor = extract_region(text, cursor + rel, TagKind::Result, &mut out);
    }
    out.results
}

/// Cheap presence check, no extraction.
pub fn has_tool_calls(text: &str) -> bool {
    TOOL_REGION.is_match(text)
}

/// Cheap presence check, no extraction.
pub fn has_results(text: &str) -> bool {
    RESULT_REGION.is_match(text)
}

/// Removes all well-formed tagged regions, collapsing the blank runs they
/// leave behind. Used by embedding collaborators to display the prose part
/// of a response.
pub fn strip_directives(text: &str) -> String {
    let without_tools = TOOL_REGION.replace_all(text, "");
    let without_results = RESULT_REGION.replace_all(&without_tools, "");
    BLANK_RUN.replace_all(&without_results, "\n\n").trim().to_string()
}

/// Processes one tagged region starting at `start` and returns the cursor
/// position scanning should resume from. Failed regions resume right after
/// the start tag so later regions are still found.
fn extract_region(text: &str, start: usize, kind: TagKind, out: &mut Extraction) -> usize {
    let (start_tag, end_tag) = kind.tags();
    let payload_start = start + start_tag.len();

    let Some(payload_end) = balanced_object_end(text, payload_start, end_tag) else {
        push_diagnostic(out, kind, start, "no balanced JSON object after start tag".to_string());
        return payload_start;
    };

    let Some(end_rel) = text[payload_end..].find(end_tag) else {
        push_diagnostic(out, kind, start, format!("missing closing </{kind}>"));
        return payload_start;
    };
    let resume = payload_end + end_rel + end_tag.len();

    let payload = text[payload_start..payload_end].trim();
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            push_diagnostic(out, kind, start, format!("invalid JSON payload: {err}"));
            return resume;
        }
    };

    match kind {
        TagKind::Tool => match tool_call_from_value(value) {
            Ok(call) => out.tool_calls.push(call),
            Err(message) => push_diagnostic(out, kind, start, message),
        },
        TagKind::Result => out.results.push(value),
    }

    resume
}

/// Interprets a `<TOOL>` payload: an object with a string `tool` field and an
/// object `input` field. Shape errors here are tag-grammar violations, not
/// schema validation.
fn tool_call_from_value(value: Value) -> std::result::Result<ToolCall, String> {
    let Value::Object(mut map) = value else {
        return Err("tool payload is not a JSON object".to_string());
    };
    let tool = match map.get("tool").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err("tool payload missing string 'tool' field".to_string()),
    };
    let input = match map.remove("input") {
        Some(input @ Value::Object(_)) => input,
        Some(_) => return Err("tool payload 'input' field is not an object".to_string()),
        None => return Err("tool payload missing 'input' field".to_string()),
    };
    Ok(ToolCall { tool, input })
}

/// Finds the end (exclusive byte index) of the first balanced `{...}` region
/// at or after `from`, giving up when `end_tag` appears outside a string
/// first. The end-tag bound keeps a region whose payload has no object of
/// its own (or an unbalanced one) from latching onto a later region's JSON.
/// Counting is string- and escape-aware so braces or end tags inside JSON
/// strings do not terminate the region early. JSON structural characters are
/// ASCII, so byte scanning is UTF-8 safe.
fn balanced_object_end(text: &str, from: usize, end_tag: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let end_tag = end_tag.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut seen_open = false;

    for (i, &b) in bytes.iter().enumerate().skip(from) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if bytes[i..].starts_with(end_tag) {
            return None;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                seen_open = true;
            }
            b'}' => {
                if !seen_open {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn push_diagnostic(out: &mut Extraction, tag: TagKind, offset: usize, message: String) {
    warn!(%tag, offset, %message, "skipping malformed tagged region");
    out.diagnostics.push(ParseDiagnostic { tag, offset, message });
}
