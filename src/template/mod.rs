//! Config templating.
//!
//! String values in node config may reference runtime data:
//! `{{ $input.<path> }}` against the gathered node input,
//! `{{ $vars.<name> }}` against execution variables, and
//! `{{ $output.<node_id>.<path> }}` against any upstream node's output.
//!
//! A string that is exactly one expression resolves to the referenced JSON
//! value with its type intact; embedded expressions interpolate as text.
//! Unknown references surface as a template error on the node.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::core::execution_context::ExecutionContext;
use crate::error::NodeError;

fn expr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static regex"))
}

/// Resolve every template expression in `config`, returning a new value.
pub fn resolve_config(
    config: &Value,
    input: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, NodeError> {
    match config {
        Value::String(s) => resolve_string(s, input, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_config(item, input, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_config(v, input, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a single string value.
pub fn resolve_string(
    raw: &str,
    input: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, NodeError> {
    let re = expr_regex();
    if !raw.contains("{{") {
        return Ok(Value::String(raw.to_string()));
    }

    // Whole-string expression keeps the referenced type.
    if let Some(caps) = re.captures(raw) {
        let full = caps.get(0).expect("match exists");
        if full.start() == 0 && full.end() == raw.len() {
            return resolve_expression(&caps[1], input, ctx);
        }
    }

    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in re.captures_iter(raw) {
        let full = caps.get(0).expect("match exists");
        out.push_str(&raw[last..full.start()]);
        let value = resolve_expression(&caps[1], input, ctx)?;
        out.push_str(&value_to_text(&value));
        last = full.end();
    }
    out.push_str(&raw[last..]);
    Ok(Value::String(out))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_expression(
    expr: &str,
    input: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, NodeError> {
    let expr = expr.trim();
    if let Some(path) = expr.strip_prefix("$input") {
        let path = path.trim_start_matches('.');
        return lookup_path(input, path)
            .ok_or_else(|| NodeError::Template(format!("unresolved reference: {expr}")));
    }
    if let Some(path) = expr.strip_prefix("$vars.") {
        let mut segments = split_path(path);
        if segments.is_empty() {
            return Err(NodeError::Template(format!("unresolved reference: {expr}")));
        }
        let name = segments.remove(0);
        let root = ctx
            .get_variable(&name)
            .ok_or_else(|| NodeError::Template(format!("unresolved reference: {expr}")))?;
        return lookup_segments(root, &segments)
            .ok_or_else(|| NodeError::Template(format!("unresolved reference: {expr}")));
    }
    if let Some(path) = expr.strip_prefix("$output.") {
        let mut segments = split_path(path);
        if segments.is_empty() {
            return Err(NodeError::Template(format!("unresolved reference: {expr}")));
        }
        let node_id = segments.remove(0);
        let output = ctx
            .node_output(&node_id)
            .ok_or_else(|| NodeError::Template(format!("unresolved reference: {expr}")))?;
        return lookup_segments(&output.data, &segments)
            .ok_or_else(|| NodeError::Template(format!("unresolved reference: {expr}")));
    }
    Err(NodeError::Template(format!("unknown reference: {expr}")))
}

/// Follow a dot-and-bracket path into a JSON value.
pub fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(root.clone());
    }
    lookup_segments(root, &split_path(path))
}

fn lookup_segments(root: &Value, segments: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment.as_str())?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut key = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    key.push(inner);
                }
                let key = key.trim_matches(|c| c == '\'' || c == '"').to_string();
                if !key.is_empty() {
                    segments.push(key);
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
