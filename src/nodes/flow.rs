//! Loop-carrying handlers: `loop` and `split_in_batches`.
//!
//! Both route their body through the `loop` handle and finish through
//! `done`, carrying the accumulated body results. Iteration state lives in
//! the execution context; the runner owns the counter bump and the hard
//! system ceiling.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::NodeError;

use super::handler::{
    FieldSpec, FieldType, NodeContext, NodeHandler, NodeResult, DONE_HANDLE, LOOP_HANDLE,
};

const LOOP_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("max_loop_count", FieldType::Number),
    FieldSpec::optional("items_field", FieldType::String),
];

/// Iterates either over an items list found in the input or, without one,
/// for `max_loop_count` rounds.
pub struct LoopHandler;

#[async_trait]
impl NodeHandler for LoopHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        LOOP_FIELDS
    }

    fn outputs(&self) -> &'static [&'static str] {
        &[LOOP_HANDLE, DONE_HANDLE]
    }

    fn loop_carrying(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let node_id = ctx.node_id.to_string();
        let max_loop = config
            .get("max_loop_count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NodeError::Config("'max_loop_count' must be a number".into()))? as u32;
        let completed = ctx.state.loop_count(&node_id);

        if completed == 0 {
            let items = detect_items(&input, config);
            ctx.state.set_items(&node_id, items);
            ctx.state.set_batch_cursor(&node_id, 0);
        }

        let items = ctx.state.items(&node_id).cloned().unwrap_or_default();
        let cursor = ctx.state.batch_cursor(&node_id);

        if !items.is_empty() {
            if cursor < items.len() && completed < max_loop {
                let item = items[cursor].clone();
                ctx.state.set_batch_cursor(&node_id, cursor + 1);
                let data = overlay(
                    &input,
                    json!({
                        "item": item,
                        "index": cursor,
                        "total": items.len(),
                    }),
                );
                return Ok(NodeResult::with_handle(data, LOOP_HANDLE));
            }
        } else if completed < max_loop {
            let data = overlay(
                &input,
                json!({
                    "index": completed,
                    "iteration": completed + 1,
                }),
            );
            return Ok(NodeResult::with_handle(data, LOOP_HANDLE));
        }

        let data = overlay(
            &input,
            json!({
                "results": ctx.state.accumulated_results(&node_id),
                "iterations": completed,
            }),
        );
        Ok(NodeResult::with_handle(data, DONE_HANDLE))
    }
}

const BATCH_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("max_loop_count", FieldType::Number),
    FieldSpec::optional("batch_size", FieldType::Number),
    FieldSpec::optional("items_field", FieldType::String),
];

/// Like `loop`, but hands the body a slice of the items per round.
pub struct SplitInBatchesHandler;

#[async_trait]
impl NodeHandler for SplitInBatchesHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        BATCH_FIELDS
    }

    fn outputs(&self) -> &'static [&'static str] {
        &[LOOP_HANDLE, DONE_HANDLE]
    }

    fn loop_carrying(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let node_id = ctx.node_id.to_string();
        let max_loop = config
            .get("max_loop_count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NodeError::Config("'max_loop_count' must be a number".into()))?
            as u32;
        let batch_size = config
            .get("batch_size")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .max(1) as usize;
        let completed = ctx.state.loop_count(&node_id);

        if completed == 0 {
            let items = detect_items(&input, config);
            ctx.state.set_items(&node_id, items);
            ctx.state.set_batch_cursor(&node_id, 0);
        }

        let items = ctx.state.items(&node_id).cloned().unwrap_or_default();
        let cursor = ctx.state.batch_cursor(&node_id);

        if cursor < items.len() && completed < max_loop {
            let end = (cursor + batch_size).min(items.len());
            let batch: Vec<Value> = items[cursor..end].to_vec();
            ctx.state.set_batch_cursor(&node_id, end);
            let data = overlay(
                &input,
                json!({
                    "batch": batch,
                    "offset": cursor,
                    "total": items.len(),
                }),
            );
            return Ok(NodeResult::with_handle(data, LOOP_HANDLE));
        }

        let data = overlay(
            &input,
            json!({
                "results": ctx.state.accumulated_results(&node_id),
                "iterations": completed,
            }),
        );
        Ok(NodeResult::with_handle(data, DONE_HANDLE))
    }
}

/// Items come from `items_field` when configured, otherwise from the first
/// array value in the input.
fn detect_items(input: &Value, config: &Value) -> Vec<Value> {
    if let Some(field) = config.get("items_field").and_then(|v| v.as_str()) {
        if !field.is_empty() {
            return match input.get(field) {
                Some(Value::Array(items)) => items.clone(),
                Some(other) if !other.is_null() => vec![other.clone()],
                _ => Vec::new(),
            };
        }
    }
    if let Value::Object(map) = input {
        for (key, value) in map {
            if key.starts_with('_') {
                continue;
            }
            if let Value::Array(items) = value {
                return items.clone();
            }
        }
    }
    Vec::new()
}

fn overlay(input: &Value, extra: Value) -> Value {
    let mut map = match input {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(extra_map) = extra {
        for (k, v) in extra_map {
            map.insert(k, v);
        }
    }
    Value::Object(map)
}
