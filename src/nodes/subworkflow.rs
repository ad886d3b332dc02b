//! Sub-workflow node: runs another workflow as a child execution.
//!
//! Depth and cycle invariants are enforced by the supervisor when the child
//! is spawned; this handler maps inputs in, awaits the child, and maps its
//! output back.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::runtime_context::SubworkflowSource;
use crate::error::{ControlError, NodeError};
use crate::template::lookup_path;

use super::handler::{FailureKind, FieldSpec, FieldType, NodeContext, NodeHandler, NodeResult};

const SUBWORKFLOW_FIELDS: &[FieldSpec] = &[FieldSpec::optional("workflow_id", FieldType::String)];

pub struct SubworkflowHandler;

#[async_trait]
impl NodeHandler for SubworkflowHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        SUBWORKFLOW_FIELDS
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["default", "error"]
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let runner = ctx
            .runtime
            .subworkflows
            .clone()
            .ok_or_else(|| NodeError::Config("no sub-workflow runner available".into()))?;

        let source = if let Some(inline) = config.get("workflow") {
            SubworkflowSource::Inline(inline.clone())
        } else if let Some(id) = config.get("workflow_id").and_then(|v| v.as_str()) {
            SubworkflowSource::Stored(id.to_string())
        } else {
            return Err(NodeError::Config(
                "subworkflow node needs 'workflow' or 'workflow_id'".into(),
            ));
        };

        let mapped_input = apply_mapping(&input, config.get("input_mapping"));

        match runner
            .run_subworkflow(ctx.execution_id, source, mapped_input)
            .await
        {
            Ok(output) => {
                let mapped = apply_mapping(&output, config.get("output_mapping"));
                Ok(NodeResult::ok(mapped))
            }
            Err(ControlError::ExecutionCancelled) => Err(NodeError::Cancelled(
                "cancelled while running sub-workflow".into(),
            )),
            Err(err @ ControlError::NestingDepthExceeded { .. })
            | Err(err @ ControlError::SubworkflowCycle { .. }) => {
                Ok(NodeResult::error(err.to_string(), FailureKind::Fatal))
            }
            Err(other) => Ok(NodeResult::error(other.to_string(), FailureKind::Fatal)),
        }
    }
}

/// Project a value through a `{target_key: source_path}` mapping. Without a
/// mapping the value passes through unchanged.
fn apply_mapping(value: &Value, mapping: Option<&Value>) -> Value {
    let Some(Value::Object(mapping)) = mapping else {
        return value.clone();
    };
    if mapping.is_empty() {
        return value.clone();
    }
    let mut out = Map::with_capacity(mapping.len());
    for (target, source) in mapping {
        let resolved = match source {
            Value::String(path) => lookup_path(value, path).unwrap_or(Value::Null),
            literal => literal.clone(),
        };
        out.insert(target.clone(), resolved);
    }
    Value::Object(out)
}
