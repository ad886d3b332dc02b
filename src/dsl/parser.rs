//! Workflow JSON parsing.

use serde_json::Value;

use crate::error::CompileError;

use super::schema::WorkflowSchema;

/// Parse a raw JSON workflow definition into a [`WorkflowSchema`].
pub fn parse_workflow(raw: &Value) -> Result<WorkflowSchema, CompileError> {
    serde_json::from_value(raw.clone()).map_err(|e| CompileError::Parse(e.to_string()))
}

/// Parse a workflow definition from a JSON string.
pub fn parse_workflow_str(raw: &str) -> Result<WorkflowSchema, CompileError> {
    serde_json::from_str(raw).map_err(|e| CompileError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_workflow() {
        let schema = parse_workflow(&json!({
            "id": "wf",
            "nodes": [{"id": "a", "type": "noop", "data": {}}],
            "edges": []
        }))
        .unwrap();
        assert_eq!(schema.nodes.len(), 1);
    }

    #[test]
    fn test_parse_workflow_str_invalid() {
        let err = parse_workflow_str("{not json").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn test_parse_missing_nodes_rejected() {
        let err = parse_workflow(&json!({"id": "wf"})).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
