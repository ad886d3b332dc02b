//! Branching and data-shaping handlers: if, switch, merge, set, noop.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::NodeError;
use crate::template::lookup_path;

use super::handler::{
    FieldSpec, FieldType, NodeContext, NodeHandler, NodeResult, FALSE_HANDLE, TRUE_HANDLE,
};

/// Pass-through. Useful as a join point or placeholder.
pub struct NoopHandler;

#[async_trait]
impl NodeHandler for NoopHandler {
    async fn execute(
        &self,
        input: Value,
        _config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::ok(input))
    }
}

/// Conditional branch. Routes on `true`/`false`.
///
/// Configured either with a comparison expression (`"batch_id > 2000"`) or
/// with explicit `field` / `operator` / `value` entries.
pub struct IfHandler;

const IF_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("expression", FieldType::String),
    FieldSpec::optional("field", FieldType::String),
    FieldSpec::optional("operator", FieldType::Select),
];

#[async_trait]
impl NodeHandler for IfHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        IF_FIELDS
    }

    fn outputs(&self) -> &'static [&'static str] {
        &[TRUE_HANDLE, FALSE_HANDLE]
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let verdict = if let Some(expression) = config.get("expression").and_then(|v| v.as_str()) {
            evaluate_expression(expression, &input)?
        } else {
            let field = config
                .get("field")
                .and_then(|v| v.as_str())
                .ok_or_else(|| NodeError::Config("if node needs 'expression' or 'field'".into()))?;
            let operator = config
                .get("operator")
                .and_then(|v| v.as_str())
                .unwrap_or("equals");
            let expected = config.get("value").cloned().unwrap_or(Value::Null);
            let actual = lookup_path(&input, field);
            evaluate_operator(operator, actual.as_ref(), &expected)?
        };

        let handle = if verdict { TRUE_HANDLE } else { FALSE_HANDLE };
        Ok(NodeResult::with_handle(input, handle))
    }
}

/// Evaluate a `<path> <op> <literal>` comparison against the input.
fn evaluate_expression(expression: &str, input: &Value) -> Result<bool, NodeError> {
    for op in ["<=", ">=", "==", "!=", ">", "<"] {
        if let Some(pos) = expression.find(op) {
            let lhs = expression[..pos].trim();
            let rhs = expression[pos + op.len()..].trim();
            let actual = lookup_path(input, lhs);
            let expected = parse_literal(rhs);
            let operator = match op {
                ">" => "greater_than",
                "<" => "less_than",
                ">=" => "greater_or_equal",
                "<=" => "less_or_equal",
                "==" => "equals",
                "!=" => "not_equals",
                _ => unreachable!(),
            };
            return evaluate_operator(operator, actual.as_ref(), &expected);
        }
    }
    Err(NodeError::Config(format!(
        "unsupported expression: {expression}"
    )))
}

fn parse_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Value::String(stripped.to_string());
    }
    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return Value::from(n);
    }
    Value::String(trimmed.to_string())
}

fn evaluate_operator(
    operator: &str,
    actual: Option<&Value>,
    expected: &Value,
) -> Result<bool, NodeError> {
    let as_text = |v: &Value| -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    };
    let as_number = |v: Option<&Value>| -> Option<f64> {
        match v? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    };

    let result = match operator {
        "equals" => actual.map(&as_text) == Some(as_text(expected)),
        "not_equals" => actual.map(&as_text) != Some(as_text(expected)),
        "contains" => actual
            .map(&as_text)
            .map(|s| s.contains(&as_text(expected)))
            .unwrap_or(false),
        "greater_than" | "greater_or_equal" | "less_than" | "less_or_equal" => {
            match (as_number(actual), as_number(Some(expected))) {
                (Some(a), Some(b)) => match operator {
                    "greater_than" => a > b,
                    "greater_or_equal" => a >= b,
                    "less_than" => a < b,
                    "less_or_equal" => a <= b,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        "is_empty" => match actual {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        },
        "is_not_empty" => !evaluate_operator("is_empty", actual, expected)?,
        other => {
            return Err(NodeError::Config(format!("unknown operator: {other}")));
        }
    };
    Ok(result)
}

/// Multi-way branch. First matching route wins, `default` otherwise.
pub struct SwitchHandler;

const SWITCH_FIELDS: &[FieldSpec] = &[FieldSpec::required("field", FieldType::String)];

#[async_trait]
impl NodeHandler for SwitchHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        SWITCH_FIELDS
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let field = config
            .get("field")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Config("switch node needs 'field'".into()))?;
        let actual = lookup_path(&input, field);
        let routes = config
            .get("routes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for route in &routes {
            let matches = match (route.get("value"), &actual) {
                (Some(expected), Some(actual)) => expected == actual,
                (Some(Value::Null), None) => true,
                _ => false,
            };
            if matches {
                let handle = route
                    .get("handle")
                    .and_then(|v| v.as_str())
                    .unwrap_or("default");
                return Ok(NodeResult::with_handle(input, handle));
            }
        }
        Ok(NodeResult::ok(input))
    }
}

/// Join point: publishes the merged upstream input unchanged.
pub struct MergeHandler;

#[async_trait]
impl NodeHandler for MergeHandler {
    async fn execute(
        &self,
        input: Value,
        _config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::ok(input))
    }
}

/// Writes execution variables and forwards the combined data.
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let values = config
            .get("values")
            .or_else(|| config.get("variables"))
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let mut data = match input {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in values {
            ctx.state.set_variable(key.clone(), value.clone());
            data.insert(key, value);
        }
        Ok(NodeResult::ok(Value::Object(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution_context::ExecutionContext;
    use crate::core::runtime_context::RuntimeContext;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    async fn run(
        handler: &dyn NodeHandler,
        input: Value,
        config: Value,
    ) -> Result<NodeResult, NodeError> {
        let mut state = ExecutionContext::new(Uuid::new_v4(), 1);
        let mut ctx = NodeContext::new(
            state.execution_id,
            1,
            "n",
            &mut state,
            Arc::new(RuntimeContext::default()),
            CancellationToken::new(),
            &[],
        );
        handler.execute(input, &config, &mut ctx).await
    }

    #[tokio::test]
    async fn test_if_expression_true_branch() {
        let result = run(
            &IfHandler,
            json!({"batch_id": 2500}),
            json!({"expression": "batch_id > 2000"}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "true");
    }

    #[tokio::test]
    async fn test_if_expression_false_branch() {
        let result = run(
            &IfHandler,
            json!({"batch_id": 1500}),
            json!({"expression": "batch_id > 2000"}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "false");
    }

    #[tokio::test]
    async fn test_if_expression_string_equality() {
        let result = run(
            &IfHandler,
            json!({"status": "active"}),
            json!({"expression": "status == 'active'"}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "true");
    }

    #[tokio::test]
    async fn test_if_field_operator_value() {
        let result = run(
            &IfHandler,
            json!({"data": {"count": 0}}),
            json!({"field": "data.count", "operator": "is_empty"}),
        )
        .await
        .unwrap();
        // Zero is a value, not emptiness.
        assert_eq!(result.output_handle, "false");

        let result = run(
            &IfHandler,
            json!({"name": "alice"}),
            json!({"field": "name", "operator": "contains", "value": "lic"}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "true");
    }

    #[tokio::test]
    async fn test_if_missing_field_routes_false() {
        let result = run(
            &IfHandler,
            json!({}),
            json!({"expression": "missing > 5"}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "false");
    }

    #[tokio::test]
    async fn test_if_without_config_is_config_error() {
        let err = run(&IfHandler, json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[tokio::test]
    async fn test_switch_routes() {
        let config = json!({
            "field": "kind",
            "routes": [
                {"value": "a", "handle": "first"},
                {"value": "b", "handle": "second"}
            ]
        });
        let result = run(&SwitchHandler, json!({"kind": "b"}), config.clone())
            .await
            .unwrap();
        assert_eq!(result.output_handle, "second");

        let result = run(&SwitchHandler, json!({"kind": "zzz"}), config)
            .await
            .unwrap();
        assert_eq!(result.output_handle, "default");
    }

    #[tokio::test]
    async fn test_set_writes_variables_and_merges() {
        let mut state = ExecutionContext::new(Uuid::new_v4(), 1);
        let mut ctx = NodeContext::new(
            state.execution_id,
            1,
            "s",
            &mut state,
            Arc::new(RuntimeContext::default()),
            CancellationToken::new(),
            &[],
        );
        let result = SetHandler
            .execute(
                json!({"existing": 1}),
                &json!({"values": {"status": "active"}}),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(result.data["existing"], 1);
        assert_eq!(result.data["status"], "active");
        assert_eq!(state.get_variable("status"), Some(&json!("active")));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("42"), json!(42));
        assert_eq!(parse_literal("4.5"), json!(4.5));
        assert_eq!(parse_literal("true"), json!(true));
        assert_eq!(parse_literal("'text'"), json!("text"));
        assert_eq!(parse_literal("bare"), json!("bare"));
    }
}
