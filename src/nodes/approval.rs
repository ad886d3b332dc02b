//! Human approval gate.
//!
//! Blocks the execution until an authenticated response arrives. The wait
//! runs outside the per-node timer; the request timeout governs instead,
//! and a timeout surfaces as a routable node failure.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::DEFAULT_HITL_TIMEOUT_SECS;
use crate::core::runtime_context::HitlPrompt;
use crate::error::{ControlError, NodeError};
use crate::supervisor::hitl::HitlKind;

use super::handler::{FailureKind, FieldSpec, FieldType, NodeContext, NodeHandler, NodeResult};

const APPROVAL_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("message", FieldType::String),
    FieldSpec::optional("title", FieldType::String),
    FieldSpec::optional("timeout_seconds", FieldType::Number),
];

pub struct ApprovalHandler;

#[async_trait]
impl NodeHandler for ApprovalHandler {
    fn fields(&self) -> &'static [FieldSpec] {
        APPROVAL_FIELDS
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["default", "error"]
    }

    fn blocks_on_human(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Config("approval node needs 'message'".into()))?
            .to_string();
        let title = config
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Approval required")
            .to_string();
        let options: Vec<String> = config
            .get("options")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let timeout_secs = config
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_HITL_TIMEOUT_SECS);

        let prompt = HitlPrompt {
            kind: HitlKind::Approval,
            title,
            message,
            options,
            timeout_secs,
        };

        match ctx.ask_human(prompt).await {
            Ok(response) => {
                let mut data = match input {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                data.insert("response".to_string(), response);
                Ok(NodeResult::ok(Value::Object(data)))
            }
            Err(ControlError::TimedOut { timeout_secs }) => Ok(NodeResult {
                data: json!({"timed_out": true}),
                ..NodeResult::error(
                    format!("human response timed out after {timeout_secs}s"),
                    FailureKind::Fatal,
                )
            }),
            Err(ControlError::ExecutionCancelled) => {
                Err(NodeError::Cancelled("cancelled while waiting for human".into()))
            }
            Err(other) => Err(NodeError::Handler(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution_context::ExecutionContext;
    use crate::core::runtime_context::{HumanGate, RuntimeContext};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct ScriptedGate(Value);

    #[async_trait]
    impl HumanGate for ScriptedGate {
        async fn ask_human(
            &self,
            _execution_id: Uuid,
            _prompt: HitlPrompt,
        ) -> Result<Value, ControlError> {
            Ok(self.0.clone())
        }
    }

    struct TimeoutGate;

    #[async_trait]
    impl HumanGate for TimeoutGate {
        async fn ask_human(
            &self,
            _execution_id: Uuid,
            prompt: HitlPrompt,
        ) -> Result<Value, ControlError> {
            Err(ControlError::TimedOut {
                timeout_secs: prompt.timeout_secs,
            })
        }
    }

    async fn run_with_gate(
        gate: Arc<dyn HumanGate>,
        config: Value,
    ) -> Result<NodeResult, NodeError> {
        let mut state = ExecutionContext::new(Uuid::new_v4(), 1);
        let runtime = Arc::new(RuntimeContext::default().with_human_gate(gate));
        let mut ctx = NodeContext::new(
            state.execution_id,
            1,
            "gate",
            &mut state,
            runtime,
            CancellationToken::new(),
            &[],
        );
        ApprovalHandler
            .execute(json!({"payload": 1}), &config, &mut ctx)
            .await
    }

    #[tokio::test]
    async fn test_approval_forwards_response() {
        let result = run_with_gate(
            Arc::new(ScriptedGate(json!("yes"))),
            json!({"message": "approve?", "options": ["yes", "no"], "timeout_seconds": 60}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "default");
        assert_eq!(result.data["response"], "yes");
        assert_eq!(result.data["payload"], 1);
    }

    #[tokio::test]
    async fn test_approval_timeout_is_routable_error() {
        let result = run_with_gate(
            Arc::new(TimeoutGate),
            json!({"message": "approve?", "timeout_seconds": 5}),
        )
        .await
        .unwrap();
        assert_eq!(result.output_handle, "error");
        assert!(result.error.unwrap().message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_approval_without_gate_fails() {
        let mut state = ExecutionContext::new(Uuid::new_v4(), 1);
        let mut ctx = NodeContext::new(
            state.execution_id,
            1,
            "gate",
            &mut state,
            Arc::new(RuntimeContext::default()),
            CancellationToken::new(),
            &[],
        );
        let err = ApprovalHandler
            .execute(json!({}), &json!({"message": "approve?"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Handler(_)));
    }
}
