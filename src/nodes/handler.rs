//! The node handler capability.
//!
//! A handler is everything the kernel knows about a node type: its config
//! field shape, the credential types it may use, the output handles it can
//! select, and an async execute operation. Concrete integrations live
//! outside the kernel and plug in through this trait.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::execution_context::ExecutionContext;
use crate::core::runtime_context::{HitlPrompt, RuntimeContext};
use crate::credential::CredentialHandle;
use crate::error::{ControlError, NodeError};

pub const DEFAULT_HANDLE: &str = "default";
pub const ERROR_HANDLE: &str = "error";
pub const LOOP_HANDLE: &str = "loop";
pub const DONE_HANDLE: &str = "done";
pub const TRUE_HANDLE: &str = "true";
pub const FALSE_HANDLE: &str = "false";

/// Declared type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Select,
    SecretRef,
    Code,
}

impl FieldType {
    /// Shallow shape check against a JSON value. Strings carrying template
    /// expressions always pass since they resolve at runtime.
    pub fn matches(&self, value: &Value) -> bool {
        if let Some(s) = value.as_str() {
            if s.contains("{{") {
                return true;
            }
        }
        match self {
            FieldType::String | FieldType::Select | FieldType::SecretRef | FieldType::Code => {
                value.is_string()
            }
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

/// One declared config field of a node type.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, field_type: FieldType) -> Self {
        FieldSpec {
            name,
            field_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, field_type: FieldType) -> Self {
        FieldSpec {
            name,
            field_type,
            required: false,
        }
    }
}

/// Coarse value classification used for soft edge-compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Json,
    Text,
    List,
    Error,
}

/// Classification of a handler-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// Failure details attached to a routable error result.
#[derive(Debug, Clone)]
pub struct NodeFailureInfo {
    pub message: String,
    pub kind: FailureKind,
}

/// Outcome of one node execution.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Value map published into the downstream scope.
    pub data: Value,
    /// Output handle selecting which outgoing edges fire.
    pub output_handle: String,
    /// Present when the handler reports a routable failure.
    pub error: Option<NodeFailureInfo>,
}

impl NodeResult {
    pub fn ok(data: Value) -> Self {
        NodeResult {
            data,
            output_handle: DEFAULT_HANDLE.to_string(),
            error: None,
        }
    }

    pub fn with_handle(data: Value, handle: impl Into<String>) -> Self {
        NodeResult {
            data,
            output_handle: handle.into(),
            error: None,
        }
    }

    /// A failure the runner may route through an `error` handle.
    pub fn error(message: impl Into<String>, kind: FailureKind) -> Self {
        NodeResult {
            data: Value::Object(serde_json::Map::new()),
            output_handle: ERROR_HANDLE.to_string(),
            error: Some(NodeFailureInfo {
                message: message.into(),
                kind,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.output_handle == ERROR_HANDLE
    }
}

/// Per-node execution scope handed to a handler.
pub struct NodeContext<'a> {
    pub execution_id: Uuid,
    pub user_id: i64,
    pub node_id: &'a str,
    /// The execution-owned state bag. Exactly one runner mutates it.
    pub state: &'a mut ExecutionContext,
    pub runtime: Arc<RuntimeContext>,
    pub cancel: CancellationToken,
    allowed_credentials: &'a [String],
}

impl<'a> NodeContext<'a> {
    pub fn new(
        execution_id: Uuid,
        user_id: i64,
        node_id: &'a str,
        state: &'a mut ExecutionContext,
        runtime: Arc<RuntimeContext>,
        cancel: CancellationToken,
        allowed_credentials: &'a [String],
    ) -> Self {
        NodeContext {
            execution_id,
            user_id,
            node_id,
            state,
            runtime,
            cancel,
            allowed_credentials,
        }
    }

    /// Resolve a credential the node declared during compilation. Using an
    /// undeclared reference is denied even when the execution holds it.
    pub fn credential(&self, reference: &str) -> Result<&CredentialHandle, NodeError> {
        if !self.allowed_credentials.iter().any(|r| r == reference) {
            return Err(NodeError::PermissionDenied(reference.to_string()));
        }
        Ok(self.state.credential(reference))
    }

    /// Block until a human responds, the request times out, or the
    /// execution is cancelled.
    pub async fn ask_human(&self, prompt: HitlPrompt) -> Result<Value, ControlError> {
        let gate = self
            .runtime
            .human_gate
            .as_ref()
            .ok_or(ControlError::NotFound)?;
        gate.ask_human(self.execution_id, prompt).await
    }
}

/// A node type implementation.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Declared config fields, validated at compile time.
    fn fields(&self) -> &'static [FieldSpec] {
        &[]
    }

    /// Credential-type tags this handler may use.
    fn credentials(&self) -> &'static [&'static str] {
        &[]
    }

    /// Output handles this handler can select.
    fn outputs(&self) -> &'static [&'static str] {
        &[DEFAULT_HANDLE]
    }

    /// Whether this node type legitimately produces graph back-edges.
    fn loop_carrying(&self) -> bool {
        false
    }

    /// Whether execution blocks on a human response. Such handlers run
    /// outside the per-node attempt timer; the HITL timeout applies instead.
    fn blocks_on_human(&self) -> bool {
        false
    }

    /// Kind of value produced on the given handle.
    fn output_kind(&self, _handle: &str) -> ValueKind {
        ValueKind::Any
    }

    /// Kinds of input values this handler accepts.
    fn accepts(&self) -> &'static [ValueKind] {
        &[ValueKind::Any]
    }

    /// Run the node against the gathered input and resolved config.
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_matches() {
        assert!(FieldType::String.matches(&json!("x")));
        assert!(!FieldType::String.matches(&json!(1)));
        assert!(FieldType::Number.matches(&json!(3.5)));
        assert!(FieldType::Boolean.matches(&json!(true)));
        assert!(FieldType::SecretRef.matches(&json!("cred-a")));
    }

    #[test]
    fn test_template_expression_bypasses_type_check() {
        assert!(FieldType::Number.matches(&json!("{{ $vars.count }}")));
        assert!(FieldType::Boolean.matches(&json!("{{ $input.flag }}")));
    }

    #[test]
    fn test_node_result_constructors() {
        let ok = NodeResult::ok(json!({"a": 1}));
        assert_eq!(ok.output_handle, DEFAULT_HANDLE);
        assert!(!ok.is_error());

        let err = NodeResult::error("boom", FailureKind::Retryable);
        assert_eq!(err.output_handle, ERROR_HANDLE);
        assert!(err.is_error());
        assert_eq!(err.error.as_ref().unwrap().kind, FailureKind::Retryable);
    }
}
