//! Execution-terminal error types.

use thiserror::Error;

use super::NodeError;

/// Errors that terminate a running execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Node execution failed: node={node_id}, error={message}")]
    NodeFailed {
        node_id: String,
        error_kind: &'static str,
        message: String,
    },
    #[error("Loop limit exceeded at '{counter_key}'")]
    LoopLimitExceeded { counter_key: String },
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(u32),
    #[error("Execution aborted: {0}")]
    Aborted(String),
    #[error("Execution cancelled: {0}")]
    Cancelled(String),
}

impl WorkflowError {
    pub fn node_failed(node_id: impl Into<String>, error: &NodeError) -> Self {
        WorkflowError::NodeFailed {
            node_id: node_id.into(),
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Stable tag used in events and execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NodeFailed { error_kind, .. } => error_kind,
            WorkflowError::LoopLimitExceeded { .. } => "loop_limit_exceeded",
            WorkflowError::MaxStepsExceeded(_) => "max_steps_exceeded",
            WorkflowError::Aborted(_) => "aborted",
            WorkflowError::Cancelled(_) => "cancelled",
        }
    }

    /// Node the failure is attributed to, when there is one.
    pub fn failing_node(&self) -> Option<&str> {
        match self {
            WorkflowError::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let err = WorkflowError::node_failed("n1", &NodeError::Timeout);
        assert!(err.to_string().contains("n1"));
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.failing_node(), Some("n1"));

        assert_eq!(
            WorkflowError::LoopLimitExceeded {
                counter_key: "loop1:loop".into()
            }
            .to_string(),
            "Loop limit exceeded at 'loop1:loop'"
        );
        assert_eq!(
            WorkflowError::Cancelled("user request".into()).kind(),
            "cancelled"
        );
    }
}
