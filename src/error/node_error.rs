//! Node-level error types.

use thiserror::Error;

/// Errors raised by a node handler or by the runner around one.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Handler error: {0}")]
    Handler(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Permission denied: credential '{0}' was not declared by this node")]
    PermissionDenied(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl NodeError {
    /// Whether the runner may retry the attempt.
    ///
    /// Timeouts and handler failures are retryable; config, template and
    /// permission errors are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Timeout | NodeError::Handler(_))
    }

    /// Stable tag used in events and execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Config(_) => "config_error",
            NodeError::Handler(_) => "handler_error",
            NodeError::Template(_) => "template_error",
            NodeError::Timeout => "timeout",
            NodeError::PermissionDenied(_) => "permission_denied",
            NodeError::Serialization(_) => "serialization_error",
            NodeError::Cancelled(_) => "cancelled",
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}
