//! The supervision hook contract between supervisor and graph runner.
//!
//! The runner calls `before_node` ahead of every node (the pause gate and
//! cancel flag live behind it), `after_node` on every published result
//! (loop accounting and the hard loop ceiling live there), and `on_error`
//! when retries are exhausted and no error route exists.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NodeError;
use crate::nodes::handler::NodeResult;

/// Why a hook aborted the execution.
#[derive(Debug, Clone)]
pub enum AbortReason {
    Cancelled(String),
    LoopLimit { counter_key: String },
    Supervision(String),
}

/// Decision returned from `before_node` / `after_node`.
#[derive(Debug, Clone)]
pub enum Decision {
    Continue,
    Abort(AbortReason),
}

/// Decision returned from `on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Terminate the execution with the node's error.
    Abort,
    /// Publish the error on its handle and keep driving the graph.
    Continue,
    /// Re-run the failed node.
    Retry,
}

/// Controller hooks invoked at every node boundary.
#[async_trait]
pub trait SupervisionHooks: Send + Sync {
    async fn before_node(&self, execution_id: Uuid, node_id: &str) -> Decision;

    async fn after_node(
        &self,
        execution_id: Uuid,
        node_id: &str,
        result: &NodeResult,
        duration_ms: u64,
    ) -> Decision;

    async fn on_error(&self, execution_id: Uuid, node_id: &str, error: &NodeError)
        -> ErrorDecision;
}

/// Hooks that never intervene. Lets the runner operate stand-alone.
pub struct NoopHooks;

#[async_trait]
impl SupervisionHooks for NoopHooks {
    async fn before_node(&self, _execution_id: Uuid, _node_id: &str) -> Decision {
        Decision::Continue
    }

    async fn after_node(
        &self,
        _execution_id: Uuid,
        _node_id: &str,
        _result: &NodeResult,
        _duration_ms: u64,
    ) -> Decision {
        Decision::Continue
    }

    async fn on_error(
        &self,
        _execution_id: Uuid,
        _node_id: &str,
        _error: &NodeError,
    ) -> ErrorDecision {
        ErrorDecision::Abort
    }
}
