//! Compilation error types.

use thiserror::Error;

/// Errors raised while compiling a workflow definition into an
/// [`ExecutionPlan`](crate::compiler::ExecutionPlan).
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Workflow parse error: {0}")]
    Parse(String),
    #[error("Workflow has no entry node")]
    NoEntry,
    #[error("Duplicate node id: {node_id}")]
    DuplicateNode { node_id: String },
    #[error("Edge '{edge_id}' references missing node: {node_id}")]
    EdgeEndpoint { edge_id: String, node_id: String },
    #[error("Unknown node type '{type_tag}' on node {node_id}")]
    UnknownNodeType { node_id: String, type_tag: String },
    #[error("Cycle without a loop-carrying node: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },
    #[error("Node '{node_id}' is not reachable from any entry node")]
    Orphan { node_id: String },
    #[error("Credential '{reference}' cannot be bound for node {node_id}: {reason}")]
    Credential {
        node_id: String,
        reference: String,
        reason: String,
    },
    #[error("Invalid config for node {node_id}, field '{field}': {message}")]
    Config {
        node_id: String,
        field: String,
        message: String,
    },
}

impl CompileError {
    /// Stable tag used in events and execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Parse(_) => "parse_error",
            CompileError::NoEntry => "no_entry",
            CompileError::DuplicateNode { .. } => "duplicate_node",
            CompileError::EdgeEndpoint { .. } => "invalid_edge",
            CompileError::UnknownNodeType { .. } => "unknown_node_type",
            CompileError::Cycle { .. } => "dag_cycle",
            CompileError::Orphan { .. } => "orphan_node",
            CompileError::Credential { .. } => "missing_credential",
            CompileError::Config { .. } => "invalid_config",
        }
    }
}
