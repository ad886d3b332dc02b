//! Optional storage collaborator.
//!
//! The kernel keeps no durable state of its own. When a store is attached,
//! the supervisor loads workflow definitions and credentials through it and
//! appends execution and node records around completions. Append failures
//! are logged and never disturb a running execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::credential::CredentialHandle;
use crate::supervisor::handle::ExecutionState;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Record of one finished execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub user_id: i64,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Record of one node completion or failure.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub execution_id: Uuid,
    pub node_id: String,
    pub output_handle: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_workflow(&self, workflow_id: &str) -> Result<Value, StorageError>;

    async fn load_credentials(
        &self,
        user_id: i64,
        refs: &[String],
    ) -> Result<Vec<CredentialHandle>, StorageError>;

    async fn append_execution_record(&self, record: ExecutionRecord) -> Result<(), StorageError>;

    async fn append_node_record(&self, record: NodeRecord) -> Result<(), StorageError>;
}
