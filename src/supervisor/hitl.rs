//! Human-in-the-loop request model.
//!
//! Each request is a single-shot rendezvous: the execution side blocks on a
//! oneshot receiver guarded by the request timeout, the control surface
//! delivers at most one authenticated response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Why the human is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlKind {
    Approval,
    Clarification,
    ErrorRecovery,
}

impl std::fmt::Display for HitlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HitlKind::Approval => "approval",
            HitlKind::Clarification => "clarification",
            HitlKind::ErrorRecovery => "error_recovery",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    Pending,
    Responded,
    TimedOut,
    Cancelled,
}

/// A human-in-the-loop interaction request.
#[derive(Debug, Clone, Serialize)]
pub struct HitlRequest {
    pub id: String,
    pub execution_id: Uuid,
    pub user_id: i64,
    pub kind: HitlKind,
    pub node_id: Option<String>,
    pub title: String,
    pub message: String,
    /// Empty means a free-form response.
    pub options: Vec<String>,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    pub status: HitlStatus,
    pub response: Option<Value>,
}

/// Supervisor-side bookkeeping for one request: the public record plus the
/// single-shot delivery channel while the waiter is parked.
pub struct HitlEntry {
    pub request: HitlRequest,
    pub responder: Option<oneshot::Sender<Value>>,
}

impl HitlEntry {
    pub fn new(request: HitlRequest) -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (
            HitlEntry {
                request,
                responder: Some(tx),
            },
            rx,
        )
    }
}
