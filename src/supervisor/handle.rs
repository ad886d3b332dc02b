//! Execution handles and the execution state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of one execution. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    WaitingHuman,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, WaitingHuman) | (WaitingHuman, Running) => true,
            // Any non-terminal state may be cancelled; running-family states
            // may complete or fail.
            (_, Cancelled) => true,
            (Running | Paused | WaitingHuman, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::WaitingHuman => "waiting_human",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Terminal failure details carried by a handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub error_kind: String,
    pub failing_node_id: Option<String>,
    pub message: String,
}

/// A node failure recorded during the run, terminal or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Control-plane record for one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub user_id: i64,
    pub state: ExecutionState,
    pub current_node: Option<String>,
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Id of the pending HITL request while in `WaitingHuman`.
    pub pending_hitl: Option<String>,
    /// Loop iterations keyed by `node_id:handle`.
    pub loop_counters: HashMap<String, u32>,
    pub error: Option<ExecutionFailure>,
    pub cancel_reason: Option<String>,
    pub execution_errors: Vec<NodeFailure>,
    pub parent_execution_id: Option<Uuid>,
    pub nesting_depth: u32,
    /// Workflow ids from the root execution down to this one.
    #[serde(skip)]
    pub workflow_chain: Vec<String>,
    pub completed_nodes: u32,
    pub total_nodes: u32,
}

impl ExecutionHandle {
    pub fn new(
        execution_id: Uuid,
        workflow_id: String,
        user_id: i64,
        started_at: DateTime<Utc>,
        total_nodes: u32,
    ) -> Self {
        ExecutionHandle {
            execution_id,
            workflow_id,
            user_id,
            state: ExecutionState::Pending,
            current_node: None,
            progress: 0.0,
            started_at,
            completed_at: None,
            pending_hitl: None,
            loop_counters: HashMap::new(),
            error: None,
            cancel_reason: None,
            execution_errors: Vec::new(),
            parent_execution_id: None,
            nesting_depth: 0,
            workflow_chain: Vec::new(),
            completed_nodes: 0,
            total_nodes,
        }
    }

    /// Apply a transition, ignoring illegal ones. Returns whether the state
    /// actually changed.
    pub fn transition(&mut self, next: ExecutionState) -> bool {
        if self.state == next || !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next == ExecutionState::Completed {
            self.progress = 100.0;
        }
        true
    }

    pub fn record_error(&mut self, node_id: &str, error: String, at: DateTime<Utc>) {
        self.execution_errors.push(NodeFailure {
            node_id: node_id.to_string(),
            error,
            at,
        });
    }

    pub fn record_node_completed(&mut self) {
        self.completed_nodes += 1;
        if self.total_nodes > 0 {
            self.progress =
                (self.completed_nodes as f32 / self.total_nodes as f32 * 100.0).min(100.0);
        }
    }
}
