//! Process-level capabilities available to every execution.
//!
//! The runtime context is the bag of collaborators a handler may reach:
//! the clock, the human-in-the-loop gate, and the sub-workflow runner.
//! All of them are optional except the clock so the runner stays usable in
//! isolation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ControlError;
use crate::supervisor::hitl::HitlKind;

/// Time source. Swappable so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Everything needed to open a human-in-the-loop round-trip.
#[derive(Debug, Clone)]
pub struct HitlPrompt {
    pub kind: HitlKind,
    pub title: String,
    pub message: String,
    /// Empty options mean a free-form response.
    pub options: Vec<String>,
    pub timeout_secs: u64,
}

/// Blocks an execution until an authenticated human response arrives.
#[async_trait]
pub trait HumanGate: Send + Sync {
    async fn ask_human(
        &self,
        execution_id: Uuid,
        prompt: HitlPrompt,
    ) -> Result<Value, ControlError>;
}

/// Where a sub-workflow definition comes from.
#[derive(Debug, Clone)]
pub enum SubworkflowSource {
    Inline(Value),
    Stored(String),
}

/// Spawns and awaits a child execution on behalf of a parent node.
#[async_trait]
pub trait SubworkflowRunner: Send + Sync {
    async fn run_subworkflow(
        &self,
        parent_execution_id: Uuid,
        source: SubworkflowSource,
        input: Value,
    ) -> Result<Value, ControlError>;
}

/// Capability bag shared by all executions of one supervisor.
#[derive(Clone)]
pub struct RuntimeContext {
    pub clock: Arc<dyn Clock>,
    pub human_gate: Option<Arc<dyn HumanGate>>,
    pub subworkflows: Option<Arc<dyn SubworkflowRunner>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        RuntimeContext {
            clock: Arc::new(SystemClock),
            human_gate: None,
            subworkflows: None,
        }
    }
}

impl RuntimeContext {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_human_gate(mut self, gate: Arc<dyn HumanGate>) -> Self {
        self.human_gate = Some(gate);
        self
    }

    pub fn with_subworkflows(mut self, runner: Arc<dyn SubworkflowRunner>) -> Self {
        self.subworkflows = Some(runner);
        self
    }
}
