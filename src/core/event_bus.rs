//! Lifecycle events and their emission.
//!
//! Delivery is best-effort: the per-execution channel drops events when the
//! subscriber lags, and sink callbacks are isolated so a broken sink can
//! never take down a running execution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::supervisor::handle::ExecutionState;

/// Events emitted over the lifetime of one execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionCreated {
        execution_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        execution_id: Uuid,
        state: ExecutionState,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        output_handle: String,
        duration_ms: u64,
        truncated_output: String,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        error_kind: String,
        message: String,
    },
    NodeRetrying {
        execution_id: Uuid,
        node_id: String,
        attempt: u32,
        error: String,
    },
    HitlRequested {
        request_id: String,
        execution_id: Uuid,
        kind: String,
        message: String,
        options: Vec<String>,
    },
    HitlResolved {
        request_id: String,
        response: Value,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        output: Value,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error_kind: String,
        failing_node_id: Option<String>,
        message: String,
    },
}

/// External consumer of every event. Must tolerate drops and, across
/// different node ids, reordering.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Sender wrapper with an atomic active flag so emission is cheap once the
/// subscriber is gone.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<ExecutionEvent>,
    active: Arc<AtomicBool>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(
        tx: mpsc::Sender<ExecutionEvent>,
        active: Arc<AtomicBool>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        EventEmitter { tx, active, sink }
    }

    /// Emitter that discards everything. Useful for detached runners.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        EventEmitter {
            tx,
            active: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Some(sink) = &self.sink {
            // A sink must never crash the execution it observes.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| sink.on_event(&event)));
            if result.is_err() {
                error!("event sink panicked; event dropped from sink");
            }
        }
        if self.is_active() {
            if self.tx.try_send(event).is_err() {
                debug!("event channel full or closed; event dropped");
            }
        }
    }
}

/// Serialize a node output for event payloads, bounded to `limit` bytes.
pub fn truncate_output(value: &Value, limit: usize) -> String {
    let mut text = value.to_string();
    if text.len() > limit {
        let mut cut = limit;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
