//! Per-execution control signals.
//!
//! Pause is a gate observed at the `before_node` boundary; cancellation is a
//! token observed at every suspension point. Both are cooperative, there is
//! no preemption.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Gate that blocks the runner between nodes while paused.
#[derive(Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<bool>>,
}

impl PauseGate {
    /// New gate in the running (open) position.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        PauseGate { tx: Arc::new(tx) }
    }

    pub fn pause(&self) {
        let _ = self.tx.send(false);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.tx.borrow()
    }

    /// Wait until the gate is open.
    pub async fn wait_running(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The full signal set owned by the supervisor for one execution.
#[derive(Clone)]
pub struct ControlSignals {
    pub pause: PauseGate,
    pub cancel: CancellationToken,
}

impl ControlSignals {
    pub fn new() -> Self {
        ControlSignals {
            pause: PauseGate::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn trigger_cancel(&self) {
        // Unblock a paused runner so it can observe the cancel flag.
        self.pause.resume();
        self.cancel.cancel();
    }
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self::new()
    }
}
