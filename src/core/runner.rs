//! The graph runner.
//!
//! Drives one compiled plan to a terminal state: pops ready nodes, invokes
//! handlers under cancellable timers with retry and backoff, applies
//! conditional and loop routing, and emits lifecycle events. All control
//! (pause, cancel, loop ceilings) arrives through the supervision hooks and
//! the cancellation token; the runner itself is single-threaded per
//! execution.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compiler::{ExecutionPlan, PlannedNode};
use crate::config::{EngineConfig, SYSTEM_MAX_LOOPS};
use crate::core::event_bus::{truncate_output, EventEmitter, ExecutionEvent};
use crate::core::execution_context::ExecutionContext;
use crate::core::runtime_context::RuntimeContext;
use crate::dsl::schema::ErrorPolicy;
use crate::error::{NodeError, WorkflowError};
use crate::nodes::handler::{
    FailureKind, NodeContext, NodeResult, DEFAULT_HANDLE, ERROR_HANDLE, LOOP_HANDLE,
};
use crate::supervisor::hooks::{AbortReason, Decision, ErrorDecision, SupervisionHooks};

/// Runner tunables derived from the engine config and the plan settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub error_policy: ErrorPolicy,
    pub max_steps: u32,
    pub grace_period: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter: bool,
    pub event_output_limit: usize,
}

impl RunnerConfig {
    pub fn from_engine(config: &EngineConfig, error_policy: ErrorPolicy) -> Self {
        RunnerConfig {
            error_policy,
            max_steps: config.max_steps,
            grace_period: Duration::from_millis(config.grace_period_ms),
            backoff_base: Duration::from_millis(config.retry_backoff_base_ms),
            backoff_cap: Duration::from_millis(config.retry_backoff_cap_ms),
            jitter: config.retry_jitter,
            event_output_limit: config.event_output_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Taken,
    Skipped,
}

enum RunError {
    Node(NodeError),
    Cancelled(String),
}

/// Drives a single execution over its plan.
pub struct GraphRunner {
    plan: Arc<ExecutionPlan>,
    hooks: Arc<dyn SupervisionHooks>,
    emitter: EventEmitter,
    runtime: Arc<RuntimeContext>,
    cancel: CancellationToken,
    config: RunnerConfig,
}

impl GraphRunner {
    pub fn new(
        plan: Arc<ExecutionPlan>,
        hooks: Arc<dyn SupervisionHooks>,
        emitter: EventEmitter,
        runtime: Arc<RuntimeContext>,
        cancel: CancellationToken,
        config: RunnerConfig,
    ) -> Self {
        GraphRunner {
            plan,
            hooks,
            emitter,
            runtime,
            cancel,
            config,
        }
    }

    /// Run to a terminal state, returning the merged terminal output.
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        let execution_id = ctx.execution_id;
        let mut edge_states = vec![EdgeState::Pending; self.plan.edges.len()];
        let mut completed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = self.plan.entry_nodes.iter().cloned().collect();
        let mut steps = 0u32;

        while let Some(node_id) = queue.pop_front() {
            if completed.contains(&node_id) || skipped.contains(&node_id) {
                continue;
            }
            steps += 1;
            if steps > self.config.max_steps {
                return Err(WorkflowError::MaxStepsExceeded(self.config.max_steps));
            }

            match self.hooks.before_node(execution_id, &node_id).await {
                Decision::Continue => {}
                Decision::Abort(reason) => return Err(abort_to_error(reason)),
            }
            if self.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled("execution cancelled".into()));
            }

            let node = self
                .plan
                .node(&node_id)
                .expect("queued nodes exist in the plan");

            let mut input_value = if self.plan.entry_nodes.contains(&node_id) {
                merge_values(input.clone(), ctx.resolve_input(&self.plan.all_sources(&node_id)))
            } else {
                ctx.resolve_input(&self.plan.all_sources(&node_id))
            };
            if !input_value.is_object() {
                input_value = json!({});
            }

            let config = match crate::template::resolve_config(&node.config, &input_value, ctx) {
                Ok(config) => config,
                Err(err) => {
                    self.emit_node_failed(execution_id, &node_id, &err);
                    match self
                        .handle_unrouted_failure(execution_id, &node_id, err, ctx, &mut queue)
                        .await?
                    {
                        FailureOutcome::Retried => {
                            // The node goes back on the queue untouched.
                            continue;
                        }
                        FailureOutcome::BranchSkipped => {
                            self.skip_downstream(&node_id, &mut edge_states, &mut completed, &mut skipped, &mut queue);
                            continue;
                        }
                    }
                }
            };

            let started = Instant::now();
            let outcome = self
                .execute_with_retry(execution_id, node, &input_value, &config, ctx)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(result) => {
                    let unrouted_error = result.is_error()
                        && self
                            .plan
                            .edges_for_handle(&node_id, ERROR_HANDLE)
                            .is_empty();
                    if unrouted_error {
                        let message = result
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_else(|| "node reported an error".to_string());
                        let err = NodeError::Handler(message);
                        self.emit_node_failed(execution_id, &node_id, &err);
                        match self
                            .handle_unrouted_failure(execution_id, &node_id, err, ctx, &mut queue)
                            .await?
                        {
                            FailureOutcome::Retried => continue,
                            FailureOutcome::BranchSkipped => {
                                self.skip_downstream(&node_id, &mut edge_states, &mut completed, &mut skipped, &mut queue);
                                continue;
                            }
                        }
                    }

                    match self
                        .hooks
                        .after_node(execution_id, &node_id, &result, duration_ms)
                        .await
                    {
                        Decision::Continue => {}
                        Decision::Abort(reason) => return Err(abort_to_error(reason)),
                    }

                    if result.output_handle == LOOP_HANDLE {
                        let count = ctx.increment_loop(&node_id);
                        if count > SYSTEM_MAX_LOOPS {
                            return Err(WorkflowError::LoopLimitExceeded {
                                counter_key: format!("{node_id}:{LOOP_HANDLE}"),
                            });
                        }
                    }

                    if let Some(failure) = &result.error {
                        self.emitter.emit(ExecutionEvent::NodeFailed {
                            execution_id,
                            node_id: node_id.clone(),
                            error_kind: match failure.kind {
                                FailureKind::Retryable => "retryable".to_string(),
                                FailureKind::Fatal => "fatal".to_string(),
                            },
                            message: failure.message.clone(),
                        });
                    }

                    ctx.publish_output(&node_id, result.data.clone(), &result.output_handle);
                    completed.insert(node_id.clone());
                    self.emitter.emit(ExecutionEvent::NodeCompleted {
                        execution_id,
                        node_id: node_id.clone(),
                        output_handle: result.output_handle.clone(),
                        duration_ms,
                        truncated_output: truncate_output(
                            &ctx.redact_secrets(&result.data),
                            self.config.event_output_limit,
                        ),
                    });

                    self.route(
                        &node_id,
                        &result.output_handle,
                        &result.data,
                        ctx,
                        &mut edge_states,
                        &mut completed,
                        &mut skipped,
                        &mut queue,
                    );
                }
                Err(RunError::Cancelled(reason)) => {
                    return Err(WorkflowError::Cancelled(reason));
                }
                Err(RunError::Node(err)) => {
                    self.emit_node_failed(execution_id, &node_id, &err);
                    let error_edges = self.plan.edges_for_handle(&node_id, ERROR_HANDLE);
                    if !error_edges.is_empty() {
                        // Routable failure: publish on the error handle and
                        // keep driving.
                        let data = json!({"error": err.to_string(), "error_kind": err.kind()});
                        ctx.publish_output(&node_id, data.clone(), ERROR_HANDLE);
                        completed.insert(node_id.clone());
                        self.emitter.emit(ExecutionEvent::NodeCompleted {
                            execution_id,
                            node_id: node_id.clone(),
                            output_handle: ERROR_HANDLE.to_string(),
                            duration_ms,
                            truncated_output: truncate_output(
                                &ctx.redact_secrets(&data),
                                self.config.event_output_limit,
                            ),
                        });
                        self.route(
                            &node_id,
                            ERROR_HANDLE,
                            &data,
                            ctx,
                            &mut edge_states,
                            &mut completed,
                            &mut skipped,
                            &mut queue,
                        );
                    } else {
                        match self
                            .handle_unrouted_failure(execution_id, &node_id, err, ctx, &mut queue)
                            .await?
                        {
                            FailureOutcome::Retried => continue,
                            FailureOutcome::BranchSkipped => {
                                self.skip_downstream(&node_id, &mut edge_states, &mut completed, &mut skipped, &mut queue);
                            }
                        }
                    }
                }
            }
        }

        Ok(self.collect_output(ctx, &completed))
    }

    /// Decide what happens to a failure that has no error route.
    async fn handle_unrouted_failure(
        &self,
        execution_id: uuid::Uuid,
        node_id: &str,
        err: NodeError,
        _ctx: &mut ExecutionContext,
        queue: &mut VecDeque<String>,
    ) -> Result<FailureOutcome, WorkflowError> {
        match self.hooks.on_error(execution_id, node_id, &err).await {
            ErrorDecision::Abort => Err(WorkflowError::node_failed(node_id, &err)),
            ErrorDecision::Retry => {
                debug!(node_id, "supervision requested a retry");
                queue.push_front(node_id.to_string());
                Ok(FailureOutcome::Retried)
            }
            ErrorDecision::Continue => {
                warn!(node_id, error = %err, "error without route; branch dropped");
                Ok(FailureOutcome::BranchSkipped)
            }
        }
    }

    fn emit_node_failed(&self, execution_id: uuid::Uuid, node_id: &str, err: &NodeError) {
        self.emitter.emit(ExecutionEvent::NodeFailed {
            execution_id,
            node_id: node_id.to_string(),
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    /// Run one node with retries, each attempt under a cancellable timer.
    async fn execute_with_retry(
        &self,
        execution_id: uuid::Uuid,
        node: &PlannedNode,
        input: &Value,
        config: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeResult, RunError> {
        let attempts = node.retries + 1;
        let mut last_err: Option<NodeError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {
                        return Err(RunError::Cancelled("cancelled during retry backoff".into()));
                    }
                }
            }

            let mut node_ctx = NodeContext::new(
                execution_id,
                ctx.user_id,
                &node.id,
                ctx,
                self.runtime.clone(),
                self.cancel.clone(),
                &node.credential_refs,
            );

            let blocks_on_human = node.handler.blocks_on_human();
            let timeout = node.timeout;
            let attempt_fut = async {
                let fut = node.handler.execute(input.clone(), config, &mut node_ctx);
                if blocks_on_human {
                    // The HITL wait carries its own timeout.
                    fut.await
                } else {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(res) => res,
                        Err(_) => Err(NodeError::Timeout),
                    }
                }
            };
            tokio::pin!(attempt_fut);

            let attempt_result = tokio::select! {
                biased;
                res = &mut attempt_fut => res,
                _ = self.cancel.cancelled() => {
                    // Give the in-flight handler a grace window, then
                    // abandon it; side effects are best-effort.
                    let _ = tokio::time::timeout(self.config.grace_period, &mut attempt_fut).await;
                    return Err(RunError::Cancelled("cancelled mid-node".into()));
                }
            };

            match attempt_result {
                Ok(result) => {
                    let retryable_result = result.output_handle == ERROR_HANDLE
                        && result
                            .error
                            .as_ref()
                            .map(|e| e.kind == FailureKind::Retryable)
                            .unwrap_or(false);
                    if retryable_result && attempt + 1 < attempts {
                        let message = result
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_default();
                        self.emitter.emit(ExecutionEvent::NodeRetrying {
                            execution_id,
                            node_id: node.id.clone(),
                            attempt: attempt + 1,
                            error: message.clone(),
                        });
                        last_err = Some(NodeError::Handler(message));
                        continue;
                    }
                    return Ok(result);
                }
                Err(NodeError::Cancelled(reason)) => {
                    return Err(RunError::Cancelled(reason));
                }
                Err(err) => {
                    if err.is_retryable() && attempt + 1 < attempts {
                        self.emitter.emit(ExecutionEvent::NodeRetrying {
                            execution_id,
                            node_id: node.id.clone(),
                            attempt: attempt + 1,
                            error: err.to_string(),
                        });
                        last_err = Some(err);
                        continue;
                    }
                    return Err(RunError::Node(err));
                }
            }
        }

        Err(RunError::Node(last_err.unwrap_or_else(|| {
            NodeError::Handler("retries exhausted".to_string())
        })))
    }

    /// Exponential backoff, capped, with optional full jitter.
    fn backoff_delay(&self, retry_index: u32) -> Duration {
        let exp = retry_index.saturating_sub(1).min(16);
        let base_ms = self.config.backoff_base.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap.as_millis() as u64);
        if self.config.jitter {
            Duration::from_millis((rand::random::<f64>() * delay_ms as f64) as u64)
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Apply the published handle to the outgoing edges and schedule
    /// whatever became ready.
    #[allow(clippy::too_many_arguments)]
    fn route(
        &self,
        node_id: &str,
        handle: &str,
        data: &Value,
        ctx: &mut ExecutionContext,
        edge_states: &mut [EdgeState],
        completed: &mut HashSet<String>,
        skipped: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
    ) {
        let mut taken: HashSet<usize> = self
            .plan
            .edges_for_handle(node_id, handle)
            .into_iter()
            .collect();
        if taken.is_empty() && handle != DEFAULT_HANDLE && !self.plan.outgoing_edges(node_id).is_empty()
        {
            warn!(node_id, handle, "unknown output handle; falling back to default");
            taken = self
                .plan
                .edges_for_handle(node_id, DEFAULT_HANDLE)
                .into_iter()
                .collect();
        }

        for idx in self.plan.outgoing_edges(node_id).to_vec() {
            let edge = self.plan.edge(idx).clone();
            if taken.contains(&idx) {
                if self.plan.is_loop_edge(idx) {
                    // Loop body entry or feedback: schedule afresh.
                    completed.remove(&edge.target);
                    skipped.remove(&edge.target);
                    if self.plan.loop_nodes.contains(&edge.target) && edge.target != node_id {
                        // Body output feeding back accumulates on the loop.
                        ctx.accumulate_result(&edge.target, data.clone());
                    }
                    if !queue.contains(&edge.target) {
                        queue.push_back(edge.target.clone());
                    }
                } else {
                    edge_states[idx] = EdgeState::Taken;
                    self.evaluate_target(&edge.target, edge_states, completed, skipped, queue);
                }
            } else if !self.plan.is_loop_edge(idx) && handle != LOOP_HANDLE {
                // A continuing loop iteration leaves its other edges pending
                // for the eventual done handle.
                edge_states[idx] = EdgeState::Skipped;
                self.evaluate_target(&edge.target, edge_states, completed, skipped, queue);
            }
        }
    }

    /// Enqueue a node once all its non-loop predecessors resolved, or mark
    /// it skipped when no path was taken and cascade.
    fn evaluate_target(
        &self,
        target: &str,
        edge_states: &mut [EdgeState],
        completed: &mut HashSet<String>,
        skipped: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
    ) {
        if completed.contains(target) || skipped.contains(target) {
            return;
        }
        let incoming: Vec<usize> = self
            .plan
            .incoming_edges(target)
            .iter()
            .copied()
            .filter(|idx| !self.plan.is_loop_edge(*idx))
            .collect();
        if incoming
            .iter()
            .any(|idx| edge_states[*idx] == EdgeState::Pending)
        {
            return;
        }
        if incoming
            .iter()
            .any(|idx| edge_states[*idx] == EdgeState::Taken)
        {
            if !queue.contains(&target.to_string()) {
                queue.push_back(target.to_string());
            }
        } else {
            skipped.insert(target.to_string());
            for idx in self.plan.outgoing_edges(target).to_vec() {
                if self.plan.is_loop_edge(idx) {
                    continue;
                }
                edge_states[idx] = EdgeState::Skipped;
                let next = self.plan.edge(idx).target.clone();
                self.evaluate_target(&next, edge_states, completed, skipped, queue);
            }
        }
    }

    /// Skip everything downstream of a dropped branch.
    fn skip_downstream(
        &self,
        node_id: &str,
        edge_states: &mut [EdgeState],
        completed: &mut HashSet<String>,
        skipped: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
    ) {
        for idx in self.plan.outgoing_edges(node_id).to_vec() {
            if self.plan.is_loop_edge(idx) {
                continue;
            }
            edge_states[idx] = EdgeState::Skipped;
            let target = self.plan.edge(idx).target.clone();
            self.evaluate_target(&target, edge_states, completed, skipped, queue);
        }
    }

    /// Merge the outputs of all completed terminal leaves by node id.
    fn collect_output(&self, ctx: &ExecutionContext, completed: &HashSet<String>) -> Value {
        let mut leaves: Vec<&String> = completed
            .iter()
            .filter(|id| self.plan.is_terminal_leaf(id))
            .collect();
        leaves.sort();

        if leaves.len() == 1 {
            return ctx
                .node_output(leaves[0])
                .map(|o| o.data.clone())
                .unwrap_or(Value::Null);
        }

        let mut merged = serde_json::Map::new();
        for leaf in leaves {
            if let Some(output) = ctx.node_output(leaf) {
                match &output.data {
                    Value::Object(map) => {
                        for (k, v) in map {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    Value::Null => {}
                    other => {
                        merged.insert(leaf.clone(), other.clone());
                    }
                }
            }
        }
        Value::Object(merged)
    }
}

enum FailureOutcome {
    Retried,
    BranchSkipped,
}

fn abort_to_error(reason: AbortReason) -> WorkflowError {
    match reason {
        AbortReason::Cancelled(message) => WorkflowError::Cancelled(message),
        AbortReason::LoopLimit { counter_key } => WorkflowError::LoopLimitExceeded { counter_key },
        AbortReason::Supervision(message) => WorkflowError::Aborted(message),
    }
}

fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                base_map.insert(k, v);
            }
            Value::Object(base_map)
        }
        (base, Value::Object(map)) if map.is_empty() => base,
        (_, overlay) => overlay,
    }
}
