//! The supervisor.
//!
//! Singleton per process. Owns the set of active executions and their
//! control signals, spawns graph runners, intercepts every node boundary
//! through the supervision hooks, fulfills human-in-the-loop round-trips,
//! and enforces authorization and resource cleanup. The active-executions
//! map is the only state shared across executions and every mutation goes
//! through its lock.

pub mod handle;
pub mod hitl;
pub mod hooks;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compiler::{compile, ExecutionPlan};
use crate::config::{EngineConfig, SYSTEM_MAX_LOOPS};
use crate::core::event_bus::{EventEmitter, EventSink, ExecutionEvent};
use crate::core::execution_context::ExecutionContext;
use crate::core::runner::{GraphRunner, RunnerConfig};
use crate::core::runtime_context::{
    Clock, HitlPrompt, HumanGate, RuntimeContext, SubworkflowRunner, SubworkflowSource,
    SystemClock,
};
use crate::core::signals::ControlSignals;
use crate::credential::{CredentialError, CredentialProvider, NoCredentials};
use crate::dsl::schema::ErrorPolicy;
use crate::dsl::{parse_workflow, WorkflowSchema};
use crate::error::{CompileError, ControlError, NodeError, WorkflowError};
use crate::nodes::handler::{NodeResult, LOOP_HANDLE};
use crate::nodes::registry::NodeHandlerRegistry;
use crate::storage::{ExecutionRecord, NodeRecord, Storage};

use handle::{ExecutionFailure, ExecutionHandle, ExecutionState};
use hitl::{HitlEntry, HitlRequest, HitlStatus};
use hooks::{AbortReason, Decision, ErrorDecision, SupervisionHooks};

/// Identity attached to a control operation. Privileged access is an
/// explicit capability, not a special user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    User(i64),
    System,
}

impl Caller {
    fn authorize(&self, owner: i64) -> Result<(), ControlError> {
        match self {
            Caller::System => Ok(()),
            Caller::User(id) if *id == owner => Ok(()),
            Caller::User(_) => Err(ControlError::NotAuthorized),
        }
    }
}

struct ExecutionEntry {
    handle: RwLock<ExecutionHandle>,
    signals: ControlSignals,
    emitter: EventEmitter,
    events: Mutex<Option<mpsc::Receiver<ExecutionEvent>>>,
    error_policy: ErrorPolicy,
    max_nesting_depth: u32,
}

struct PreparedExecution {
    execution_id: Uuid,
    plan: Arc<ExecutionPlan>,
    ctx: ExecutionContext,
    input: Value,
}

pub struct SupervisorBuilder {
    registry: Arc<NodeHandlerRegistry>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialProvider>,
    storage: Option<Arc<dyn Storage>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl SupervisorBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Supervisor {
        Supervisor {
            inner: Arc::new(SupervisorInner {
                registry: self.registry,
                config: self.config,
                clock: self.clock,
                credentials: self.credentials,
                storage: self.storage,
                sink: self.sink,
                active: RwLock::new(HashMap::new()),
                finished: RwLock::new(HashMap::new()),
                hitl: RwLock::new(HashMap::new()),
            }),
        }
    }
}

/// Public control surface. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn builder(registry: Arc<NodeHandlerRegistry>) -> SupervisorBuilder {
        SupervisorBuilder {
            registry,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            credentials: Arc::new(NoCredentials),
            storage: None,
            sink: None,
        }
    }

    pub fn new(registry: Arc<NodeHandlerRegistry>) -> Self {
        Self::builder(registry).build()
    }

    /// Compile the workflow, create a pending handle, and spawn its runner.
    pub async fn start(
        &self,
        workflow_json: Value,
        caller: Caller,
        input: Value,
    ) -> Result<ExecutionHandle, ControlError> {
        let schema = parse_workflow(&workflow_json)?;
        let user_id = match caller {
            Caller::User(id) => {
                if schema.user_id != 0 && schema.user_id != id {
                    return Err(ControlError::NotAuthorized);
                }
                id
            }
            Caller::System => schema.user_id,
        };

        let prepared = self
            .inner
            .prepare_execution(schema, user_id, input, None, 0, Vec::new())
            .await?;
        let snapshot = self.inner.snapshot(prepared.execution_id)?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = inner.drive(prepared).await;
        });
        Ok(snapshot)
    }

    /// Start a workflow loaded from the attached store.
    pub async fn start_by_id(
        &self,
        workflow_id: &str,
        caller: Caller,
        input: Value,
    ) -> Result<ExecutionHandle, ControlError> {
        let storage = self
            .inner
            .storage
            .as_ref()
            .ok_or_else(|| ControlError::Storage("no storage attached".into()))?;
        let workflow_json = storage
            .load_workflow(workflow_id)
            .await
            .map_err(|e| ControlError::Storage(e.to_string()))?;
        self.start(workflow_json, caller, input).await
    }

    pub fn status(
        &self,
        execution_id: Uuid,
        caller: Caller,
    ) -> Result<ExecutionHandle, ControlError> {
        let handle = self.inner.snapshot_any(execution_id)?;
        caller.authorize(handle.user_id)?;
        Ok(handle)
    }

    /// Block the runner at the next node boundary.
    pub fn pause(&self, execution_id: Uuid, caller: Caller) -> Result<(), ControlError> {
        let entry = self.inner.entry_for_control(execution_id, caller)?;
        entry.signals.pause.pause();
        let changed = entry.handle.write().transition(ExecutionState::Paused);
        if changed {
            self.inner
                .emit_state(&entry, execution_id, ExecutionState::Paused);
        }
        info!(%execution_id, "execution paused");
        Ok(())
    }

    pub fn resume(&self, execution_id: Uuid, caller: Caller) -> Result<(), ControlError> {
        let entry = self.inner.entry_for_control(execution_id, caller)?;
        entry.signals.pause.resume();
        let changed = entry.handle.write().transition(ExecutionState::Running);
        if changed {
            self.inner
                .emit_state(&entry, execution_id, ExecutionState::Running);
        }
        info!(%execution_id, "execution resumed");
        Ok(())
    }

    /// Cooperative cancel: sets the flag, unblocks any waiter, and lets the
    /// runner terminate within the grace window.
    pub fn cancel(
        &self,
        execution_id: Uuid,
        caller: Caller,
        reason: impl Into<String>,
    ) -> Result<(), ControlError> {
        let entry = self.inner.entry_for_control(execution_id, caller)?;
        let reason = reason.into();
        entry.handle.write().cancel_reason = Some(reason.clone());
        entry.signals.trigger_cancel();
        info!(%execution_id, %reason, "execution cancel requested");
        Ok(())
    }

    /// Open a human-in-the-loop round-trip for a running execution and
    /// block until the response, the timeout, or cancellation.
    ///
    /// This is the same rendezvous handlers reach through their context;
    /// exposed here for controllers that intervene from outside (e.g.
    /// error-recovery flows).
    pub async fn ask_human(
        &self,
        execution_id: Uuid,
        kind: hitl::HitlKind,
        title: impl Into<String>,
        message: impl Into<String>,
        options: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Value, ControlError> {
        SupervisorBridge {
            inner: self.inner.clone(),
        }
        .ask_human(
            execution_id,
            HitlPrompt {
                kind,
                title: title.into(),
                message: message.into(),
                options,
                timeout_secs,
            },
        )
        .await
    }

    /// Deliver a response to a pending human request. Effect-once.
    pub fn submit_human_response(
        &self,
        request_id: &str,
        caller: Caller,
        response: Value,
    ) -> Result<(), ControlError> {
        let mut hitl = self.inner.hitl.write();
        let entry = hitl.get_mut(request_id).ok_or(ControlError::NotFound)?;
        caller.authorize(entry.request.user_id)?;
        if entry.request.status != HitlStatus::Pending {
            return Err(ControlError::NotPending);
        }
        let responder = entry.responder.take().ok_or(ControlError::NotPending)?;
        entry.request.status = HitlStatus::Responded;
        entry.request.response = Some(response.clone());
        // The waiter observed cancellation if this send fails; the request
        // still counts as responded.
        let _ = responder.send(response);
        Ok(())
    }

    /// Pending requests visible to the caller.
    pub fn pending_requests(&self, caller: Caller) -> Vec<HitlRequest> {
        let hitl = self.inner.hitl.read();
        let mut requests: Vec<HitlRequest> = hitl
            .values()
            .filter(|e| e.request.status == HitlStatus::Pending)
            .filter(|e| match caller {
                Caller::System => true,
                Caller::User(id) => e.request.user_id == id,
            })
            .map(|e| e.request.clone())
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    /// Claim the event stream of an execution. The receiver can be taken
    /// once; later calls return `NotFound`.
    pub fn subscribe(
        &self,
        execution_id: Uuid,
        caller: Caller,
    ) -> Result<mpsc::Receiver<ExecutionEvent>, ControlError> {
        let entry = self.inner.entry(execution_id).ok_or(ControlError::NotFound)?;
        caller.authorize(entry.handle.read().user_id)?;
        let taken = entry.events.lock().take();
        taken.ok_or(ControlError::NotFound)
    }

    /// Poll until the execution reaches a terminal state.
    pub async fn wait(
        &self,
        execution_id: Uuid,
        caller: Caller,
    ) -> Result<ExecutionHandle, ControlError> {
        loop {
            let handle = self.status(execution_id, caller)?;
            if handle.state.is_terminal() {
                return Ok(handle);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Spawn a child execution for a parent, enforcing depth and cycle
    /// invariants, and block on its result.
    pub async fn execute_subworkflow(
        &self,
        parent_execution_id: Uuid,
        sub_workflow_json: Value,
        input: Value,
    ) -> Result<Value, ControlError> {
        SupervisorBridge {
            inner: self.inner.clone(),
        }
        .run_subworkflow(
            parent_execution_id,
            SubworkflowSource::Inline(sub_workflow_json),
            input,
        )
        .await
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Whether the execution id is present in the active set.
    pub fn is_active(&self, execution_id: Uuid) -> bool {
        self.inner.active.read().contains_key(&execution_id)
    }
}

struct SupervisorInner {
    registry: Arc<NodeHandlerRegistry>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialProvider>,
    storage: Option<Arc<dyn Storage>>,
    sink: Option<Arc<dyn EventSink>>,
    active: RwLock<HashMap<Uuid, Arc<ExecutionEntry>>>,
    finished: RwLock<HashMap<Uuid, ExecutionHandle>>,
    hitl: RwLock<HashMap<String, HitlEntry>>,
}

/// Adapter that lends the supervisor's capabilities (hooks, human gate,
/// sub-workflow spawning) to runners as trait objects.
struct SupervisorBridge {
    inner: Arc<SupervisorInner>,
}

impl SupervisorInner {
    async fn prepare_execution(
        &self,
        schema: WorkflowSchema,
        user_id: i64,
        input: Value,
        parent_execution_id: Option<Uuid>,
        nesting_depth: u32,
        parent_chain: Vec<String>,
    ) -> Result<PreparedExecution, ControlError> {
        let refs: Vec<String> = {
            let mut refs: Vec<String> = schema
                .nodes
                .iter()
                .flat_map(|n| n.credential_refs())
                .collect();
            refs.sort();
            refs.dedup();
            refs
        };
        let handles = self
            .credentials
            .load(user_id, &refs)
            .await
            .map_err(|e| credential_compile_error(&schema, e))?;
        let available: HashMap<String, String> = handles
            .iter()
            .map(|h| (h.reference.clone(), h.credential_type.clone()))
            .collect();

        let plan = Arc::new(compile(&schema, &self.registry, &available, &self.config)?);

        let execution_id = Uuid::new_v4();
        let workflow_id = if schema.id.is_empty() {
            execution_id.to_string()
        } else {
            schema.id.clone()
        };
        let mut chain = parent_chain;
        chain.push(workflow_id.clone());

        let mut handle = ExecutionHandle::new(
            execution_id,
            workflow_id,
            user_id,
            self.clock.now(),
            plan.order.len() as u32,
        );
        handle.parent_execution_id = parent_execution_id;
        handle.nesting_depth = nesting_depth;
        handle.workflow_chain = chain.clone();

        let ctx = ExecutionContext::new(execution_id, user_id)
            .with_credentials(handles)
            .with_nesting(nesting_depth, chain);

        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let emitter = EventEmitter::new(tx, Arc::new(AtomicBool::new(true)), self.sink.clone());
        let entry = Arc::new(ExecutionEntry {
            handle: RwLock::new(handle),
            signals: ControlSignals::new(),
            emitter: emitter.clone(),
            events: Mutex::new(Some(rx)),
            error_policy: plan.settings.error_policy,
            max_nesting_depth: plan.settings.max_nesting_depth,
        });
        self.active.write().insert(execution_id, entry);

        emitter.emit(ExecutionEvent::ExecutionCreated {
            execution_id,
            workflow_id: plan.workflow_id.clone(),
            timestamp: self.clock.now(),
        });
        info!(%execution_id, workflow_id = %plan.workflow_id, user_id, "execution created");

        Ok(PreparedExecution {
            execution_id,
            plan,
            ctx,
            input,
        })
    }

    /// Run a prepared execution to its terminal state.
    async fn drive(
        self: Arc<Self>,
        prepared: PreparedExecution,
    ) -> (ExecutionState, Option<Value>) {
        let PreparedExecution {
            execution_id,
            plan,
            mut ctx,
            input,
        } = prepared;

        let entry = {
            let active = self.active.read();
            active
                .get(&execution_id)
                .cloned()
                .expect("prepared execution is registered")
        };

        self.set_state(&entry, execution_id, ExecutionState::Running);

        let bridge = Arc::new(SupervisorBridge {
            inner: self.clone(),
        });
        let runtime = Arc::new(
            RuntimeContext::default()
                .with_clock(self.clock.clone())
                .with_human_gate(bridge.clone() as Arc<dyn HumanGate>)
                .with_subworkflows(bridge.clone() as Arc<dyn SubworkflowRunner>),
        );
        let runner = GraphRunner::new(
            plan.clone(),
            bridge as Arc<dyn SupervisionHooks>,
            entry.emitter.clone(),
            runtime,
            entry.signals.cancel.clone(),
            RunnerConfig::from_engine(&self.config, plan.settings.error_policy),
        );

        let result = runner.run(&mut ctx, input).await;

        let (state, output) = match result {
            Ok(output) => {
                // The event copy is scrubbed; the output itself keeps real
                // values for sub-workflow parents.
                entry.emitter.emit(ExecutionEvent::ExecutionCompleted {
                    execution_id,
                    output: ctx.redact_secrets(&output),
                });
                (ExecutionState::Completed, Some(output))
            }
            Err(WorkflowError::Cancelled(reason)) => {
                entry.emitter.emit(ExecutionEvent::ExecutionFailed {
                    execution_id,
                    error_kind: "cancelled".to_string(),
                    failing_node_id: None,
                    message: reason.clone(),
                });
                entry.handle.write().cancel_reason.get_or_insert(reason);
                (ExecutionState::Cancelled, None)
            }
            Err(err) => {
                let failure = ExecutionFailure {
                    error_kind: err.kind().to_string(),
                    failing_node_id: err.failing_node().map(|s| s.to_string()),
                    message: err.to_string(),
                };
                entry.emitter.emit(ExecutionEvent::ExecutionFailed {
                    execution_id,
                    error_kind: failure.error_kind.clone(),
                    failing_node_id: failure.failing_node_id.clone(),
                    message: failure.message.clone(),
                });
                entry.handle.write().error = Some(failure);
                (ExecutionState::Failed, None)
            }
        };
        ctx.zero_credentials();

        let snapshot = self.finalize(&entry, execution_id, state, &output).await;
        info!(%execution_id, state = %snapshot.state, "execution finished");
        (state, output)
    }

    /// Terminal cleanup: leave the active set, cancel outstanding human
    /// requests, retain a snapshot for status queries.
    async fn finalize(
        &self,
        entry: &Arc<ExecutionEntry>,
        execution_id: Uuid,
        state: ExecutionState,
        output: &Option<Value>,
    ) -> ExecutionHandle {
        let snapshot = {
            let mut handle = entry.handle.write();
            handle.completed_at = Some(self.clock.now());
            handle.transition(state);
            handle.clone()
        };
        // Publish the snapshot before leaving the active set so status
        // queries never observe a gap.
        self.finished.write().insert(execution_id, snapshot.clone());
        self.active.write().remove(&execution_id);

        {
            let mut hitl = self.hitl.write();
            hitl.retain(|_, e| {
                if e.request.execution_id == execution_id {
                    if e.request.status == HitlStatus::Pending {
                        e.request.status = HitlStatus::Cancelled;
                        e.responder.take();
                    }
                    false
                } else {
                    true
                }
            });
        }
        entry.emitter.emit(ExecutionEvent::StateChanged {
            execution_id,
            state,
            timestamp: self.clock.now(),
        });

        if let Some(storage) = &self.storage {
            let record = ExecutionRecord {
                execution_id,
                workflow_id: snapshot.workflow_id.clone(),
                user_id: snapshot.user_id,
                state,
                started_at: snapshot.started_at,
                completed_at: self.clock.now(),
                output: output.clone(),
                error: snapshot.error.as_ref().map(|e| e.message.clone()),
            };
            if let Err(err) = storage.append_execution_record(record).await {
                warn!(%execution_id, %err, "failed to append execution record");
            }
        }
        snapshot
    }

    fn set_state(&self, entry: &Arc<ExecutionEntry>, execution_id: Uuid, state: ExecutionState) {
        let changed = entry.handle.write().transition(state);
        if changed {
            self.emit_state(entry, execution_id, state);
        }
    }

    fn emit_state(&self, entry: &Arc<ExecutionEntry>, execution_id: Uuid, state: ExecutionState) {
        entry.emitter.emit(ExecutionEvent::StateChanged {
            execution_id,
            state,
            timestamp: self.clock.now(),
        });
    }

    fn entry(&self, execution_id: Uuid) -> Option<Arc<ExecutionEntry>> {
        self.active.read().get(&execution_id).cloned()
    }

    /// Resolve an entry for a mutating control op, distinguishing finished
    /// from unknown executions.
    fn entry_for_control(
        &self,
        execution_id: Uuid,
        caller: Caller,
    ) -> Result<Arc<ExecutionEntry>, ControlError> {
        match self.entry(execution_id) {
            Some(entry) => {
                caller.authorize(entry.handle.read().user_id)?;
                Ok(entry)
            }
            None => {
                let finished = self.finished.read();
                match finished.get(&execution_id) {
                    Some(handle) => {
                        caller.authorize(handle.user_id)?;
                        Err(ControlError::AlreadyTerminal)
                    }
                    None => Err(ControlError::NotFound),
                }
            }
        }
    }

    fn snapshot(&self, execution_id: Uuid) -> Result<ExecutionHandle, ControlError> {
        self.entry(execution_id)
            .map(|e| e.handle.read().clone())
            .ok_or(ControlError::NotFound)
    }

    fn snapshot_any(&self, execution_id: Uuid) -> Result<ExecutionHandle, ControlError> {
        if let Some(entry) = self.entry(execution_id) {
            return Ok(entry.handle.read().clone());
        }
        self.finished
            .read()
            .get(&execution_id)
            .cloned()
            .ok_or(ControlError::NotFound)
    }

    async fn append_node_record(&self, record: NodeRecord) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.append_node_record(record).await {
                warn!(%err, "failed to append node record");
            }
        }
    }
}

fn credential_compile_error(schema: &WorkflowSchema, err: CredentialError) -> ControlError {
    let reference = match &err {
        CredentialError::NotFound { reference } => reference.clone(),
        CredentialError::AccessDenied { reference } => reference.clone(),
        CredentialError::Provider(_) => String::new(),
    };
    let node_id = schema
        .nodes
        .iter()
        .find(|n| n.credential_refs().iter().any(|r| *r == reference))
        .map(|n| n.id.clone())
        .unwrap_or_default();
    ControlError::Compile(CompileError::Credential {
        node_id,
        reference,
        reason: err.to_string(),
    })
}

#[async_trait]
impl SupervisionHooks for SupervisorBridge {
    async fn before_node(&self, execution_id: Uuid, node_id: &str) -> Decision {
        let Some(entry) = self.inner.entry(execution_id) else {
            return Decision::Abort(AbortReason::Supervision("execution handle lost".into()));
        };

        if entry.signals.pause.is_paused() {
            self.inner
                .set_state(&entry, execution_id, ExecutionState::Paused);
            debug!(%execution_id, node_id, "execution paused before node");
            entry.signals.pause.wait_running().await;
            if entry.signals.cancel.is_cancelled() {
                return Decision::Abort(AbortReason::Cancelled("cancelled during pause".into()));
            }
            self.inner
                .set_state(&entry, execution_id, ExecutionState::Running);
        }
        if entry.signals.cancel.is_cancelled() {
            return Decision::Abort(AbortReason::Cancelled("execution cancelled".into()));
        }

        entry.handle.write().current_node = Some(node_id.to_string());
        entry.emitter.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id: node_id.to_string(),
            timestamp: self.inner.clock.now(),
        });
        Decision::Continue
    }

    async fn after_node(
        &self,
        execution_id: Uuid,
        node_id: &str,
        result: &NodeResult,
        duration_ms: u64,
    ) -> Decision {
        let Some(entry) = self.inner.entry(execution_id) else {
            return Decision::Abort(AbortReason::Supervision("execution handle lost".into()));
        };

        {
            let mut handle = entry.handle.write();
            handle.record_node_completed();

            if result.output_handle == LOOP_HANDLE {
                // Branch-aware key so re-entry through different handles
                // never collides.
                let key = format!("{node_id}:{}", result.output_handle);
                let counter = handle.loop_counters.entry(key.clone()).or_insert(0);
                *counter += 1;
                let current = *counter;
                let total: u32 = handle.loop_counters.values().sum();
                if current > SYSTEM_MAX_LOOPS || total > SYSTEM_MAX_LOOPS {
                    return Decision::Abort(AbortReason::LoopLimit { counter_key: key });
                }
            }
        }

        self.inner
            .append_node_record(NodeRecord {
                execution_id,
                node_id: node_id.to_string(),
                output_handle: result.output_handle.clone(),
                success: !result.is_error(),
                duration_ms,
                error: result.error.as_ref().map(|e| e.message.clone()),
            })
            .await;
        Decision::Continue
    }

    async fn on_error(
        &self,
        execution_id: Uuid,
        node_id: &str,
        error: &NodeError,
    ) -> ErrorDecision {
        let Some(entry) = self.inner.entry(execution_id) else {
            return ErrorDecision::Abort;
        };
        entry
            .handle
            .write()
            .record_error(node_id, error.to_string(), self.inner.clock.now());

        self.inner
            .append_node_record(NodeRecord {
                execution_id,
                node_id: node_id.to_string(),
                output_handle: "error".to_string(),
                success: false,
                duration_ms: 0,
                error: Some(error.to_string()),
            })
            .await;

        match entry.error_policy {
            ErrorPolicy::FailFast => ErrorDecision::Abort,
            ErrorPolicy::Continue => ErrorDecision::Continue,
        }
    }
}

#[async_trait]
impl HumanGate for SupervisorBridge {
    async fn ask_human(
        &self,
        execution_id: Uuid,
        prompt: HitlPrompt,
    ) -> Result<Value, ControlError> {
        let inner = &self.inner;
        let entry = inner.entry(execution_id).ok_or(ControlError::NotFound)?;

        let request = {
            let handle = entry.handle.read();
            if handle.pending_hitl.is_some() {
                return Err(ControlError::AlreadyPending);
            }
            HitlRequest {
                id: Uuid::new_v4().to_string(),
                execution_id,
                user_id: handle.user_id,
                kind: prompt.kind,
                node_id: handle.current_node.clone(),
                title: prompt.title.clone(),
                message: prompt.message.clone(),
                options: prompt.options.clone(),
                timeout_secs: prompt.timeout_secs,
                created_at: inner.clock.now(),
                status: HitlStatus::Pending,
                response: None,
            }
        };
        let request_id = request.id.clone();

        let (hitl_entry, receiver) = HitlEntry::new(request.clone());
        inner.hitl.write().insert(request_id.clone(), hitl_entry);
        {
            let mut handle = entry.handle.write();
            handle.pending_hitl = Some(request_id.clone());
            handle.transition(ExecutionState::WaitingHuman);
        }
        inner.emit_state(&entry, execution_id, ExecutionState::WaitingHuman);
        entry.emitter.emit(ExecutionEvent::HitlRequested {
            request_id: request_id.clone(),
            execution_id,
            kind: request.kind.to_string(),
            message: request.message.clone(),
            options: request.options.clone(),
        });
        info!(%execution_id, request_id = %request_id, kind = %request.kind, "waiting for human");

        let outcome = tokio::select! {
            res = receiver => res.map_err(|_| ControlError::ExecutionCancelled),
            _ = tokio::time::sleep(Duration::from_secs(prompt.timeout_secs)) => {
                Err(ControlError::TimedOut { timeout_secs: prompt.timeout_secs })
            }
            _ = entry.signals.cancel.cancelled() => Err(ControlError::ExecutionCancelled),
        };

        match outcome {
            Ok(response) => {
                {
                    let mut handle = entry.handle.write();
                    handle.pending_hitl = None;
                    handle.transition(ExecutionState::Running);
                }
                inner.emit_state(&entry, execution_id, ExecutionState::Running);
                entry.emitter.emit(ExecutionEvent::HitlResolved {
                    request_id,
                    response: response.clone(),
                });
                Ok(response)
            }
            Err(err) => {
                {
                    let mut hitl = inner.hitl.write();
                    if let Some(e) = hitl.get_mut(&request_id) {
                        if e.request.status == HitlStatus::Pending {
                            e.request.status = match err {
                                ControlError::TimedOut { .. } => HitlStatus::TimedOut,
                                _ => HitlStatus::Cancelled,
                            };
                            e.responder.take();
                        }
                    }
                }
                {
                    let mut handle = entry.handle.write();
                    handle.pending_hitl = None;
                    handle.transition(ExecutionState::Running);
                }
                inner.emit_state(&entry, execution_id, ExecutionState::Running);
                warn!(%execution_id, request_id = %request_id, %err, "human request not answered");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl SubworkflowRunner for SupervisorBridge {
    async fn run_subworkflow(
        &self,
        parent_execution_id: Uuid,
        source: SubworkflowSource,
        input: Value,
    ) -> Result<Value, ControlError> {
        let inner = &self.inner;
        let parent = inner
            .entry(parent_execution_id)
            .ok_or(ControlError::NotFound)?;
        let (user_id, parent_depth, parent_chain) = {
            let handle = parent.handle.read();
            (
                handle.user_id,
                handle.nesting_depth,
                handle.workflow_chain.clone(),
            )
        };

        let child_depth = parent_depth + 1;
        if child_depth > parent.max_nesting_depth {
            return Err(ControlError::NestingDepthExceeded {
                max: parent.max_nesting_depth,
            });
        }

        let workflow_json = match source {
            SubworkflowSource::Inline(value) => value,
            SubworkflowSource::Stored(id) => {
                let storage = inner
                    .storage
                    .as_ref()
                    .ok_or_else(|| ControlError::Storage("no storage attached".into()))?;
                storage
                    .load_workflow(&id)
                    .await
                    .map_err(|e| ControlError::Storage(e.to_string()))?
            }
        };
        let schema = parse_workflow(&workflow_json)?;
        if !schema.id.is_empty() && parent_chain.iter().any(|id| *id == schema.id) {
            return Err(ControlError::SubworkflowCycle {
                workflow_id: schema.id.clone(),
            });
        }

        let prepared = inner
            .prepare_execution(
                schema,
                user_id,
                input,
                Some(parent_execution_id),
                child_depth,
                parent_chain,
            )
            .await?;
        let child_id = prepared.execution_id;
        debug!(%parent_execution_id, %child_id, "sub-workflow spawned");

        let (state, output) = inner.clone().drive(prepared).await;
        match state {
            ExecutionState::Completed => Ok(output.unwrap_or(Value::Null)),
            ExecutionState::Cancelled => Err(ControlError::ExecutionCancelled),
            _ => {
                let message = inner
                    .finished
                    .read()
                    .get(&child_id)
                    .and_then(|h| h.error.as_ref().map(|e| e.message.clone()))
                    .unwrap_or_else(|| "sub-workflow failed".to_string());
                Err(ControlError::SubworkflowFailed(message))
            }
        }
    }
}
