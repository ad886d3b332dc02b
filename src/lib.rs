//! Workflow execution kernel.
//!
//! Compiles JSON workflow graphs into validated execution plans and
//! supervises them at runtime: topological driving with conditional and
//! loop routing, per-node timeouts and retries, pause/resume/cancel, and
//! human-in-the-loop rendezvous, with concurrent executions fully isolated
//! from each other.

pub mod compiler;
pub mod config;
pub mod core;
pub mod credential;
pub mod dsl;
pub mod error;
pub mod nodes;
pub mod storage;
pub mod supervisor;
pub mod template;

pub use crate::compiler::{compile, Diagnostic, DiagnosticLevel, ExecutionPlan};
pub use crate::config::{
    EngineConfig, DEFAULT_HITL_TIMEOUT_SECS, SYSTEM_DEFAULT_TIMEOUT_MS, SYSTEM_MAX_LOOPS,
};
pub use crate::core::{
    EventEmitter, EventSink, ExecutionContext, ExecutionEvent, GraphRunner, RunnerConfig,
    RuntimeContext,
};
pub use crate::credential::{
    CredentialError, CredentialHandle, CredentialProvider, InMemoryCredentials,
};
pub use crate::dsl::{parse_workflow, parse_workflow_str, ErrorPolicy, WorkflowSchema};
pub use crate::error::{CompileError, ControlError, NodeError, WorkflowError};
pub use crate::nodes::{
    FailureKind, FieldSpec, FieldType, NodeContext, NodeHandler, NodeHandlerRegistry, NodeResult,
};
pub use crate::storage::{ExecutionRecord, NodeRecord, Storage, StorageError};
pub use crate::supervisor::handle::{ExecutionHandle, ExecutionState};
pub use crate::supervisor::hitl::{HitlKind, HitlRequest, HitlStatus};
pub use crate::supervisor::hooks::{Decision, ErrorDecision, NoopHooks, SupervisionHooks};
pub use crate::supervisor::{Caller, Supervisor, SupervisorBuilder};
