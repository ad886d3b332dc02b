//! Execution-time machinery: per-execution state, events, control signals,
//! process capabilities, and the graph runner.

pub mod event_bus;
pub mod execution_context;
pub mod runner;
pub mod runtime_context;
pub mod signals;

pub use event_bus::{EventEmitter, EventSink, ExecutionEvent};
pub use execution_context::{ExecutionContext, NodeOutput};
pub use runner::{GraphRunner, RunnerConfig};
pub use runtime_context::{
    Clock, FixedClock, HitlPrompt, HumanGate, RuntimeContext, SubworkflowRunner, SubworkflowSource,
    SystemClock,
};
pub use signals::{ControlSignals, PauseGate};
