//! Error taxonomy: compilation, node, control-surface and execution levels.

mod compile_error;
mod control_error;
mod node_error;
mod workflow_error;

pub use compile_error::CompileError;
pub use control_error::ControlError;
pub use node_error::NodeError;
pub use workflow_error::WorkflowError;
