//! Node handler capability, registry, and the built-in control-flow
//! handlers the kernel owns. Integration node types (HTTP, LLM, services)
//! plug in from outside through [`NodeHandlerRegistry::register`].

pub mod approval;
pub mod flow;
pub mod handler;
pub mod logic;
pub mod registry;
pub mod subworkflow;
pub mod triggers;

pub use handler::{
    FailureKind, FieldSpec, FieldType, NodeContext, NodeFailureInfo, NodeHandler, NodeResult,
    ValueKind,
};
pub use registry::NodeHandlerRegistry;
