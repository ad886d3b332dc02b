//! Workflow definition wire format: schema types and parsing.

pub mod parser;
pub mod schema;

pub use parser::{parse_workflow, parse_workflow_str};
pub use schema::{
    EdgeKind, EdgeSchema, ErrorPolicy, NodeSchema, WorkflowSchema, WorkflowSettings,
};
