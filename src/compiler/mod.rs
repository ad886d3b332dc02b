//! Workflow compiler.
//!
//! Turns a parsed [`WorkflowSchema`] into a validated, handler-bound
//! [`ExecutionPlan`], or fails with a typed [`CompileError`]. The pipeline
//! runs in a fixed order and fails fast except where findings are
//! explicitly soft (orphans outside strict mode, type compatibility).

pub mod plan;
pub mod validators;

use std::collections::HashMap;

use tracing::debug;

use crate::config::EngineConfig;
use crate::dsl::schema::WorkflowSchema;
use crate::error::CompileError;
use crate::nodes::registry::NodeHandlerRegistry;

pub use plan::{EffectiveSettings, ExecutionPlan, PlannedEdge, PlannedNode};
pub use validators::{Diagnostic, DiagnosticLevel};

/// Compile a workflow against the registry and the credentials available to
/// the invoking user (`reference -> credential type`).
pub fn compile(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
    available_credentials: &HashMap<String, String>,
    config: &EngineConfig,
) -> Result<ExecutionPlan, CompileError> {
    validators::validate_structure(schema, registry)?;
    let cycles = validators::analyze_cycles(schema, registry)?;
    let entries = validators::entry_nodes(schema)?;

    let mut warnings = validators::validate_reachability(
        schema,
        &entries,
        schema.workflow_settings.strict,
    )?;
    validators::validate_credentials(schema, registry, available_credentials)?;
    validators::validate_configs(schema, registry)?;
    warnings.extend(validators::check_type_compatibility(schema, registry));

    let plan = plan::build_plan(schema, registry, cycles, entries, warnings, config)?;
    debug!(
        workflow_id = %plan.workflow_id,
        nodes = plan.nodes.len(),
        edges = plan.edges.len(),
        warnings = plan.warnings.len(),
        "workflow compiled"
    );
    Ok(plan)
}
