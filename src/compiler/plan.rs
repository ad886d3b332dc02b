//! The compiled, handler-bound execution plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::dsl::schema::{EdgeKind, ErrorPolicy, WorkflowSchema};
use crate::error::CompileError;
use crate::nodes::handler::NodeHandler;
use crate::nodes::registry::NodeHandlerRegistry;

use super::validators::{CycleInfo, Diagnostic};

/// A node bound to its handler with effective timeout and retry policy.
pub struct PlannedNode {
    pub id: String,
    pub type_tag: String,
    pub label: String,
    pub config: serde_json::Value,
    pub handler: Arc<dyn NodeHandler>,
    pub timeout: Duration,
    pub retries: u32,
    pub credential_refs: Vec<String>,
}

impl std::fmt::Debug for PlannedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedNode")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("label", &self.label)
            .field("config", &self.config)
            .field("handler", &self.type_tag)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("credential_refs", &self.credential_refs)
            .finish()
    }
}

/// An edge of the plan. Indexed adjacency lives on [`ExecutionPlan`].
#[derive(Debug, Clone)]
pub struct PlannedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub kind: EdgeKind,
}

impl PlannedEdge {
    /// Whether this edge fires for the given output handle.
    pub fn matches_handle(&self, handle: &str) -> bool {
        match self.source_handle.as_deref() {
            Some(h) => h == handle,
            None => handle == "default",
        }
    }
}

/// Effective workflow-level settings after defaulting.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub error_policy: ErrorPolicy,
    pub max_nesting_depth: u32,
    pub strict: bool,
}

/// Validated, handler-bound plan ready for the graph runner.
///
/// Immutable after compilation; runners keep their own per-run edge state.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub workflow_id: String,
    pub owner_id: i64,
    pub entry_nodes: Vec<String>,
    /// Loop-condensed topological order, `node_id` as tie-breaker.
    pub order: Vec<String>,
    pub nodes: HashMap<String, PlannedNode>,
    pub edges: Vec<PlannedEdge>,
    pub loop_nodes: HashSet<String>,
    pub settings: EffectiveSettings,
    pub warnings: Vec<Diagnostic>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    loop_edges: HashSet<usize>,
}

impl ExecutionPlan {
    pub fn node(&self, node_id: &str) -> Option<&PlannedNode> {
        self.nodes.get(node_id)
    }

    pub fn edge(&self, idx: usize) -> &PlannedEdge {
        &self.edges[idx]
    }

    pub fn outgoing_edges(&self, node_id: &str) -> &[usize] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_edges(&self, node_id: &str) -> &[usize] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges that fire when `node_id` completes with `handle`.
    pub fn edges_for_handle(&self, node_id: &str, handle: &str) -> Vec<usize> {
        self.outgoing_edges(node_id)
            .iter()
            .copied()
            .filter(|idx| self.edges[*idx].matches_handle(handle))
            .collect()
    }

    /// Whether the edge participates in a loop cycle.
    pub fn is_loop_edge(&self, idx: usize) -> bool {
        self.loop_edges.contains(&idx)
    }

    /// Upstream sources over non-loop edges, in edge declaration order.
    pub fn upstream_sources(&self, node_id: &str) -> Vec<String> {
        self.incoming_edges(node_id)
            .iter()
            .filter(|idx| !self.is_loop_edge(**idx))
            .map(|idx| self.edges[*idx].source.clone())
            .collect()
    }

    /// All upstream sources including loop feedback, in edge order.
    pub fn all_sources(&self, node_id: &str) -> Vec<String> {
        self.incoming_edges(node_id)
            .iter()
            .map(|idx| self.edges[*idx].source.clone())
            .collect()
    }

    /// A terminal leaf has no outgoing edges outside its loop cycle.
    pub fn is_terminal_leaf(&self, node_id: &str) -> bool {
        self.outgoing_edges(node_id)
            .iter()
            .all(|idx| self.is_loop_edge(*idx))
    }
}

/// Assemble the plan from a validated schema plus cycle analysis.
pub fn build_plan(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
    cycles: CycleInfo,
    entry_nodes: Vec<String>,
    warnings: Vec<Diagnostic>,
    config: &EngineConfig,
) -> Result<ExecutionPlan, CompileError> {
    let settings = EffectiveSettings {
        error_policy: schema.workflow_settings.error_policy,
        max_nesting_depth: schema
            .workflow_settings
            .max_nesting_depth
            .unwrap_or(config.default_max_nesting_depth),
        strict: schema.workflow_settings.strict,
    };

    let default_timeout_ms = schema
        .workflow_settings
        .default_timeout_ms
        .unwrap_or(config.default_timeout_ms);
    let default_retries = schema
        .workflow_settings
        .max_retries
        .unwrap_or(config.default_max_retries);

    let mut nodes = HashMap::with_capacity(schema.nodes.len());
    for node in &schema.nodes {
        let handler = registry
            .get(&node.node_type)
            .expect("node types resolved during structural validation");
        nodes.insert(
            node.id.clone(),
            PlannedNode {
                id: node.id.clone(),
                type_tag: node.node_type.clone(),
                label: node.label(),
                config: node.config(),
                handler,
                timeout: Duration::from_millis(node.timeout_ms().unwrap_or(default_timeout_ms)),
                retries: node.max_retries().unwrap_or(default_retries),
                credential_refs: node.credential_refs(),
            },
        );
    }

    let mut edges = Vec::with_capacity(schema.edges.len());
    let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
    let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, edge) in schema.edges.iter().enumerate() {
        edges.push(PlannedEdge {
            id: if edge.id.is_empty() {
                format!("edge_{idx}")
            } else {
                edge.id.clone()
            },
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
            kind: edge.effective_kind(),
        });
        outgoing.entry(edge.source.clone()).or_default().push(idx);
        incoming.entry(edge.target.clone()).or_default().push(idx);
    }

    let order = condensed_topo_order(schema, &cycles, registry);

    let mut entry_nodes = entry_nodes;
    entry_nodes.sort();

    Ok(ExecutionPlan {
        workflow_id: schema.id.clone(),
        owner_id: schema.user_id,
        entry_nodes,
        order,
        nodes,
        edges,
        loop_nodes: cycles.loop_nodes,
        settings,
        warnings,
        outgoing,
        incoming,
        loop_edges: cycles.loop_edges,
    })
}

/// Kahn's algorithm over the loop-condensed DAG. Each cyclic component
/// collapses to one vertex for ordering; within a component the
/// loop-carrying node leads and the rest follow by id.
fn condensed_topo_order(
    schema: &WorkflowSchema,
    cycles: &CycleInfo,
    registry: &NodeHandlerRegistry,
) -> Vec<String> {
    let scc_count = cycles.scc_members.len();
    let mut in_degree: Vec<usize> = vec![0; scc_count];
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); scc_count];

    for edge in &schema.edges {
        let s = cycles.scc_of[&edge.source];
        let t = cycles.scc_of[&edge.target];
        if s != t && successors[s].insert(t) {
            in_degree[t] += 1;
        }
    }

    // Deterministic tie-break: ready components ordered by their smallest
    // member node id.
    let scc_key = |scc_id: usize| -> String {
        cycles.scc_members[scc_id]
            .first()
            .cloned()
            .unwrap_or_default()
    };

    let mut ready: BTreeSet<(String, usize)> = (0..scc_count)
        .filter(|scc| in_degree[*scc] == 0)
        .map(|scc| (scc_key(scc), scc))
        .collect();

    let mut order = Vec::with_capacity(schema.nodes.len());
    while let Some(entry) = ready.iter().next().cloned() {
        ready.remove(&entry);
        let (_, scc_id) = entry;
        let mut members = cycles.scc_members[scc_id].clone();
        members.sort_by_key(|id| {
            let leads = schema
                .nodes
                .iter()
                .find(|n| n.id == *id)
                .and_then(|n| registry.get(&n.node_type))
                .map(|h| h.loop_carrying())
                .unwrap_or(false);
            (!leads, id.clone())
        });
        order.extend(members);
        for next in successors[scc_id].clone() {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((scc_key(next), next));
            }
        }
    }
    order
}
