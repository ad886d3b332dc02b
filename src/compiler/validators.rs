//! Workflow validation: structure, loop-aware cycles, reachability,
//! credential binding, config shape, and soft type compatibility.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::dsl::schema::{NodeSchema, WorkflowSchema};
use crate::error::CompileError;
use crate::nodes::handler::ValueKind;
use crate::nodes::registry::NodeHandlerRegistry;

/// Severity of a validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub node_id: Option<String>,
}

impl Diagnostic {
    pub fn warning(code: &str, message: impl Into<String>, node_id: Option<String>) -> Self {
        Diagnostic {
            level: DiagnosticLevel::Warning,
            code: code.to_string(),
            message: message.into(),
            node_id,
        }
    }
}

/// Structural facts derived during cycle analysis.
#[derive(Debug)]
pub struct CycleInfo {
    /// Loop-carrying nodes participating in a detected back-edge.
    pub loop_nodes: HashSet<String>,
    /// Indices into `schema.edges` that live inside a legal loop cycle.
    pub loop_edges: HashSet<usize>,
    /// Node id to strongly-connected-component id.
    pub scc_of: HashMap<String, usize>,
    /// Members of each component, in schema order.
    pub scc_members: Vec<Vec<String>>,
}

/// Duplicate ids, dangling edge endpoints, unknown node types.
pub fn validate_structure(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for node in &schema.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(CompileError::DuplicateNode {
                node_id: node.id.clone(),
            });
        }
        if registry.get(&node.node_type).is_none() {
            return Err(CompileError::UnknownNodeType {
                node_id: node.id.clone(),
                type_tag: node.node_type.clone(),
            });
        }
    }
    for edge in &schema.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(CompileError::EdgeEndpoint {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Strongly-connected-component analysis with the loop exemption: a
/// component of size > 1 (or a self-loop) is legal iff it contains at least
/// one loop-carrying node type.
pub fn analyze_cycles(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
) -> Result<CycleInfo, CompileError> {
    let mut graph: DiGraph<&str, usize> = DiGraph::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &schema.nodes {
        let idx = graph.add_node(node.id.as_str());
        index_of.insert(node.id.as_str(), idx);
    }
    for (edge_idx, edge) in schema.edges.iter().enumerate() {
        let s = index_of[edge.source.as_str()];
        let t = index_of[edge.target.as_str()];
        graph.add_edge(s, t, edge_idx);
    }

    let is_loop_carrying = |node_id: &str| -> bool {
        schema
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .and_then(|n| registry.get(&n.node_type))
            .map(|h| h.loop_carrying())
            .unwrap_or(false)
    };

    let components = tarjan_scc(&graph);
    let mut scc_of: HashMap<String, usize> = HashMap::new();
    let mut scc_members: Vec<Vec<String>> = Vec::with_capacity(components.len());
    let mut cyclic_sccs: HashSet<usize> = HashSet::new();

    for (scc_id, component) in components.iter().enumerate() {
        let mut members: Vec<String> = component
            .iter()
            .map(|idx| graph[*idx].to_string())
            .collect();
        members.sort();
        let self_loop = component.len() == 1
            && graph
                .edges_connecting(component[0], component[0])
                .next()
                .is_some();
        let cyclic = component.len() > 1 || self_loop;
        if cyclic {
            let has_loop_node = members.iter().any(|id| is_loop_carrying(id));
            if !has_loop_node {
                return Err(CompileError::Cycle { nodes: members });
            }
            cyclic_sccs.insert(scc_id);
        }
        for member in &members {
            scc_of.insert(member.clone(), scc_id);
        }
        scc_members.push(members);
    }

    let mut loop_nodes = HashSet::new();
    let mut loop_edges = HashSet::new();
    for (edge_idx, edge) in schema.edges.iter().enumerate() {
        let same_scc = scc_of[&edge.source] == scc_of[&edge.target];
        if same_scc && cyclic_sccs.contains(&scc_of[&edge.source]) {
            loop_edges.insert(edge_idx);
        }
    }
    for scc_id in &cyclic_sccs {
        for member in &scc_members[*scc_id] {
            if is_loop_carrying(member) {
                loop_nodes.insert(member.clone());
            }
        }
    }

    Ok(CycleInfo {
        loop_nodes,
        loop_edges,
        scc_of,
        scc_members,
    })
}

/// Entry set: nodes with no incoming edges, in schema order.
pub fn entry_nodes(schema: &WorkflowSchema) -> Result<Vec<String>, CompileError> {
    let targets: HashSet<&str> = schema.edges.iter().map(|e| e.target.as_str()).collect();
    let entries: Vec<String> = schema
        .nodes
        .iter()
        .filter(|n| !targets.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    if entries.is_empty() {
        return Err(CompileError::NoEntry);
    }
    Ok(entries)
}

/// BFS reachability from the entry set. Unreachable nodes are warnings, or
/// hard errors in strict mode.
pub fn validate_reachability(
    schema: &WorkflowSchema,
    entries: &[String],
    strict: bool,
) -> Result<Vec<Diagnostic>, CompileError> {
    let mut out_edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &schema.edges {
        out_edges
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = entries.iter().map(|s| s.as_str()).collect();
    for entry in entries {
        reachable.insert(entry.as_str());
    }
    while let Some(node) = queue.pop_front() {
        if let Some(nexts) = out_edges.get(node) {
            for next in nexts {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }

    let mut diags = Vec::new();
    for node in &schema.nodes {
        if !reachable.contains(node.id.as_str()) {
            if strict {
                return Err(CompileError::Orphan {
                    node_id: node.id.clone(),
                });
            }
            diags.push(Diagnostic::warning(
                "W101",
                format!("Unreachable node: {}", node.id),
                Some(node.id.clone()),
            ));
        }
    }
    Ok(diags)
}

/// Every referenced credential must exist for the invoking user and carry a
/// type the handler declared.
pub fn validate_credentials(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
    available: &HashMap<String, String>,
) -> Result<(), CompileError> {
    for node in &schema.nodes {
        let refs = node.credential_refs();
        if refs.is_empty() {
            continue;
        }
        let handler = registry
            .get(&node.node_type)
            .expect("node types resolved during structural validation");
        let declared = handler.credentials();
        for reference in refs {
            let credential_type =
                available
                    .get(&reference)
                    .ok_or_else(|| CompileError::Credential {
                        node_id: node.id.clone(),
                        reference: reference.clone(),
                        reason: "not found for this user".to_string(),
                    })?;
            if declared.is_empty() {
                return Err(CompileError::Credential {
                    node_id: node.id.clone(),
                    reference,
                    reason: format!(
                        "node type '{}' does not accept credentials",
                        node.node_type
                    ),
                });
            }
            if !declared.contains(&credential_type.as_str()) {
                return Err(CompileError::Credential {
                    node_id: node.id.clone(),
                    reference,
                    reason: format!(
                        "credential type '{}' is not accepted by node type '{}'",
                        credential_type, node.node_type
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Config shape validation against each handler's declared fields.
pub fn validate_configs(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
) -> Result<(), CompileError> {
    for node in &schema.nodes {
        let handler = registry
            .get(&node.node_type)
            .expect("node types resolved during structural validation");
        let config = node.config();
        for field in handler.fields() {
            match config.get(field.name) {
                None | Some(serde_json::Value::Null) => {
                    if field.required {
                        return Err(CompileError::Config {
                            node_id: node.id.clone(),
                            field: field.name.to_string(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    if !field.field_type.matches(value) {
                        return Err(CompileError::Config {
                            node_id: node.id.clone(),
                            field: field.name.to_string(),
                            message: format!(
                                "expected {:?}, got {}",
                                field.field_type,
                                type_name(value)
                            ),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Soft compatibility check between connected handles. Mismatches are
/// warnings; only concrete declarations on both sides are compared.
pub fn check_type_compatibility(
    schema: &WorkflowSchema,
    registry: &NodeHandlerRegistry,
) -> Vec<Diagnostic> {
    let by_id: HashMap<&str, &NodeSchema> =
        schema.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut diags = Vec::new();
    for edge in &schema.edges {
        let (Some(source), Some(target)) = (
            by_id.get(edge.source.as_str()),
            by_id.get(edge.target.as_str()),
        ) else {
            continue;
        };
        let (Some(source_handler), Some(target_handler)) = (
            registry.get(&source.node_type),
            registry.get(&target.node_type),
        ) else {
            continue;
        };
        let handle = edge.source_handle.as_deref().unwrap_or("default");
        let produced = source_handler.output_kind(handle);
        let accepted = target_handler.accepts();
        if produced == ValueKind::Any || accepted.contains(&ValueKind::Any) {
            continue;
        }
        if !accepted.contains(&produced) {
            diags.push(Diagnostic::warning(
                "W201",
                format!(
                    "edge {} -> {}: '{}' output of '{}' is not accepted by '{}'",
                    edge.source, edge.target, handle, source.node_type, target.node_type
                ),
                Some(target.id.clone()),
            ));
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_workflow;
    use crate::nodes::registry::NodeHandlerRegistry;
    use serde_json::json;

    fn registry() -> NodeHandlerRegistry {
        NodeHandlerRegistry::with_builtins()
    }

    fn linear_schema() -> WorkflowSchema {
        parse_workflow(&json!({
            "id": "wf",
            "nodes": [
                {"id": "t", "type": "manual_trigger", "data": {}},
                {"id": "n", "type": "noop", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "t", "target": "n"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_structure_ok() {
        assert!(validate_structure(&linear_schema(), &registry()).is_ok());
    }

    #[test]
    fn test_duplicate_node_id() {
        let schema = parse_workflow(&json!({
            "nodes": [
                {"id": "a", "type": "noop", "data": {}},
                {"id": "a", "type": "noop", "data": {}}
            ],
            "edges": []
        }))
        .unwrap();
        let err = validate_structure(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateNode { .. }));
    }

    #[test]
    fn test_unknown_node_type() {
        let schema = parse_workflow(&json!({
            "nodes": [{"id": "a", "type": "quantum_widget", "data": {}}],
            "edges": []
        }))
        .unwrap();
        let err = validate_structure(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownNodeType { .. }));
    }

    #[test]
    fn test_dangling_edge() {
        let schema = parse_workflow(&json!({
            "nodes": [{"id": "a", "type": "noop", "data": {}}],
            "edges": [{"id": "e", "source": "a", "target": "ghost"}]
        }))
        .unwrap();
        let err = validate_structure(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::EdgeEndpoint { .. }));
    }

    #[test]
    fn test_cycle_without_loop_node_rejected() {
        let schema = parse_workflow(&json!({
            "nodes": [
                {"id": "a", "type": "noop", "data": {}},
                {"id": "b", "type": "noop", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b"},
                {"id": "e2", "source": "b", "target": "a"}
            ]
        }))
        .unwrap();
        let err = analyze_cycles(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::Cycle { .. }));
    }

    #[test]
    fn test_cycle_with_loop_node_allowed() {
        let schema = parse_workflow(&json!({
            "nodes": [
                {"id": "t", "type": "manual_trigger", "data": {}},
                {"id": "l", "type": "loop", "data": {"max_loop_count": 3}},
                {"id": "body", "type": "noop", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "t", "target": "l"},
                {"id": "e2", "source": "l", "target": "body", "sourceHandle": "loop"},
                {"id": "e3", "source": "body", "target": "l"}
            ]
        }))
        .unwrap();
        let info = analyze_cycles(&schema, &registry()).unwrap();
        assert!(info.loop_nodes.contains("l"));
        assert_eq!(info.loop_edges.len(), 2);
    }

    #[test]
    fn test_entry_nodes() {
        let entries = entry_nodes(&linear_schema()).unwrap();
        assert_eq!(entries, vec!["t"]);
    }

    #[test]
    fn test_empty_workflow_no_entry() {
        let schema = parse_workflow(&json!({"nodes": [], "edges": []})).unwrap();
        assert!(matches!(entry_nodes(&schema), Err(CompileError::NoEntry)));
    }

    #[test]
    fn test_orphan_warning_and_strict_error() {
        let schema = parse_workflow(&json!({
            "nodes": [
                {"id": "t", "type": "manual_trigger", "data": {}},
                {"id": "island", "type": "noop", "data": {}},
                {"id": "feeder", "type": "noop", "data": {}}
            ],
            "edges": [{"id": "e", "source": "feeder", "target": "island"}]
        }))
        .unwrap();
        let entries = vec!["t".to_string()];
        let diags = validate_reachability(&schema, &entries, false).unwrap();
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.level == DiagnosticLevel::Warning));

        let err = validate_reachability(&schema, &entries, true).unwrap_err();
        assert!(matches!(err, CompileError::Orphan { .. }));
    }

    #[test]
    fn test_required_config_field_missing() {
        let schema = parse_workflow(&json!({
            "nodes": [{"id": "l", "type": "loop", "data": {}}],
            "edges": []
        }))
        .unwrap();
        let err = validate_configs(&schema, &registry()).unwrap_err();
        match err {
            CompileError::Config { node_id, field, .. } => {
                assert_eq!(node_id, "l");
                assert_eq!(field, "max_loop_count");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_type_mismatch() {
        let schema = parse_workflow(&json!({
            "nodes": [{"id": "l", "type": "loop", "data": {"max_loop_count": "lots"}}],
            "edges": []
        }))
        .unwrap();
        let err = validate_configs(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::Config { .. }));
    }

    #[test]
    fn test_type_compatibility_warns_on_concrete_mismatch() {
        use crate::nodes::handler::{NodeContext, NodeHandler, NodeResult};
        use async_trait::async_trait;
        use std::sync::Arc;

        struct TextSource;

        #[async_trait]
        impl NodeHandler for TextSource {
            fn output_kind(&self, _handle: &str) -> ValueKind {
                ValueKind::Text
            }

            async fn execute(
                &self,
                input: serde_json::Value,
                _config: &serde_json::Value,
                _ctx: &mut NodeContext<'_>,
            ) -> Result<NodeResult, crate::error::NodeError> {
                Ok(NodeResult::ok(input))
            }
        }

        struct ListConsumer;

        #[async_trait]
        impl NodeHandler for ListConsumer {
            fn accepts(&self) -> &'static [ValueKind] {
                &[ValueKind::List]
            }

            async fn execute(
                &self,
                input: serde_json::Value,
                _config: &serde_json::Value,
                _ctx: &mut NodeContext<'_>,
            ) -> Result<NodeResult, crate::error::NodeError> {
                Ok(NodeResult::ok(input))
            }
        }

        let mut registry = NodeHandlerRegistry::with_builtins();
        registry.register("text_source", Arc::new(TextSource));
        registry.register("list_consumer", Arc::new(ListConsumer));

        let schema = parse_workflow(&json!({
            "nodes": [
                {"id": "a", "type": "text_source", "data": {}},
                {"id": "b", "type": "list_consumer", "data": {}},
                {"id": "c", "type": "noop", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b"},
                {"id": "e2", "source": "a", "target": "c"}
            ]
        }))
        .unwrap();

        let diags = check_type_compatibility(&schema, &registry);
        // Only the concrete text -> list edge is flagged; noop accepts any.
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "W201");
        assert_eq!(diags[0].node_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_credential_validation() {
        let schema = parse_workflow(&json!({
            "nodes": [{"id": "a", "type": "noop", "data": {"credential": "cred-a"}}],
            "edges": []
        }))
        .unwrap();
        // noop declares no credential types, so any reference is rejected.
        let available = HashMap::from([("cred-a".to_string(), "slack".to_string())]);
        let err = validate_credentials(&schema, &registry(), &available).unwrap_err();
        assert!(matches!(err, CompileError::Credential { .. }));

        // Unknown reference is rejected before the type check.
        let err = validate_credentials(&schema, &registry(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, CompileError::Credential { .. }));
    }
}
