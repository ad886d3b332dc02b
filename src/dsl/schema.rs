//! Wire-format workflow schema.
//!
//! Mirrors the JSON produced by the upstream visual editor. Unknown fields
//! are ignored so newer editors keep working against this kernel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete workflow definition as received on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSchema {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: i64,
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    #[serde(default, alias = "settings")]
    pub workflow_settings: WorkflowSettings,
}

/// Node definition. `data` carries the per-type configuration, either
/// directly or nested under a `config` key depending on the editor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: Value,
}

impl NodeSchema {
    /// Normalized node configuration.
    pub fn config(&self) -> Value {
        match self.data.get("config") {
            Some(cfg) if cfg.is_object() => cfg.clone(),
            _ => {
                if self.data.is_object() {
                    self.data.clone()
                } else {
                    Value::Object(serde_json::Map::new())
                }
            }
        }
    }

    /// Display label, falling back to the node id.
    pub fn label(&self) -> String {
        self.data
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Credential references named by this node's config.
    ///
    /// Accepts a single `credential` string or a `credentials` string array.
    pub fn credential_refs(&self) -> Vec<String> {
        let config = self.config();
        let mut refs = Vec::new();
        if let Some(single) = config.get("credential").and_then(|v| v.as_str()) {
            if !single.is_empty() {
                refs.push(single.to_string());
            }
        }
        if let Some(many) = config.get("credentials").and_then(|v| v.as_array()) {
            for entry in many {
                if let Some(s) = entry.as_str() {
                    if !s.is_empty() && !refs.iter().any(|r| r == s) {
                        refs.push(s.to_string());
                    }
                }
            }
        }
        refs
    }

    /// Per-node timeout override in milliseconds.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.config().get("timeout_ms").and_then(|v| v.as_u64())
    }

    /// Per-node retry override.
    pub fn max_retries(&self) -> Option<u32> {
        self.config()
            .get("max_retries")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }
}

/// Edge definition. `source_handle` disambiguates multiple outgoing edges.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
    /// Raw edge kind tag. Editors also put presentation values here, so
    /// unknown tags fall back to handle-derived classification.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl EdgeSchema {
    /// Effective edge kind: explicit when recognized, derived from the
    /// source handle otherwise.
    pub fn effective_kind(&self) -> EdgeKind {
        match self.kind.as_deref() {
            Some("default") => EdgeKind::Default,
            Some("conditional") => EdgeKind::Conditional,
            Some("loop_body") => EdgeKind::LoopBody,
            Some("loop_done") => EdgeKind::LoopDone,
            _ => EdgeKind::from_source_handle(self.source_handle.as_deref()),
        }
    }
}

/// Classification of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Default,
    Conditional,
    LoopBody,
    LoopDone,
}

impl EdgeKind {
    pub fn from_source_handle(handle: Option<&str>) -> Self {
        match handle {
            Some("loop") => EdgeKind::LoopBody,
            Some("done") => EdgeKind::LoopDone,
            Some("default") | None => EdgeKind::Default,
            Some(_) => EdgeKind::Conditional,
        }
    }
}

/// Partial-failure policy for a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    FailFast,
    Continue,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::FailFast
    }
}

/// Workflow-level settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub max_nesting_depth: Option<u32>,
    /// Strict mode turns orphan warnings into compile errors.
    #[serde(default)]
    pub strict: bool,
}
