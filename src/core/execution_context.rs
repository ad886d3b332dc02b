//! Per-execution mutable state.
//!
//! Owned by exactly one graph runner; no intra-execution concurrency ever
//! touches it. Created when an execution starts, destroyed at the terminal
//! transition. Credential material is zeroed on teardown and the context is
//! never persisted.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::credential::CredentialHandle;

/// A published node output together with the handle it selected.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub data: Value,
    pub output_handle: String,
}

/// State bag for one execution.
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub user_id: i64,
    pub nesting_depth: u32,
    /// Workflow ids from the root execution down to this one.
    pub workflow_chain: Vec<String>,
    variables: HashMap<String, Value>,
    node_outputs: HashMap<String, NodeOutput>,
    credentials: HashMap<String, CredentialHandle>,
    loop_counters: HashMap<String, u32>,
    loop_items: HashMap<String, Vec<Value>>,
    batch_cursors: HashMap<String, usize>,
    accumulated: HashMap<String, Vec<Value>>,
}

impl ExecutionContext {
    pub fn new(execution_id: Uuid, user_id: i64) -> Self {
        ExecutionContext {
            execution_id,
            user_id,
            nesting_depth: 0,
            workflow_chain: Vec::new(),
            variables: HashMap::new(),
            node_outputs: HashMap::new(),
            credentials: HashMap::new(),
            loop_counters: HashMap::new(),
            loop_items: HashMap::new(),
            batch_cursors: HashMap::new(),
            accumulated: HashMap::new(),
        }
    }

    pub fn with_credentials(mut self, handles: Vec<CredentialHandle>) -> Self {
        for handle in handles {
            self.credentials.insert(handle.reference.clone(), handle);
        }
        self
    }

    pub fn with_nesting(mut self, depth: u32, chain: Vec<String>) -> Self {
        self.nesting_depth = depth;
        self.workflow_chain = chain;
        self
    }

    // --- Variables ---

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    // --- Node outputs ---

    pub fn publish_output(&mut self, node_id: &str, data: Value, output_handle: &str) {
        self.node_outputs.insert(
            node_id.to_string(),
            NodeOutput {
                data,
                output_handle: output_handle.to_string(),
            },
        );
    }

    pub fn node_output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.node_outputs.get(node_id)
    }

    /// Merge the outputs of the given upstream nodes into one input value.
    ///
    /// Object outputs are merged key-wise in the order given; non-object
    /// outputs land under their node id.
    pub fn resolve_input(&self, upstream: &[String]) -> Value {
        let mut merged = serde_json::Map::new();
        for source in upstream {
            if let Some(output) = self.node_outputs.get(source) {
                match &output.data {
                    Value::Object(map) => {
                        for (k, v) in map {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    Value::Null => {}
                    other => {
                        merged.insert(source.clone(), other.clone());
                    }
                }
            }
        }
        Value::Object(merged)
    }

    // --- Credentials ---

    /// Look up a decrypted credential handle.
    ///
    /// References are validated during compilation for this execution's
    /// user, so a missing entry is a programmer error.
    pub fn credential(&self, reference: &str) -> &CredentialHandle {
        self.credentials
            .get(reference)
            .expect("credential reference validated at compile time")
    }

    pub fn has_credential(&self, reference: &str) -> bool {
        self.credentials.contains_key(reference)
    }

    /// Overwrite and drop all credential material.
    pub fn zero_credentials(&mut self) {
        for handle in self.credentials.values_mut() {
            handle.zero();
        }
        self.credentials.clear();
    }

    /// Replace any credential secret appearing in `value` before it leaves
    /// the execution (events, records, logs). Node-to-node data flow keeps
    /// the real values.
    pub fn redact_secrets(&self, value: &Value) -> Value {
        let secrets: Vec<&str> = self
            .credentials
            .values()
            .flat_map(|h| h.secrets().values())
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        if secrets.is_empty() {
            return value.clone();
        }
        redact_value(value, &secrets)
    }

    // --- Loop helpers ---

    pub fn loop_count(&self, node_id: &str) -> u32 {
        self.loop_counters.get(node_id).copied().unwrap_or(0)
    }

    /// Bump the loop counter and return the new value.
    pub fn increment_loop(&mut self, node_id: &str) -> u32 {
        let counter = self.loop_counters.entry(node_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn loop_counters(&self) -> &HashMap<String, u32> {
        &self.loop_counters
    }

    pub fn items(&self, node_id: &str) -> Option<&Vec<Value>> {
        self.loop_items.get(node_id)
    }

    pub fn set_items(&mut self, node_id: &str, items: Vec<Value>) {
        self.loop_items.insert(node_id.to_string(), items);
    }

    pub fn batch_cursor(&self, node_id: &str) -> usize {
        self.batch_cursors.get(node_id).copied().unwrap_or(0)
    }

    pub fn set_batch_cursor(&mut self, node_id: &str, cursor: usize) {
        self.batch_cursors.insert(node_id.to_string(), cursor);
    }

    pub fn accumulate_result(&mut self, node_id: &str, value: Value) {
        self.accumulated
            .entry(node_id.to_string())
            .or_default()
            .push(value);
    }

    pub fn accumulated_results(&self, node_id: &str) -> Vec<Value> {
        self.accumulated.get(node_id).cloned().unwrap_or_default()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.zero_credentials();
    }
}

fn redact_value(value: &Value, secrets: &[&str]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for secret in secrets {
                if out.contains(secret) {
                    out = out.replace(secret, "***");
                }
            }
            Value::String(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_value(v, secrets)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
