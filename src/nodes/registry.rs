//! Process-wide node handler registry.
//!
//! Built once at startup and read-only afterwards. Registering the same tag
//! twice is a programmer error and fails loudly.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::NodeHandler;

pub struct NodeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeHandlerRegistry {
    pub fn empty() -> Self {
        NodeHandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the control-flow handlers the kernel owns.
    pub fn with_builtins() -> Self {
        let mut registry = NodeHandlerRegistry::empty();
        registry.register("manual_trigger", Arc::new(super::triggers::ManualTrigger));
        registry.register("webhook_trigger", Arc::new(super::triggers::WebhookTrigger));
        registry.register("noop", Arc::new(super::logic::NoopHandler));
        registry.register("if", Arc::new(super::logic::IfHandler));
        registry.register("switch", Arc::new(super::logic::SwitchHandler));
        registry.register("merge", Arc::new(super::logic::MergeHandler));
        registry.register("set", Arc::new(super::logic::SetHandler));
        registry.register("loop", Arc::new(super::flow::LoopHandler));
        registry.register(
            "split_in_batches",
            Arc::new(super::flow::SplitInBatchesHandler),
        );
        registry.register("approval", Arc::new(super::approval::ApprovalHandler));
        registry.register(
            "subworkflow",
            Arc::new(super::subworkflow::SubworkflowHandler),
        );
        registry
    }

    /// Register a handler for a type tag.
    ///
    /// Panics when the tag is already taken; duplicate registration is a
    /// startup bug, not a runtime condition.
    pub fn register(&mut self, type_tag: &str, handler: Arc<dyn NodeHandler>) {
        if self
            .handlers
            .insert(type_tag.to_string(), handler)
            .is_some()
        {
            panic!("node type '{type_tag}' registered twice");
        }
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(type_tag).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for NodeHandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
