//! Entry-point handlers.
//!
//! Triggers sit at the head of a workflow and hand the execution input to
//! the graph unchanged. Transport concerns (webhooks, schedules) live
//! outside the kernel; at execution time every trigger is a pass-through.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::NodeError;

use super::handler::{NodeContext, NodeHandler, NodeResult};

pub struct ManualTrigger;

#[async_trait]
impl NodeHandler for ManualTrigger {
    async fn execute(
        &self,
        input: Value,
        _config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::ok(input))
    }
}

pub struct WebhookTrigger;

#[async_trait]
impl NodeHandler for WebhookTrigger {
    async fn execute(
        &self,
        input: Value,
        _config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::ok(input))
    }
}
