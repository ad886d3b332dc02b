//! End-to-end execution scenarios driven through the supervisor.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use regent::nodes::handler::{NodeContext, NodeHandler, NodeResult};
use regent::{
    Caller, EventSink, ExecutionEvent, ExecutionState, NodeError, NodeHandlerRegistry, Supervisor,
};

/// Handler that merges a configured `emit` object over its input. Stands in
/// for integration nodes (code, http) which live outside the kernel.
struct EmitHandler;

#[async_trait]
impl NodeHandler for EmitHandler {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeResult, NodeError> {
        let mut data = match input {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(extra) = config.get("emit").and_then(|v| v.as_object()) {
            for (k, v) in extra {
                data.insert(k.clone(), v.clone());
            }
        }
        Ok(NodeResult::ok(Value::Object(data)))
    }
}

#[derive(Clone, Default)]
struct CollectingSink {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventSink for CollectingSink {
    fn on_event(&self, event: &ExecutionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl CollectingSink {
    fn node_sequence(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::NodeStarted { node_id, .. } => Some(format!("start:{node_id}")),
                ExecutionEvent::NodeCompleted {
                    node_id,
                    output_handle,
                    ..
                } => Some(format!("complete:{node_id}:{output_handle}")),
                ExecutionEvent::ExecutionCompleted { .. } => Some("execution_completed".into()),
                ExecutionEvent::ExecutionFailed { .. } => Some("execution_failed".into()),
                _ => None,
            })
            .collect()
    }
}

fn registry_with_emitters() -> Arc<NodeHandlerRegistry> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut registry = NodeHandlerRegistry::with_builtins();
    registry.register("code", Arc::new(EmitHandler));
    registry.register("http", Arc::new(EmitHandler));
    Arc::new(registry)
}

fn branching_workflow() -> Value {
    json!({
        "id": "wf-branching",
        "user_id": 1,
        "nodes": [
            {"id": "trigger", "type": "manual_trigger", "data": {}},
            {"id": "code", "type": "code", "data": {"emit": {"batch_id": 2500}}},
            {"id": "if", "type": "if", "data": {"expression": "batch_id > 2000"}},
            {"id": "http", "type": "http", "data": {"emit": {"status": "active"}}},
            {"id": "notify", "type": "code", "data": {"emit": {"notified": true}}}
        ],
        "edges": [
            {"id": "e1", "source": "trigger", "target": "code"},
            {"id": "e2", "source": "code", "target": "if"},
            {"id": "e3", "source": "if", "target": "http", "sourceHandle": "true"},
            {"id": "e4", "source": "if", "target": "notify", "sourceHandle": "false"}
        ]
    })
}

#[tokio::test]
async fn test_happy_path_events_and_output() {
    let sink = CollectingSink::default();
    let supervisor = Supervisor::builder(registry_with_emitters())
        .event_sink(Arc::new(sink.clone()))
        .build();

    let handle = supervisor
        .start(branching_workflow(), Caller::User(1), json!({"user_id": 1500}))
        .await
        .unwrap();
    let finished = supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();

    assert_eq!(finished.state, ExecutionState::Completed);
    assert_eq!(finished.progress, 100.0);

    let output = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::ExecutionCompleted { output, .. } => Some(output.clone()),
            _ => None,
        })
        .expect("terminal event present");
    assert_eq!(output["status"], "active");

    let sequence = sink.node_sequence();
    assert_eq!(
        sequence,
        vec![
            "start:trigger",
            "complete:trigger:default",
            "start:code",
            "complete:code:default",
            "start:if",
            "complete:if:true",
            "start:http",
            "complete:http:default",
            "execution_completed",
        ]
    );
}

#[tokio::test]
async fn test_conditional_skip_runs_other_branch() {
    let sink = CollectingSink::default();
    let supervisor = Supervisor::builder(registry_with_emitters())
        .event_sink(Arc::new(sink.clone()))
        .build();

    let mut workflow = branching_workflow();
    workflow["nodes"][1]["data"]["emit"] = json!({"batch_id": 1500});

    let handle = supervisor
        .start(workflow, Caller::User(1), json!({"user_id": 500}))
        .await
        .unwrap();
    let finished = supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();
    assert_eq!(finished.state, ExecutionState::Completed);

    let sequence = sink.node_sequence();
    assert!(sequence.contains(&"complete:if:false".to_string()));
    assert!(!sequence.iter().any(|s| s.contains("http")));
    // The notify branch is the final node event before completion.
    assert_eq!(
        sequence[sequence.len() - 2],
        "complete:notify:default".to_string()
    );
}

#[tokio::test]
async fn test_skipped_nodes_emit_no_events() {
    let sink = CollectingSink::default();
    let supervisor = Supervisor::builder(registry_with_emitters())
        .event_sink(Arc::new(sink.clone()))
        .build();

    let handle = supervisor
        .start(branching_workflow(), Caller::User(1), json!({}))
        .await
        .unwrap();
    supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();

    let sequence = sink.node_sequence();
    let http_completions = sequence
        .iter()
        .filter(|s| s.starts_with("complete:http"))
        .count();
    let notify_events = sequence.iter().filter(|s| s.contains("notify")).count();
    assert_eq!(http_completions, 1);
    assert_eq!(notify_events, 0);
}

#[tokio::test]
async fn test_templated_config_reads_upstream_output() {
    let sink = CollectingSink::default();
    let supervisor = Supervisor::builder(registry_with_emitters())
        .event_sink(Arc::new(sink.clone()))
        .build();

    let workflow = json!({
        "id": "wf-template",
        "user_id": 1,
        "nodes": [
            {"id": "trigger", "type": "manual_trigger", "data": {}},
            {"id": "code", "type": "code", "data": {"emit": {"batch_id": 42}}},
            {"id": "report", "type": "set", "data": {
                "values": {
                    "summary": "batch {{ $input.batch_id }} for {{ $output.trigger.user_id }}"
                }
            }}
        ],
        "edges": [
            {"id": "e1", "source": "trigger", "target": "code"},
            {"id": "e2", "source": "code", "target": "report"}
        ]
    });

    let handle = supervisor
        .start(workflow, Caller::User(1), json!({"user_id": 7}))
        .await
        .unwrap();
    let finished = supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();
    assert_eq!(finished.state, ExecutionState::Completed);

    let output = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::ExecutionCompleted { output, .. } => Some(output.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(output["summary"], "batch 42 for 7");
}

#[tokio::test]
async fn test_loop_workflow_accumulates_and_finishes() {
    let supervisor = Supervisor::new(registry_with_emitters());

    let workflow = json!({
        "id": "wf-loop",
        "user_id": 1,
        "nodes": [
            {"id": "trigger", "type": "manual_trigger", "data": {}},
            {"id": "batcher", "type": "loop", "data": {"max_loop_count": 3}},
            {"id": "body", "type": "code", "data": {"emit": {"processed": true}}},
            {"id": "after", "type": "noop", "data": {}}
        ],
        "edges": [
            {"id": "e1", "source": "trigger", "target": "batcher"},
            {"id": "e2", "source": "batcher", "target": "body", "sourceHandle": "loop"},
            {"id": "e3", "source": "body", "target": "batcher"},
            {"id": "e4", "source": "batcher", "target": "after", "sourceHandle": "done"}
        ]
    });

    let handle = supervisor
        .start(workflow, Caller::User(1), json!({}))
        .await
        .unwrap();
    let finished = supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();

    assert_eq!(finished.state, ExecutionState::Completed);
    assert_eq!(finished.loop_counters.get("batcher:loop"), Some(&3));
}

#[tokio::test]
async fn test_failing_node_marks_execution_failed() {
    struct AlwaysFails;

    #[async_trait]
    impl NodeHandler for AlwaysFails {
        async fn execute(
            &self,
            _input: Value,
            _config: &Value,
            _ctx: &mut NodeContext<'_>,
        ) -> Result<NodeResult, NodeError> {
            Err(NodeError::Handler("downstream unavailable".into()))
        }
    }

    let mut registry = NodeHandlerRegistry::with_builtins();
    registry.register("always_fails", Arc::new(AlwaysFails));
    let supervisor = Supervisor::new(Arc::new(registry));

    let workflow = json!({
        "id": "wf-fail",
        "user_id": 1,
        "nodes": [
            {"id": "trigger", "type": "manual_trigger", "data": {}},
            {"id": "broken", "type": "always_fails", "data": {}}
        ],
        "edges": [{"id": "e1", "source": "trigger", "target": "broken"}]
    });

    let handle = supervisor
        .start(workflow, Caller::User(1), json!({}))
        .await
        .unwrap();
    let finished = supervisor
        .wait(handle.execution_id, Caller::User(1))
        .await
        .unwrap();

    assert_eq!(finished.state, ExecutionState::Failed);
    let failure = finished.error.unwrap();
    assert_eq!(failure.failing_node_id.as_deref(), Some("broken"));
    assert!(failure.message.contains("downstream unavailable"));
    assert_eq!(finished.execution_errors.len(), 1);
}
