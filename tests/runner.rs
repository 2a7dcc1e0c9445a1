//! Integration tests for the runner: active execution table, persistence hook and resume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stepway::config::ExecutionConfig;
use stepway::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput, NodeRegistry};
use stepway::parameter::NodeSpec;
use stepway::runtime::{
    ActiveExecutions, ExecutionEngine, ExecutionFailure, ExecutionMode, ExecutionStore, InMemoryExecutionStore,
    PersistenceHook, RunStatus, WorkflowRunner,
};
use stepway::workflow::{InMemoryWorkflowStore, Workflow, WorkflowStore};

/// Panics while executing; used to check crash recovery
#[derive(Debug)]
struct Explode {
    spec: Arc<NodeSpec>,
}

#[async_trait]
impl ExecutableNode for Explode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "explode"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, _input: NodeInput<'_>) -> NodeExecutionResult {
        panic!("explode node reached");
    }
}

/// Sleeps until the run is canceled, then passes its input on
#[derive(Debug)]
struct Linger {
    spec: Arc<NodeSpec>,
}

#[async_trait]
impl ExecutableNode for Linger {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "linger"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
        }
        NodeExecutionResult::success(vec![input.main_items().to_vec()])
    }
}

struct Harness {
    runner: WorkflowRunner,
    executions: Arc<InMemoryExecutionStore>,
    workflows: Arc<InMemoryWorkflowStore>,
}

fn harness() -> Harness {
    let config = ExecutionConfig {
        script_timeout_secs: 5,
        shutdown_grace_secs: 1,
        max_iterations: 1_000,
    };
    let registry = Arc::new(NodeRegistry::with_builtin());
    registry.register(Arc::new(Explode {
        spec: Arc::new(NodeSpec::new("explode", "Explode")),
    }));
    registry.register(Arc::new(Linger {
        spec: Arc::new(NodeSpec::new("linger", "Linger")),
    }));

    let executions = Arc::new(InMemoryExecutionStore::new());
    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let engine = ExecutionEngine::new(registry, &config).with_hook(Arc::new(PersistenceHook::new(executions.clone())));
    let active = ActiveExecutions::new(executions.clone(), config.shutdown_grace());

    Harness {
        runner: WorkflowRunner::new(Arc::new(engine), Arc::new(active), workflows.clone()),
        executions,
        workflows,
    }
}

fn chain(id: &str, second: serde_json::Value) -> Workflow {
    let mut workflow: Workflow = serde_json::from_value(json!({
        "id": id,
        "name": id,
        "nodes": [
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            second,
            {"id": "n", "name": "End", "type": "noOp"}
        ]
    }))
    .expect("valid workflow");
    let middle = workflow.nodes[1].name.clone();
    workflow.connections.connect("Start", 0, &middle, 0);
    workflow.connections.connect(&middle, 0, "End", 0);
    workflow
}

#[tokio::test]
async fn successful_run_is_persisted_and_unregistered() {
    let h = harness();
    let wf = chain("wf-ok", json!({"id": "p", "name": "Pass", "type": "noOp"}));
    h.workflows.save_workflow(&wf).await.unwrap();

    let handle = h
        .runner
        .run_workflow_by_id("wf-ok", ExecutionMode::Trigger, None)
        .await
        .unwrap();
    let id = handle.execution_id().to_string();
    let run = handle.wait().await.unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert!(h.runner.active().current_executions().is_empty());
    let record = h.executions.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert!(record.finished);
    assert_eq!(record.data.unwrap().run_data.len(), 3);
}

#[tokio::test]
async fn unknown_workflow_is_an_error() {
    let h = harness();
    let err = h
        .runner
        .run_workflow_by_id("missing", ExecutionMode::Trigger, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Workflow not found"));
}

#[tokio::test]
async fn discarded_runs_leave_no_record() {
    let h = harness();
    let mut wf = chain("wf-discard", json!({"id": "p", "name": "Pass", "type": "noOp"}));
    wf.settings = serde_json::from_value(json!({"saveDataSuccessExecution": "none"})).unwrap();

    let handle = h.runner.run(wf, ExecutionMode::Trigger, None, None).await.unwrap();
    let id = handle.execution_id().to_string();
    let run = handle.wait().await.unwrap();

    assert!(run.needs_delete);
    assert!(h.executions.get_execution(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn panicking_node_never_leaves_a_zombie_entry() {
    let h = harness();
    let wf = chain("wf-panic", json!({"id": "x", "name": "Boom", "type": "explode"}));

    let handle = h.runner.run(wf, ExecutionMode::Manual, None, None).await.unwrap();
    let id = handle.execution_id().to_string();

    match handle.wait().await {
        Err(ExecutionFailure::Panic(message)) => assert!(message.contains("explode node reached")),
        other => panic!("expected a recovered panic, got {other:?}"),
    }
    assert!(!h.runner.active().is_active(&id));
    let record = h.executions.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Crashed);
}

#[tokio::test]
async fn stop_cancels_a_running_execution() {
    let h = harness();
    let wf = chain("wf-stop", json!({"id": "l", "name": "Slow", "type": "linger"}));

    let handle = h.runner.run(wf, ExecutionMode::Manual, None, None).await.unwrap();
    let id = handle.execution_id().to_string();
    assert!(h.runner.active().is_active(&id));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.runner.stop(&id));
    assert!(!h.runner.stop(&id));

    let run = handle.wait().await.unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert_eq!(run.task_count("End"), 0);
    let record = h.executions.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Canceled);
}

#[tokio::test]
async fn waiting_run_resumes_under_the_same_id() {
    let h = harness();
    let wf = chain(
        "wf-wait",
        json!({"id": "w", "name": "Pause", "type": "wait", "parameters": {"amount": 1, "unit": "days"}}),
    );
    h.workflows.save_workflow(&wf).await.unwrap();

    let handle = h.runner.run(wf, ExecutionMode::Trigger, None, None).await.unwrap();
    let id = handle.execution_id().to_string();
    let paused = handle.wait().await.unwrap();
    assert_eq!(paused.status, RunStatus::Waiting);
    let record = h.executions.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Waiting);
    assert!(record.wait_till.is_some());

    let resumed = h.runner.resume(&id).await.unwrap().wait().await.unwrap();
    assert_eq!(resumed.id, id);
    assert_eq!(resumed.status, RunStatus::Success);
    assert_eq!(resumed.execution_order(), vec!["Start", "Pause", "End"]);

    let record = h.executions.get_execution(&id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert!(h.runner.resume(&id).await.is_err());
}

#[tokio::test]
async fn run_from_node_starts_a_new_execution() {
    let h = harness();
    let wf = chain("wf-rerun", json!({"id": "p", "name": "Pass", "type": "noOp"}));

    let first = h
        .runner
        .run(wf.clone(), ExecutionMode::Manual, None, None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let handle = h
        .runner
        .run_from_node(wf, ExecutionMode::Retry, "End".into(), first.data.run_data.clone())
        .await
        .unwrap();
    assert_ne!(handle.execution_id(), first.id);
    let rerun = handle.wait().await.unwrap();
    assert_eq!(rerun.task_count("End"), 2);
    assert_eq!(rerun.task_count("Pass"), 1);
}

#[tokio::test]
async fn shutdown_drains_finished_work() {
    let h = harness();
    let wf = chain("wf-drain", json!({"id": "p", "name": "Pass", "type": "noOp"}));
    let handle = h.runner.run(wf, ExecutionMode::Manual, None, None).await.unwrap();

    h.runner.shutdown().await;
    assert!(h.runner.active().is_empty());
    assert_eq!(handle.wait().await.unwrap().status, RunStatus::Success);
}
