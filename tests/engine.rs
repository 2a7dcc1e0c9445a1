//! Integration tests for full workflow runs through the engine with the built-in nodes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stepway::config::ExecutionConfig;
use stepway::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput, NodeRegistry};
use stepway::parameter::NodeSpec;
use stepway::runtime::{
    ExecutionEngine, ExecutionLifecycleHook, ExecutionMode, RunExecutionData, RunStatus, TaskData, TaskStatus,
};
use stepway::sandbox::Sandbox;
use stepway::workflow::{items_from_values, Workflow};
use tokio_util::sync::CancellationToken;

fn config() -> ExecutionConfig {
    ExecutionConfig {
        script_timeout_secs: 5,
        shutdown_grace_secs: 1,
        max_iterations: 1_000,
    }
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(NodeRegistry::with_builtin()), &config())
}

/// Build a workflow from node JSON and `(source, output, target, input)` links
fn workflow(nodes: Value, links: &[(&str, usize, &str, usize)]) -> Workflow {
    let mut workflow: Workflow = serde_json::from_value(json!({
        "id": "wf-test",
        "name": "Test",
        "nodes": nodes
    }))
    .expect("valid workflow");
    for (source, output, target, input) in links {
        workflow.connections.connect(source, *output, target, *input);
    }
    workflow
}

fn set_node(name: &str, field: &str, value: Value, y: f64) -> Value {
    json!({
        "id": name, "name": name, "type": "set", "position": [200, y],
        "parameters": {"fields": {"values": [{"name": field, "value": value}]}}
    })
}

async fn run(engine: &ExecutionEngine, wf: &Workflow) -> stepway::Run {
    engine
        .run(wf, "exec-test", ExecutionMode::Manual, None, None, &CancellationToken::new())
        .await
        .expect("run completes")
}

#[tokio::test]
async fn expressions_flow_through_set_nodes() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            set_node("Greet", "greeting", json!("=Hello {{ $json.name }}"), 0.0)
        ]),
        &[("Start", 0, "Greet", 0)],
    );
    let items = items_from_values(vec![json!({"name": "Ada"}), json!({"name": "Linus"})]);
    let run = engine()
        .run(&wf, "exec-test", ExecutionMode::Manual, None, Some(items), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    let out = run.node_output("Greet", 0).unwrap();
    assert_eq!(out[0].json["greeting"], json!("Hello Ada"));
    assert_eq!(out[1].json["greeting"], json!("Hello Linus"));
    assert_eq!(out[1].json["name"], json!("Linus"));
}

#[tokio::test]
async fn join_waits_for_every_predecessor() {
    // Start fans out to A (top) and B (bottom); B reaches the merge through C
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger", "position": [0, 0]},
            set_node("A", "from", json!("a"), 0.0),
            set_node("B", "from", json!("b"), 100.0),
            set_node("C", "via", json!("c"), 100.0),
            {"id": "m", "name": "Merge", "type": "merge", "position": [600, 50]}
        ]),
        &[
            ("Start", 0, "A", 0),
            ("Start", 0, "B", 0),
            ("B", 0, "C", 0),
            ("A", 0, "Merge", 0),
            ("C", 0, "Merge", 1),
        ],
    );
    let run = run(&engine(), &wf).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.execution_order(), vec!["Start", "A", "B", "C", "Merge"]);
    assert_eq!(run.task_count("Merge"), 1);

    let merged = run.node_output("Merge", 0).unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].json["from"], json!("a"));
    assert_eq!(merged[1].json["via"], json!("c"));

    let sources = &run.data.run_data["Merge"][0].source;
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[1].previous_node, "C");
    assert_eq!(sources[1].input, 1);
}

#[tokio::test]
async fn join_never_runs_with_a_silent_branch() {
    // Every item takes the true branch, so the false branch never feeds the merge
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "i", "name": "If", "type": "if", "parameters": {"conditions": {
                "conditions": [{"leftValue": "={{ $json.ok }}", "operator": {"type": "boolean", "operation": "true"}}],
                "combinator": "and"
            }}},
            set_node("Yes", "branch", json!("yes"), 0.0),
            set_node("No", "branch", json!("no"), 100.0),
            {"id": "m", "name": "Merge", "type": "merge", "position": [600, 50]}
        ]),
        &[
            ("Start", 0, "If", 0),
            ("If", 0, "Yes", 0),
            ("If", 1, "No", 0),
            ("Yes", 0, "Merge", 0),
            ("No", 0, "Merge", 1),
        ],
    );
    let items = items_from_values(vec![json!({"ok": true})]);
    let run = engine()
        .run(&wf, "exec-test", ExecutionMode::Manual, None, Some(items), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.execution_order(), vec!["Start", "If", "Yes"]);
    assert_eq!(run.task_count("Merge"), 0);
    assert!(run.data.state.stack.is_empty());
}

#[tokio::test]
async fn disabled_node_forwards_to_every_successor() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "d", "name": "Skipped", "type": "set", "disabled": true,
             "parameters": {"fields": {"values": [{"name": "touched", "value": true}]}}},
            {"id": "l", "name": "Left", "type": "noOp", "position": [400, 0]},
            {"id": "r", "name": "Right", "type": "noOp", "position": [400, 200]}
        ]),
        &[("Start", 0, "Skipped", 0), ("Skipped", 0, "Left", 0), ("Skipped", 0, "Right", 0)],
    );
    let items = items_from_values(vec![json!({"n": 1})]);
    let run = engine()
        .run(&wf, "exec-test", ExecutionMode::Manual, None, Some(items), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!run.data.run_data.contains_key("Skipped"));
    assert_eq!(run.execution_order(), vec!["Start", "Left", "Right"]);
    for branch in ["Left", "Right"] {
        let out = run.node_output(branch, 0).unwrap();
        assert_eq!(out[0].json, json!({"n": 1}).as_object().unwrap().clone());
    }
}

#[tokio::test]
async fn first_failure_aborts_the_stack() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "s", "name": "Stop", "type": "stopAndError", "parameters": {"errorMessage": "bad input"}},
            {"id": "n", "name": "After", "type": "noOp"}
        ]),
        &[("Start", 0, "Stop", 0), ("Stop", 0, "After", 0)],
    );
    let run = run(&engine(), &wf).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.finished);
    let error = run.data.error.as_ref().unwrap();
    assert_eq!(error.message, "bad input");
    assert_eq!(error.node.as_deref(), Some("Stop"));
    assert_eq!(run.data.run_data["Stop"][0].status, TaskStatus::Error);
    assert_eq!(run.task_count("After"), 0);
}

#[tokio::test]
async fn continue_regular_output_emits_the_error_item() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "c", "name": "Code", "type": "code", "onError": "continueRegularOutput",
             "parameters": {"code": "error('broken')"}},
            {"id": "n", "name": "After", "type": "noOp"}
        ]),
        &[("Start", 0, "Code", 0), ("Code", 0, "After", 0)],
    );
    let run = run(&engine(), &wf).await;

    assert_eq!(run.status, RunStatus::Success);
    let task = &run.data.run_data["Code"][0];
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.error.as_ref().unwrap().message, "broken [line 1]");
    let out = run.node_output("After", 0).unwrap();
    assert_eq!(out[0].json["error"], json!("broken [line 1]"));
}

#[tokio::test]
async fn continue_error_output_routes_to_the_error_port() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "c", "name": "Code", "type": "code", "onError": "continueErrorOutput",
             "parameters": {"code": "error('broken')"}},
            {"id": "ok", "name": "Happy", "type": "noOp"},
            {"id": "err", "name": "Handler", "type": "noOp"}
        ]),
        &[("Start", 0, "Code", 0), ("Code", 0, "Happy", 0), ("Code", 1, "Handler", 0)],
    );
    let run = run(&engine(), &wf).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.task_count("Happy"), 0);
    let out = run.node_output("Handler", 0).unwrap();
    assert_eq!(out[0].json["error"], json!("broken [line 1]"));
}

#[tokio::test]
async fn script_timeout_fails_with_line_number() {
    let registry = Arc::new(NodeRegistry::with_builtin());
    let sandbox = Sandbox::new(&config()).with_timeout(Duration::from_millis(100));
    let engine = ExecutionEngine::with_sandbox(registry, sandbox, &config());
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "c", "name": "Spin", "type": "code",
             "parameters": {"code": "local n = 0\nwhile true do\n  n = n + 1\nend"}}
        ]),
        &[("Start", 0, "Spin", 0)],
    );
    let run = run(&engine, &wf).await;

    assert_eq!(run.status, RunStatus::Failed);
    let message = &run.data.error.as_ref().unwrap().message;
    assert!(message.contains("timed out"), "{message}");
    assert!(message.ends_with(']'), "{message}");
    assert!(message.contains("[line "), "{message}");
    assert!(run.data.run_data["Spin"][0].data.is_empty());
}

/// Cancels the run from inside; the engine notices before the next node
#[derive(Debug)]
struct CancelRun {
    spec: Arc<NodeSpec>,
}

#[async_trait]
impl ExecutableNode for CancelRun {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "cancelRun"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        ctx.cancel.cancel();
        NodeExecutionResult::success(vec![input.main_items().to_vec()])
    }
}

#[tokio::test]
async fn cancel_between_nodes_is_canceled_not_success() {
    let registry = Arc::new(NodeRegistry::with_builtin());
    registry.register(Arc::new(CancelRun {
        spec: Arc::new(NodeSpec::new("cancelRun", "Cancel Run")),
    }));
    let engine = ExecutionEngine::new(registry, &config());
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "c", "name": "Cancel", "type": "cancelRun"},
            {"id": "n", "name": "After", "type": "noOp"}
        ]),
        &[("Start", 0, "Cancel", 0), ("Cancel", 0, "After", 0)],
    );
    let run = run(&engine, &wf).await;

    assert_eq!(run.status, RunStatus::Canceled);
    assert!(!run.finished);
    assert_eq!(run.data.run_data["Cancel"][0].status, TaskStatus::Success);
    assert_eq!(run.task_count("After"), 0);
    assert_eq!(run.data.state.stack.len(), 1);
}

#[tokio::test]
async fn wait_pauses_and_resume_continues() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "w", "name": "Wait", "type": "wait", "parameters": {"amount": 2, "unit": "hours"}},
            set_node("After", "resumed", json!(true), 0.0)
        ]),
        &[("Start", 0, "Wait", 0), ("Wait", 0, "After", 0)],
    );
    let engine = engine();
    let paused = run(&engine, &wf).await;

    assert_eq!(paused.status, RunStatus::Waiting);
    assert!(paused.wait_till.is_some());
    assert!(!paused.finished);
    assert_eq!(paused.task_count("After"), 0);

    let resumed = engine
        .resume(&wf, paused, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Success);
    assert!(resumed.wait_till.is_none());
    assert_eq!(resumed.execution_order(), vec!["Start", "Wait", "After"]);
    assert_eq!(resumed.node_output("After", 0).unwrap()[0].json["resumed"], json!(true));
}

#[tokio::test]
async fn oversized_wait_interval_fails_at_the_node() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "w", "name": "Wait", "type": "wait", "parameters": {"amount": 1e15, "unit": "days"}}
        ]),
        &[("Start", 0, "Wait", 0)],
    );
    let run = run(&engine(), &wf).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.wait_till.is_none());
    let error = run.data.error.as_ref().unwrap();
    assert_eq!(error.node.as_deref(), Some("Wait"));
    assert!(error.message.contains("out of range"));
}

#[tokio::test]
async fn resume_rejects_finished_runs() {
    let wf = workflow(json!([{"id": "t", "name": "Start", "type": "manualTrigger"}]), &[]);
    let engine = engine();
    let done = run(&engine, &wf).await;
    assert!(engine.resume(&wf, done, &CancellationToken::new()).await.is_err());
}

#[tokio::test]
async fn run_from_node_reuses_parent_output() {
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            set_node("Prepare", "prepared", json!(1), 0.0),
            {"id": "c", "name": "Count", "type": "code", "position": [400, 0],
             "parameters": {"code": "return { count = #$input.all() }"}}
        ]),
        &[("Start", 0, "Prepare", 0), ("Prepare", 0, "Count", 0)],
    );
    let engine = engine();
    let first = run(&engine, &wf).await;
    assert_eq!(first.task_count("Count"), 1);

    let rerun = engine
        .run_from_node(
            &wf,
            "exec-rerun",
            ExecutionMode::Retry,
            "Count",
            first.data.run_data.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(rerun.status, RunStatus::Success);
    assert_eq!(rerun.task_count("Prepare"), 1);
    assert_eq!(rerun.task_count("Count"), 2);
    let latest = &rerun.data.run_data["Count"][1];
    assert_eq!(latest.source[0].previous_node, "Prepare");
    assert!(latest.execution_index > first.data.run_data["Count"][0].execution_index);
    assert_eq!(latest.data[0][0].json["count"], json!(1));
}

#[tokio::test]
async fn retention_flags_discarded_runs() {
    let mut wf = workflow(json!([{"id": "t", "name": "Start", "type": "manualTrigger"}]), &[]);
    wf.settings = serde_json::from_value(json!({"saveDataSuccessExecution": "none"})).unwrap();
    let run = run(&engine(), &wf).await;
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.needs_delete);
}

/// Records every hook call in order
#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ExecutionLifecycleHook for Recorder {
    async fn workflow_execute_before(&self, workflow: &Workflow, _data: &mut RunExecutionData) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("start:{}", workflow.id));
        Ok(())
    }

    async fn node_execute_before(&self, node: &str, _data: &mut RunExecutionData) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("before:{node}"));
        Ok(())
    }

    async fn node_execute_after(
        &self,
        node: &str,
        _task: &TaskData,
        _data: &mut RunExecutionData,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("after:{node}"));
        anyhow::bail!("hook failures are logged, not fatal")
    }

    async fn workflow_execute_after(&self, _workflow: &Workflow, run: &mut stepway::Run) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("end:{:?}", run.status));
        Ok(())
    }
}

#[tokio::test]
async fn hooks_run_in_order_and_never_abort() {
    let recorder = Arc::new(Recorder::default());
    let engine = engine().with_hook(recorder.clone());
    let wf = workflow(
        json!([
            {"id": "t", "name": "Start", "type": "manualTrigger"},
            {"id": "n", "name": "Pass", "type": "noOp"}
        ]),
        &[("Start", 0, "Pass", 0)],
    );
    let run = run(&engine, &wf).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        *recorder.calls.lock().unwrap(),
        vec![
            "start:wf-test",
            "before:Start",
            "after:Start",
            "before:Pass",
            "after:Pass",
            "end:Success"
        ]
    );
}
