/// Stack-based workflow execution engine
///
/// Walks the connection graph one node at a time. The front of the stack is
/// popped next; newly ready nodes are pushed to the front in spatial order
/// (top-left first), so branches run depth-first and reproducibly for a fixed
/// layout. Multi-input nodes wait in a join until every predecessor has
/// produced output. The first failing node aborts the remaining stack.

use crate::config::ExecutionConfig;
use crate::node::{ExecuteContext, NodeExecutionResult, NodeRegistry};
use crate::parameter::ParameterResolver;
use crate::runtime::data::{
    ExecuteData, ExecutionMode, Run, RunData, RunError, RunExecutionData, RunStatus, SourceRef, TaskData,
    TaskError, TaskStatus,
};
use crate::runtime::executor::NodeExecutor;
use crate::runtime::hooks::{ExecutionHooks, ExecutionLifecycleHook};
use crate::runtime::status::{determine_status, needs_delete, RunFlags};
use crate::sandbox::Sandbox;
use crate::workflow::graph::{Inbound, WorkflowGraph};
use crate::workflow::types::{ErrorPolicy, Item, Node, NodeData, Workflow};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Execution engine: one instance serves any number of concurrent runs
#[derive(Debug)]
pub struct ExecutionEngine {
    executor: Arc<NodeExecutor>,
    hooks: ExecutionHooks,
    config: ExecutionConfig,
}

/// Task outcome after the node's error policy was applied
struct Settled {
    status: TaskStatus,
    output: Vec<NodeData>,
    error: Option<TaskError>,
    wait_till: Option<DateTime<Utc>>,
}

impl ExecutionEngine {
    /// Engine with the Lua sandbox configured from `config`
    pub fn new(registry: Arc<NodeRegistry>, config: &ExecutionConfig) -> Self {
        Self::with_sandbox(registry, Sandbox::new(config), config)
    }

    pub fn with_sandbox(registry: Arc<NodeRegistry>, sandbox: Sandbox, config: &ExecutionConfig) -> Self {
        let resolver = ParameterResolver::new(registry.clone(), sandbox);
        Self {
            executor: Arc::new(NodeExecutor::new(registry, resolver)),
            hooks: ExecutionHooks::new(),
            config: config.clone(),
        }
    }

    /// Append a lifecycle hook; hooks run in registration order
    pub fn with_hook(mut self, hook: Arc<dyn ExecutionLifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn hooks(&self) -> &ExecutionHooks {
        &self.hooks
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.executor.registry()
    }

    /// Run a workflow from `start_node`, or from every enabled trigger
    ///
    /// Start nodes receive `trigger_items`, or a single empty item.
    pub async fn run(
        &self,
        workflow: &Workflow,
        execution_id: &str,
        mode: ExecutionMode,
        start_node: Option<&str>,
        trigger_items: Option<NodeData>,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        let graph = WorkflowGraph::build(workflow)?;

        let starts: Vec<String> = match start_node {
            Some(name) => {
                if graph.node(name).is_none() {
                    bail!("Start node not found: {}", name);
                }
                vec![name.to_string()]
            }
            None => self.trigger_nodes(&graph),
        };
        if starts.is_empty() {
            bail!("Workflow '{}' has no trigger node to start from", workflow.id);
        }
        tracing::debug!("🎯 Start nodes: {:?}", starts);

        let seed = trigger_items.unwrap_or_else(|| vec![Item::empty()]);
        let mut data = RunExecutionData {
            start_node: start_node.map(str::to_string),
            ..Default::default()
        };
        for name in starts.iter().rev() {
            data.state
                .stack
                .push_front(ExecuteData::single(name, 0, seed.clone(), None));
        }

        self.process(&graph, execution_id, mode, Utc::now(), data, cancel).await
    }

    /// Re-run a workflow starting at `start_node`, reusing a previous run's data
    ///
    /// The start node's input is rebuilt from its parents' last outputs in
    /// `prior`; earlier task records are kept and new attempts appended.
    pub async fn run_from_node(
        &self,
        workflow: &Workflow,
        execution_id: &str,
        mode: ExecutionMode,
        start_node: &str,
        prior: RunData,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        let graph = WorkflowGraph::build(workflow)?;
        if graph.node(start_node).is_none() {
            bail!("Start node not found: {}", start_node);
        }

        let mut data = RunExecutionData {
            start_node: Some(start_node.to_string()),
            run_data: prior,
            ..Default::default()
        };
        for (name, tasks) in &data.run_data {
            if let Some(task) = tasks.last() {
                data.state
                    .waiting_execution
                    .insert(name.clone(), task.data.clone());
            }
        }

        let entry = parent_input(&graph, &data, start_node);
        data.state.stack.push_front(entry);

        self.process(&graph, execution_id, mode, Utc::now(), data, cancel).await
    }

    /// Continue a run that a node paused
    pub async fn resume(&self, workflow: &Workflow, run: Run, cancel: &CancellationToken) -> Result<Run> {
        if run.status != RunStatus::Waiting {
            bail!("Run {} is not waiting (status {:?})", run.id, run.status);
        }
        let graph = WorkflowGraph::build(workflow)?;
        tracing::info!("▶️ Resuming run {} with {} pending nodes", run.id, run.data.state.stack.len());

        let mut data = run.data;
        data.wait_till = None;
        self.process(&graph, &run.id, run.mode, run.started_at, data, cancel).await
    }

    /// Enabled trigger-like nodes, top-left first
    fn trigger_nodes(&self, graph: &WorkflowGraph<'_>) -> Vec<String> {
        let mut triggers: Vec<String> = graph
            .workflow()
            .nodes
            .iter()
            .filter(|node| !node.disabled && self.executor.is_trigger(node))
            .map(|node| node.name.clone())
            .collect();
        graph.sort_by_position(&mut triggers);
        triggers
    }

    /// The main loop
    async fn process(
        &self,
        graph: &WorkflowGraph<'_>,
        execution_id: &str,
        mode: ExecutionMode,
        started_at: DateTime<Utc>,
        mut data: RunExecutionData,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        let workflow = graph.workflow();
        let run_start = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting workflow run {} for '{}' ({} mode)",
            execution_id,
            workflow.id,
            mode.as_str()
        );

        self.hooks.workflow_execute_before(workflow, &mut data).await;

        let mut flags = RunFlags::default();
        let mut execution_index = next_execution_index(&data.run_data);
        let mut iterations = 0usize;

        loop {
            // Cooperative: checked between node executions only
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Run {} canceled with {} pending nodes", execution_id, data.state.stack.len());
                flags.canceled = true;
                break;
            }

            let Some(entry) = data.state.stack.pop_front() else {
                break;
            };

            iterations += 1;
            if iterations > self.config.max_iterations {
                tracing::error!("❌ Run {} exceeded {} stack iterations", execution_id, self.config.max_iterations);
                data.error = Some(RunError {
                    message: format!(
                        "Run exceeded the maximum of {} node executions",
                        self.config.max_iterations
                    ),
                    node: Some(entry.node),
                });
                break;
            }

            let Some(node) = graph.node(&entry.node) else {
                data.error = Some(RunError {
                    message: format!("Node '{}' does not exist in the workflow", entry.node),
                    node: Some(entry.node),
                });
                break;
            };

            if node.disabled {
                tracing::debug!("⏭️ Bypassing disabled node '{}'", node.name);
                let forwarded = vec![entry.inputs.into_iter().next().unwrap_or_default()];
                data.state
                    .waiting_execution
                    .insert(node.name.clone(), forwarded.clone());
                propagate(graph, &mut data, &node.name, &forwarded);
                continue;
            }

            self.hooks.node_execute_before(&node.name, &mut data).await;

            let ctx = ExecuteContext {
                execution_id: execution_id.to_string(),
                mode,
                run_index: data.run_data.get(&node.name).map(Vec::len).unwrap_or(0),
                cancel: cancel.clone(),
            };
            let start_time = Utc::now();
            let timer = std::time::Instant::now();
            let result = self
                .executor
                .execute_node(&ctx, workflow, node, &entry, &data.run_data)
                .await;
            let settled = self.settle(node, result);

            let task = TaskData {
                execution_index,
                start_time,
                execution_time_ms: timer.elapsed().as_millis() as u64,
                status: settled.status,
                data: settled.output,
                error: settled.error,
                source: entry.source,
            };
            execution_index += 1;
            data.run_data
                .entry(node.name.clone())
                .or_default()
                .push(task.clone());
            data.last_node_executed = Some(node.name.clone());

            self.hooks.node_execute_after(&node.name, &task, &mut data).await;

            if task.status == TaskStatus::Error {
                let message = task
                    .error
                    .map(|error| error.message)
                    .unwrap_or_else(|| "Node execution failed".to_string());
                data.error = Some(RunError {
                    message,
                    node: Some(node.name.clone()),
                });
                break;
            }

            data.state
                .waiting_execution
                .insert(node.name.clone(), task.data.clone());
            propagate(graph, &mut data, &node.name, &task.data);

            if let Some(wait_till) = settled.wait_till.filter(|till| *till > Utc::now()) {
                tracing::info!("⏸️ Run {} waits until {} after '{}'", execution_id, wait_till, node.name);
                data.wait_till = Some(wait_till);
                break;
            }
        }

        let status = determine_status(&data, flags);
        let finished = !flags.canceled && data.error.is_none() && data.wait_till.is_none();
        let mut run = Run {
            id: execution_id.to_string(),
            workflow_id: workflow.id.clone(),
            mode,
            status,
            finished,
            started_at,
            stopped_at: Some(Utc::now()),
            wait_till: data.wait_till,
            needs_delete: needs_delete(status, &workflow.settings),
            data,
        };

        self.hooks.workflow_execute_after(workflow, &mut run).await;

        match run.status {
            RunStatus::Success => tracing::info!(
                "🎉 Workflow run {} completed successfully in {:?}",
                run.id,
                run_start.elapsed()
            ),
            status => tracing::info!("🏁 Workflow run {} ended as {:?} in {:?}", run.id, status, run_start.elapsed()),
        }
        Ok(run)
    }

    /// Apply the node's error policy to its result
    fn settle(&self, node: &Node, result: NodeExecutionResult) -> Settled {
        if result.is_success() {
            let wait_till = result.wait_till;
            return Settled {
                status: TaskStatus::Success,
                output: result.into_output(),
                error: None,
                wait_till,
            };
        }

        let error = TaskError {
            message: result.error_message(),
            description: None,
        };
        let error_item = || Item::from_json(json!({ "error": error.message }));

        let output = match node.on_error {
            ErrorPolicy::StopWorkflow => {
                return Settled {
                    status: TaskStatus::Error,
                    output: Vec::new(),
                    error: Some(error),
                    wait_till: None,
                }
            }
            ErrorPolicy::ContinueRegularOutput => vec![vec![error_item()]],
            ErrorPolicy::ContinueErrorOutput => {
                let regular = self.executor.output_count(&node.node_type);
                let mut ports = vec![Vec::new(); regular];
                ports.push(vec![error_item()]);
                ports
            }
        };
        tracing::warn!(
            "⚠️ Node '{}' failed, continuing per {:?}: {}",
            node.name,
            node.on_error,
            error.message
        );

        Settled {
            status: TaskStatus::Success,
            output,
            error: Some(error),
            wait_till: None,
        }
    }
}

/// First free execution index after any recorded attempts
fn next_execution_index(run_data: &RunData) -> usize {
    run_data
        .values()
        .flatten()
        .map(|task| task.execution_index + 1)
        .max()
        .unwrap_or(0)
}

/// Stack entry for `start_node` built from its parents' last outputs
fn parent_input(graph: &WorkflowGraph<'_>, data: &RunExecutionData, start_node: &str) -> ExecuteData {
    let inbound = graph.inbound(start_node);
    let mut inputs: Vec<NodeData> = Vec::new();
    let mut source = Vec::new();

    for link in &inbound {
        let Some(task) = data.last_task(&link.source) else {
            continue;
        };
        if inputs.len() <= link.input {
            inputs.resize_with(link.input + 1, Vec::new);
        }
        inputs[link.input].extend(task.output(link.output).iter().cloned());
        source.push(SourceRef {
            previous_node: link.source.clone(),
            previous_output: link.output,
            input: link.input,
        });
    }

    if source.is_empty() {
        if !inbound.is_empty() {
            tracing::warn!("⚠️ No parent of '{}' has data in the previous run, starting empty", start_node);
        }
        return ExecuteData::single(start_node, 0, vec![Item::empty()], None);
    }
    ExecuteData {
        node: start_node.to_string(),
        inputs,
        source,
    }
}

/// Push the successors of `source` that became ready
///
/// Single-input targets are pushed directly; multi-input targets go through
/// the join. Ready entries land on the front of the stack in spatial order.
fn propagate(graph: &WorkflowGraph<'_>, data: &mut RunExecutionData, source: &str, output: &[NodeData]) {
    let mut ready: Vec<ExecuteData> = Vec::new();
    let mut joined: HashSet<String> = HashSet::new();

    for (port, targets) in graph.workflow().connections.main_outputs(source).iter().enumerate() {
        let items = match output.get(port) {
            Some(items) if !items.is_empty() => items,
            _ => continue,
        };

        for target in targets {
            let inbound = graph.inbound(&target.node);
            if inbound.len() <= 1 {
                let source_ref = SourceRef {
                    previous_node: source.to_string(),
                    previous_output: port,
                    input: target.index,
                };
                data.state
                    .waiting_execution_source
                    .insert(target.node.clone(), vec![source_ref.clone()]);
                ready.push(ExecuteData::single(&target.node, target.index, items.clone(), Some(source_ref)));
            } else if joined.insert(target.node.clone()) {
                if let Some(entry) = join(data, &target.node, &inbound) {
                    ready.push(entry);
                }
            }
        }
    }

    ready.sort_by(|a, b| graph.compare_position(&a.node, &b.node));
    for entry in ready.into_iter().rev() {
        tracing::debug!("📥 Pushing '{}' onto the stack", entry.node);
        data.state.stack.push_front(entry);
    }
}

/// Assemble a multi-input node's inputs once every predecessor has output
fn join(data: &mut RunExecutionData, target: &str, inbound: &[Inbound]) -> Option<ExecuteData> {
    if let Some(missing) = inbound
        .iter()
        .find(|link| !data.state.waiting_execution.contains_key(&link.source))
    {
        tracing::debug!("⏳ Join '{}' still waits for '{}'", target, missing.source);
        return None;
    }

    let ports = inbound.iter().map(|link| link.input + 1).max().unwrap_or(1);
    let mut inputs: Vec<NodeData> = vec![Vec::new(); ports];
    let mut source = Vec::with_capacity(inbound.len());
    for link in inbound {
        if let Some(items) = data
            .state
            .waiting_execution
            .get(&link.source)
            .and_then(|outputs| outputs.get(link.output))
        {
            inputs[link.input].extend(items.iter().cloned());
        }
        source.push(SourceRef {
            previous_node: link.source.clone(),
            previous_output: link.output,
            input: link.input,
        });
    }

    tracing::debug!("🔗 Join '{}' complete with {} inputs", target, inbound.len());
    data.state
        .waiting_execution_source
        .insert(target.to_string(), source.clone());
    Some(ExecuteData {
        node: target.to_string(),
        inputs,
        source,
    })
}
