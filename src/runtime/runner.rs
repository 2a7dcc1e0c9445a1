/// Workflow runner
///
/// Entry points a scheduling collaborator calls: registers the run in the
/// active table, then drives the engine on a tracked task.

use crate::runtime::active::{ActiveExecutions, ExecutionHandle, ProcessData};
use crate::runtime::data::{ExecutionMode, RunData, RunStatus};
use crate::runtime::engine::ExecutionEngine;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{NodeData, Workflow};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkflowRunner {
    engine: Arc<ExecutionEngine>,
    active: Arc<ActiveExecutions>,
    workflows: Arc<dyn WorkflowStore>,
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("engine", &self.engine)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl WorkflowRunner {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        active: Arc<ActiveExecutions>,
        workflows: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self {
            engine,
            active,
            workflows,
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn active(&self) -> &Arc<ActiveExecutions> {
        &self.active
    }

    /// Start a run of `workflow` in the background
    pub async fn run(
        &self,
        workflow: Workflow,
        mode: ExecutionMode,
        start_node: Option<String>,
        trigger_items: Option<NodeData>,
    ) -> Result<ExecutionHandle> {
        let id = self
            .active
            .add_execution(process_data(&workflow, mode), None)
            .await
            .context("Failed to register execution")?;

        let engine = self.engine.clone();
        let execution_id = id.clone();
        self.active.execute_async(&id, move |cancel| async move {
            engine
                .run(
                    &workflow,
                    &execution_id,
                    mode,
                    start_node.as_deref(),
                    trigger_items,
                    &cancel,
                )
                .await
        })
    }

    /// Load a stored workflow and start it
    pub async fn run_workflow_by_id(
        &self,
        workflow_id: &str,
        mode: ExecutionMode,
        trigger_items: Option<NodeData>,
    ) -> Result<ExecutionHandle> {
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow!("Workflow not found: {}", workflow_id))?;
        self.run(workflow, mode, None, trigger_items).await
    }

    /// Re-run from `start_node` using the data of an earlier run
    pub async fn run_from_node(
        &self,
        workflow: Workflow,
        mode: ExecutionMode,
        start_node: String,
        prior: RunData,
    ) -> Result<ExecutionHandle> {
        let id = self
            .active
            .add_execution(process_data(&workflow, mode), None)
            .await
            .context("Failed to register execution")?;

        let engine = self.engine.clone();
        let execution_id = id.clone();
        self.active.execute_async(&id, move |cancel| async move {
            engine
                .run_from_node(&workflow, &execution_id, mode, &start_node, prior, &cancel)
                .await
        })
    }

    /// Resume a stored waiting run under its existing id
    pub async fn resume(&self, execution_id: &str) -> Result<ExecutionHandle> {
        let record = self
            .active
            .store()
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| anyhow!("Execution not found: {}", execution_id))?;
        if record.status != RunStatus::Waiting {
            bail!("Execution {} is not waiting (status {:?})", execution_id, record.status);
        }

        let workflow = self
            .workflows
            .get_workflow(&record.workflow_id)
            .await?
            .ok_or_else(|| anyhow!("Workflow not found: {}", record.workflow_id))?;

        let id = self
            .active
            .add_execution(process_data(&workflow, record.mode), Some(execution_id))
            .await
            .context("Failed to reopen execution")?;

        let engine = self.engine.clone();
        let run = record.into_run();
        self.active.execute_async(&id, move |cancel| async move {
            engine.resume(&workflow, run, &cancel).await
        })
    }

    /// Cancel a run; returns whether it was active
    pub fn stop(&self, execution_id: &str) -> bool {
        self.active.stop_execution(execution_id).is_some()
    }

    pub async fn shutdown(&self) {
        self.active.shutdown().await;
    }
}

fn process_data(workflow: &Workflow, mode: ExecutionMode) -> ProcessData {
    ProcessData {
        workflow_id: workflow.id.clone(),
        mode,
    }
}
