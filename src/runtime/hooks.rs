/// Execution lifecycle hooks
///
/// Ordered callbacks the engine invokes before and after every node and
/// around the whole run. Persistence and notification layers attach here;
/// a hook failure is logged and never aborts the run.

use crate::runtime::data::{Run, RunExecutionData, TaskData};
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait ExecutionLifecycleHook: Send + Sync {
    async fn workflow_execute_before(
        &self,
        _workflow: &Workflow,
        _data: &mut RunExecutionData,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn node_execute_before(&self, _node: &str, _data: &mut RunExecutionData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn node_execute_after(
        &self,
        _node: &str,
        _task: &TaskData,
        _data: &mut RunExecutionData,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// The run is complete once every hook returned from this call
    async fn workflow_execute_after(&self, _workflow: &Workflow, _run: &mut Run) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook list in registration order
#[derive(Clone, Default)]
pub struct ExecutionHooks {
    hooks: Vec<Arc<dyn ExecutionLifecycleHook>>,
}

impl fmt::Debug for ExecutionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHooks")
            .field("count", &self.hooks.len())
            .finish()
    }
}

impl ExecutionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn ExecutionLifecycleHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn workflow_execute_before(&self, workflow: &Workflow, data: &mut RunExecutionData) {
        for hook in &self.hooks {
            if let Err(e) = hook.workflow_execute_before(workflow, data).await {
                tracing::warn!("⚠️ workflowExecuteBefore hook failed for '{}': {:#}", workflow.id, e);
            }
        }
    }

    pub async fn node_execute_before(&self, node: &str, data: &mut RunExecutionData) {
        for hook in &self.hooks {
            if let Err(e) = hook.node_execute_before(node, data).await {
                tracing::warn!("⚠️ nodeExecuteBefore hook failed for '{}': {:#}", node, e);
            }
        }
    }

    pub async fn node_execute_after(&self, node: &str, task: &TaskData, data: &mut RunExecutionData) {
        for hook in &self.hooks {
            if let Err(e) = hook.node_execute_after(node, task, data).await {
                tracing::warn!("⚠️ nodeExecuteAfter hook failed for '{}': {:#}", node, e);
            }
        }
    }

    pub async fn workflow_execute_after(&self, workflow: &Workflow, run: &mut Run) {
        for hook in &self.hooks {
            if let Err(e) = hook.workflow_execute_after(workflow, run).await {
                tracing::warn!("⚠️ workflowExecuteAfter hook failed for run {}: {:#}", run.id, e);
            }
        }
    }
}
