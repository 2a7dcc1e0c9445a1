/// Workflow definition persistence collaborator
///
/// The engine reads a workflow definition once at run start through this
/// trait. Hosts plug their own database in; the in-memory implementation
/// backs tests and embedded use.

use crate::workflow::types::Workflow;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure reported by a persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// CRUD for workflow definitions (graph + settings + static data)
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Store a new workflow or replace an existing one
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, StoreError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Returns whether a workflow was removed
    async fn delete_workflow(&self, workflow_id: &str) -> Result<bool, StoreError>;
}

/// Process-local workflow store
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        tracing::info!("💾 Saved workflow: {} ({})", workflow.id, workflow.name);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(workflow_id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut workflows: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workflows)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<bool, StoreError> {
        let removed = self.workflows.write().await.remove(workflow_id).is_some();
        if removed {
            tracing::info!("🗑️ Deleted workflow: {}", workflow_id);
        }
        Ok(removed)
    }
}
