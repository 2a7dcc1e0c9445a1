/// Execution record persistence
///
/// The engine never writes execution records itself. `ActiveExecutions`
/// creates and re-opens records through `ExecutionStore`, and the
/// `PersistenceHook` saves or discards the finished run.

use crate::runtime::data::{ExecutionMode, Run, RunExecutionData, RunStatus};
use crate::runtime::hooks::ExecutionLifecycleHook;
use crate::workflow::storage::StoreError;
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persisted state of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub mode: ExecutionMode,
    pub status: RunStatus,
    pub finished: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_till: Option<DateTime<Utc>>,
    /// Execution data, present once the run reached `workflow_execute_after`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RunExecutionData>,
}

impl ExecutionRecord {
    /// Fresh record with a generated id
    pub fn new(workflow_id: &str, mode: ExecutionMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            mode,
            status: RunStatus::New,
            finished: false,
            started_at: Utc::now(),
            stopped_at: None,
            wait_till: None,
            data: None,
        }
    }

    pub fn from_run(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            mode: run.mode,
            status: run.status,
            finished: run.finished,
            started_at: run.started_at,
            stopped_at: run.stopped_at,
            wait_till: run.wait_till,
            data: Some(run.data.clone()),
        }
    }

    /// Rebuild a run, e.g. to resume a waiting one
    pub fn into_run(self) -> Run {
        Run {
            id: self.id,
            workflow_id: self.workflow_id,
            mode: self.mode,
            status: self.status,
            finished: self.finished,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            wait_till: self.wait_till,
            needs_delete: false,
            data: self.data.unwrap_or_default(),
        }
    }
}

/// CRUD for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new record and return its id
    async fn create_execution(&self, record: ExecutionRecord) -> Result<String, StoreError>;

    /// Flag an existing record as running again and clear its wait timestamp
    async fn mark_running(&self, execution_id: &str) -> Result<(), StoreError>;

    async fn set_status(&self, execution_id: &str, status: RunStatus) -> Result<(), StoreError>;

    /// Insert or replace a record
    async fn save_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Returns whether a record was removed
    async fn delete_execution(&self, execution_id: &str) -> Result<bool, StoreError>;
}

/// Process-local execution store
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

fn not_found(execution_id: &str) -> StoreError {
    StoreError::NotFound {
        kind: "execution",
        id: execution_id.to_string(),
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<String, StoreError> {
        let id = record.id.clone();
        self.records.write().await.insert(id.clone(), record);
        tracing::debug!("💾 Created execution record {}", id);
        Ok(id)
    }

    async fn mark_running(&self, execution_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(execution_id)
            .ok_or_else(|| not_found(execution_id))?;
        record.status = RunStatus::Running;
        record.wait_till = None;
        Ok(())
    }

    async fn set_status(&self, execution_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(execution_id)
            .ok_or_else(|| not_found(execution_id))?;
        record.status = status;
        if status.is_terminal() {
            record.stopped_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn save_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        tracing::debug!("💾 Saved execution record {} ({:?})", record.id, record.status);
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<bool, StoreError> {
        let removed = self.records.write().await.remove(execution_id).is_some();
        if removed {
            tracing::info!("🗑️ Deleted execution record {}", execution_id);
        }
        Ok(removed)
    }
}

/// Saves finished runs, or deletes them when retention says so
#[derive(Clone)]
pub struct PersistenceHook {
    store: Arc<dyn ExecutionStore>,
}

impl std::fmt::Debug for PersistenceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceHook").finish_non_exhaustive()
    }
}

impl PersistenceHook {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExecutionLifecycleHook for PersistenceHook {
    async fn workflow_execute_after(&self, _workflow: &Workflow, run: &mut Run) -> anyhow::Result<()> {
        if run.needs_delete {
            self.store.delete_execution(&run.id).await?;
            return Ok(());
        }
        self.store.save_execution(ExecutionRecord::from_run(run)).await?;
        Ok(())
    }
}
