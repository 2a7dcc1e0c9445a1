/// Active execution registry
///
/// Concurrency-safe table of runs currently in flight. Each run executes in
/// its own tokio task tracked by a `TaskTracker`; the table entry is removed
/// exactly once when the task finishes, panics, or the run is stopped.
/// The table mutex is never held across store I/O or an await point.

use crate::runtime::data::{ExecutionMode, Run, RunStatus};
use crate::runtime::store::{ExecutionRecord, ExecutionStore};
use crate::workflow::storage::StoreError;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// What a run was started for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessData {
    pub workflow_id: String,
    pub mode: ExecutionMode,
}

/// Table entry of an in-flight run
#[derive(Debug, Clone)]
pub struct ExecutingWorkflowData {
    pub execution_id: String,
    pub process_data: ProcessData,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl ExecutingWorkflowData {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Why a run produced no result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("{0}")]
    Error(String),
    #[error("execution panicked: {0}")]
    Panic(String),
    #[error("execution result was lost")]
    Lost,
}

/// Completion handle of an asynchronously executing run
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: String,
    receiver: oneshot::Receiver<Result<Run, ExecutionFailure>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Wait for exactly one of: the finished run or the failure
    pub async fn wait(self) -> Result<Run, ExecutionFailure> {
        self.receiver.await.unwrap_or(Err(ExecutionFailure::Lost))
    }
}

type Table = HashMap<String, ExecutingWorkflowData>;

/// Registry of in-flight runs
pub struct ActiveExecutions {
    executions: Arc<Mutex<Table>>,
    tracker: TaskTracker,
    store: Arc<dyn ExecutionStore>,
    grace: Duration,
}

impl std::fmt::Debug for ActiveExecutions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveExecutions")
            .field("active", &self.len())
            .field("grace", &self.grace)
            .finish()
    }
}

fn lock(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}

impl ActiveExecutions {
    pub fn new(store: Arc<dyn ExecutionStore>, grace: Duration) -> Self {
        Self {
            executions: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            store,
            grace,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Register a run and return its id
    ///
    /// Without `existing_id` a new record is persisted; otherwise the existing
    /// record is flagged running again and its wait timestamp cleared.
    pub async fn add_execution(
        &self,
        process_data: ProcessData,
        existing_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let execution_id = match existing_id {
            None => {
                let mut record = ExecutionRecord::new(&process_data.workflow_id, process_data.mode);
                record.status = RunStatus::Running;
                self.store.create_execution(record).await?
            }
            Some(id) => {
                self.store.mark_running(id).await?;
                id.to_string()
            }
        };

        let entry = ExecutingWorkflowData {
            execution_id: execution_id.clone(),
            process_data,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        };
        lock(&self.executions).insert(execution_id.clone(), entry);
        tracing::info!("📋 Registered execution {}", execution_id);
        Ok(execution_id)
    }

    /// Launch a registered run on its own task
    ///
    /// `executable` receives the run's cancellation token. A panic inside it
    /// is recovered, marks the record crashed and is reported through the
    /// handle; the table entry is removed in every case.
    pub fn execute_async<F, Fut>(&self, execution_id: &str, executable: F) -> anyhow::Result<ExecutionHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Run>> + Send + 'static,
    {
        let cancel = lock(&self.executions)
            .get(execution_id)
            .map(|entry| entry.cancel.clone())
            .ok_or_else(|| anyhow!("Execution {} is not registered", execution_id))?;

        let (sender, receiver) = oneshot::channel();
        let executions = self.executions.clone();
        let store = self.store.clone();
        let id = execution_id.to_string();

        self.tracker.spawn(async move {
            let outcome = match tokio::spawn(executable(cancel)).await {
                Ok(Ok(run)) => Ok(run),
                Ok(Err(e)) => {
                    tracing::error!("❌ Execution {} failed: {:#}", id, e);
                    if let Err(store_err) = store.set_status(&id, RunStatus::Failed).await {
                        tracing::warn!("⚠️ Could not mark execution {} failed: {}", id, store_err);
                    }
                    Err(ExecutionFailure::Error(format!("{e:#}")))
                }
                Err(join_err) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic());
                    tracing::error!("💥 Execution {} panicked: {}", id, message);
                    if let Err(store_err) = store.set_status(&id, RunStatus::Crashed).await {
                        tracing::warn!("⚠️ Could not mark execution {} crashed: {}", id, store_err);
                    }
                    Err(ExecutionFailure::Panic(message))
                }
                Err(join_err) => Err(ExecutionFailure::Error(join_err.to_string())),
            };

            lock(&executions).remove(&id);
            tracing::debug!("📤 Execution {} left the active table", id);
            // The caller may have dropped the handle
            let _ = sender.send(outcome);
        });

        Ok(ExecutionHandle {
            execution_id: execution_id.to_string(),
            receiver,
        })
    }

    /// Cancel a run and drop it from the table
    ///
    /// Cancellation is cooperative: the engine stops before the next node.
    pub fn stop_execution(&self, execution_id: &str) -> Option<ExecutingWorkflowData> {
        let removed = lock(&self.executions).remove(execution_id);
        match &removed {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!("🛑 Stopped execution {}", execution_id);
            }
            None => tracing::debug!("Execution {} is not active", execution_id),
        }
        removed
    }

    /// Snapshot of the table
    pub fn current_executions(&self) -> HashMap<String, ExecutingWorkflowData> {
        lock(&self.executions).clone()
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        lock(&self.executions).contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.executions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for outstanding runs, giving up after the grace period
    pub async fn shutdown(&self) {
        self.tracker.close();
        tracing::info!(
            "🔌 Shutting down with {} active executions (grace {:?})",
            self.len(),
            self.grace
        );
        match tokio::time::timeout(self.grace, self.tracker.wait()).await {
            Ok(()) => tracing::info!("✅ All executions drained"),
            Err(_) => tracing::warn!(
                "⚠️ Shutdown grace period elapsed with {} executions still running",
                self.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::data::RunExecutionData;
    use crate::runtime::store::InMemoryExecutionStore;

    fn registry() -> (ActiveExecutions, Arc<InMemoryExecutionStore>) {
        let store = Arc::new(InMemoryExecutionStore::new());
        (ActiveExecutions::new(store.clone(), Duration::from_millis(200)), store)
    }

    fn process() -> ProcessData {
        ProcessData {
            workflow_id: "wf".into(),
            mode: ExecutionMode::Manual,
        }
    }

    fn finished_run(id: String) -> Run {
        Run {
            id,
            workflow_id: "wf".into(),
            mode: ExecutionMode::Manual,
            status: RunStatus::Success,
            finished: true,
            started_at: Utc::now(),
            stopped_at: Some(Utc::now()),
            wait_till: None,
            needs_delete: false,
            data: RunExecutionData::default(),
        }
    }

    #[tokio::test]
    async fn completion_removes_entry() {
        let (active, store) = registry();
        let id = active.add_execution(process(), None).await.unwrap();
        assert!(active.is_active(&id));
        assert_eq!(
            store.get_execution(&id).await.unwrap().unwrap().status,
            RunStatus::Running
        );

        let run_id = id.clone();
        let handle = active
            .execute_async(&id, move |_cancel| async move { Ok(finished_run(run_id)) })
            .unwrap();
        let run = handle.wait().await.unwrap();
        assert_eq!(run.id, id);
        assert!(!active.is_active(&id));
    }

    #[tokio::test]
    async fn panic_is_recovered() {
        let (active, store) = registry();
        let id = active.add_execution(process(), None).await.unwrap();

        let handle = active
            .execute_async(&id, |_cancel| async move {
                if true {
                    panic!("node blew up");
                }
                Err(anyhow!("unreachable"))
            })
            .unwrap();

        assert_eq!(
            handle.wait().await.unwrap_err(),
            ExecutionFailure::Panic("node blew up".into())
        );
        assert!(active.is_empty());
        assert_eq!(
            store.get_execution(&id).await.unwrap().unwrap().status,
            RunStatus::Crashed
        );
    }

    #[tokio::test]
    async fn stop_cancels_and_removes() {
        let (active, _store) = registry();
        let id = active.add_execution(process(), None).await.unwrap();

        let handle = active
            .execute_async(&id, |cancel| async move {
                cancel.cancelled().await;
                Err(anyhow!("canceled"))
            })
            .unwrap();

        let stopped = active.stop_execution(&id).expect("active");
        assert!(stopped.is_cancelled());
        assert!(active.stop_execution(&id).is_none());
        assert_eq!(handle.wait().await.unwrap_err(), ExecutionFailure::Error("canceled".into()));
    }

    #[tokio::test]
    async fn existing_record_is_reopened() {
        let (active, store) = registry();
        let mut record = ExecutionRecord::new("wf", ExecutionMode::Trigger);
        record.status = RunStatus::Waiting;
        record.wait_till = Some(Utc::now());
        let existing = store.create_execution(record).await.unwrap();

        let id = active.add_execution(process(), Some(&existing)).await.unwrap();
        assert_eq!(id, existing);
        let loaded = store.get_execution(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.wait_till.is_none());

        assert!(active.add_execution(process(), Some("missing")).await.is_err());
    }

    #[tokio::test]
    async fn unregistered_execution_is_rejected() {
        let (active, _store) = registry();
        let result = active.execute_async("nope", |_cancel| async move { Err(anyhow!("never")) });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_grace() {
        let (active, _store) = registry();
        let id = active.add_execution(process(), None).await.unwrap();
        let _handle = active
            .execute_async(&id, |_cancel| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(anyhow!("too late"))
            })
            .unwrap();

        let started = std::time::Instant::now();
        active.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(active.is_active(&id));
    }
}
