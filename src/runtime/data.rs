/// Run-wide execution data
///
/// Everything one run owns while it executes: the stack, the join cache,
/// per-node task records and the terminal run aggregate. All types serialize
/// so a waiting run can be persisted and resumed later.

use crate::workflow::types::{Item, NodeData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Why a run was started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Trigger,
    Webhook,
    Retry,
    Internal,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Manual => "manual",
            ExecutionMode::Trigger => "trigger",
            ExecutionMode::Webhook => "webhook",
            ExecutionMode::Retry => "retry",
            ExecutionMode::Internal => "internal",
        }
    }
}

/// Aggregate status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    New,
    Running,
    Success,
    Failed,
    Crashed,
    Canceled,
    Waiting,
}

impl RunStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Crashed | RunStatus::Canceled
        )
    }
}

/// Outcome of one node attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Provenance of one input of a node execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub previous_node: String,
    pub previous_output: usize,
    /// Input port the data arrived on
    pub input: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Record of one node attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    /// Position of this attempt among all attempts of the run
    #[serde(default)]
    pub execution_index: usize,
    pub start_time: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub status: TaskStatus,
    /// Output snapshot, one list per output port
    pub data: Vec<NodeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub source: Vec<SourceRef>,
}

impl TaskData {
    /// Items on one output port (empty if the port produced nothing)
    pub fn output(&self, port: usize) -> &[Item] {
        self.data.get(port).map(|items| items.as_slice()).unwrap_or(&[])
    }
}

/// Node name -> ordered per-attempt task records
pub type RunData = BTreeMap<String, Vec<TaskData>>;

/// A stack entry: a node and its per-input item lists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteData {
    pub node: String,
    pub inputs: Vec<NodeData>,
    #[serde(default)]
    pub source: Vec<SourceRef>,
}

impl ExecuteData {
    /// Entry with items on a single input port; lower ports stay empty
    pub fn single(node: &str, input: usize, items: NodeData, source: Option<SourceRef>) -> Self {
        let mut inputs = vec![Vec::new(); input + 1];
        inputs[input] = items;
        Self {
            node: node.to_string(),
            inputs,
            source: source.into_iter().collect(),
        }
    }
}

/// Mutable scheduling state of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Pending node executions; the front is popped next
    pub stack: VecDeque<ExecuteData>,
    /// Node name -> most recent output (all ports), used to satisfy joins
    pub waiting_execution: BTreeMap<String, Vec<NodeData>>,
    /// Node name -> provenance of the inputs it was pushed with
    pub waiting_execution_source: BTreeMap<String, Vec<SourceRef>>,
}

/// Run-level error: the failing node and its message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// Everything a run accumulates; handed to hooks mutably
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunExecutionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,
    pub run_data: RunData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node_executed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub state: ExecutionState,
    /// Set when a node paused the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_till: Option<DateTime<Utc>>,
}

impl RunExecutionData {
    /// Last recorded attempt of a node
    pub fn last_task(&self, node: &str) -> Option<&TaskData> {
        self.run_data.get(node).and_then(|tasks| tasks.last())
    }
}

/// Terminal (or waiting) result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub mode: ExecutionMode,
    pub status: RunStatus,
    /// The stack drained without failure, cancellation or pause
    pub finished: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_till: Option<DateTime<Utc>>,
    /// Retention says the record should be discarded rather than persisted
    pub needs_delete: bool,
    pub data: RunExecutionData,
}

impl Run {
    /// Items a node emitted on `port` in its last attempt
    pub fn node_output(&self, node: &str, port: usize) -> Option<&[Item]> {
        self.data.last_task(node).map(|task| task.output(port))
    }

    /// Number of recorded attempts of a node
    pub fn task_count(&self, node: &str) -> usize {
        self.data.run_data.get(node).map(Vec::len).unwrap_or(0)
    }

    /// Node names in execution order, one entry per attempt
    pub fn execution_order(&self) -> Vec<&str> {
        let mut attempts: Vec<(usize, &str)> = self
            .data
            .run_data
            .iter()
            .flat_map(|(name, tasks)| {
                tasks
                    .iter()
                    .map(move |task| (task.execution_index, name.as_str()))
            })
            .collect();
        attempts.sort_by_key(|(index, _)| *index);
        attempts.into_iter().map(|(_, name)| name).collect()
    }
}
