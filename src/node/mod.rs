/// Node plugin contract
///
/// Every node type, built-in or external, implements `ExecutableNode` and is
/// registered in a `NodeRegistry`. The engine hands each execution a
/// `NodeInput` (inbound items, run data, parameter access) and records the
/// returned `NodeExecutionResult`; failures are data, never panics.

use crate::expression::WorkflowDataProxy;
use crate::parameter::{GetParameterOptions, NodeSpec, ParameterChoice, ParameterError, ParameterResolver};
use crate::runtime::data::{ExecutionMode, RunData, SourceRef, TaskStatus};
use crate::sandbox::Sandbox;
use crate::workflow::types::{Item, Node, NodeData, Workflow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Lock-free registry of node implementations
pub mod registry;

pub use registry::NodeRegistry;

/// Whether a node starts runs or processes items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeCategory {
    Trigger,
    Executor,
}

/// Per-execution context shared by every node of a run
#[derive(Debug, Clone)]
pub struct ExecuteContext {
    pub execution_id: String,
    pub mode: ExecutionMode,
    /// Attempt number of the node within the run
    pub run_index: usize,
    /// Cancellation of the whole run; long-running nodes may observe it
    pub cancel: CancellationToken,
}

/// What a node execution produced
#[derive(Debug, Clone)]
pub struct NodeExecutionResult {
    pub status: TaskStatus,
    pub errors: Vec<String>,
    /// Output of trigger nodes
    pub trigger_data: Option<Vec<NodeData>>,
    /// Output of executor nodes, one list per output port
    pub executor_data: Vec<NodeData>,
    /// Pause the run until this moment
    pub wait_till: Option<DateTime<Utc>>,
}

impl NodeExecutionResult {
    pub fn success(executor_data: Vec<NodeData>) -> Self {
        Self {
            status: TaskStatus::Success,
            errors: Vec::new(),
            trigger_data: None,
            executor_data,
            wait_till: None,
        }
    }

    pub fn trigger(trigger_data: Vec<NodeData>) -> Self {
        Self {
            trigger_data: Some(trigger_data),
            ..Self::success(Vec::new())
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            errors: vec![message.into()],
            ..Self::success(Vec::new())
        }
    }

    pub fn waiting(executor_data: Vec<NodeData>, wait_till: DateTime<Utc>) -> Self {
        Self {
            wait_till: Some(wait_till),
            ..Self::success(executor_data)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// All error messages joined for the task record
    pub fn error_message(&self) -> String {
        if self.errors.is_empty() {
            return "Node execution failed".to_string();
        }
        self.errors.join("; ")
    }

    /// Output ports regardless of node category
    pub fn into_output(self) -> Vec<NodeData> {
        self.trigger_data.unwrap_or(self.executor_data)
    }
}

/// Everything a node sees of the run when it executes
#[derive(Debug, Clone, Copy)]
pub struct NodeInput<'a> {
    pub node: &'a Node,
    pub workflow: &'a Workflow,
    /// Items per input port
    pub inputs: &'a [NodeData],
    pub source: &'a [SourceRef],
    pub run_data: &'a RunData,
    pub context: &'a ExecuteContext,
    pub resolver: &'a ParameterResolver,
}

impl<'a> NodeInput<'a> {
    /// Items on one input port
    pub fn items(&self, input: usize) -> &'a [Item] {
        self.inputs.get(input).map(|items| items.as_slice()).unwrap_or(&[])
    }

    /// Items on the first input port
    pub fn main_items(&self) -> &'a [Item] {
        self.items(0)
    }

    /// View of the run handed to expressions and scripts
    pub fn data_proxy(&self) -> WorkflowDataProxy<'a> {
        WorkflowDataProxy::new(self.workflow, self.node, self.main_items(), self.run_data)
            .with_execution(&self.context.execution_id, self.context.mode)
            .with_run_index(self.context.run_index)
    }

    pub fn sandbox(&self) -> &'a Sandbox {
        self.resolver.sandbox()
    }

    pub fn get_parameter(
        &self,
        path: &str,
        fallback: Option<Value>,
        item_index: usize,
        options: GetParameterOptions,
    ) -> Result<Value, ParameterError> {
        self.resolver
            .get_parameter(&self.data_proxy(), path, fallback, item_index, options)
    }

    pub fn get_parameter_as<T: DeserializeOwned>(
        &self,
        path: &str,
        fallback: Option<Value>,
        item_index: usize,
    ) -> Result<T, ParameterError> {
        self.resolver
            .get_parameter_as(&self.data_proxy(), path, fallback, item_index)
    }

    pub fn get_string(&self, path: &str, fallback: Option<&str>, item_index: usize) -> Result<String, ParameterError> {
        self.resolver.get_string(&self.data_proxy(), path, fallback, item_index)
    }

    pub fn get_bool(&self, path: &str, fallback: Option<bool>, item_index: usize) -> Result<bool, ParameterError> {
        self.resolver.get_bool(&self.data_proxy(), path, fallback, item_index)
    }

    pub fn get_number(&self, path: &str, fallback: Option<f64>, item_index: usize) -> Result<f64, ParameterError> {
        self.resolver.get_number(&self.data_proxy(), path, fallback, item_index)
    }
}

/// The core node trait
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    fn category(&self) -> NodeCategory;

    /// Registered type name
    fn name(&self) -> &str;

    /// Declared parameter schema
    fn default_spec(&self) -> Arc<NodeSpec>;

    /// Number of regular output ports; an error output comes after them
    fn output_count(&self) -> usize {
        1
    }

    async fn execute(&self, ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult;

    fn as_dynamic_parameters(&self) -> Option<&dyn DynamicParameters> {
        None
    }

    fn as_webhook(&self) -> Option<&dyn WebhookLifecycle> {
        None
    }
}

/// A field a resource mapper offers for mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapperField {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// Parameter values computed at configuration time (searchable lists, dropdowns)
#[async_trait]
pub trait DynamicParameters: Send + Sync {
    async fn list_search(
        &self,
        org_id: &str,
        method: &str,
        parameters: &Map<String, Value>,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ParameterChoice>>;

    async fn load_options(
        &self,
        org_id: &str,
        method: &str,
        parameters: &Map<String, Value>,
    ) -> anyhow::Result<Vec<ParameterChoice>>;

    async fn resource_mapping(
        &self,
        org_id: &str,
        method: &str,
        parameters: &Map<String, Value>,
    ) -> anyhow::Result<Vec<ResourceMapperField>>;
}

/// A webhook registered with an outside service on activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDescription {
    pub workflow_id: String,
    pub node: String,
    pub path: String,
    pub http_method: String,
}

/// Registration of webhooks with an outside service
#[async_trait]
pub trait WebhookLifecycle: Send + Sync {
    async fn check_exists(&self, webhook: &WebhookDescription) -> anyhow::Result<bool>;

    async fn create(&self, webhook: &WebhookDescription) -> anyhow::Result<()>;

    async fn delete(&self, webhook: &WebhookDescription) -> anyhow::Result<()>;
}
