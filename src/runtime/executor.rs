/// Node execution dispatch
///
/// Looks the node's type up in the registry, builds its `NodeInput` and runs
/// it. An unknown type is a failed result like any other node failure, so the
/// engine applies the node's error policy to it.

use crate::node::{ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput, NodeRegistry};
use crate::parameter::ParameterResolver;
use crate::runtime::data::{ExecuteData, RunData};
use crate::workflow::types::{Node, Workflow};
use std::sync::Arc;

/// Dispatches node executions to registered implementations
#[derive(Debug)]
pub struct NodeExecutor {
    registry: Arc<NodeRegistry>,
    resolver: ParameterResolver,
}

impl NodeExecutor {
    pub fn new(registry: Arc<NodeRegistry>, resolver: ParameterResolver) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ParameterResolver {
        &self.resolver
    }

    /// Regular output ports of a node type (1 when unknown)
    pub fn output_count(&self, node_type: &str) -> usize {
        self.registry
            .get(node_type)
            .map(|node| node.output_count())
            .unwrap_or(1)
    }

    /// Trigger-like nodes: registered as triggers, or named like one
    pub fn is_trigger(&self, node: &Node) -> bool {
        match self.registry.category(&node.node_type) {
            Some(NodeCategory::Trigger) => true,
            _ => node.node_type.to_lowercase().contains("trigger"),
        }
    }

    /// Execute one stack entry
    pub async fn execute_node(
        &self,
        ctx: &ExecuteContext,
        workflow: &Workflow,
        node: &Node,
        entry: &ExecuteData,
        run_data: &RunData,
    ) -> NodeExecutionResult {
        tracing::info!("🚀 Starting node execution: {} (type: {})", node.name, node.node_type);
        tracing::debug!(
            "📥 Input items per port: {:?}",
            entry.inputs.iter().map(Vec::len).collect::<Vec<_>>()
        );
        let start_time = std::time::Instant::now();

        let Some(implementation) = self.registry.get(&node.node_type) else {
            tracing::error!("❌ Unknown node type '{}' for node '{}'", node.node_type, node.name);
            return NodeExecutionResult::failure(format!("Unknown node type '{}'", node.node_type));
        };

        let input = NodeInput {
            node,
            workflow,
            inputs: &entry.inputs,
            source: &entry.source,
            run_data,
            context: ctx,
            resolver: &self.resolver,
        };
        let result = implementation.execute(ctx, input).await;

        let duration = start_time.elapsed();
        if result.is_success() {
            tracing::info!("✅ Node execution completed: {} in {:?}", node.name, duration);
        } else {
            tracing::error!(
                "❌ Node execution failed: {} in {:?} - Error: {}",
                node.name,
                duration,
                result.error_message()
            );
        }
        result
    }
}
