/// Manual trigger: starts a run with whatever items it was seeded with
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::parameter::NodeSpec;
use crate::workflow::types::Item;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct ManualTriggerNode {
    spec: Arc<NodeSpec>,
}

impl ManualTriggerNode {
    pub fn new() -> Self {
        Self {
            spec: Arc::new(NodeSpec::new("manualTrigger", "Manual Trigger")),
        }
    }
}

impl Default for ManualTriggerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for ManualTriggerNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Trigger
    }

    fn name(&self) -> &str {
        "manualTrigger"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        let items = match input.main_items() {
            [] => vec![Item::empty()],
            items => items.to_vec(),
        };
        NodeExecutionResult::trigger(vec![items])
    }
}
