/// Filter and If nodes
///
/// Both resolve their `conditions` parameter per item through filter
/// extraction. Filter keeps matching items; If routes them to output 0 (true)
/// or output 1 (false).
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::nodes::finish;
use crate::parameter::{GetParameterOptions, NodeSpec, ParameterKind, ParameterSchema};
use crate::workflow::types::NodeData;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn conditions_spec(name: &str, display_name: &str) -> NodeSpec {
    NodeSpec::new(name, display_name).with_property(
        ParameterSchema::new("conditions", ParameterKind::Filter)
            .with_default(json!({"conditions": [], "combinator": "and"})),
    )
}

/// Split the main input into (matching, not matching)
fn partition(input: &NodeInput<'_>) -> anyhow::Result<(NodeData, NodeData)> {
    let mut kept = Vec::new();
    let mut discarded = Vec::new();
    for (index, item) in input.main_items().iter().enumerate() {
        let passed = input.get_parameter("conditions", None, index, GetParameterOptions::extract())?;
        if passed == Value::Bool(true) {
            kept.push(item.clone());
        } else {
            discarded.push(item.clone());
        }
    }
    tracing::debug!(
        "🔀 Node '{}' matched {} of {} items",
        input.node.name,
        kept.len(),
        kept.len() + discarded.len()
    );
    Ok((kept, discarded))
}

#[derive(Debug)]
pub struct FilterNode {
    spec: Arc<NodeSpec>,
}

impl FilterNode {
    pub fn new() -> Self {
        Self {
            spec: Arc::new(conditions_spec("filter", "Filter")),
        }
    }
}

impl Default for FilterNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for FilterNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "filter"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(partition(&input).map(|(kept, _)| NodeExecutionResult::success(vec![kept])))
    }
}

#[derive(Debug)]
pub struct IfNode {
    spec: Arc<NodeSpec>,
}

impl IfNode {
    pub fn new() -> Self {
        Self {
            spec: Arc::new(conditions_spec("if", "If")),
        }
    }
}

impl Default for IfNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for IfNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "if"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    fn output_count(&self) -> usize {
        2
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(partition(&input).map(|(yes, no)| NodeExecutionResult::success(vec![yes, no])))
    }
}

#[cfg(test)]
mod tests {
    use crate::nodes::testing::run_node;
    use crate::runtime::data::TaskStatus;
    use crate::workflow::types::items_from_values;
    use serde_json::{json, Value};

    fn node(node_type: &str, on_error: &str) -> Value {
        json!({
            "id": "c", "name": "Check", "type": node_type, "onError": on_error,
            "parameters": {
                "conditions": {
                    "conditions": [{
                        "leftValue": "={{ $json.score }}",
                        "rightValue": 5,
                        "operator": {"type": "number", "operation": "gt"}
                    }],
                    "combinator": "and"
                }
            }
        })
    }

    fn scores() -> Vec<crate::workflow::types::Item> {
        items_from_values(vec![json!({"score": 9}), json!({"score": 2}), json!({"score": 7})])
    }

    #[tokio::test]
    async fn filter_keeps_matching_items() {
        let result = run_node(node("filter", "stopWorkflow"), vec![scores()]).await;
        let kept = &result.executor_data[0];
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].json["score"], json!(7));
    }

    #[tokio::test]
    async fn if_routes_to_two_outputs() {
        let result = run_node(node("if", "stopWorkflow"), vec![scores()]).await;
        assert_eq!(result.executor_data.len(), 2);
        assert_eq!(result.executor_data[0].len(), 2);
        assert_eq!(result.executor_data[1][0].json["score"], json!(2));
    }

    #[tokio::test]
    async fn type_errors_fail_unless_node_continues() {
        let items = items_from_values(vec![json!({"score": "high"})]);

        let result = run_node(node("filter", "stopWorkflow"), vec![items.clone()]).await;
        assert_eq!(result.status, TaskStatus::Error);
        assert!(result.error_message().contains("is not a number"));

        let result = run_node(node("filter", "continueRegularOutput"), vec![items]).await;
        assert!(result.is_success());
        assert!(result.executor_data[0].is_empty());
    }
}
