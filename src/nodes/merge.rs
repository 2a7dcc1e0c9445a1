/// Merge: combine the items of two inputs
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::nodes::finish;
use crate::parameter::{NodeSpec, ParameterKind, ParameterSchema};
use crate::workflow::types::{Item, NodeData};
use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug)]
pub struct MergeNode {
    spec: Arc<NodeSpec>,
}

impl MergeNode {
    pub fn new() -> Self {
        let spec = NodeSpec::new("merge", "Merge")
            .with_property(
                ParameterSchema::new("mode", ParameterKind::Options)
                    .with_choices(&["append", "combineByPosition", "chooseBranch"])
                    .with_default(json!("append")),
            )
            .with_property(
                ParameterSchema::new("output", ParameterKind::Options)
                    .with_choices(&["input1", "input2"])
                    .with_default(json!("input1"))
                    .show_when("mode", vec![json!("chooseBranch")]),
            );
        Self { spec: Arc::new(spec) }
    }

    fn merge(&self, input: &NodeInput<'_>) -> anyhow::Result<NodeData> {
        let first = input.items(0);
        let second = input.items(1);

        Ok(match input.get_string("mode", None, 0)?.as_str() {
            "append" => first.iter().chain(second).cloned().collect(),
            "combineByPosition" => first
                .iter()
                .zip(second)
                .map(|(left, right)| combine(left, right))
                .collect(),
            "chooseBranch" => match input.get_string("output", None, 0)?.as_str() {
                "input1" => first.to_vec(),
                "input2" => second.to_vec(),
                other => bail!("Unknown branch '{other}'"),
            },
            other => bail!("Unknown mode '{other}'"),
        })
    }
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of `right` win over fields of `left`
fn combine(left: &Item, right: &Item) -> Item {
    let mut json = left.json.clone();
    json.extend(right.json.clone());

    let binary = match (&left.binary, &right.binary) {
        (Some(l), Some(r)) => {
            let mut merged = l.clone();
            merged.extend(r.clone());
            Some(merged)
        }
        (l, r) => l.clone().or_else(|| r.clone()),
    };
    Item { json, binary }
}

#[async_trait]
impl ExecutableNode for MergeNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "merge"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(self.merge(&input).map(|items| NodeExecutionResult::success(vec![items])))
    }
}
