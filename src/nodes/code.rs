/// Code node: user Lua over the node's items
///
/// `runOnceForAllItems` runs the code once and expects it to return the
/// output items; `runOnceForEachItem` runs it per item and expects one item
/// (or plain object) back.
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::nodes::finish;
use crate::parameter::{GetParameterOptions, NodeSpec, ParameterKind, ParameterSchema};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_CODE: &str = "return $input.all()";

#[derive(Debug)]
pub struct CodeNode {
    spec: Arc<NodeSpec>,
}

impl CodeNode {
    pub fn new() -> Self {
        let spec = NodeSpec::new("code", "Code")
            .with_property(
                ParameterSchema::new("mode", ParameterKind::Options)
                    .with_choices(&["runOnceForAllItems", "runOnceForEachItem"])
                    .with_default(json!("runOnceForAllItems")),
            )
            .with_property(ParameterSchema::new("code", ParameterKind::String).with_default(json!(DEFAULT_CODE)));
        Self { spec: Arc::new(spec) }
    }

    fn run(&self, input: &NodeInput<'_>) -> anyhow::Result<NodeExecutionResult> {
        let mode = input.get_string("mode", None, 0)?;
        // Code is never treated as an expression
        let code = input.get_parameter("code", None, 0, GetParameterOptions::raw())?;
        let code = code
            .as_str()
            .ok_or_else(|| anyhow!("Parameter 'code' must be a string"))?;

        let proxy = input.data_proxy();
        let sandbox = input.sandbox();
        let items = input.main_items();

        let output = match mode.as_str() {
            "runOnceForAllItems" => sandbox.run_all_items(&proxy.bindings(0, sandbox.helpers()), code)?,
            "runOnceForEachItem" => {
                let mut output = Vec::with_capacity(items.len());
                for (index, original) in items.iter().enumerate() {
                    let mut item = sandbox.run_per_item(&proxy.bindings(index, sandbox.helpers()), code)?;
                    if item.binary.is_none() {
                        item.binary = original.binary.clone();
                    }
                    output.push(item);
                }
                output
            }
            other => bail!("Unknown mode '{other}'"),
        };

        tracing::debug!("📜 Code node '{}' returned {} items", input.node.name, output.len());
        Ok(NodeExecutionResult::success(vec![output]))
    }
}

impl Default for CodeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for CodeNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "code"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(self.run(&input))
    }
}
