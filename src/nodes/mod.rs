/// Built-in logic nodes
///
/// The node types every host gets for free: a manual trigger, pass-through,
/// field editing, filtering and branching, Lua code, merging, waiting and
/// stopping with an error. Integration nodes register themselves alongside.

use crate::node::{NodeExecutionResult, NodeRegistry};
use std::sync::Arc;

// manualTrigger
pub mod trigger;

// noOp, wait, stopAndError
pub mod flow;

// set
pub mod set;

// filter, if
pub mod condition;

// code
pub mod code;

// merge
pub mod merge;

pub use code::CodeNode;
pub use condition::{FilterNode, IfNode};
pub use flow::{NoOpNode, StopAndErrorNode, WaitNode};
pub use merge::MergeNode;
pub use set::SetNode;
pub use trigger::ManualTriggerNode;

/// Register every built-in node type
pub fn register_builtin(registry: &NodeRegistry) {
    registry.register(Arc::new(ManualTriggerNode::new()));
    registry.register(Arc::new(NoOpNode::new()));
    registry.register(Arc::new(SetNode::new()));
    registry.register(Arc::new(FilterNode::new()));
    registry.register(Arc::new(IfNode::new()));
    registry.register(Arc::new(CodeNode::new()));
    registry.register(Arc::new(MergeNode::new()));
    registry.register(Arc::new(WaitNode::new()));
    registry.register(Arc::new(StopAndErrorNode::new()));

    tracing::info!("🧩 Registered {} built-in node types", registry.len());
}

/// Node bodies use anyhow; their errors become failed results
pub(crate) fn finish(result: anyhow::Result<NodeExecutionResult>) -> NodeExecutionResult {
    result.unwrap_or_else(|e| NodeExecutionResult::failure(e.to_string()))
}
