/// Workflow data proxy
///
/// Read-only view over the current run that expressions and scripts see:
/// the node's input items, the last output of every node that already ran,
/// workflow variables and run metadata. It turns that view into sandbox
/// bindings for a given item index.

use crate::runtime::data::{ExecutionMode, RunData};
use crate::sandbox::{HelperSet, ScriptBindings};
use crate::workflow::types::{Item, Node, Workflow};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct WorkflowDataProxy<'a> {
    workflow: &'a Workflow,
    node: &'a Node,
    input: &'a [Item],
    run_data: &'a RunData,
    execution_id: &'a str,
    mode: ExecutionMode,
    run_index: usize,
}

impl<'a> WorkflowDataProxy<'a> {
    pub fn new(workflow: &'a Workflow, node: &'a Node, input: &'a [Item], run_data: &'a RunData) -> Self {
        Self {
            workflow,
            node,
            input,
            run_data,
            execution_id: "",
            mode: ExecutionMode::Manual,
            run_index: 0,
        }
    }

    pub fn with_execution(mut self, execution_id: &'a str, mode: ExecutionMode) -> Self {
        self.execution_id = execution_id;
        self.mode = mode;
        self
    }

    pub fn with_run_index(mut self, run_index: usize) -> Self {
        self.run_index = run_index;
        self
    }

    pub fn workflow(&self) -> &'a Workflow {
        self.workflow
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn input(&self) -> &'a [Item] {
        self.input
    }

    pub fn run_data(&self) -> &'a RunData {
        self.run_data
    }

    /// Build sandbox bindings for `item_index`
    pub fn bindings(&self, item_index: usize, helpers: &'a HelperSet) -> ScriptBindings<'a> {
        let mut bindings = ScriptBindings::new(self.input, helpers).with_item_index(item_index);

        for (name, tasks) in self.run_data {
            if let Some(task) = tasks.last() {
                bindings = bindings.with_node_output(name, task.output(0));
            }
        }

        bindings
            .with_variable(
                "workflow",
                json!({
                    "id": self.workflow.id,
                    "name": self.workflow.name,
                }),
            )
            .with_variable(
                "execution",
                json!({
                    "id": self.execution_id,
                    "mode": self.mode.as_str(),
                }),
            )
            .with_variable("vars", Value::Object(self.workflow.settings.variables.clone()))
            .with_variable("runIndex", json!(self.run_index))
            .with_variable("itemIndex", json!(item_index))
    }
}
