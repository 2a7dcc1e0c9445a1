/// Edit Fields: add or overwrite fields on every item
///
/// `manual` mode assigns a list of name/value pairs; `raw` mode merges a JSON
/// object. With `options.dotNotation` a name like `a.b` writes a nested field.
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::nodes::finish;
use crate::parameter::{GetParameterOptions, NodeSpec, ParameterKind, ParameterSchema};
use crate::value::type_name;
use crate::workflow::types::Item;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FieldAssignment {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug)]
pub struct SetNode {
    spec: Arc<NodeSpec>,
}

impl SetNode {
    pub fn new() -> Self {
        let spec = NodeSpec::new("set", "Edit Fields")
            .with_property(
                ParameterSchema::new("mode", ParameterKind::Options)
                    .with_choices(&["manual", "raw"])
                    .with_default(json!("manual")),
            )
            .with_property(
                ParameterSchema::new("fields", ParameterKind::FixedCollection)
                    .with_default(json!({}))
                    .show_when("mode", vec![json!("manual")])
                    .with_options(vec![ParameterSchema::new("values", ParameterKind::Collection)
                        .with_default(json!([]))
                        .with_options(vec![
                            ParameterSchema::new("name", ParameterKind::String).with_default(json!("")),
                            ParameterSchema::new("value", ParameterKind::Json),
                        ])]),
            )
            .with_property(
                ParameterSchema::new("jsonOutput", ParameterKind::Json)
                    .with_default(json!("{}"))
                    .show_when("mode", vec![json!("raw")]),
            )
            .with_property(
                ParameterSchema::new("include", ParameterKind::Options)
                    .with_choices(&["all", "none"])
                    .with_default(json!("all")),
            )
            .with_property(
                ParameterSchema::new("options", ParameterKind::Collection)
                    .with_default(json!({}))
                    .with_options(vec![
                        ParameterSchema::new("dotNotation", ParameterKind::Boolean).with_default(json!(true))
                    ]),
            );
        Self { spec: Arc::new(spec) }
    }

    fn set_item(&self, input: &NodeInput<'_>, item: &Item, index: usize) -> anyhow::Result<Item> {
        let mode = input.get_string("mode", None, index)?;
        let keep_input = input.get_string("include", None, index)? == "all";
        let dot_notation = input.get_bool("options.dotNotation", None, index)?;

        let assignments: Vec<(String, Value)> = match mode.as_str() {
            "manual" => {
                let fields: Vec<FieldAssignment> = input.get_parameter_as("fields.values", None, index)?;
                fields.into_iter().map(|field| (field.name, field.value)).collect()
            }
            "raw" => {
                let raw = input.get_parameter("jsonOutput", None, index, GetParameterOptions::default())?;
                raw_object(raw)?.into_iter().collect()
            }
            other => bail!("Unknown mode '{other}'"),
        };

        let mut json = if keep_input { item.json.clone() } else { Map::new() };
        for (name, value) in assignments {
            if name.is_empty() {
                continue;
            }
            if dot_notation {
                set_path(&mut json, &name, value);
            } else {
                json.insert(name, value);
            }
        }

        Ok(Item {
            json,
            binary: if keep_input { item.binary.clone() } else { None },
        })
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_object(raw: Value) -> anyhow::Result<Map<String, Value>> {
    let value = match raw {
        Value::String(text) => serde_json::from_str(&text).context("'JSON Output' is not valid JSON")?,
        other => other,
    };
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("'JSON Output' must be an object, got {}", type_name(&other)),
    }
}

/// Write `value` at a dotted path, creating intermediate objects
fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[async_trait]
impl ExecutableNode for SetNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "set"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(
            input
                .main_items()
                .iter()
                .enumerate()
                .map(|(index, item)| self.set_item(&input, item, index))
                .collect::<anyhow::Result<Vec<_>>>()
                .map(|items| NodeExecutionResult::success(vec![items])),
        )
    }
}
