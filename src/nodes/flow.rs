/// Flow control nodes: pass-through, pause and deliberate failure
use crate::filter::parse_date_time;
use crate::node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput};
use crate::nodes::finish;
use crate::parameter::{NodeSpec, ParameterKind, ParameterSchema};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

/// Forwards its input unchanged
#[derive(Debug)]
pub struct NoOpNode {
    spec: Arc<NodeSpec>,
}

impl NoOpNode {
    pub fn new() -> Self {
        Self {
            spec: Arc::new(NodeSpec::new("noOp", "No Operation")),
        }
    }
}

impl Default for NoOpNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for NoOpNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "noOp"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        NodeExecutionResult::success(vec![input.main_items().to_vec()])
    }
}

/// Pauses the run for an interval or until a moment
#[derive(Debug)]
pub struct WaitNode {
    spec: Arc<NodeSpec>,
}

impl WaitNode {
    pub fn new() -> Self {
        let spec = NodeSpec::new("wait", "Wait")
            .with_property(
                ParameterSchema::new("resume", ParameterKind::Options)
                    .with_choices(&["timeInterval", "specificTime"])
                    .with_default(json!("timeInterval")),
            )
            .with_property(
                ParameterSchema::new("amount", ParameterKind::Number)
                    .with_default(json!(1))
                    .show_when("resume", vec![json!("timeInterval")]),
            )
            .with_property(
                ParameterSchema::new("unit", ParameterKind::Options)
                    .with_choices(&["seconds", "minutes", "hours", "days"])
                    .with_default(json!("hours"))
                    .show_when("resume", vec![json!("timeInterval")]),
            )
            .with_property(
                ParameterSchema::new("dateTime", ParameterKind::DateTime)
                    .with_default(json!(""))
                    .show_when("resume", vec![json!("specificTime")]),
            );
        Self { spec: Arc::new(spec) }
    }

    fn wait_till(&self, input: &NodeInput<'_>) -> anyhow::Result<DateTime<Utc>> {
        match input.get_string("resume", None, 0)?.as_str() {
            "specificTime" => {
                let raw = input.get_string("dateTime", None, 0)?;
                parse_date_time(&raw).ok_or_else(|| anyhow!("Invalid date and time '{raw}'"))
            }
            "timeInterval" => {
                let amount = input.get_number("amount", None, 0)?;
                if !amount.is_finite() || amount < 0.0 {
                    bail!("Wait amount must be a non-negative number, got {amount}");
                }
                let unit = input.get_string("unit", None, 0)?;
                let unit_seconds = match unit.as_str() {
                    "seconds" => 1.0,
                    "minutes" => 60.0,
                    "hours" => 3_600.0,
                    "days" => 86_400.0,
                    other => bail!("Unknown wait unit '{other}'"),
                };
                let millis = (amount * unit_seconds * 1_000.0).round();
                // `as i64` saturates, so range-check before converting
                let interval = if millis < i64::MAX as f64 {
                    Duration::try_milliseconds(millis as i64)
                } else {
                    None
                };
                interval
                    .and_then(|interval| Utc::now().checked_add_signed(interval))
                    .ok_or_else(|| anyhow!("Wait interval of {amount} {unit} is out of range"))
            }
            other => bail!("Unknown resume mode '{other}'"),
        }
    }
}

impl Default for WaitNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for WaitNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "wait"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        finish(self.wait_till(&input).map(|wait_till| {
            let items = vec![input.main_items().to_vec()];
            if wait_till <= Utc::now() {
                NodeExecutionResult::success(items)
            } else {
                tracing::info!("⏸️ Node '{}' pauses the run until {}", input.node.name, wait_till);
                NodeExecutionResult::waiting(items, wait_till)
            }
        }))
    }
}

/// Fails the run with a configured message
#[derive(Debug)]
pub struct StopAndErrorNode {
    spec: Arc<NodeSpec>,
}

impl StopAndErrorNode {
    pub fn new() -> Self {
        let spec = NodeSpec::new("stopAndError", "Stop and Error").with_property(
            ParameterSchema::new("errorMessage", ParameterKind::String).with_default(json!("Workflow stopped")),
        );
        Self { spec: Arc::new(spec) }
    }
}

impl Default for StopAndErrorNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for StopAndErrorNode {
    fn category(&self) -> NodeCategory {
        NodeCategory::Executor
    }

    fn name(&self) -> &str {
        "stopAndError"
    }

    fn default_spec(&self) -> Arc<NodeSpec> {
        self.spec.clone()
    }

    async fn execute(&self, _ctx: &ExecuteContext, input: NodeInput<'_>) -> NodeExecutionResult {
        match input.get_string("errorMessage", None, 0) {
            Ok(message) => NodeExecutionResult::failure(message),
            Err(e) => NodeExecutionResult::failure(e.to_string()),
        }
    }
}
