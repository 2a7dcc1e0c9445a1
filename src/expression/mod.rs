/// Expression Evaluator
///
/// Parameter strings starting with `=` are templates: text with embedded
/// `{{ code }}` fragments evaluated in the script sandbox. A template that is
/// exactly one fragment yields the fragment's native value; anything else is
/// stringified and concatenated.

use crate::sandbox::{Sandbox, SandboxError};
use crate::value::stringify;
use serde_json::{Map, Value};
use thiserror::Error;

// {{ }} tokenizer
pub mod tokenizer;

// Run-context view handed to the sandbox
pub mod proxy;

pub use proxy::WorkflowDataProxy;
pub use tokenizer::{tokenize, Chunk};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    /// The template itself is malformed
    #[error("Invalid expression: {0}")]
    Tokenize(String),

    /// The single code fragment of a template failed
    #[error("{source}")]
    Evaluation { expression: String, source: SandboxError },
}

/// Evaluator bound to one sandbox and one run-context view
#[derive(Debug, Clone, Copy)]
pub struct Expression<'a> {
    sandbox: &'a Sandbox,
    proxy: &'a WorkflowDataProxy<'a>,
}

/// Whether a raw parameter value is an expression
pub fn is_expression(raw: &str) -> bool {
    raw.starts_with('=')
}

impl<'a> Expression<'a> {
    pub fn new(sandbox: &'a Sandbox, proxy: &'a WorkflowDataProxy<'a>) -> Self {
        Self { sandbox, proxy }
    }

    /// Evaluate one raw parameter string for the item at `item_index`
    pub fn evaluate(&self, raw: &str, item_index: usize) -> Result<Value, ExpressionError> {
        let Some(body) = raw.strip_prefix('=') else {
            return Ok(Value::String(raw.to_string()));
        };
        if !body.contains("{{") {
            return Ok(Value::String(body.to_string()));
        }

        let chunks = tokenize(body)?;
        if let [Chunk::Code(code)] = chunks.as_slice() {
            return self
                .run_fragment(code, item_index)
                .map_err(|source| ExpressionError::Evaluation {
                    expression: code.clone(),
                    source,
                });
        }

        let mut rendered = String::new();
        for chunk in &chunks {
            match chunk {
                Chunk::Text(text) => rendered.push_str(text),
                Chunk::Code(code) => match self.run_fragment(code, item_index) {
                    Ok(value) => rendered.push_str(&stringify(&value)),
                    Err(error) => {
                        tracing::warn!("⚠️ Expression fragment '{}' failed: {}", code, error);
                        rendered.push_str(&format!("[ERROR: {error}]"));
                    }
                },
            }
        }
        Ok(Value::String(rendered))
    }

    /// Resolve every string leaf of a value, recursing into maps and arrays
    pub fn resolve_value(&self, value: &Value, item_index: usize) -> Result<Value, ExpressionError> {
        match value {
            Value::String(raw) => self.evaluate(raw, item_index),
            Value::Array(entries) => entries
                .iter()
                .map(|entry| self.resolve_value(entry, item_index))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, entry) in map {
                    resolved.insert(key.clone(), self.resolve_value(entry, item_index)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn run_fragment(&self, code: &str, item_index: usize) -> Result<Value, SandboxError> {
        let bindings = self.proxy.bindings(item_index, self.sandbox.helpers());
        self.sandbox.run_code(&bindings, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::runtime::data::RunData;
    use crate::workflow::types::{items_from_values, Node, Workflow};
    use rstest::rstest;
    use serde_json::json;

    fn workflow() -> Workflow {
        serde_json::from_value(json!({
            "id": "wf-expr",
            "name": "Expressions",
            "nodes": [{"id": "n1", "name": "Set", "type": "set"}],
            "settings": {"variables": {"region": "eu"}}
        }))
        .unwrap()
    }

    fn sandbox() -> Sandbox {
        Sandbox::new(&ExecutionConfig {
            script_timeout_secs: 5,
            shutdown_grace_secs: 1,
            max_iterations: 100,
        })
    }

    fn with_expression<R>(f: impl FnOnce(Expression<'_>) -> R) -> R {
        let wf = workflow();
        let node: &Node = &wf.nodes[0];
        let items = items_from_values(vec![json!({"name": "Ada", "score": 7}), json!({"name": "Linus"})]);
        let run_data = RunData::new();
        let proxy = WorkflowDataProxy::new(&wf, node, &items, &run_data);
        let sandbox = sandbox();
        f(Expression::new(&sandbox, &proxy))
    }

    #[rstest]
    #[case("plain text")]
    #[case("")]
    #[case("{{ 1 + 1 }}")]
    #[case(" =not an expression")]
    fn literals_pass_through(#[case] raw: &str) {
        with_expression(|expr| {
            assert_eq!(expr.evaluate(raw, 0).unwrap(), Value::String(raw.to_string()));
        });
    }

    #[test]
    fn mixed_template_concatenates() {
        with_expression(|expr| {
            assert_eq!(expr.evaluate("=1{{1+1}}3", 0).unwrap(), json!("123"));
            assert_eq!(expr.evaluate("=1{{1+1}}3", 1).unwrap(), json!("123"));
            assert_eq!(
                expr.evaluate("=Hi {{ $json.name }}, item {{ $itemIndex }}", 1).unwrap(),
                json!("Hi Linus, item 1")
            );
        });
    }

    #[test]
    fn single_fragment_keeps_native_type() {
        with_expression(|expr| {
            assert_eq!(expr.evaluate("={{123}}", 0).unwrap(), json!(123));
            assert_eq!(expr.evaluate("={{ $json }}", 0).unwrap(), json!({"name": "Ada", "score": 7}));
            assert_eq!(expr.evaluate("={{ $vars.region }}", 0).unwrap(), json!("eu"));
            assert_eq!(expr.evaluate("=no braces", 0).unwrap(), json!("no braces"));
        });
    }

    #[test]
    fn fragment_errors_inline_in_templates() {
        with_expression(|expr| {
            let rendered = expr.evaluate("=a {{ $nope }} b", 0).unwrap();
            let rendered = rendered.as_str().unwrap();
            assert!(rendered.starts_with("a [ERROR: "));
            assert!(rendered.contains("'$nope' is not defined [line 1]"));
            assert!(rendered.ends_with("] b"));

            let err = expr.evaluate("={{ $nope }}", 0).unwrap_err();
            assert!(matches!(err, ExpressionError::Evaluation { .. }));
        });
    }

    #[test]
    fn resolution_recurses_into_containers() {
        with_expression(|expr| {
            let raw = json!({
                "greeting": "=Hello {{ $json.name }}",
                "list": ["={{ $json.score * 2 }}", 5, null],
                "literal": "unchanged"
            });
            assert_eq!(
                expr.resolve_value(&raw, 0).unwrap(),
                json!({
                    "greeting": "Hello Ada",
                    "list": [14, 5, null],
                    "literal": "unchanged"
                })
            );
        });
    }
}
