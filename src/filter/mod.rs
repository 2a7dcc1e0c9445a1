/// Condition/Filter Evaluator
///
/// Pure evaluation of a filter specification over already-resolved values:
/// every condition is checked with its typed operator, then the results are
/// combined with `and` / `or`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// Typed operator tables
pub mod operators;

pub use operators::{evaluate_operator, json_equal, parse_date_time, ConditionError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("Condition {index} failed for item {item_index}: {source}")]
    Condition {
        index: usize,
        item_index: usize,
        source: ConditionError,
    },

    #[error("Unknown combinator '{0}', expected 'and' or 'or'")]
    UnknownCombinator(String),
}

/// A complete filter: options, conditions and how they combine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub options: FilterOptions,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default = "default_combinator")]
    pub combinator: String,
}

fn default_combinator() -> String {
    "and".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
}

fn default_case_sensitive() -> bool {
    true
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub left_value: Value,
    #[serde(default)]
    pub right_value: Value,
    pub operator: FilterOperator,
}

/// Operator keyed by (type, operation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOperator {
    #[serde(rename = "type")]
    pub value_type: String,
    pub operation: String,
    /// The operation takes no right operand (UI hint only)
    #[serde(default)]
    pub single_value: bool,
}

impl FilterSpec {
    /// Whether a resolved parameter value has the shape of a filter
    pub fn matches_shape(value: &Value) -> bool {
        value
            .as_object()
            .map(|map| matches!(map.get("conditions"), Some(Value::Array(_))))
            .unwrap_or(false)
    }
}

/// Evaluate a single condition
pub fn evaluate_condition(
    condition: &FilterCondition,
    options: &FilterOptions,
) -> Result<bool, ConditionError> {
    evaluate_operator(
        &condition.left_value,
        &condition.right_value,
        &condition.operator,
        options.case_sensitive,
    )
}

/// Evaluate a filter for one item
///
/// With `continue_on_fail`, a failing condition counts as false instead of
/// aborting. An unknown combinator is always an error.
pub fn evaluate_filter(
    filter: &FilterSpec,
    item_index: usize,
    continue_on_fail: bool,
) -> Result<bool, FilterError> {
    let all_required = match filter.combinator.as_str() {
        "and" => true,
        "or" => false,
        other => return Err(FilterError::UnknownCombinator(other.to_string())),
    };

    let mut results = Vec::with_capacity(filter.conditions.len());
    for (index, condition) in filter.conditions.iter().enumerate() {
        match evaluate_condition(condition, &filter.options) {
            Ok(result) => results.push(result),
            Err(source) if continue_on_fail => {
                tracing::warn!(
                    "⚠️ Filter condition {} failed for item {}, treating as false: {}",
                    index,
                    item_index,
                    source
                );
                results.push(false);
            }
            Err(source) => {
                return Err(FilterError::Condition {
                    index,
                    item_index,
                    source,
                })
            }
        }
    }

    Ok(if all_required {
        results.iter().all(|passed| *passed)
    } else {
        results.iter().any(|passed| *passed)
    })
}
