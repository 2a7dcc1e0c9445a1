/// Value extraction applied after expression resolution
///
/// Three kinds: regex extraction declared on the schema, resource-locator
/// extraction by mode, and filter extraction which turns a resolved filter
/// into its boolean outcome.

use crate::filter::{evaluate_filter, FilterSpec};
use crate::parameter::schema::{ExtractValue, ParameterKind, ParameterSchema};
use crate::parameter::ParameterError;
use crate::value::stringify;
use regex::Regex;
use serde_json::Value;

/// Apply whichever extraction `schema` declares; values pass through otherwise
pub fn extract(
    schema: &ParameterSchema,
    path: &str,
    value: Value,
    item_index: usize,
    continue_on_fail: bool,
) -> Result<Value, ParameterError> {
    if let Some(rule) = &schema.extract_value {
        return apply_rule(rule, path, &value);
    }
    match schema.kind {
        ParameterKind::ResourceLocator => extract_locator(schema, path, value),
        ParameterKind::Filter if FilterSpec::matches_shape(&value) => {
            extract_filter(path, value, item_index, continue_on_fail)
        }
        _ => Ok(value),
    }
}

fn apply_rule(rule: &ExtractValue, path: &str, value: &Value) -> Result<Value, ParameterError> {
    match rule {
        ExtractValue::Regex { regex } => extract_regex(path, value, regex),
    }
}

/// First capture group of the first match, or the whole match without groups
pub fn extract_regex(path: &str, value: &Value, pattern: &str) -> Result<Value, ParameterError> {
    let failure = |message: String| ParameterError::Extraction {
        path: path.to_string(),
        message,
    };

    let regex = Regex::new(pattern).map_err(|e| failure(format!("invalid pattern '{pattern}': {e}")))?;
    let text = stringify(value);
    let captures = regex
        .captures(&text)
        .ok_or_else(|| failure(format!("'{text}' does not match '{pattern}'")))?;
    let matched = captures.get(1).or_else(|| captures.get(0));

    Ok(matched
        .map(|m| Value::String(m.as_str().to_string()))
        .unwrap_or(Value::Null))
}

/// The locator's `value`, run through its mode's extraction if it has one
fn extract_locator(schema: &ParameterSchema, path: &str, value: Value) -> Result<Value, ParameterError> {
    let Value::Object(mut locator) = value else {
        return Ok(value);
    };
    let inner = locator.remove("value").unwrap_or(Value::Null);
    let rule = locator
        .get("mode")
        .and_then(Value::as_str)
        .and_then(|mode| schema.modes.iter().find(|m| m.name == mode))
        .and_then(|mode| mode.extract_value.as_ref());

    match rule {
        Some(rule) => apply_rule(rule, path, &inner),
        None => Ok(inner),
    }
}

fn extract_filter(
    path: &str,
    value: Value,
    item_index: usize,
    continue_on_fail: bool,
) -> Result<Value, ParameterError> {
    let filter: FilterSpec = serde_json::from_value(value).map_err(|e| ParameterError::Extraction {
        path: path.to_string(),
        message: format!("malformed filter: {e}"),
    })?;
    let passed = evaluate_filter(&filter, item_index, continue_on_fail).map_err(|source| {
        ParameterError::Filter {
            path: path.to_string(),
            source,
        }
    })?;
    Ok(Value::Bool(passed))
}
