/// Dynamic value helpers
///
/// The engine, evaluator and filter work on `serde_json::Value` as the tagged
/// dynamic value (null / bool / number / string / array / object). This module
/// holds the narrow set of helpers that inspect, stringify and convert those
/// values, including the JSON round-trip used to coerce a resolved parameter
/// into an arbitrary Rust shape.

use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use thiserror::Error;

/// Failure converting a dynamic value into a typed destination
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The value does not fit the destination shape
    #[error("cannot convert {actual} into {target}: {message}")]
    Shape {
        target: &'static str,
        actual: &'static str,
        message: String,
    },
}

/// Coerce a dynamic value into `T` via a JSON round trip
///
/// Works for structs, maps, vectors and scalars. Fails when field names or
/// types do not line up; the caller owns that risk.
pub fn convert<T: DeserializeOwned>(value: Value) -> Result<T, ConversionError> {
    let actual = type_name(&value);
    serde_json::from_value(value).map_err(|e| ConversionError::Shape {
        target: std::any::type_name::<T>(),
        actual,
        message: e.to_string(),
    })
}

/// Short type label used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Format a number in canonical decimal form
///
/// Integral floats print without a fractional part (`5.0` -> `5`).
pub fn format_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => format!("{}", f),
        None => number.to_string(),
    }
}

/// Build a JSON number from a float, collapsing integral values to integers
pub fn number_from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Value::Number(Number::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Stringify a value for template concatenation
///
/// Strings pass through, numbers use canonical decimal formatting, booleans
/// become `true`/`false`, null becomes the empty string and composite values
/// are rendered as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

/// Numeric view of a value (numbers and numeric strings)
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Emptiness in the n8n sense: null, "", [], {}
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
