/// Operator tables for filter conditions
///
/// Each declared type (string, number, dateTime, boolean, array, object) has
/// a fixed set of operations. Operands are coerced to the declared type
/// first; a value that cannot be coerced is a type error.

use crate::filter::FilterOperator;
use crate::value::{format_number, type_name};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::RegexBuilder;
use serde_json::Value;
use thiserror::Error;

/// Failure evaluating a single condition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Wrong type: '{value}' is not a {expected}")]
    WrongType { value: String, expected: &'static str },

    #[error("Unknown operation '{operation}' for type '{value_type}'")]
    UnknownOperator { value_type: String, operation: String },

    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Naive date-time layouts tried after RFC 3339 and RFC 2822
const DATE_TIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date-only layouts, interpreted as midnight UTC
const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Numbers above this are epoch milliseconds rather than seconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Evaluate one operator against already-resolved operands
pub fn evaluate_operator(
    left: &Value,
    right: &Value,
    operator: &FilterOperator,
    case_sensitive: bool,
) -> Result<bool, ConditionError> {
    let operation = operator.operation.as_str();

    match operation {
        "exists" => return Ok(!left.is_null()),
        "notExists" => return Ok(left.is_null()),
        "equals" | "notEquals" => {
            let negate = operation == "notEquals";
            match (left.is_null(), right.is_null()) {
                (true, true) => return Ok(!negate),
                (true, false) | (false, true) => return Ok(negate),
                (false, false) => {}
            }
        }
        _ => {}
    }

    let result = match operator.value_type.as_str() {
        "string" => string_operation(operation, left, right, case_sensitive),
        "number" => number_operation(operation, left, right),
        "dateTime" => date_time_operation(operation, left, right),
        "boolean" => boolean_operation(operation, left, right),
        "array" => array_operation(operation, left, right),
        "object" => object_operation(operation, left, right),
        _ => Err(ConditionError::UnknownOperator {
            value_type: operator.value_type.clone(),
            operation: operation.to_string(),
        }),
    };

    // Known type but unknown operation
    result.and_then(|outcome| {
        outcome.ok_or_else(|| ConditionError::UnknownOperator {
            value_type: operator.value_type.clone(),
            operation: operation.to_string(),
        })
    })
}

/// `Ok(None)` means the operation is not part of the type's table
type OperationResult = Result<Option<bool>, ConditionError>;

fn string_operation(operation: &str, left: &Value, right: &Value, case_sensitive: bool) -> OperationResult {
    let mut l = coerce_string(left)?;
    let r = coerce_string(right)?;

    if matches!(operation, "regex" | "notRegex") {
        // The pattern keeps its own case; only its `/i` flag folds it
        if !case_sensitive {
            l = l.to_lowercase();
        }
        let matched = compile_regex(&r)?.is_match(&l);
        return Ok(Some(if operation == "regex" { matched } else { !matched }));
    }

    let mut r = r;
    if !case_sensitive {
        l = l.to_lowercase();
        r = r.to_lowercase();
    }

    Ok(match operation {
        "equals" => Some(l == r),
        "notEquals" => Some(l != r),
        "contains" => Some(l.contains(&r)),
        "notContains" => Some(!l.contains(&r)),
        "startsWith" => Some(l.starts_with(&r)),
        "notStartsWith" => Some(!l.starts_with(&r)),
        "endsWith" => Some(l.ends_with(&r)),
        "notEndsWith" => Some(!l.ends_with(&r)),
        "empty" => Some(l.is_empty()),
        "notEmpty" => Some(!l.is_empty()),
        _ => None,
    })
}

fn number_operation(operation: &str, left: &Value, right: &Value) -> OperationResult {
    if !matches!(operation, "equals" | "notEquals" | "gt" | "gte" | "lt" | "lte") {
        return Ok(None);
    }
    if left.is_null() || right.is_null() {
        return Ok(Some(false));
    }
    let l = coerce_number(left)?;
    let r = coerce_number(right)?;

    Ok(Some(match operation {
        "equals" => l == r,
        "notEquals" => l != r,
        "gt" => l > r,
        "gte" => l >= r,
        "lt" => l < r,
        _ => l <= r,
    }))
}

fn date_time_operation(operation: &str, left: &Value, right: &Value) -> OperationResult {
    let known = matches!(
        operation,
        "equals"
            | "notEquals"
            | "after"
            | "before"
            | "afterOrEquals"
            | "beforeOrEquals"
            | "afterEquals"
            | "beforeEquals"
    );
    if !known {
        return Ok(None);
    }
    if left.is_null() || right.is_null() {
        return Ok(Some(false));
    }
    let l = coerce_date_time(left)?;
    let r = coerce_date_time(right)?;

    Ok(Some(match operation {
        "equals" => l == r,
        "notEquals" => l != r,
        "after" => l > r,
        "before" => l < r,
        "afterOrEquals" | "afterEquals" => l >= r,
        _ => l <= r,
    }))
}

fn boolean_operation(operation: &str, left: &Value, right: &Value) -> OperationResult {
    if !matches!(operation, "true" | "false" | "equals" | "notEquals") {
        return Ok(None);
    }
    if left.is_null() {
        return Ok(Some(false));
    }
    let l = coerce_bool(left)?;

    Ok(Some(match operation {
        "true" => l,
        "false" => !l,
        "equals" => l == coerce_bool(right)?,
        _ => l != coerce_bool(right)?,
    }))
}

fn array_operation(operation: &str, left: &Value, right: &Value) -> OperationResult {
    let length_operation = operation.starts_with("length");

    let entries = match left {
        Value::Null => {
            return Ok(match operation {
                "empty" => Some(true),
                "notEmpty" => Some(false),
                "contains" | "notContains" | "equals" | "notEquals" => Some(false),
                _ if length_operation && is_length_operation(operation) => Some(false),
                _ => None,
            })
        }
        Value::Array(entries) => entries,
        other => return Err(wrong_type(other, "array")),
    };

    if length_operation {
        if !is_length_operation(operation) {
            return Ok(None);
        }
        let bound = coerce_number(right)?;
        let len = entries.len() as f64;
        return Ok(Some(match operation {
            "lengthEquals" => len == bound,
            "lengthNotEquals" => len != bound,
            "lengthGt" => len > bound,
            "lengthGte" => len >= bound,
            "lengthLt" => len < bound,
            _ => len <= bound,
        }));
    }

    Ok(match operation {
        "contains" => Some(entries.iter().any(|entry| json_equal(entry, right))),
        "notContains" => Some(!entries.iter().any(|entry| json_equal(entry, right))),
        "empty" => Some(entries.is_empty()),
        "notEmpty" => Some(!entries.is_empty()),
        "equals" => Some(json_equal(left, right)),
        "notEquals" => Some(!json_equal(left, right)),
        _ => None,
    })
}

fn is_length_operation(operation: &str) -> bool {
    matches!(
        operation,
        "lengthEquals" | "lengthNotEquals" | "lengthGt" | "lengthGte" | "lengthLt" | "lengthLte"
    )
}

fn object_operation(operation: &str, left: &Value, right: &Value) -> OperationResult {
    let map = match left {
        Value::Null => {
            return Ok(match operation {
                "empty" => Some(true),
                "notEmpty" => Some(false),
                _ => None,
            })
        }
        Value::Object(map) => map,
        other => return Err(wrong_type(other, "object")),
    };

    Ok(match operation {
        "empty" => Some(map.is_empty()),
        "notEmpty" => Some(!map.is_empty()),
        "equals" => Some(json_equal(left, right)),
        "notEquals" => Some(!json_equal(left, right)),
        _ => None,
    })
}

fn wrong_type(value: &Value, expected: &'static str) -> ConditionError {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => format!("{} ({})", other, type_name(other)),
    };
    ConditionError::WrongType {
        value: rendered,
        expected,
    }
}

fn coerce_string(value: &Value) -> Result<String, ConditionError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(format_number(n)),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(wrong_type(other, "string")),
    }
}

fn coerce_number(value: &Value) -> Result<f64, ConditionError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| wrong_type(value, "number")),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| wrong_type(value, "number")),
        other => Err(wrong_type(other, "number")),
    }
}

fn coerce_bool(value: &Value) -> Result<bool, ConditionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(wrong_type(other, "boolean")),
    }
}

fn coerce_date_time(value: &Value) -> Result<DateTime<Utc>, ConditionError> {
    match value {
        Value::String(s) => parse_date_time(s).ok_or_else(|| wrong_type(value, "dateTime")),
        Value::Number(n) => n
            .as_f64()
            .and_then(|epoch| {
                let millis = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
                    epoch
                } else {
                    epoch * 1000.0
                };
                Utc.timestamp_millis_opt(millis as i64).single()
            })
            .ok_or_else(|| wrong_type(value, "dateTime")),
        other => Err(wrong_type(other, "dateTime")),
    }
}

/// Parse a date/time string, trying layouts in a fixed priority order
pub fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for layout in DATE_TIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, layout) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Regex from a plain pattern or `/pattern/flags`
fn compile_regex(pattern: &str) -> Result<regex::Regex, ConditionError> {
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rfind('/').map(|end| (rest, end))) {
        Some((rest, end)) => (&rest[..end], &rest[end + 1..]),
        None => (pattern, ""),
    };

    RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Structural equality where numerically equal numbers match (`1 == 1.0`)
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, l)| y.get(key).is_some_and(|r| json_equal(l, r)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn op(value_type: &str, operation: &str) -> FilterOperator {
        FilterOperator {
            value_type: value_type.to_string(),
            operation: operation.to_string(),
            single_value: false,
        }
    }

    fn eval(value_type: &str, operation: &str, left: Value, right: Value) -> Result<bool, ConditionError> {
        evaluate_operator(&left, &right, &op(value_type, operation), true)
    }

    #[rstest]
    #[case(json!(true))]
    #[case(json!(false))]
    #[case(Value::Null)]
    fn exists_depends_only_on_nilness(#[case] left: Value) {
        for value_type in ["boolean", "string", "number", "array"] {
            assert_eq!(eval(value_type, "exists", left.clone(), Value::Null).unwrap(), !left.is_null());
            assert_eq!(eval(value_type, "notExists", left.clone(), Value::Null).unwrap(), left.is_null());
        }
    }

    #[rstest]
    #[case("lengthEquals", json!(0))]
    #[case("lengthNotEquals", json!(3))]
    #[case("lengthGt", json!(-1))]
    #[case("lengthGte", json!(0))]
    #[case("lengthLt", json!(10))]
    #[case("lengthLte", json!(0))]
    fn nil_array_length_is_false(#[case] operation: &str, #[case] bound: Value) {
        assert!(!eval("array", operation, Value::Null, bound).unwrap());
    }

    #[rstest]
    #[case("number", "gt", json!(1))]
    #[case("number", "lte", json!(1))]
    #[case("dateTime", "after", json!("2024-05-01"))]
    #[case("dateTime", "beforeEquals", json!("2024-05-01"))]
    #[case("boolean", "true", json!(null))]
    #[case("boolean", "false", json!(null))]
    fn null_left_compares_false(#[case] value_type: &str, #[case] operation: &str, #[case] right: Value) {
        assert!(!eval(value_type, operation, Value::Null, right).unwrap());
    }

    #[rstest]
    #[case("string", "equals", json!(null), json!(null), true)]
    #[case("string", "equals", json!(null), json!("x"), false)]
    #[case("number", "notEquals", json!(5), json!(null), true)]
    #[case("string", "contains", json!("haystack"), json!("st"), true)]
    #[case("string", "notStartsWith", json!("haystack"), json!("hay"), false)]
    #[case("string", "endsWith", json!("report.pdf"), json!(".pdf"), true)]
    #[case("string", "regex", json!("order-42"), json!("^order-\\d+$"), true)]
    #[case("string", "notRegex", json!("order-x"), json!("/^ORDER-\\d+$/i"), true)]
    #[case("number", "gt", json!("10"), json!(9.5), true)]
    #[case("number", "lte", json!(3), json!("3"), true)]
    #[case("number", "gt", json!(null), json!(1), false)]
    #[case("dateTime", "after", json!("2024-05-02T00:00:00Z"), json!("2024-05-01"), true)]
    #[case("dateTime", "beforeEquals", json!("2024-05-01 00:00:00"), json!("2024-05-01T00:00:00+00:00"), true)]
    #[case("dateTime", "afterOrEquals", json!(1714521600), json!("2024-05-01T00:00:00Z"), true)]
    #[case("boolean", "true", json!("TRUE"), json!(null), true)]
    #[case("boolean", "false", json!(false), json!(null), true)]
    #[case("boolean", "equals", json!(true), json!("true"), true)]
    #[case("array", "contains", json!([1, {"a": 2}]), json!({"a": 2.0}), true)]
    #[case("array", "notContains", json!(["a"]), json!("b"), true)]
    #[case("array", "lengthGte", json!([1, 2]), json!("2"), true)]
    #[case("array", "empty", json!([]), json!(null), true)]
    #[case("object", "notEmpty", json!({"k": 1}), json!(null), true)]
    #[case("object", "empty", json!(null), json!(null), true)]
    fn operator_table(
        #[case] value_type: &str,
        #[case] operation: &str,
        #[case] left: Value,
        #[case] right: Value,
        #[case] expected: bool,
    ) {
        assert_eq!(eval(value_type, operation, left, right).unwrap(), expected);
    }

    #[test]
    fn case_insensitive_folds_the_left_operand() {
        let operator = op("string", "equals");
        assert!(evaluate_operator(&json!("Hello"), &json!("hELLO"), &operator, false).unwrap());
        assert!(!evaluate_operator(&json!("Hello"), &json!("hELLO"), &operator, true).unwrap());

        let regex = op("string", "regex");
        assert!(evaluate_operator(&json!("ABC"), &json!("^abc$"), &regex, false).unwrap());
        assert!(!evaluate_operator(&json!("ABC"), &json!("^abc$"), &regex, true).unwrap());
    }

    #[rstest]
    #[case("abc", "^ABC$", false)]
    #[case("ABC", "^ABC$", false)]
    #[case("abc", "^abc$", true)]
    #[case("ABC", "/^ABC$/i", true)]
    fn insensitive_regex_leaves_the_pattern_alone(#[case] left: &str, #[case] pattern: &str, #[case] expected: bool) {
        let regex = op("string", "regex");
        assert_eq!(evaluate_operator(&json!(left), &json!(pattern), &regex, false).unwrap(), expected);
    }

    #[test]
    fn coercion_failures_are_type_errors() {
        let err = eval("number", "gt", json!("ten"), json!(1)).unwrap_err();
        assert_eq!(
            err,
            ConditionError::WrongType {
                value: "ten".into(),
                expected: "number"
            }
        );
        assert!(matches!(
            eval("array", "contains", json!("not a list"), json!(1)),
            Err(ConditionError::WrongType { expected: "array", .. })
        ));
        assert!(matches!(
            eval("dateTime", "after", json!("someday"), json!("2024-01-01")),
            Err(ConditionError::WrongType { expected: "dateTime", .. })
        ));
        assert!(matches!(
            eval("string", "regex", json!("x"), json!("(")),
            Err(ConditionError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn unknown_operations_are_rejected() {
        assert!(matches!(
            eval("string", "sortsBefore", json!("a"), json!("b")),
            Err(ConditionError::UnknownOperator { .. })
        ));
        assert!(matches!(
            eval("color", "equals", json!("red"), json!("red")),
            Err(ConditionError::UnknownOperator { .. })
        ));
    }
}
