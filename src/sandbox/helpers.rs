/// Built-in helper functions exposed to scripts
///
/// Helpers are plain Rust closures over dynamic values. The sandbox exposes
/// each one under a `$`-prefixed name (`$if`, `$min`, ...), and hosts can
/// register their own next to the defaults.

use crate::value::{as_number, is_empty, number_from_f64, type_name};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A helper callable from scripts; errors become script runtime errors
pub type HelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Named set of helper functions
#[derive(Clone, Default)]
pub struct HelperSet {
    helpers: BTreeMap<String, HelperFn>,
}

impl HelperSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// The default helpers: `if`, `ifEmpty`, `min`, `max`, `now`, `today`
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.register("if", helper_if);
        set.register("ifEmpty", helper_if_empty);
        set.register("min", |args| extreme(args, "min", f64::min));
        set.register("max", |args| extreme(args, "max", f64::max));
        set.register("now", |_| Ok(Value::String(Utc::now().to_rfc3339())));
        set.register("today", helper_today);
        set
    }

    /// Register (or replace) a helper under `name`, without the `$` prefix
    pub fn register<F>(&mut self, name: &str, helper: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.to_string(), Arc::new(helper));
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HelperFn)> {
        self.helpers.iter().map(|(name, helper)| (name.as_str(), helper))
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

impl fmt::Debug for HelperSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.helpers.keys()).finish()
    }
}

/// Truthiness used by `$if`: null, false, 0 and "" are false
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn helper_if(args: &[Value]) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("$if expects a condition and at least one value".to_string());
    }
    let pick = if truthy(&args[0]) { args.get(1) } else { args.get(2) };
    Ok(pick.cloned().unwrap_or(Value::Null))
}

fn helper_if_empty(args: &[Value]) -> Result<Value, String> {
    match args {
        [value, fallback, ..] => Ok(if is_empty(value) {
            fallback.clone()
        } else {
            value.clone()
        }),
        _ => Err("$ifEmpty expects a value and a fallback".to_string()),
    }
}

fn helper_today(_: &[Value]) -> Result<Value, String> {
    let today = Utc::now().date_naive();
    let midnight = today
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive).to_rfc3339())
        .ok_or_else(|| "cannot compute start of day".to_string())?;
    Ok(Value::String(midnight))
}

/// Fold numeric arguments (arrays are flattened one level)
fn extreme(args: &[Value], name: &str, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let mut result: Option<f64> = None;
    for arg in args {
        let values: Vec<&Value> = match arg {
            Value::Array(entries) => entries.iter().collect(),
            other => vec![other],
        };
        for value in values {
            let number = as_number(value)
                .ok_or_else(|| format!("${name} expects numbers, got {}", type_name(value)))?;
            result = Some(result.map_or(number, |current| pick(current, number)));
        }
    }
    result
        .map(number_from_f64)
        .ok_or_else(|| format!("${name} expects at least one number"))
}
