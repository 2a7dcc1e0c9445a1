/// Parameter resolution
///
/// Resolves a dotted path (`options.dotNotation`, `fields.values[0].name`)
/// against a node's configured parameters: schema lookup filtered by display
/// rules, raw read, schema default, caller fallback, expression evaluation and
/// finally the declared extraction.

use crate::expression::{Expression, WorkflowDataProxy};
use crate::node::NodeRegistry;
use crate::parameter::display::visible_properties;
use crate::parameter::extract::extract;
use crate::parameter::schema::ParameterSchema;
use crate::parameter::ParameterError;
use crate::sandbox::Sandbox;
use crate::value::{convert, type_name};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// One step of a parameter path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Caller switches for `get_parameter`
#[derive(Debug, Clone, Copy, Default)]
pub struct GetParameterOptions {
    /// Return expression strings unevaluated
    pub raw_expressions: bool,
    /// Apply the schema's extraction rule to the resolved value
    pub extract_value: bool,
}

impl GetParameterOptions {
    pub fn raw() -> Self {
        Self {
            raw_expressions: true,
            extract_value: false,
        }
    }

    pub fn extract() -> Self {
        Self {
            raw_expressions: false,
            extract_value: true,
        }
    }
}

/// Resolves node parameters for the node a `WorkflowDataProxy` points at
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    registry: Arc<NodeRegistry>,
    sandbox: Sandbox,
}

impl ParameterResolver {
    pub fn new(registry: Arc<NodeRegistry>, sandbox: Sandbox) -> Self {
        Self { registry, sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Resolve `path` for the item at `item_index`
    pub fn get_parameter(
        &self,
        proxy: &WorkflowDataProxy<'_>,
        path: &str,
        fallback: Option<Value>,
        item_index: usize,
        options: GetParameterOptions,
    ) -> Result<Value, ParameterError> {
        let node = proxy.node();
        let spec = self
            .registry
            .spec(&node.node_type)
            .ok_or_else(|| ParameterError::UnknownNodeType(node.node_type.clone()))?;
        let segments = parse_path(path)?;

        let visible = visible_properties(&spec.properties, &node.parameters, node.type_version);
        let Some((schema, consumed)) = locate(&visible, &segments) else {
            // Hidden or undeclared parameters never read configured values
            tracing::debug!("🔍 Parameter '{}' is not visible on '{}'", path, node.name);
            return fallback.ok_or_else(|| ParameterError::NotFound(path.to_string()));
        };

        let configured = lookup(&Value::Object(node.parameters.clone()), &segments, path)?;
        let raw = match configured {
            Some(value) => value,
            None => match lookup(&schema.default, &segments[consumed..], path)? {
                Some(default) if !default.is_null() => default,
                _ => fallback.ok_or_else(|| ParameterError::NotFound(path.to_string()))?,
            },
        };

        if options.raw_expressions {
            return Ok(raw);
        }

        let resolved = Expression::new(&self.sandbox, proxy).resolve_value(&raw, item_index)?;
        if options.extract_value && consumed == segments.len() {
            return extract(schema, path, resolved, item_index, node.continue_on_fail());
        }
        Ok(resolved)
    }

    /// Resolve and coerce into an arbitrary shape through a JSON round trip
    pub fn get_parameter_as<T: DeserializeOwned>(
        &self,
        proxy: &WorkflowDataProxy<'_>,
        path: &str,
        fallback: Option<Value>,
        item_index: usize,
    ) -> Result<T, ParameterError> {
        let value = self.get_parameter(proxy, path, fallback, item_index, GetParameterOptions::default())?;
        convert(value).map_err(|source| ParameterError::Conversion {
            path: path.to_string(),
            source,
        })
    }

    pub fn get_string(
        &self,
        proxy: &WorkflowDataProxy<'_>,
        path: &str,
        fallback: Option<&str>,
        item_index: usize,
    ) -> Result<String, ParameterError> {
        let fallback = fallback.map(|s| Value::String(s.to_string()));
        match self.get_parameter(proxy, path, fallback, item_index, GetParameterOptions::default())? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(path, "string", &other)),
        }
    }

    pub fn get_bool(
        &self,
        proxy: &WorkflowDataProxy<'_>,
        path: &str,
        fallback: Option<bool>,
        item_index: usize,
    ) -> Result<bool, ParameterError> {
        let fallback = fallback.map(Value::Bool);
        match self.get_parameter(proxy, path, fallback, item_index, GetParameterOptions::default())? {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(path, "boolean", &other)),
        }
    }

    pub fn get_number(
        &self,
        proxy: &WorkflowDataProxy<'_>,
        path: &str,
        fallback: Option<f64>,
        item_index: usize,
    ) -> Result<f64, ParameterError> {
        let fallback = fallback.map(Value::from);
        let value = self.get_parameter(proxy, path, fallback, item_index, GetParameterOptions::default())?;
        value.as_f64().ok_or_else(|| mismatch(path, "number", &value))
    }
}

fn mismatch(path: &str, expected: &'static str, actual: &Value) -> ParameterError {
    ParameterError::TypeMismatch {
        path: path.to_string(),
        expected,
        actual: type_name(actual),
    }
}

/// Split `a.b[0].c` into segments
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, ParameterError> {
    let invalid = || ParameterError::InvalidPath(path.to_string());
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars();
    let mut after_dot = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                } else if !matches!(segments.last(), Some(PathSegment::Index(_))) {
                    return Err(invalid());
                }
                after_dot = true;
                continue;
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                } else if segments.is_empty() || after_dot {
                    return Err(invalid());
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index = digits.parse().map_err(|_| invalid())?;
                segments.push(PathSegment::Index(index));
            }
            ']' => return Err(invalid()),
            other => key.push(other),
        }
        after_dot = false;
    }

    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    } else if after_dot || segments.is_empty() {
        return Err(invalid());
    }
    Ok(segments)
}

/// Bracket-notation JSONPath for a segment list (`$['a'][0]`)
pub fn to_json_path(segments: &[PathSegment]) -> String {
    let mut json_path = String::from("$");
    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                let escaped = key.replace('\\', "\\\\").replace('\'', "\\'");
                json_path.push_str(&format!("['{escaped}']"));
            }
            PathSegment::Index(index) => json_path.push_str(&format!("[{index}]")),
        }
    }
    json_path
}

fn lookup(root: &Value, segments: &[PathSegment], path: &str) -> Result<Option<Value>, ParameterError> {
    if segments.is_empty() {
        return Ok(Some(root.clone()));
    }
    let selected = jsonpath_lib::select(root, &to_json_path(segments))
        .map_err(|e| ParameterError::InvalidPath(format!("{path}: {e:?}")))?;
    Ok(selected.first().map(|value| (*value).clone()))
}

/// Deepest schema entry the path addresses, and how many segments it covers
///
/// Index segments stay on the current entry (list values); a key without a
/// matching child ends the walk, the rest addresses inside the value.
fn locate<'s>(
    visible: &[&'s ParameterSchema],
    segments: &[PathSegment],
) -> Option<(&'s ParameterSchema, usize)> {
    let PathSegment::Key(first) = segments.first()? else {
        return None;
    };
    let mut schema: &'s ParameterSchema = visible.iter().copied().find(|s| s.name == *first)?;
    let mut consumed = 1;

    for segment in &segments[1..] {
        if let PathSegment::Key(name) = segment {
            match schema.child(name) {
                Some(child) => schema = child,
                None => break,
            }
        }
        consumed += 1;
    }
    Some((schema, consumed))
}
