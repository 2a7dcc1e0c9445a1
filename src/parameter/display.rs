/// Show/hide display rules
///
/// A parameter is visible when every `show` dependency currently has one of
/// the listed values and no `hide` dependency does. A dependency's value is
/// the configured parameter, or the sibling's declared default when unset.

use crate::filter::json_equal;
use crate::parameter::schema::{DisplayOptions, ParameterSchema};
use serde_json::{Map, Value};

/// Synthetic dependency matching the node's type version
pub const VERSION_DEPENDENCY: &str = "@version";

/// Parameters of `properties` that are visible for the given configuration
pub fn visible_properties<'s>(
    properties: &'s [ParameterSchema],
    parameters: &Map<String, Value>,
    node_version: u32,
) -> Vec<&'s ParameterSchema> {
    properties
        .iter()
        .filter(|schema| is_displayed(schema, properties, parameters, node_version))
        .collect()
}

/// Whether one parameter is visible
pub fn is_displayed(
    schema: &ParameterSchema,
    siblings: &[ParameterSchema],
    parameters: &Map<String, Value>,
    node_version: u32,
) -> bool {
    let Some(DisplayOptions { show, hide }) = &schema.display_options else {
        return true;
    };

    let matches = |dependency: &str, allowed: &[Value]| {
        let current = dependency_value(dependency, siblings, parameters, node_version);
        allowed.iter().any(|candidate| json_equal(candidate, &current))
    };

    let shown = show
        .iter()
        .all(|(dependency, allowed)| matches(dependency, allowed));
    let hidden = hide
        .iter()
        .any(|(dependency, allowed)| matches(dependency, allowed));
    shown && !hidden
}

fn dependency_value(
    dependency: &str,
    siblings: &[ParameterSchema],
    parameters: &Map<String, Value>,
    node_version: u32,
) -> Value {
    if dependency == VERSION_DEPENDENCY {
        return Value::from(node_version);
    }
    // `/name` addresses the top level; all lookups here are top level
    let name = dependency.trim_start_matches('/');
    if let Some(value) = parameters.get(name) {
        return value.clone();
    }
    siblings
        .iter()
        .find(|sibling| sibling.name == name)
        .map(|sibling| sibling.default.clone())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::schema::ParameterKind;
    use serde_json::json;

    fn properties() -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::new("resume", ParameterKind::Options)
                .with_choices(&["timeInterval", "specificTime"])
                .with_default(json!("timeInterval")),
            ParameterSchema::new("amount", ParameterKind::Number)
                .with_default(json!(1))
                .show_when("resume", vec![json!("timeInterval")]),
            ParameterSchema::new("dateTime", ParameterKind::DateTime)
                .show_when("resume", vec![json!("specificTime")]),
            ParameterSchema::new("legacyUnit", ParameterKind::String)
                .hide_when(VERSION_DEPENDENCY, vec![json!(2)]),
        ]
    }

    fn names(visible: Vec<&ParameterSchema>) -> Vec<&str> {
        visible.into_iter().map(|schema| schema.name.as_str()).collect()
    }

    #[test]
    fn show_rules_fall_back_to_sibling_defaults() {
        let props = properties();
        let visible = visible_properties(&props, &Map::new(), 1);
        assert_eq!(names(visible), vec!["resume", "amount", "legacyUnit"]);
    }

    #[test]
    fn configured_values_override_defaults() {
        let props = properties();
        let mut params = Map::new();
        params.insert("resume".into(), json!("specificTime"));
        let visible = visible_properties(&props, &params, 1);
        assert_eq!(names(visible), vec!["resume", "dateTime", "legacyUnit"]);
    }

    #[test]
    fn version_dependency_hides_parameters() {
        let props = properties();
        let visible = visible_properties(&props, &Map::new(), 2);
        assert_eq!(names(visible), vec!["resume", "amount"]);
    }
}
