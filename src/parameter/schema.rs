/// Node parameter schema
///
/// A node type declares its parameters once (`NodeSpec`). The resolver uses
/// the declaration for defaults, display rules and value extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared parameters of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Registered type name
    pub name: String,
    pub display_name: String,
    /// Latest version of the node type
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub properties: Vec<ParameterSchema>,
}

fn default_version() -> u32 {
    1
}

impl NodeSpec {
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            version: 1,
            properties: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_property(mut self, property: ParameterSchema) -> Self {
        self.properties.push(property);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    DateTime,
    /// One value out of `choices`
    Options,
    /// Optional named children (`options`)
    Collection,
    /// Named groups of children, each group holding a list of entries
    FixedCollection,
    Json,
    Filter,
    ResourceLocator,
}

/// One selectable value of an `options` parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChoice {
    pub name: String,
    pub value: Value,
}

/// Show/hide rules keyed by the name of the parameter they depend on
///
/// The synthetic key `@version` matches the node's type version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub show: BTreeMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hide: BTreeMap<String, Vec<Value>>,
}

/// Extraction applied to a resolved value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtractValue {
    /// First capture group (or whole match) of the first match
    Regex { regex: String },
}

/// One input mode of a resource locator (`id`, `url`, `list`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorMode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_value: Option<ExtractValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_options: Option<DisplayOptions>,
    /// Selectable values of an `options` parameter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ParameterChoice>,
    /// Children of collections and fixed collections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ParameterSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_value: Option<ExtractValue>,
    /// Modes of a resource locator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<LocatorMode>,
}

impl ParameterSchema {
    pub fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: Value::Null,
            display_options: None,
            choices: Vec::new(),
            options: Vec::new(),
            extract_value: None,
            modes: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    /// Only show this parameter when `dependency` has one of `values`
    pub fn show_when(mut self, dependency: &str, values: Vec<Value>) -> Self {
        self.display_options
            .get_or_insert_with(DisplayOptions::default)
            .show
            .insert(dependency.to_string(), values);
        self
    }

    /// Hide this parameter when `dependency` has one of `values`
    pub fn hide_when(mut self, dependency: &str, values: Vec<Value>) -> Self {
        self.display_options
            .get_or_insert_with(DisplayOptions::default)
            .hide
            .insert(dependency.to_string(), values);
        self
    }

    pub fn with_choices(mut self, values: &[&str]) -> Self {
        self.choices = values
            .iter()
            .map(|value| ParameterChoice {
                name: value.to_string(),
                value: Value::String(value.to_string()),
            })
            .collect();
        self
    }

    pub fn with_options(mut self, options: Vec<ParameterSchema>) -> Self {
        self.options = options;
        self
    }

    pub fn with_regex_extraction(mut self, regex: &str) -> Self {
        self.extract_value = Some(ExtractValue::Regex {
            regex: regex.to_string(),
        });
        self
    }

    pub fn with_modes(mut self, modes: Vec<LocatorMode>) -> Self {
        self.modes = modes;
        self
    }

    /// Child schema by name
    pub fn child(&self, name: &str) -> Option<&ParameterSchema> {
        self.options.iter().find(|child| child.name == name)
    }
}
