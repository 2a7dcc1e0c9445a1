/// Core workflow type definitions
///
/// Defines workflows, nodes, the connection graph and the items that flow
/// between nodes. These types are serialized/deserialized from JSON so that a
/// persistence collaborator can store workflow definitions verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Name of the main connection type; the only one the engine walks
pub const MAIN_CONNECTION: &str = "main";

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-grading")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<Node>,
    /// Adjacency from source node name to its outgoing connections
    #[serde(default)]
    pub connections: Connections,
    /// Run behaviour and retention settings
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Data nodes may persist across runs (e.g. polling cursors)
    #[serde(default)]
    pub static_data: Map<String, Value>,
}

/// A single configured step in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable node identifier
    pub id: String,
    /// Unique (per workflow) display name; connections refer to nodes by name
    pub name: String,
    /// Registered node type name (e.g., "set", "filter", "manualTrigger")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Version of the node type the parameters were written for
    #[serde(default = "default_type_version")]
    pub type_version: u32,
    /// Canvas position `[x, y]`; drives deterministic ordering of branches
    #[serde(default)]
    pub position: [f64; 2],
    /// Disabled nodes are bypassed and forward their input unchanged
    #[serde(default)]
    pub disabled: bool,
    /// What the engine does when this node fails
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Raw parameters; strings starting with `=` are expressions
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn default_type_version() -> u32 {
    1
}

/// Error policy of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorPolicy {
    /// Abort the run on failure
    #[default]
    StopWorkflow,
    /// Emit the error as a regular item on output 0 and continue
    ContinueRegularOutput,
    /// Emit the error on the dedicated error output and continue
    ContinueErrorOutput,
}

impl Node {
    /// Whether failures are turned into output instead of aborting the run
    pub fn continue_on_fail(&self) -> bool {
        self.on_error != ErrorPolicy::StopWorkflow
    }
}

/// One endpoint of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Target node name
    pub node: String,
    /// Input port on the target node
    #[serde(default)]
    pub index: usize,
}

/// Output ports of one source node: port index -> ordered targets
pub type NodeConnections = Vec<Vec<ConnectionTarget>>;

/// Connection graph: source node name -> connection type -> output ports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Connections(pub HashMap<String, HashMap<String, NodeConnections>>);

impl Connections {
    /// Add a `main` connection from `source[output]` to `target[input]`
    pub fn connect(&mut self, source: &str, output: usize, target: &str, input: usize) {
        let ports = self
            .0
            .entry(source.to_string())
            .or_default()
            .entry(MAIN_CONNECTION.to_string())
            .or_default();
        if ports.len() <= output {
            ports.resize_with(output + 1, Vec::new);
        }
        ports[output].push(ConnectionTarget {
            node: target.to_string(),
            index: input,
        });
    }

    /// Main output ports of a node (empty slice if it has none)
    pub fn main_outputs(&self, source: &str) -> &[Vec<ConnectionTarget>] {
        self.0
            .get(source)
            .and_then(|types| types.get(MAIN_CONNECTION))
            .map(|ports| ports.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate every main connection as (source, output index, target)
    pub fn iter_main(&self) -> impl Iterator<Item = (&str, usize, &ConnectionTarget)> {
        self.0.iter().flat_map(|(source, types)| {
            types
                .get(MAIN_CONNECTION)
                .into_iter()
                .flat_map(move |ports| {
                    ports.iter().enumerate().flat_map(move |(output, targets)| {
                        targets
                            .iter()
                            .map(move |target| (source.as_str(), output, target))
                    })
                })
        })
    }
}

/// Retention choice for finished runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveDataPolicy {
    #[default]
    All,
    None,
}

/// Per-workflow run settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Keep successful runs
    #[serde(default)]
    pub save_data_success_execution: SaveDataPolicy,
    /// Keep failed runs
    #[serde(default)]
    pub save_data_error_execution: SaveDataPolicy,
    /// Workflow-level variables exposed to expressions as `$vars`
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Named binary attachment of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryData {
    /// Base64 payload or storage reference
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One unit of data flowing between nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Semantic payload
    pub json: Map<String, Value>,
    /// Named binary attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BTreeMap<String, BinaryData>>,
}

impl Item {
    /// Item with an empty payload
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; non-objects are stored under `value`
    pub fn from_json(value: Value) -> Self {
        let json = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { json, binary: None }
    }

    /// Serialize the item as a plain JSON object
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Ordered item list a node consumes or produces on one port
pub type NodeData = Vec<Item>;

/// Build a node list from raw JSON values (test and host convenience)
pub fn items_from_values(values: impl IntoIterator<Item = Value>) -> NodeData {
    values.into_iter().map(Item::from_json).collect()
}
