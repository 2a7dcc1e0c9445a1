/// Petgraph-backed view of a workflow's connection graph
///
/// Builds a directed graph from the workflow definition once per run and
/// answers the questions the engine asks on every iteration: which node has
/// a given name, which connections feed it, and in which order newly ready
/// nodes must be pushed so execution is reproducible for a fixed layout.

use crate::workflow::types::{Node, Workflow};
use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One inbound main connection of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Source node name
    pub source: String,
    /// Output port on the source node
    pub output: usize,
    /// Input port on the receiving node
    pub input: usize,
}

/// Edge weight: (source output port, target input port)
type Port = (usize, usize);

/// Indexed workflow graph
#[derive(Debug)]
pub struct WorkflowGraph<'w> {
    workflow: &'w Workflow,
    graph: DiGraph<usize, Port>,
    /// Node name -> graph index
    name_to_index: HashMap<&'w str, NodeIndex>,
}

impl<'w> WorkflowGraph<'w> {
    /// Index the workflow and validate that every connection names a known node
    pub fn build(workflow: &'w Workflow) -> Result<Self> {
        tracing::debug!(
            "🏗️ Building workflow graph for '{}' with {} nodes",
            workflow.id,
            workflow.nodes.len()
        );

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (position, node) in workflow.nodes.iter().enumerate() {
            let index = graph.add_node(position);
            if name_to_index.insert(node.name.as_str(), index).is_some() {
                return Err(anyhow::anyhow!(
                    "Workflow '{}' contains duplicate node name: {}",
                    workflow.id,
                    node.name
                ));
            }
        }

        for (source, output, target) in workflow.connections.iter_main() {
            let from = name_to_index.get(source).ok_or_else(|| {
                anyhow::anyhow!("Connection references unknown node: {}", source)
            })?;
            let to = name_to_index.get(target.node.as_str()).ok_or_else(|| {
                anyhow::anyhow!("Connection references unknown node: {}", target.node)
            })?;
            graph.add_edge(*from, *to, (output, target.index));
            tracing::debug!("  🔗 {}[{}] → {}[{}]", source, output, target.node, target.index);
        }

        Ok(Self {
            workflow,
            graph,
            name_to_index,
        })
    }

    pub fn workflow(&self) -> &'w Workflow {
        self.workflow
    }

    /// Look up a node by its unique name
    pub fn node(&self, name: &str) -> Option<&'w Node> {
        let index = self.name_to_index.get(name)?;
        self.workflow.nodes.get(self.graph[*index])
    }

    /// Inbound main connections of a node, ordered by input port then source name
    pub fn inbound(&self, name: &str) -> Vec<Inbound> {
        let Some(index) = self.name_to_index.get(name) else {
            return Vec::new();
        };

        let mut inbound: Vec<Inbound> = self
            .graph
            .edges_directed(*index, Direction::Incoming)
            .filter_map(|edge| {
                let source = self.workflow.nodes.get(self.graph[edge.source()])?;
                let (output, input) = *edge.weight();
                Some(Inbound {
                    source: source.name.clone(),
                    output,
                    input,
                })
            })
            .collect();

        inbound.sort_by(|a, b| {
            a.input
                .cmp(&b.input)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.output.cmp(&b.output))
        });
        inbound
    }

    /// Whether the node has no inbound main connections
    pub fn is_root(&self, name: &str) -> bool {
        self.name_to_index
            .get(name)
            .map(|index| {
                self.graph
                    .neighbors_directed(*index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .unwrap_or(false)
    }

    /// Sort node names top-left to bottom-right (y first, then x, then name)
    pub fn sort_by_position(&self, names: &mut [String]) {
        names.sort_by(|a, b| self.compare_position(a, b));
    }

    /// Spatial comparison of two nodes by name; unknown nodes sort last
    pub fn compare_position(&self, a: &str, b: &str) -> Ordering {
        match (self.node(a), self.node(b)) {
            (Some(left), Some(right)) => compare_nodes(left, right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}

fn compare_nodes(a: &Node, b: &Node) -> Ordering {
    let [ax, ay] = a.position;
    let [bx, by] = b.position;
    ay.total_cmp(&by)
        .then_with(|| ax.total_cmp(&bx))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connections, ErrorPolicy, WorkflowSettings};
    use serde_json::Map;

    fn node(name: &str, x: f64, y: f64) -> Node {
        Node {
            id: name.to_lowercase(),
            name: name.to_string(),
            node_type: "noOp".to_string(),
            type_version: 1,
            position: [x, y],
            disabled: false,
            on_error: ErrorPolicy::StopWorkflow,
            parameters: Map::new(),
        }
    }

    fn workflow(nodes: Vec<Node>, connections: Connections) -> Workflow {
        Workflow {
            id: "wf".into(),
            name: "graph".into(),
            nodes,
            connections,
            settings: WorkflowSettings::default(),
            static_data: Map::new(),
        }
    }

    #[test]
    fn inbound_lists_every_parent_in_port_order() {
        let mut connections = Connections::default();
        connections.connect("B", 0, "Merge", 1);
        connections.connect("A", 0, "Merge", 0);
        let wf = workflow(
            vec![node("A", 0.0, 0.0), node("B", 0.0, 100.0), node("Merge", 200.0, 50.0)],
            connections,
        );

        let graph = WorkflowGraph::build(&wf).expect("valid graph");
        let inbound = graph.inbound("Merge");
        assert_eq!(inbound.len(), 2);
        assert_eq!(inbound[0].source, "A");
        assert_eq!(inbound[1].input, 1);
        assert!(graph.is_root("A"));
        assert!(!graph.is_root("Merge"));
    }

    #[test]
    fn unknown_connection_target_is_rejected() {
        let mut connections = Connections::default();
        connections.connect("A", 0, "Ghost", 0);
        let wf = workflow(vec![node("A", 0.0, 0.0)], connections);

        let err = WorkflowGraph::build(&wf).unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn spatial_order_is_top_left_first() {
        let wf = workflow(
            vec![
                node("Low", 0.0, 300.0),
                node("RightTop", 500.0, 0.0),
                node("LeftTop", 0.0, 0.0),
            ],
            Connections::default(),
        );
        let graph = WorkflowGraph::build(&wf).expect("valid graph");

        let mut names = vec!["Low".to_string(), "RightTop".to_string(), "LeftTop".to_string()];
        graph.sort_by_position(&mut names);
        assert_eq!(names, vec!["LeftTop", "RightTop", "Low"]);
    }
}
