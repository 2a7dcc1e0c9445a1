/// Hot-swappable node registry using ArcSwap
///
/// Maps a node type name to its implementation. Reads are lock-free; each
/// registration swaps the whole map so runs already in flight keep the
/// implementations they started with. Hosts construct one registry and pass
/// it to the engine and resolver explicitly.

use crate::node::{ExecutableNode, NodeCategory};
use crate::parameter::NodeSpec;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type NodeMap = HashMap<String, Arc<dyn ExecutableNode>>;

pub struct NodeRegistry {
    /// Key: node type name
    nodes: ArcSwap<NodeMap>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            nodes: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Registry preloaded with the built-in logic nodes
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::nodes::register_builtin(&registry);
        registry
    }

    /// Add or replace a node type; returns the replaced implementation
    pub fn register(&self, node: Arc<dyn ExecutableNode>) -> Option<Arc<dyn ExecutableNode>> {
        let name = node.name().to_string();
        let previous = self.get(&name);

        self.nodes.rcu(|current| {
            let mut updated = NodeMap::clone(current);
            updated.insert(name.clone(), node.clone());
            updated
        });

        tracing::debug!("🧩 Registered node type: {}", name);
        previous
    }

    /// Remove a node type; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        if self.get(name).is_none() {
            return false;
        }
        self.nodes.rcu(|current| {
            let mut updated = NodeMap::clone(current);
            updated.remove(name);
            updated
        });
        tracing::debug!("🧩 Unregistered node type: {}", name);
        true
    }

    /// Implementation of a node type (lock-free read)
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.nodes.load().get(name).cloned()
    }

    /// Declared parameter schema of a node type
    pub fn spec(&self, name: &str) -> Option<Arc<NodeSpec>> {
        self.get(name).map(|node| node.default_spec())
    }

    pub fn category(&self, name: &str) -> Option<NodeCategory> {
        self.get(name).map(|node| node.category())
    }

    /// Registered type names, sorted
    pub fn list_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }
}
