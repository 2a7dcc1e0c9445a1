/// Workflow Management Layer
///
/// This module handles workflow definitions and their persistence seam:
/// - Type definitions (Workflow, Node, Connections, Item)
/// - Petgraph index over the connection graph
/// - Workflow store collaborator with an in-memory implementation

// Core workflow type definitions
pub mod types;

// Connection graph index, parents and spatial ordering
pub mod graph;

// Persistence collaborator for workflow definitions
pub mod storage;

// Re-export commonly used types
pub use graph::{Inbound, WorkflowGraph};
pub use storage::{InMemoryWorkflowStore, StoreError, WorkflowStore};
pub use types::{
    items_from_values, BinaryData, ConnectionTarget, Connections, ErrorPolicy, Item, Node,
    NodeData, SaveDataPolicy, Workflow, WorkflowSettings, MAIN_CONNECTION,
};
