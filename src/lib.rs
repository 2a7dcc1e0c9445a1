/// Stepway: stack-based workflow automation core
///
/// This library provides the engine that runs node graphs: a stack-based
/// executor with joins and error policies, an expression evaluator backed by
/// a Lua sandbox, a condition/filter evaluator, a schema-driven parameter
/// resolver and a pluggable node registry with a set of built-in logic nodes.

// Core configuration and setup
pub mod config;

// Tracing subscriber installation
pub mod telemetry;

// Dynamic value helpers shared by the evaluators
pub mod value;

// Workflow definitions, graph index and definition storage
pub mod workflow;

// `={{ }}` expression evaluation over run data
pub mod expression;

// Sandboxed script execution (Lua)
pub mod sandbox;

// Typed condition operators and filter combination
pub mod filter;

// Parameter schemas, display rules and resolution
pub mod parameter;

// Node plugin contract and registry
pub mod node;

// Built-in logic nodes
pub mod nodes;

// Runtime execution engine, active executions and runner
pub mod runtime;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use node::{ExecutableNode, ExecuteContext, NodeCategory, NodeExecutionResult, NodeInput, NodeRegistry};
pub use runtime::{
    ActiveExecutions, ExecutionEngine, ExecutionMode, InMemoryExecutionStore, PersistenceHook, Run, RunStatus,
    WorkflowRunner,
};
pub use sandbox::Sandbox;
pub use workflow::{Item, Node, NodeData, Workflow};
