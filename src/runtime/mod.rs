/// Runtime Execution Engine
///
/// This module runs workflows and tracks the runs in flight:
/// - Run data model (task records, execution stack, run status)
/// - Stack-based engine with joins, error policies and wait/resume
/// - Node dispatch, lifecycle hooks and execution persistence
/// - Active execution registry and the runner entry points

// Run data model shared by the engine, hooks and stores
pub mod data;

// Stack-based execution engine
pub mod engine;

// Individual node execution dispatch
pub mod executor;

// Lifecycle hooks around nodes and runs
pub mod hooks;

// Terminal status and retention rules
pub mod status;

// Execution record persistence and the persistence hook
pub mod store;

// Process-wide table of in-flight runs
pub mod active;

// Entry points for scheduling collaborators
pub mod runner;

// Re-export main types
pub use active::{ActiveExecutions, ExecutingWorkflowData, ExecutionFailure, ExecutionHandle, ProcessData};
pub use data::{
    ExecuteData, ExecutionMode, ExecutionState, Run, RunData, RunError, RunExecutionData, RunStatus, SourceRef,
    TaskData, TaskError, TaskStatus,
};
pub use engine::ExecutionEngine;
pub use executor::NodeExecutor;
pub use hooks::{ExecutionHooks, ExecutionLifecycleHook};
pub use runner::WorkflowRunner;
pub use status::{determine_status, needs_delete, RunFlags};
pub use store::{ExecutionRecord, ExecutionStore, InMemoryExecutionStore, PersistenceHook};
