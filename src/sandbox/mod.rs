/// Script Sandbox
///
/// Runs one script fragment against an injected context inside an isolated
/// runtime instance. This module provides:
/// - The pluggable `ScriptRuntime` interface (initialize / inject / run / interrupt)
/// - The Lua runtime shipped with the crate
/// - A side timer thread that preempts scripts exceeding their budget
/// - Error and output normalisation shared by every runtime

use crate::config::ExecutionConfig;
use crate::workflow::types::{Item, NodeData};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Built-in helper functions ($if, $min, ...)
pub mod helpers;

// Lua runtime via mlua
pub mod lua;

// Error/output normalisation
pub mod normalize;

// Timeout timer thread
pub mod timer;

pub use helpers::{HelperFn, HelperSet};
pub use lua::LuaRuntime;
pub use timer::TimeoutTimer;

/// Errors produced while running a script
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SandboxError {
    /// Syntax, reference or thrown runtime error in user code
    #[error("{message} [line {line}]")]
    Script { message: String, line: u32 },

    /// The script exceeded its budget and was preempted
    #[error("Script execution timed out after {timeout:?} [line {line}]")]
    Timeout { timeout: Duration, line: u32 },

    /// The runtime observed its interrupt flag
    #[error("Script execution was interrupted [line {line}]")]
    Interrupted { line: u32 },

    /// All-items or per-item code returned something that is not items
    #[error("Code doesn't return items properly: {0}")]
    InvalidOutput(String),

    #[error("Sandbox setup failed: {0}")]
    Setup(String),
}

impl SandboxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }

    /// Line in user code the error is attributed to, if any
    pub fn line(&self) -> Option<u32> {
        match self {
            SandboxError::Script { line, .. }
            | SandboxError::Timeout { line, .. }
            | SandboxError::Interrupted { line } => Some(*line),
            _ => None,
        }
    }
}

/// How code is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A single expression is implicitly returned; statements also allowed
    Expression,
    /// A statement body that must `return` its result explicitly
    Statements,
}

/// Shared flag a timer (or host) raises to stop a running script
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Values injected into a runtime before code runs
///
/// Rebuilt per evaluation from the current execution context. Variables are
/// exposed as `$<name>`, helpers as `$<name>(...)`, node outputs through
/// `$("<node>")`.
#[derive(Debug, Clone)]
pub struct ScriptBindings<'a> {
    /// Zero-based index of the current item
    pub item_index: usize,
    /// Items of the node's first input
    pub items: &'a [Item],
    /// Last main output of every node that already ran
    pub node_outputs: BTreeMap<String, &'a [Item]>,
    /// Free variables (`workflow`, `execution`, `vars`, ...)
    pub variables: Map<String, Value>,
    pub helpers: &'a HelperSet,
}

impl<'a> ScriptBindings<'a> {
    pub fn new(items: &'a [Item], helpers: &'a HelperSet) -> Self {
        Self {
            item_index: 0,
            items,
            node_outputs: BTreeMap::new(),
            variables: Map::new(),
            helpers,
        }
    }

    pub fn with_item_index(mut self, item_index: usize) -> Self {
        self.item_index = item_index;
        self
    }

    pub fn with_node_output(mut self, node: &str, items: &'a [Item]) -> Self {
        self.node_outputs.insert(node.to_string(), items);
        self
    }

    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }
}

/// An embeddable interpreter
///
/// One instance serves exactly one evaluation; the driver creates a fresh
/// instance per call.
pub trait ScriptRuntime {
    fn initialize(&mut self) -> Result<(), SandboxError>;

    fn inject(&mut self, bindings: &ScriptBindings<'_>) -> Result<(), SandboxError>;

    fn run(&mut self, code: &str, mode: RunMode) -> Result<Value, SandboxError>;

    /// Handle the timeout timer uses to preempt `run`
    fn interrupt_handle(&self) -> InterruptHandle;

    fn interrupt(&self) {
        self.interrupt_handle().interrupt();
    }
}

/// Creates a runtime instance per evaluation
pub type RuntimeFactory = Arc<dyn Fn() -> Box<dyn ScriptRuntime> + Send + Sync>;

/// Sandbox driver: fresh runtime, bindings, timer, normalised result
#[derive(Clone)]
pub struct Sandbox {
    factory: RuntimeFactory,
    timeout: Duration,
    helpers: HelperSet,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("timeout", &self.timeout)
            .field("helpers", &self.helpers)
            .finish()
    }
}

impl Sandbox {
    /// Lua sandbox with the configured script timeout and default helpers
    pub fn new(config: &ExecutionConfig) -> Self {
        Self::with_runtime(
            Arc::new(|| Box::new(LuaRuntime::new()) as Box<dyn ScriptRuntime>),
            config.script_timeout(),
        )
    }

    pub fn with_runtime(factory: RuntimeFactory, timeout: Duration) -> Self {
        Self {
            factory,
            timeout,
            helpers: HelperSet::with_defaults(),
        }
    }

    pub fn with_helpers(mut self, helpers: HelperSet) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn helpers(&self) -> &HelperSet {
        &self.helpers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate a code fragment and return its value
    pub fn run_code(&self, bindings: &ScriptBindings<'_>, code: &str) -> Result<Value, SandboxError> {
        self.execute(bindings, code, RunMode::Expression, self.timeout)
    }

    /// `run_code` with a per-call budget
    pub fn run_code_with_timeout(
        &self,
        bindings: &ScriptBindings<'_>,
        code: &str,
        timeout: Duration,
    ) -> Result<Value, SandboxError> {
        self.execute(bindings, code, RunMode::Expression, timeout)
    }

    /// Run code once for all items; it must return items explicitly
    pub fn run_all_items(&self, bindings: &ScriptBindings<'_>, code: &str) -> Result<NodeData, SandboxError> {
        let value = self.execute(bindings, code, RunMode::Statements, self.timeout)?;
        normalize::items_from_output(value)
    }

    /// Run code for the item at `bindings.item_index`; it must return one object
    pub fn run_per_item(&self, bindings: &ScriptBindings<'_>, code: &str) -> Result<Item, SandboxError> {
        let value = self.execute(bindings, code, RunMode::Statements, self.timeout)?;
        normalize::item_from_output(value)
    }

    fn execute(
        &self,
        bindings: &ScriptBindings<'_>,
        code: &str,
        mode: RunMode,
        timeout: Duration,
    ) -> Result<Value, SandboxError> {
        let mut runtime = (self.factory)();
        runtime.initialize()?;
        runtime.inject(bindings)?;

        let timer = TimeoutTimer::start(timeout, runtime.interrupt_handle())?;
        let outcome = runtime.run(code, mode);
        let fired = timer.stop();

        match outcome {
            Ok(value) => Ok(value),
            Err(SandboxError::Interrupted { line }) => Err(SandboxError::Timeout { timeout, line }),
            Err(error) if fired => Err(SandboxError::Timeout {
                timeout,
                line: error.line().unwrap_or(1),
            }),
            Err(error) => {
                tracing::debug!("📜 Script failed: {}", error);
                Err(error)
            }
        }
    }
}
