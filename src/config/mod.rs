/// Configuration management for the Stepway engine
///
/// Handles execution limits (script timeout, shutdown grace period, loop guard)
/// and logging defaults. Values come from environment variables with constant
/// fallbacks so hosts can tune the engine without code changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wall-clock budget for a single script evaluation
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 180;

/// Default grace period for draining in-flight runs on shutdown
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Default upper bound on engine loop iterations per run
pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Execution limits
    pub execution: ExecutionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Limits applied while executing workflow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Sandbox timeout per script evaluation, in seconds
    pub script_timeout_secs: u64,
    /// How long `shutdown` waits for outstanding runs, in seconds
    pub shutdown_grace_secs: u64,
    /// Maximum number of stack pops in one run before it is failed
    pub max_iterations: usize,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Env-filter directive (e.g. "info", "stepway=debug")
    pub level: String,
}

impl ExecutionConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: env_or("STEPWAY_SCRIPT_TIMEOUT_SECS", DEFAULT_SCRIPT_TIMEOUT_SECS),
            shutdown_grace_secs: env_or("STEPWAY_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS),
            max_iterations: env_or("STEPWAY_MAX_STACK_ITERATIONS", DEFAULT_MAX_ITERATIONS),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("STEPWAY_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Read a numeric environment variable, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(fallback)
}
