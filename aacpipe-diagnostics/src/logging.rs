//! Structured logging setup

use aacpipe_core::{PipeError, PipeResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
pub const LOG_ENV_VAR: &str = "AACPIPE_LOG";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directives used when the environment variable is unset or invalid
    pub default_directives: String,
    /// Environment variable consulted for directives
    pub env_var: String,
    /// Emit ANSI colour codes
    pub ansi: bool,
    /// Include the event target
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directives: "info".to_string(),
            env_var: LOG_ENV_VAR.to_string(),
            ansi: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Configuration for the worker process, whose stderr is read by the host
    ///
    /// Targets are dropped since the host prefixes every line itself.
    pub fn worker() -> Self {
        Self {
            target: false,
            ..Self::default()
        }
    }

    /// Filter built from the environment, falling back to the defaults
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(&self.env_var)
            .unwrap_or_else(|_| EnvFilter::new(&self.default_directives))
    }
}

/// Install a global fmt subscriber writing to stderr
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> PipeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(config.target)
        .try_init()
        .map_err(|e| PipeError::Initialization {
            reason: format!("failed to install tracing subscriber: {}", e),
        })
}
