//! # aacpipe Diagnostics
//!
//! Logging setup shared by the host and the worker, and the drain that
//! carries a worker's stderr into the host.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod drain;
pub mod logging;

// Re-export main types
pub use drain::{DiagnosticDrain, DiagnosticLine, DiagnosticSink};
pub use logging::{init_logging, LogConfig, LOG_ENV_VAR};
