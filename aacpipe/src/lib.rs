//! # aacpipe - AAC encoding through an out-of-process worker
//!
//! The encoder itself runs in a separate worker process, possibly under a
//! compatibility layer, and talks to the host over its standard streams:
//!
//! - **request pipe** (worker stdin): settings, then PCM and control requests
//! - **data pipe** (worker stdout): settings echo, then packets and config
//! - **diagnostic pipe** (worker stderr): worker log, drained line by line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aacpipe::{AacEncoder, AudioInput, DiagnosticSink, HostConfig};
//!
//! # fn main() -> Result<(), aacpipe::PipeError> {
//! let config = HostConfig::from_file("aacpipe.json")?;
//! aacpipe::init_logging(&config.log)?;
//!
//! let input = AudioInput { sample_rate: 48_000, channels: 2 };
//! let mut encoder = AacEncoder::new("aac0", &config.encoder, &input, &config.worker, DiagnosticSink::Log)?;
//! if let Some(config) = encoder.extra_data()? {
//!     println!("AudioSpecificConfig: {:02x?}", config);
//! }
//! encoder.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod encoder;
pub mod supervisor;

pub use config::{AudioInput, EncoderConfig, HostConfig, WorkerConfig};
pub use encoder::{AacEncoder, EncodedPacket, EncoderSession};
pub use supervisor::{diagnostic_channel, WorkerProcess};

// Re-export protocol and diagnostics types for easy access
pub use aacpipe_core::{EncoderSettings, PipeError, PipeResult, SettingsFlags, PROTOCOL_VERSION};
pub use aacpipe_diagnostics::{init_logging, DiagnosticLine, DiagnosticSink, LogConfig};
