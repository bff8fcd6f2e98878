//! # aacpipe Core
//!
//! Wire protocol shared by the host and the out-of-process AAC encoder
//! worker: fixed-layout records, message framing, and the one-shot settings
//! handshake that precedes every session.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handshake;
pub mod wire_format;

// Re-export main types
pub use error::{PipeError, PipeResult};
pub use handshake::{accept, negotiate, reply};
pub use wire_format::{
    read_payload, write_message, DataHeader, EncoderSettings, HeaderFlags, SettingsFlags,
    MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
