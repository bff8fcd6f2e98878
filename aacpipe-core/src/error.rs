//! Error types for the aacpipe protocol

use thiserror::Error;

/// Main error type for aacpipe protocol operations
#[derive(Error, Debug)]
pub enum PipeError {
    /// I/O error on one of the pipes
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Fewer bytes than a full record were available
    #[error("Short read of {record}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Record being read
        record: &'static str,
        /// Record width in bytes
        expected: usize,
        /// Bytes actually received before EOF
        actual: usize,
    },

    /// A record could not be written completely
    #[error("Short write of {record}: {reason}")]
    ShortWrite {
        /// Record being written
        record: &'static str,
        /// Reason for the failure
        reason: String,
    },

    /// Peer compiled against a differently-sized settings record
    #[error("struct_size mismatch: got {actual}, expected {expected}")]
    StructSizeMismatch {
        /// Local struct size
        expected: u32,
        /// Struct size announced by the peer
        actual: u32,
    },

    /// Peer speaks another protocol version
    #[error("Protocol version mismatch: got {actual}, expected {expected}")]
    VersionMismatch {
        /// Local protocol version
        expected: u32,
        /// Version announced by the peer
        actual: u32,
    },

    /// The echoed settings record differs from what was sent
    #[error("Echoed settings changed {field}: sent {sent}, received {received}")]
    EchoMismatch {
        /// Field that differs
        field: &'static str,
        /// Value sent by the host
        sent: u32,
        /// Value received back
        received: u32,
    },

    /// Payload larger than the framing limit
    #[error("Payload too large: {size} bytes exceeds maximum {max} bytes")]
    PayloadTooLarge {
        /// Announced payload size
        size: u32,
        /// Maximum accepted payload size
        max: u32,
    },

    /// Settings rejected before starting a session
    #[error("Invalid settings: {reason}")]
    InvalidSettings {
        /// Reason the settings were rejected
        reason: String,
    },

    /// Operation not valid in the current session state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// The session hit a fatal error earlier and can no longer be used
    #[error("Session {name} is no longer usable")]
    SessionFailed {
        /// Encoder name
        name: String,
    },

    /// Worker process could not be started
    #[error("Failed to start worker process {program}: {reason}")]
    WorkerSpawn {
        /// Program that failed to start
        program: String,
        /// Reason for the failure
        reason: String,
    },

    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },
}

/// Result type alias for protocol operations
pub type PipeResult<T> = Result<T, PipeError>;

impl PipeError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            PipeError::Io { .. } => "IO_ERROR",
            PipeError::ShortRead { .. } => "SHORT_READ",
            PipeError::ShortWrite { .. } => "SHORT_WRITE",
            PipeError::StructSizeMismatch { .. } => "STRUCT_SIZE_MISMATCH",
            PipeError::VersionMismatch { .. } => "VERSION_MISMATCH",
            PipeError::EchoMismatch { .. } => "ECHO_MISMATCH",
            PipeError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            PipeError::InvalidSettings { .. } => "INVALID_SETTINGS",
            PipeError::InvalidState { .. } => "INVALID_STATE",
            PipeError::SessionFailed { .. } => "SESSION_FAILED",
            PipeError::WorkerSpawn { .. } => "WORKER_SPAWN_FAILED",
            PipeError::Initialization { .. } => "INITIALIZATION_FAILED",
        }
    }

    /// Whether this is a framing or negotiation failure on the pipes
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PipeError::Io { .. }
                | PipeError::ShortRead { .. }
                | PipeError::ShortWrite { .. }
                | PipeError::StructSizeMismatch { .. }
                | PipeError::VersionMismatch { .. }
                | PipeError::EchoMismatch { .. }
                | PipeError::PayloadTooLarge { .. }
        )
    }
}
