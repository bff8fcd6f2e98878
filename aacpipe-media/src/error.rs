//! Media error types and handling
//!
//! Errors raised while configuring the codec, pushing PCM through it, or
//! extracting its side-band configuration.

use crate::converter::{ConverterStatus, FormatId};
use std::fmt;
use thiserror::Error;

/// Main error type for encoding engine operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// A converter call returned a failure status
    #[error("{operation} returned {status}")]
    Converter {
        /// Converter operation that failed
        operation: &'static str,
        /// Status it returned
        status: ConverterStatus,
    },

    /// None of the candidate formats accepted the requested settings
    #[error("Could not create encoder for selected format{}: {}", plural(.attempts), FormatAttempts(.attempts))]
    NoFormatAccepted {
        /// Every attempt made, in order
        attempts: Vec<FormatAttempt>,
    },

    /// Output block is not a whole number of input packets
    #[error("Output packet of {output_frames} frames is not a multiple of an input packet of {input_frames} frames")]
    NonIntegralPushRatio {
        /// Frames per input packet
        input_frames: u32,
        /// Frames per output packet
        output_frames: u32,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected a multiple of {frame_size} bytes, got {actual}")]
    InvalidFrameData {
        /// Size of one input frame
        frame_size: usize,
        /// Actual data size
        actual: usize,
    },

    /// Codec produced a packet outside the output buffer
    #[error("Packet of {size} bytes at offset {offset} exceeds output buffer of {capacity}")]
    InvalidPacket {
        /// Reported start offset
        offset: i64,
        /// Reported size
        size: u32,
        /// Output buffer capacity
        capacity: usize,
    },

    /// Memory allocation failed
    #[error("Memory allocation failed: {size} bytes")]
    MemoryAllocationFailed {
        /// Size that failed to allocate
        size: usize,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Converter { .. } => ErrorCategory::Codec,
            MediaError::NoFormatAccepted { .. } => ErrorCategory::Configuration,
            MediaError::NonIntegralPushRatio { .. } => ErrorCategory::Configuration,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Protocol,
            MediaError::InvalidPacket { .. } => ErrorCategory::Codec,
            MediaError::MemoryAllocationFailed { .. } => ErrorCategory::Resource,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::InvalidState { .. } => ErrorCategory::State,
        }
    }

    pub(crate) fn converter(operation: &'static str) -> impl FnOnce(ConverterStatus) -> Self {
        move |status| MediaError::Converter { operation, status }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed data from the peer
    Protocol,
    /// Configuration and parameter errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Memory and other resource errors
    Resource,
    /// State management errors
    State,
}

/// One failed attempt at creating an encoder for a candidate format
#[derive(Debug, Clone, PartialEq)]
pub struct FormatAttempt {
    /// Format that was tried
    pub format: FormatId,
    /// Why it was rejected
    pub failure: String,
}

impl fmt::Display for FormatAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.format.name(), self.format, self.failure)
    }
}

struct FormatAttempts<'a>(&'a [FormatAttempt]);

impl fmt::Display for FormatAttempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", attempt)?;
        }
        Ok(())
    }
}

fn plural(attempts: &[FormatAttempt]) -> &'static str {
    if attempts.len() == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let codec_error = MediaError::Converter {
            operation: "AudioConverterFillComplexBuffer",
            status: ConverterStatus::PARAM_ERROR,
        };
        assert_eq!(codec_error.category(), ErrorCategory::Codec);

        let frame_error = MediaError::InvalidFrameData {
            frame_size: 8,
            actual: 12,
        };
        assert_eq!(frame_error.category(), ErrorCategory::Protocol);

        let alloc_error = MediaError::MemoryAllocationFailed { size: 32768 };
        assert_eq!(alloc_error.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            frame_size: 8,
            actual: 12,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected a multiple of 8 bytes, got 12"
        );
    }

    #[test]
    fn test_no_format_accepted_lists_every_attempt() {
        let error = MediaError::NoFormatAccepted {
            attempts: vec![
                FormatAttempt {
                    format: FormatId::MPEG4_AAC_HE_V2,
                    failure: "bitrate 320000 not supported".to_string(),
                },
                FormatAttempt {
                    format: FormatId::MPEG4_AAC,
                    failure: "'fmt?'".to_string(),
                },
            ],
        };

        let message = error.to_string();
        assert!(message.starts_with("Could not create encoder for selected formats: "));
        assert!(message.contains("HE-AAC v2 ('aacp'): bitrate 320000 not supported"));
        assert!(message.contains("; AAC ('aac '): 'fmt?'"));
    }
}
