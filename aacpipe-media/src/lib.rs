//! # aacpipe Media
//!
//! AAC encoding engine for the aacpipe worker. This crate holds the codec
//! capability boundary, the PCM accumulation engine that drives it, the
//! channel order fix-ups, and extraction of the AudioSpecificConfig from the
//! codec's magic cookie.

#![warn(clippy::all)]

pub mod backend;
pub mod converter;
pub mod engine;
pub mod error;
pub mod extradata;
pub mod layout;
pub mod testing;

// Re-export main types
pub use converter::{
    AudioConverter, BitrateRange, ChannelLayoutTag, ConverterFactory, ConverterStatus,
    FillOutcome, FormatId, InputBuffer, InputDataProc, PacketDescription, PrimeInfo, RateControl,
    StreamFormat,
};
pub use engine::{candidate_formats, AacEngine, EncodedChunk, EngineState};
pub use error::{ErrorCategory, FormatAttempt, MediaError, MediaResult};
pub use extradata::{get_config, parse_decoder_specific_info, parse_esds_box, EsDescriptorBuilder};
