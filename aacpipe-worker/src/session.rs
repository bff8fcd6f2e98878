//! Worker session loop
//!
//! One session runs from the settings handshake until the host sets the exit
//! flag or hangs up. Requests are answered strictly in order; each flag of a
//! request header is handled on its own, encode first, then extra data, then
//! exit.

use aacpipe_core::wire_format::{read_payload, write_message};
use aacpipe_core::{accept, reply, DataHeader, EncoderSettings, HeaderFlags, PipeError};
use aacpipe_media::{AacEngine, ConverterFactory, EngineState, FormatId, MediaError};
use std::io::{Read, Write};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors ending a worker session
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Framing or pipe failure
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// Codec or engine failure
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Result type for worker sessions
pub type WorkerResult<T> = Result<T, WorkerError>;

/// What a finished session did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Settings as echoed to the host
    pub settings: EncoderSettings,
    /// Format the codec was created for
    pub format: FormatId,
    /// Request headers read after the handshake
    pub requests: u64,
    /// PCM bytes received
    pub pcm_bytes: u64,
    /// Packets written back
    pub packets: u64,
    /// Extra-data requests answered
    pub extra_data_requests: u64,
    /// Whether the host ended the session with the exit flag
    pub exit_requested: bool,
    /// Engine state after the loop
    pub final_state: EngineState,
}

impl SessionSummary {
    fn new(settings: EncoderSettings, format: FormatId) -> Self {
        Self {
            settings,
            format,
            requests: 0,
            pcm_bytes: 0,
            packets: 0,
            extra_data_requests: 0,
            exit_requested: false,
            final_state: EngineState::Configured,
        }
    }
}

/// Serve one encoding session
///
/// Settings with a foreign struct size or protocol version are rejected
/// before `factory` is consulted. A codec failure ends the session without a
/// response, so the host sees the data pipe close.
pub fn serve<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    factory: &dyn ConverterFactory,
) -> WorkerResult<SessionSummary> {
    let settings = accept(reader).map_err(|e| {
        error!("Failed to read settings from stdin: {}", e);
        e
    })?;

    let mut engine = AacEngine::configure(&settings, factory).map_err(|e| {
        error!("Failed to create the instance: {}", e);
        e
    })?;

    let echoed = reply(writer, &settings, engine.out_frames_per_packet()).map_err(|e| {
        error!("Failed to write settings to stdout: {}", e);
        e
    })?;

    let mut summary = SessionSummary::new(echoed, engine.format());
    let mut payload = Vec::new();

    loop {
        let header = match DataHeader::read_optional(reader)? {
            Some(header) => header,
            None => {
                warn!("Request pipe closed without exit flag");
                break;
            }
        };
        summary.requests += 1;

        read_payload(reader, &header, &mut payload).map_err(|e| {
            error!("Failed to read payload from stdin: {}", e);
            e
        })?;

        if header.flags.contains(HeaderFlags::ENCODE) {
            summary.pcm_bytes += payload.len() as u64;
            if respond_encode(&mut engine, &payload, writer)? {
                summary.packets += 1;
            }
        }

        if header.flags.contains(HeaderFlags::EXTRA_DATA) {
            summary.extra_data_requests += 1;
            respond_extra_data(&mut engine, writer)?;
        }

        if header.flags.contains(HeaderFlags::EXIT) {
            summary.exit_requested = true;
            engine.begin_drain()?;
            break;
        }
    }

    engine.close();
    summary.final_state = engine.state();

    info!(
        "Session ended after {} requests, {} packets",
        summary.requests, summary.packets
    );
    Ok(summary)
}

/// Encode `pcm` and write the response, returning whether it carried a packet
fn respond_encode<W: Write>(engine: &mut AacEngine, pcm: &[u8], writer: &mut W) -> WorkerResult<bool> {
    let produced = match engine.encode(pcm)? {
        Some(chunk) => {
            let header = DataHeader {
                size: chunk.data.len() as u32,
                frames: 1,
                pts: chunk.pts,
                flags: HeaderFlags::ENCODE,
            };
            write_message(writer, &header, chunk.data)?;
            true
        }
        None => {
            let header = DataHeader {
                size: 0,
                frames: 0,
                pts: 0,
                flags: HeaderFlags::ENCODE,
            };
            write_message(writer, &header, &[])?;
            false
        }
    };
    Ok(produced)
}

fn respond_extra_data<W: Write>(engine: &mut AacEngine, writer: &mut W) -> WorkerResult<()> {
    let config = engine.extra_data()?;
    if config.is_empty() {
        debug!("Extra data unavailable");
    }

    let header = DataHeader {
        size: config.len() as u32,
        frames: 0,
        pts: 0,
        flags: HeaderFlags::EXTRA_DATA,
    };
    write_message(writer, &header, config)?;
    Ok(())
}
