//! One-shot settings handshake
//!
//! The host writes its `EncoderSettings` on the request pipe and blocks until
//! the worker echoes them back on the data pipe with `out_frames_per_packet`
//! filled in. The worker checks struct size and version before doing any
//! codec work.

use crate::error::{PipeError, PipeResult};
use crate::wire_format::{EncoderSettings, PROTOCOL_VERSION};
use std::io::{Read, Write};
use tracing::{debug, error};

/// Run the initiator side of the handshake
///
/// Returns the echoed settings, whose `out_frames_per_packet` is positive.
pub fn negotiate<W: Write, R: Read>(
    writer: &mut W,
    reader: &mut R,
    local: EncoderSettings,
) -> PipeResult<EncoderSettings> {
    let sent = EncoderSettings {
        struct_size: EncoderSettings::WIRE_SIZE as u32,
        version: PROTOCOL_VERSION,
        out_frames_per_packet: 0,
        ..local
    };

    sent.write_to(writer).map_err(|e| {
        error!("Failed to write encoder-settings to the worker: {}", e);
        e
    })?;

    let echoed = EncoderSettings::read_from(reader).map_err(|e| {
        error!("Failed to read encoder-settings from the worker: {}", e);
        e
    })?;

    verify_header(&echoed)?;
    verify_echo(&sent, &echoed)?;

    if echoed.out_frames_per_packet == 0 {
        return Err(PipeError::InvalidSettings {
            reason: "worker returned zero frames per packet".to_string(),
        });
    }

    debug!(
        "Settings negotiated: {} frames per packet",
        echoed.out_frames_per_packet
    );
    Ok(echoed)
}

/// Read and validate the initiator's settings on the responder side
///
/// Fails on struct size or version mismatch before the caller touches the
/// codec.
pub fn accept<R: Read>(reader: &mut R) -> PipeResult<EncoderSettings> {
    let settings = EncoderSettings::read_from(reader)?;
    verify_header(&settings)?;
    Ok(settings)
}

/// Echo the settings back with the chosen output block size
pub fn reply<W: Write>(
    writer: &mut W,
    settings: &EncoderSettings,
    out_frames_per_packet: u32,
) -> PipeResult<EncoderSettings> {
    let echoed = EncoderSettings {
        out_frames_per_packet,
        ..*settings
    };
    echoed.write_to(writer)?;
    Ok(echoed)
}

fn verify_header(settings: &EncoderSettings) -> PipeResult<()> {
    let expected = EncoderSettings::WIRE_SIZE as u32;
    if settings.struct_size != expected {
        return Err(PipeError::StructSizeMismatch {
            expected,
            actual: settings.struct_size,
        });
    }
    if settings.version != PROTOCOL_VERSION {
        return Err(PipeError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: settings.version,
        });
    }
    Ok(())
}

fn verify_echo(sent: &EncoderSettings, echoed: &EncoderSettings) -> PipeResult<()> {
    let fields = [
        ("bitrate", sent.bitrate_bps, echoed.bitrate_bps),
        ("channels", sent.channels, echoed.channels),
        ("samplerate_in", sent.samplerate_in, echoed.samplerate_in),
        ("samplerate_out", sent.samplerate_out, echoed.samplerate_out),
        ("flags", sent.flags.bits(), echoed.flags.bits()),
    ];

    for (field, sent, received) in fields {
        if sent != received {
            return Err(PipeError::EchoMismatch {
                field,
                sent,
                received,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_format::SettingsFlags;
    use bytes::BytesMut;
    use std::io::Cursor;

    fn echo_bytes(settings: &EncoderSettings) -> Vec<u8> {
        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_negotiate_returns_worker_block_size() {
        let local = EncoderSettings::new(128_000, 2, 48_000);
        let reply = EncoderSettings {
            out_frames_per_packet: 1024,
            ..local
        };

        let mut request = Vec::new();
        let mut data = Cursor::new(echo_bytes(&reply));
        let echoed = negotiate(&mut request, &mut data, local).unwrap();

        assert_eq!(echoed.out_frames_per_packet, 1024);
        assert_eq!(request, echo_bytes(&local));
    }

    #[test]
    fn test_negotiate_stamps_local_constants() {
        let mut local = EncoderSettings::new(96_000, 1, 44_100);
        local.struct_size = 0;
        local.version = 99;
        local.out_frames_per_packet = 7;

        let reply = EncoderSettings {
            out_frames_per_packet: 2048,
            ..EncoderSettings::new(96_000, 1, 44_100)
        };

        let mut request = Vec::new();
        let mut data = Cursor::new(echo_bytes(&reply));
        negotiate(&mut request, &mut data, local).unwrap();

        let sent = EncoderSettings::decode(&request).unwrap();
        assert_eq!(sent.struct_size, 32);
        assert_eq!(sent.version, PROTOCOL_VERSION);
        assert_eq!(sent.out_frames_per_packet, 0);
    }

    #[test]
    fn test_negotiate_rejects_version_mismatch_from_worker() {
        let local = EncoderSettings::new(128_000, 2, 48_000);
        let reply = EncoderSettings {
            version: PROTOCOL_VERSION + 1,
            out_frames_per_packet: 1024,
            ..local
        };

        let mut request = Vec::new();
        let mut data = Cursor::new(echo_bytes(&reply));
        assert!(matches!(
            negotiate(&mut request, &mut data, local),
            Err(PipeError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_negotiate_rejects_altered_echo() {
        let local = EncoderSettings::new(128_000, 2, 48_000).with_flags(SettingsFlags::ALLOW_HE_AAC);
        let reply = EncoderSettings {
            bitrate_bps: 64_000,
            out_frames_per_packet: 1024,
            ..local
        };

        let mut request = Vec::new();
        let mut data = Cursor::new(echo_bytes(&reply));
        match negotiate(&mut request, &mut data, local) {
            Err(PipeError::EchoMismatch { field, .. }) => assert_eq!(field, "bitrate"),
            other => panic!("Expected EchoMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_negotiate_rejects_zero_block_size() {
        let local = EncoderSettings::new(128_000, 2, 48_000);

        let mut request = Vec::new();
        let mut data = Cursor::new(echo_bytes(&local));
        assert!(matches!(
            negotiate(&mut request, &mut data, local),
            Err(PipeError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn test_negotiate_short_echo() {
        let local = EncoderSettings::new(128_000, 2, 48_000);

        let mut request = Vec::new();
        let mut data = Cursor::new(vec![0u8; 12]);
        assert!(matches!(
            negotiate(&mut request, &mut data, local),
            Err(PipeError::ShortRead { actual: 12, .. })
        ));
    }

    #[test]
    fn test_accept_rejects_struct_size_mismatch() {
        let mut settings = EncoderSettings::new(128_000, 2, 48_000);
        settings.struct_size = 28;

        let mut reader = Cursor::new(echo_bytes(&settings));
        assert!(matches!(
            accept(&mut reader),
            Err(PipeError::StructSizeMismatch {
                expected: 32,
                actual: 28
            })
        ));
    }

    #[test]
    fn test_reply_preserves_host_fields() {
        let settings = EncoderSettings::new(256_000, 6, 48_000).with_samplerate_out(44_100);

        let mut out = Vec::new();
        let echoed = reply(&mut out, &settings, 1024).unwrap();

        assert_eq!(echoed.out_frames_per_packet, 1024);
        assert_eq!(EncoderSettings::decode(&out).unwrap(), echoed);
        assert_eq!(
            EncoderSettings {
                out_frames_per_packet: 0,
                ..echoed
            },
            settings
        );
    }
}
