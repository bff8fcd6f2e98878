//! aacpipe Wire Format Implementation
//!
//! Fixed-layout records exchanged between the host and the encoder worker:
//! - `EncoderSettings`, sent once in each direction during the handshake
//! - `DataHeader`, preceding every streamed message on both pipes
//!
//! All fields are little-endian and written in declaration order. Layouts do
//! not depend on the in-memory representation of the Rust structs.

use crate::error::{PipeError, PipeResult};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{ErrorKind, Read, Write};

/// Protocol version stamped into every settings record
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload accepted after a `DataHeader` (64 MiB)
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Feature flags carried in `EncoderSettings::flags`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SettingsFlags(u32);

impl SettingsFlags {
    /// Allow the high-efficiency AAC variants
    pub const ALLOW_HE_AAC: Self = Self(1 << 0);

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap raw bits as received from the wire
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear the bits of `other`
    pub fn set(&mut self, other: Self, enabled: bool) {
        if enabled {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

/// Operation flags carried in `DataHeader::flags`
///
/// Bits are independent: one message may request several operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct HeaderFlags(u32);

impl HeaderFlags {
    /// Encode the payload
    pub const ENCODE: Self = Self(1 << 1);
    /// Return the side-band codec configuration
    pub const EXTRA_DATA: Self = Self(1 << 2);
    /// End the session
    pub const EXIT: Self = Self(1 << 3);

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap raw bits as received from the wire
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for HeaderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Encoder parameters negotiated once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Width of this record as compiled by the sender
    pub struct_size: u32,
    /// Protocol version of the sender
    pub version: u32,
    /// Target bitrate in bits per second
    pub bitrate_bps: u32,
    /// Number of interleaved input channels
    pub channels: u32,
    /// Input sample rate in Hz
    pub samplerate_in: u32,
    /// Output sample rate in Hz, 0 to match the input
    pub samplerate_out: u32,
    /// Feature flags
    pub flags: SettingsFlags,
    /// Frames per output packet, filled in by the worker
    pub out_frames_per_packet: u32,
}

impl EncoderSettings {
    /// Encoded width in bytes
    pub const WIRE_SIZE: usize = 32;

    /// Create settings stamped with the local struct size and protocol version
    pub fn new(bitrate_bps: u32, channels: u32, samplerate_in: u32) -> Self {
        Self {
            struct_size: Self::WIRE_SIZE as u32,
            version: PROTOCOL_VERSION,
            bitrate_bps,
            channels,
            samplerate_in,
            samplerate_out: 0,
            flags: SettingsFlags::empty(),
            out_frames_per_packet: 0,
        }
    }

    /// Request a specific output sample rate
    pub fn with_samplerate_out(mut self, samplerate_out: u32) -> Self {
        self.samplerate_out = samplerate_out;
        self
    }

    /// Replace the feature flags
    pub fn with_flags(mut self, flags: SettingsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Effective output sample rate
    pub fn output_samplerate(&self) -> u32 {
        if self.samplerate_out == 0 {
            self.samplerate_in
        } else {
            self.samplerate_out
        }
    }

    /// Whether the high-efficiency variants may be used
    pub fn allows_high_efficiency(&self) -> bool {
        self.flags.contains(SettingsFlags::ALLOW_HE_AAC)
    }

    /// Encode into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_SIZE);
        buf.put_u32_le(self.struct_size);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.bitrate_bps);
        buf.put_u32_le(self.channels);
        buf.put_u32_le(self.samplerate_in);
        buf.put_u32_le(self.samplerate_out);
        buf.put_u32_le(self.flags.bits());
        buf.put_u32_le(self.out_frames_per_packet);
    }

    /// Decode from exactly one record's worth of bytes
    pub fn decode(data: &[u8]) -> PipeResult<Self> {
        if data.len() < Self::WIRE_SIZE {
            return Err(PipeError::ShortRead {
                record: "EncoderSettings",
                expected: Self::WIRE_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = &data[..Self::WIRE_SIZE];
        Ok(Self {
            struct_size: buf.get_u32_le(),
            version: buf.get_u32_le(),
            bitrate_bps: buf.get_u32_le(),
            channels: buf.get_u32_le(),
            samplerate_in: buf.get_u32_le(),
            samplerate_out: buf.get_u32_le(),
            flags: SettingsFlags::from_bits(buf.get_u32_le()),
            out_frames_per_packet: buf.get_u32_le(),
        })
    }

    /// Read one full record
    pub fn read_from<R: Read>(reader: &mut R) -> PipeResult<Self> {
        let mut raw = [0u8; Self::WIRE_SIZE];
        let n = read_record(reader, &mut raw)?;
        if n < Self::WIRE_SIZE {
            return Err(PipeError::ShortRead {
                record: "EncoderSettings",
                expected: Self::WIRE_SIZE,
                actual: n,
            });
        }
        Self::decode(&raw)
    }

    /// Write one full record and flush
    pub fn write_to<W: Write>(&self, writer: &mut W) -> PipeResult<()> {
        let mut buf = BytesMut::with_capacity(Self::WIRE_SIZE);
        self.encode(&mut buf);
        write_record(writer, &buf, "EncoderSettings")?;
        writer.flush()?;
        Ok(())
    }
}

/// Header preceding every streamed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataHeader {
    /// Payload size in bytes
    pub size: u32,
    /// Frame count
    pub frames: u32,
    /// Presentation timestamp in sample-clock units
    pub pts: i64,
    /// Operation flags
    pub flags: HeaderFlags,
}

impl DataHeader {
    /// Encoded width in bytes: 20 bytes of fields and 4 reserved zero bytes
    pub const WIRE_SIZE: usize = 24;

    /// Request encoding of `size` bytes of PCM
    pub fn encode_request(size: u32, frames: u32, pts: i64) -> Self {
        Self {
            size,
            frames,
            pts,
            flags: HeaderFlags::ENCODE,
        }
    }

    /// Request the side-band codec configuration
    pub fn extra_data_request() -> Self {
        Self {
            flags: HeaderFlags::EXTRA_DATA,
            ..Self::default()
        }
    }

    /// End the session
    pub fn exit() -> Self {
        Self {
            flags: HeaderFlags::EXIT,
            ..Self::default()
        }
    }

    /// Payload length as a buffer length
    pub fn payload_len(&self) -> usize {
        self.size as usize
    }

    /// Encode into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_SIZE);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.frames);
        buf.put_i64_le(self.pts);
        buf.put_u32_le(self.flags.bits());
        buf.put_u32_le(0);
    }

    /// Decode from exactly one record's worth of bytes
    pub fn decode(data: &[u8]) -> PipeResult<Self> {
        if data.len() < Self::WIRE_SIZE {
            return Err(PipeError::ShortRead {
                record: "DataHeader",
                expected: Self::WIRE_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = &data[..Self::WIRE_SIZE];
        let header = Self {
            size: buf.get_u32_le(),
            frames: buf.get_u32_le(),
            pts: buf.get_i64_le(),
            flags: HeaderFlags::from_bits(buf.get_u32_le()),
        };

        if header.size > MAX_PAYLOAD_SIZE {
            return Err(PipeError::PayloadTooLarge {
                size: header.size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(header)
    }

    /// Read one full header; EOF at any point is a framing error
    pub fn read_from<R: Read>(reader: &mut R) -> PipeResult<Self> {
        match Self::read_optional(reader)? {
            Some(header) => Ok(header),
            None => Err(PipeError::ShortRead {
                record: "DataHeader",
                expected: Self::WIRE_SIZE,
                actual: 0,
            }),
        }
    }

    /// Read one full header, returning `None` on EOF before its first byte
    pub fn read_optional<R: Read>(reader: &mut R) -> PipeResult<Option<Self>> {
        let mut raw = [0u8; Self::WIRE_SIZE];
        let n = read_record(reader, &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        if n < Self::WIRE_SIZE {
            return Err(PipeError::ShortRead {
                record: "DataHeader",
                expected: Self::WIRE_SIZE,
                actual: n,
            });
        }
        Self::decode(&raw).map(Some)
    }
}

/// Write a header followed by its payload, then flush
pub fn write_message<W: Write>(writer: &mut W, header: &DataHeader, payload: &[u8]) -> PipeResult<()> {
    if payload.len() != header.payload_len() {
        return Err(PipeError::ShortWrite {
            record: "payload",
            reason: format!(
                "header announces {} bytes but payload has {}",
                header.size,
                payload.len()
            ),
        });
    }

    let mut buf = BytesMut::with_capacity(DataHeader::WIRE_SIZE);
    header.encode(&mut buf);
    write_record(writer, &buf, "DataHeader")?;
    if !payload.is_empty() {
        write_record(writer, payload, "payload")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the payload announced by `header` into `buf`
pub fn read_payload<R: Read>(reader: &mut R, header: &DataHeader, buf: &mut Vec<u8>) -> PipeResult<()> {
    buf.clear();
    buf.resize(header.payload_len(), 0);
    if buf.is_empty() {
        return Ok(());
    }

    let n = read_record(reader, buf)?;
    if n < buf.len() {
        return Err(PipeError::ShortRead {
            record: "payload",
            expected: buf.len(),
            actual: n,
        });
    }
    Ok(())
}

/// Fill `buf` from `reader`, returning the bytes read before EOF
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8]) -> PipeResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn write_record<W: Write>(writer: &mut W, data: &[u8], record: &'static str) -> PipeResult<()> {
    writer.write_all(data).map_err(|e| match e.kind() {
        ErrorKind::WriteZero => PipeError::ShortWrite {
            record,
            reason: e.to_string(),
        },
        _ => PipeError::Io { source: e },
    })
}
