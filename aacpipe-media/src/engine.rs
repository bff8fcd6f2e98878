//! PCM accumulation engine
//!
//! Buffers interleaved float PCM until one codec block is available, drives
//! the converter's pull-model fill, and stamps produced packets with
//! priming-compensated timestamps.

use crate::converter::{
    AudioConverter, ConverterFactory, ConverterStatus, FormatId, InputBuffer, InputDataProc,
    RateControl, StreamFormat, CODEC_QUALITY_MAX,
};
use crate::error::{FormatAttempt, MediaError, MediaResult};
use crate::extradata;
use crate::layout;
use aacpipe_core::EncoderSettings;
use bytes::BytesMut;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Output buffer size used when the codec cannot report its packet size
pub const FALLBACK_OUTPUT_BUFFER_SIZE: usize = 32768;

/// Lifecycle of an encoding session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Settings not yet received
    Idle,
    /// Codec configured, accepting PCM
    Configured,
    /// Exit requested, no more PCM accepted
    Draining,
    /// Session over
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Idle => "idle",
            EngineState::Configured => "configured",
            EngineState::Draining => "draining",
            EngineState::Closed => "closed",
        })
    }
}

/// Candidate formats for `settings`, most efficient first
pub fn candidate_formats(settings: &EncoderSettings) -> &'static [FormatId] {
    static AAC_FORMATS: [FormatId; 3] = [
        FormatId::MPEG4_AAC_HE_V2,
        FormatId::MPEG4_AAC_HE,
        FormatId::MPEG4_AAC,
    ];
    static AAC_LC_FORMATS: [FormatId; 1] = [FormatId::MPEG4_AAC];

    if settings.allows_high_efficiency() && settings.channels != 3 {
        &AAC_FORMATS[..]
    } else {
        &AAC_LC_FORMATS[..]
    }
}

/// One packet produced by [`AacEngine::encode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedChunk<'a> {
    /// Compressed packet bytes
    pub data: &'a [u8],
    /// Presentation timestamp in input samples, priming removed
    pub pts: i64,
}

#[derive(Debug)]
enum SideBandConfig {
    Uninitialized,
    Cached(Vec<u8>),
}

/// AAC encoder state for one session
pub struct AacEngine {
    converter: Box<dyn AudioConverter>,
    state: EngineState,
    format: FormatId,
    bitrate: u32,
    channels: u32,
    samples_per_second: u32,
    output_samplerate: u32,

    in_frame_size: usize,
    in_bytes_required: usize,
    out_frames_per_packet: u32,

    priming_samples: i64,
    total_samples: i64,

    input_buffer: BytesMut,
    encode_buffer: BytesMut,
    output_buffer: Vec<u8>,

    side_band: SideBandConfig,
}

impl fmt::Debug for AacEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AacEngine")
            .field("state", &self.state)
            .field("format", &self.format)
            .field("bitrate", &self.bitrate)
            .field("channels", &self.channels)
            .field("in_bytes_required", &self.in_bytes_required)
            .field("out_frames_per_packet", &self.out_frames_per_packet)
            .field("total_samples", &self.total_samples)
            .field("buffered", &self.input_buffer.len())
            .finish()
    }
}

impl AacEngine {
    /// Create and configure a converter for `settings`
    pub fn configure(settings: &EncoderSettings, factory: &dyn ConverterFactory) -> MediaResult<Self> {
        let bitrate = settings.bitrate_bps;
        if bitrate == 0 {
            error!("Invalid bitrate specified");
            return Err(MediaError::InvalidConfiguration {
                message: "bitrate must be nonzero".to_string(),
            });
        }
        if settings.channels == 0 {
            error!("Invalid channel count specified");
            return Err(MediaError::InvalidConfiguration {
                message: "channel count must be nonzero".to_string(),
            });
        }
        if settings.samplerate_in == 0 {
            error!("Invalid input sample rate specified");
            return Err(MediaError::InvalidConfiguration {
                message: "input sample rate must be nonzero".to_string(),
            });
        }

        let channels = settings.channels;
        let output_samplerate = settings.output_samplerate();
        let input = StreamFormat::float_pcm(f64::from(settings.samplerate_in), channels);
        let rate_control = RateControl::Constant;

        let (mut converter, format) =
            create_converter(factory, settings, &input, f64::from(output_samplerate), rate_control)?;

        converter
            .set_codec_quality(CODEC_QUALITY_MAX)
            .map_err(MediaError::converter("AudioConverterSetProperty(CodecQuality)"))?;
        converter
            .set_encode_bitrate(bitrate)
            .map_err(MediaError::converter("AudioConverterSetProperty(EncodeBitRate)"))?;

        let input = converter
            .current_input_format()
            .map_err(MediaError::converter("AudioConverterGetProperty(CurrentInputStreamDescription)"))?;
        let output = converter
            .current_output_format()
            .map_err(MediaError::converter("AudioConverterGetProperty(CurrentOutputStreamDescription)"))?;
        let prime_info = converter
            .prime_info()
            .map_err(MediaError::converter("AudioConverterGetProperty(PrimeInfo)"))?;

        layout::apply_channel_remap(converter.as_mut(), channels);

        if input.frames_per_packet == 0
            || output.frames_per_packet == 0
            || output.frames_per_packet % input.frames_per_packet != 0
        {
            error!(
                "Output packet of {} frames is not a whole number of {}-frame input packets",
                output.frames_per_packet, input.frames_per_packet
            );
            return Err(MediaError::NonIntegralPushRatio {
                input_frames: input.frames_per_packet,
                output_frames: output.frames_per_packet,
            });
        }

        let in_frame_size = input.bytes_per_frame as usize;
        if in_frame_size == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "converter reports zero bytes per input frame".to_string(),
            });
        }
        let in_packets = (output.frames_per_packet / input.frames_per_packet) as usize;
        let in_bytes_required = in_packets * in_frame_size;

        let output_buffer_size = if output.bytes_per_packet != 0 {
            output.bytes_per_packet as usize
        } else {
            match converter.maximum_output_packet_size() {
                Ok(size) => size as usize,
                Err(status) => {
                    warn!("AudioConverterGetProperty(PacketSz) returned {}", status);
                    FALLBACK_OUTPUT_BUFFER_SIZE
                }
            }
        };

        let mut output_buffer = Vec::new();
        if output_buffer.try_reserve_exact(output_buffer_size).is_err() {
            error!("Failed to allocate output buffer");
            return Err(MediaError::MemoryAllocationFailed {
                size: output_buffer_size,
            });
        }
        output_buffer.resize(output_buffer_size, 0);

        info!(
            "settings:\n\tmode:          {}\n\tbitrate:       {} bps\n\tsample rate:   {}\n\tcbr:           {}\n\toutput buffer: {}",
            format.name(),
            bitrate,
            settings.samplerate_in,
            if rate_control == RateControl::Constant { "on" } else { "off" },
            output_buffer_size
        );

        Ok(Self {
            converter,
            state: EngineState::Configured,
            format,
            bitrate,
            channels,
            samples_per_second: settings.samplerate_in,
            output_samplerate,
            in_frame_size,
            in_bytes_required,
            out_frames_per_packet: output.frames_per_packet,
            priming_samples: i64::from(prime_info.leading_frames),
            total_samples: 0,
            input_buffer: BytesMut::with_capacity(in_bytes_required * 2),
            encode_buffer: BytesMut::with_capacity(in_bytes_required),
            output_buffer,
            side_band: SideBandConfig::Uninitialized,
        })
    }

    /// Append PCM and encode at most one packet
    ///
    /// Returns `Ok(None)` until enough input has accumulated or while the
    /// codec is still warming up.
    pub fn encode(&mut self, pcm: &[u8]) -> MediaResult<Option<EncodedChunk<'_>>> {
        self.expect_state(EngineState::Configured, "encode")?;

        if pcm.len() % self.in_frame_size != 0 {
            error!(
                "Received {} bytes, not a whole number of {}-byte frames",
                pcm.len(),
                self.in_frame_size
            );
            self.state = EngineState::Closed;
            return Err(MediaError::InvalidFrameData {
                frame_size: self.in_frame_size,
                actual: pcm.len(),
            });
        }

        self.input_buffer.extend_from_slice(pcm);
        if self.input_buffer.len() < self.in_bytes_required {
            return Ok(None);
        }

        let mut feeder = PullFeeder {
            pending: &mut self.input_buffer,
            chunk: &mut self.encode_buffer,
            required: self.in_bytes_required,
            frame_size: self.in_frame_size,
        };
        let outcome = self
            .converter
            .fill_complex_buffer(&mut feeder, &mut self.output_buffer);

        if !outcome.status.is_ok() && outcome.status != ConverterStatus::INPUT_STARVED {
            error!("AudioConverterFillComplexBuffer returned {}", outcome.status);
            self.state = EngineState::Closed;
            return Err(MediaError::Converter {
                operation: "AudioConverterFillComplexBuffer",
                status: outcome.status,
            });
        }

        let packet = match outcome.packet {
            Some(packet) => packet,
            None => return Ok(None),
        };

        let capacity = self.output_buffer.len();
        let range = usize::try_from(packet.start_offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(packet.data_byte_size as usize)?))
            .filter(|range| range.end <= capacity);
        let range = match range {
            Some(range) => range,
            None => {
                self.state = EngineState::Closed;
                return Err(MediaError::InvalidPacket {
                    offset: packet.start_offset,
                    size: packet.data_byte_size,
                    capacity,
                });
            }
        };

        let pts = self.total_samples - self.priming_samples;
        self.total_samples += (self.in_bytes_required / self.in_frame_size) as i64;

        Ok(Some(EncodedChunk {
            data: &self.output_buffer[range],
            pts,
        }))
    }

    /// AudioSpecificConfig for the session
    ///
    /// Queried from the codec on first use and cached once non-empty. An
    /// empty slice means the configuration is unavailable.
    pub fn extra_data(&mut self) -> MediaResult<&[u8]> {
        if self.state == EngineState::Closed {
            return Err(MediaError::InvalidState {
                message: "extra data requested on a closed session".to_string(),
            });
        }

        if let SideBandConfig::Uninitialized = self.side_band {
            let config = extradata::get_config(self.converter.as_ref());
            if config.is_empty() {
                return Ok(&[]);
            }
            debug!("Cached {} bytes of extra data", config.len());
            self.side_band = SideBandConfig::Cached(config);
        }

        match &self.side_band {
            SideBandConfig::Cached(config) => Ok(config.as_slice()),
            SideBandConfig::Uninitialized => Ok(&[]),
        }
    }

    /// Stop accepting PCM
    pub fn begin_drain(&mut self) -> MediaResult<()> {
        self.expect_state(EngineState::Configured, "drain")?;
        self.state = EngineState::Draining;
        if !self.input_buffer.is_empty() {
            debug!(
                "Discarding {} buffered bytes short of a codec block",
                self.input_buffer.len()
            );
        }
        Ok(())
    }

    /// End the session and release buffers
    pub fn close(&mut self) {
        self.state = EngineState::Closed;
        self.input_buffer.clear();
        self.encode_buffer.clear();
    }

    fn expect_state(&self, expected: EngineState, operation: &str) -> MediaResult<()> {
        if self.state != expected {
            return Err(MediaError::InvalidState {
                message: format!("{} requires {} state, engine is {}", operation, expected, self.state),
            });
        }
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Format selected during configuration
    pub fn format(&self) -> FormatId {
        self.format
    }

    /// Frames per output packet
    pub fn out_frames_per_packet(&self) -> u32 {
        self.out_frames_per_packet
    }

    /// Bytes gathered before each codec push
    pub fn in_bytes_required(&self) -> usize {
        self.in_bytes_required
    }

    /// Size of one interleaved input frame
    pub fn in_frame_size(&self) -> usize {
        self.in_frame_size
    }

    /// Codec priming in samples
    pub fn priming_samples(&self) -> i64 {
        self.priming_samples
    }

    /// Samples consumed by produced packets so far
    pub fn total_samples(&self) -> i64 {
        self.total_samples
    }

    /// Bytes buffered and not yet pushed to the codec
    pub fn buffered_len(&self) -> usize {
        self.input_buffer.len()
    }

    /// Size of the output buffer
    pub fn output_buffer_size(&self) -> usize {
        self.output_buffer.len()
    }

    /// Input sample rate
    pub fn samples_per_second(&self) -> u32 {
        self.samples_per_second
    }

    /// Output sample rate
    pub fn output_samplerate(&self) -> u32 {
        self.output_samplerate
    }
}

fn create_converter(
    factory: &dyn ConverterFactory,
    settings: &EncoderSettings,
    input: &StreamFormat,
    output_rate: f64,
    rate_control: RateControl,
) -> MediaResult<(Box<dyn AudioConverter>, FormatId)> {
    let bitrate = settings.bitrate_bps;
    let mut attempts = Vec::new();

    for &format in candidate_formats(settings) {
        debug!("Trying format {} ({:#x})", format, format.0);

        let output = StreamFormat::compressed(format, output_rate, settings.channels);
        let mut converter = match factory.create(input, &output) {
            Ok(converter) => converter,
            Err(status) => {
                attempts.push(FormatAttempt {
                    format,
                    failure: format!("AudioConverterNew returned {}", status),
                });
                continue;
            }
        };

        if let Err(status) = converter.set_rate_control(rate_control) {
            attempts.push(FormatAttempt {
                format,
                failure: format!("AudioConverterSetProperty(BitRateControlMode) returned {}", status),
            });
            continue;
        }

        let ranges = match converter.applicable_encode_bitrates() {
            Ok(ranges) => ranges,
            Err(status) => {
                attempts.push(FormatAttempt {
                    format,
                    failure: format!("AudioConverterGetProperty(ApplicableEncodeBitRates) returned {}", status),
                });
                continue;
            }
        };

        if !ranges.iter().any(|range| range.contains(bitrate)) {
            attempts.push(FormatAttempt {
                format,
                failure: format!("Encoder does not support bitrate {}", bitrate),
            });
            continue;
        }

        if !attempts.is_empty() {
            debug!("Encoder created after {} rejected format(s)", attempts.len());
        }
        return Ok((converter, format));
    }

    for attempt in &attempts {
        debug!("{}", attempt);
    }
    error!(
        "Could not create encoder for selected format{}",
        if attempts.len() == 1 { "" } else { "s" }
    );
    Err(MediaError::NoFormatAccepted { attempts })
}

struct PullFeeder<'a> {
    pending: &'a mut BytesMut,
    chunk: &'a mut BytesMut,
    required: usize,
    frame_size: usize,
}

impl InputDataProc for PullFeeder<'_> {
    fn next_input(&mut self) -> Result<InputBuffer<'_>, ConverterStatus> {
        if self.pending.len() < self.required {
            return Err(ConverterStatus::INPUT_STARVED);
        }

        *self.chunk = self.pending.split_to(self.required);
        Ok(InputBuffer {
            data: &self.chunk[..],
            packets: (self.required / self.frame_size) as u32,
        })
    }
}
