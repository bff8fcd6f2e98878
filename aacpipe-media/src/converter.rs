//! Codec capability boundary
//!
//! The encoder engine drives any codec through [`AudioConverter`], a
//! pull-model converter: the codec asks for input through an
//! [`InputDataProc`] callback while it fills one output packet. Converters
//! are created per candidate format by a [`ConverterFactory`].

use std::fmt;

/// Status code returned by converter operations
///
/// Zero is success. Positive codes made of four printable bytes are
/// four-character codes and render as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConverterStatus(pub i32);

impl ConverterStatus {
    /// Success
    pub const OK: Self = Self(0);
    /// The input callback has no more data for this fill
    pub const INPUT_STARVED: Self = Self(1);
    /// Feature not implemented by the codec
    pub const UNIMPLEMENTED: Self = Self(-4);
    /// Invalid parameter
    pub const PARAM_ERROR: Self = Self(-50);
    /// Out of memory
    pub const MEMORY_FULL: Self = Self(-108);
    /// Format not supported
    pub const FORMAT_NOT_SUPPORTED: Self = Self::fourcc(*b"fmt?");
    /// Property not supported
    pub const PROPERTY_NOT_SUPPORTED: Self = Self::fourcc(*b"prop");
    /// Property value has the wrong size
    pub const BAD_PROPERTY_SIZE: Self = Self::fourcc(*b"!siz");
    /// Operation not valid in the converter's current state
    pub const OPERATION_NOT_SUPPORTED: Self = Self::fourcc(*b"op??");
    /// Input buffer is too small or malformed
    pub const INVALID_INPUT_SIZE: Self = Self::fourcc(*b"insz");

    /// Build a status from a four-character code
    pub const fn fourcc(code: [u8; 4]) -> Self {
        Self(i32::from_be_bytes(code))
    }

    /// Whether this is the success code
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Readable name for the well-known codes
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::OK => "noErr",
            Self::INPUT_STARVED => "input starved",
            Self::UNIMPLEMENTED => "unimpErr",
            Self::PARAM_ERROR => "paramErr",
            Self::MEMORY_FULL => "memFullErr",
            Self::FORMAT_NOT_SUPPORTED => "kAudioConverterErr_FormatNotSupported",
            Self::PROPERTY_NOT_SUPPORTED => "kAudioConverterErr_PropertyNotSupported",
            Self::BAD_PROPERTY_SIZE => "kAudioConverterErr_BadPropertySizeError",
            Self::OPERATION_NOT_SUPPORTED => "kAudioConverterErr_OperationNotSupported",
            Self::INVALID_INPUT_SIZE => "kAudioConverterErr_InvalidInputSize",
            _ => return None,
        };
        Some(name)
    }

    fn printable_fourcc(self) -> Option<[u8; 4]> {
        let bytes = self.0.to_be_bytes();
        bytes
            .iter()
            .all(|b| b.is_ascii_graphic() || *b == b' ')
            .then_some(bytes)
    }
}

impl fmt::Display for ConverterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.printable_fourcc(), self.name()) {
            (Some(code), Some(name)) => {
                write!(f, "'{}' ({})", String::from_utf8_lossy(&code), name)
            }
            (Some(code), None) => write!(f, "'{}'", String::from_utf8_lossy(&code)),
            (None, Some(name)) => write!(f, "{} ({})", self.0, name),
            (None, None) => write!(f, "{}", self.0),
        }
    }
}

/// Audio format identifier, a four-character code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FormatId(pub u32);

impl FormatId {
    /// Linear PCM
    pub const LINEAR_PCM: Self = Self(u32::from_be_bytes(*b"lpcm"));
    /// AAC low complexity
    pub const MPEG4_AAC: Self = Self(u32::from_be_bytes(*b"aac "));
    /// High-efficiency AAC (SBR)
    pub const MPEG4_AAC_HE: Self = Self(u32::from_be_bytes(*b"aach"));
    /// High-efficiency AAC v2 (SBR + parametric stereo)
    pub const MPEG4_AAC_HE_V2: Self = Self(u32::from_be_bytes(*b"aacp"));

    /// Mode name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::LINEAR_PCM => "LPCM",
            Self::MPEG4_AAC => "AAC",
            Self::MPEG4_AAC_HE => "HE-AAC",
            Self::MPEG4_AAC_HE_V2 => "HE-AAC v2",
            _ => "unknown",
        }
    }

    /// Whether this is one of the high-efficiency variants
    pub fn is_high_efficiency(self) -> bool {
        self == Self::MPEG4_AAC_HE || self == Self::MPEG4_AAC_HE_V2
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", String::from_utf8_lossy(&self.0.to_be_bytes()))
    }
}

/// Linear PCM samples are floating point
pub const FORMAT_FLAG_IS_FLOAT: u32 = 1 << 0;
/// Linear PCM samples are big-endian
pub const FORMAT_FLAG_IS_BIG_ENDIAN: u32 = 1 << 1;
/// Linear PCM samples fill their channel width
pub const FORMAT_FLAG_IS_PACKED: u32 = 1 << 3;

/// Description of one side of a converter
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: f64,
    /// Format identifier
    pub format_id: FormatId,
    /// Format-specific flags
    pub format_flags: u32,
    /// Bytes per packet, 0 when variable
    pub bytes_per_packet: u32,
    /// Frames per packet
    pub frames_per_packet: u32,
    /// Bytes per frame, 0 for compressed formats
    pub bytes_per_frame: u32,
    /// Interleaved channels
    pub channels_per_frame: u32,
    /// Bits per channel sample, 0 for compressed formats
    pub bits_per_channel: u32,
}

impl StreamFormat {
    /// Packed native-endian 32-bit float PCM, one frame per packet
    pub fn float_pcm(sample_rate: f64, channels: u32) -> Self {
        let bytes_per_frame = std::mem::size_of::<f32>() as u32 * channels;
        let endian = if cfg!(target_endian = "big") {
            FORMAT_FLAG_IS_BIG_ENDIAN
        } else {
            0
        };

        Self {
            sample_rate,
            format_id: FormatId::LINEAR_PCM,
            format_flags: FORMAT_FLAG_IS_FLOAT | FORMAT_FLAG_IS_PACKED | endian,
            bytes_per_packet: bytes_per_frame,
            frames_per_packet: 1,
            bytes_per_frame,
            channels_per_frame: channels,
            bits_per_channel: 32,
        }
    }

    /// Compressed output; the factory fills in the packet geometry
    pub fn compressed(format_id: FormatId, sample_rate: f64, channels: u32) -> Self {
        Self {
            sample_rate,
            format_id,
            channels_per_frame: channels,
            ..Self::default()
        }
    }
}

/// Bitrate control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant bitrate
    Constant,
    /// Average bitrate over the long term
    LongTermAverage,
    /// Variable bitrate with a ceiling
    VariableConstrained,
    /// Unconstrained variable bitrate
    Variable,
}

impl fmt::Display for RateControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateControl::Constant => "CBR",
            RateControl::LongTermAverage => "ABR",
            RateControl::VariableConstrained => "constrained VBR",
            RateControl::Variable => "VBR",
        })
    }
}

/// Highest codec quality setting
pub const CODEC_QUALITY_MAX: u32 = 0x7F;

/// One advertised range of encode bitrates, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateRange {
    /// Lowest bitrate in bits per second
    pub minimum: f64,
    /// Highest bitrate in bits per second
    pub maximum: f64,
}

impl BitrateRange {
    /// Range holding exactly one bitrate
    pub fn discrete(bitrate: f64) -> Self {
        Self {
            minimum: bitrate,
            maximum: bitrate,
        }
    }

    /// Whether `bitrate` lies in the range
    pub fn contains(&self, bitrate: u32) -> bool {
        let bitrate = f64::from(bitrate);
        self.minimum <= bitrate && bitrate <= self.maximum
    }
}

/// Codec priming, in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimeInfo {
    /// Frames of lookahead at the start of the stream
    pub leading_frames: u32,
    /// Frames of padding at the end of the stream
    pub trailing_frames: u32,
}

/// Location of one produced packet inside the output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketDescription {
    /// Byte offset of the packet
    pub start_offset: i64,
    /// Frames in the packet when the format has a variable frame count
    pub variable_frames: u32,
    /// Packet size in bytes
    pub data_byte_size: u32,
}

/// Channel layout tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayoutTag(pub u32);

impl ChannelLayoutTag {
    /// 4.0 as C, L, R, Cs
    pub const MPEG_4_0_B: Self = Self((116 << 16) | 4);
}

/// One chunk handed to the converter by the input callback
#[derive(Debug, Clone, Copy)]
pub struct InputBuffer<'a> {
    /// Interleaved PCM bytes
    pub data: &'a [u8],
    /// Number of input packets in `data`
    pub packets: u32,
}

/// Input callback invoked by the converter during a fill
pub trait InputDataProc {
    /// Produce the next chunk of input
    ///
    /// Returns [`ConverterStatus::INPUT_STARVED`] when no more input is
    /// available for this fill. The chunk stays valid until the next call.
    fn next_input(&mut self) -> Result<InputBuffer<'_>, ConverterStatus>;
}

/// Result of one [`AudioConverter::fill_complex_buffer`] call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOutcome {
    /// Final status of the fill
    pub status: ConverterStatus,
    /// The packet produced, if any
    pub packet: Option<PacketDescription>,
}

impl FillOutcome {
    /// A fill that produced nothing
    pub fn empty(status: ConverterStatus) -> Self {
        Self {
            status,
            packet: None,
        }
    }
}

/// A configured codec instance converting PCM into compressed packets
pub trait AudioConverter: Send {
    /// Select the bitrate control mode
    fn set_rate_control(&mut self, mode: RateControl) -> Result<(), ConverterStatus>;

    /// Bitrate ranges the codec can encode at with the current settings
    fn applicable_encode_bitrates(&self) -> Result<Vec<BitrateRange>, ConverterStatus>;

    /// Set codec quality, up to [`CODEC_QUALITY_MAX`]
    fn set_codec_quality(&mut self, quality: u32) -> Result<(), ConverterStatus>;

    /// Set the target bitrate in bits per second
    fn set_encode_bitrate(&mut self, bitrate: u32) -> Result<(), ConverterStatus>;

    /// Input description as the codec currently sees it
    fn current_input_format(&self) -> Result<StreamFormat, ConverterStatus>;

    /// Output description as the codec currently sees it
    fn current_output_format(&self) -> Result<StreamFormat, ConverterStatus>;

    /// Codec priming
    fn prime_info(&self) -> Result<PrimeInfo, ConverterStatus>;

    /// Map input channels to codec channels
    fn set_channel_map(&mut self, map: &[i32]) -> Result<(), ConverterStatus>;

    /// Set the input channel layout
    fn set_input_channel_layout(&mut self, tag: ChannelLayoutTag) -> Result<(), ConverterStatus>;

    /// Set the output channel layout
    fn set_output_channel_layout(&mut self, tag: ChannelLayoutTag) -> Result<(), ConverterStatus>;

    /// Largest packet the codec can produce
    fn maximum_output_packet_size(&self) -> Result<u32, ConverterStatus>;

    /// Size of the magic cookie
    fn magic_cookie_size(&self) -> Result<u32, ConverterStatus>;

    /// Copy the magic cookie into `buf`, returning the bytes written
    fn magic_cookie(&self, buf: &mut [u8]) -> Result<usize, ConverterStatus>;

    /// Produce at most one packet into `output`, pulling input as needed
    fn fill_complex_buffer(
        &mut self,
        input: &mut dyn InputDataProc,
        output: &mut [u8],
    ) -> FillOutcome;
}

/// Creates converters for a given input/output pair
pub trait ConverterFactory {
    /// Create a converter
    ///
    /// `output` carries the format id, sample rate and channel count; the
    /// converter's [`AudioConverter::current_output_format`] reports the
    /// completed description.
    fn create(
        &self,
        input: &StreamFormat,
        output: &StreamFormat,
    ) -> Result<Box<dyn AudioConverter>, ConverterStatus>;
}
