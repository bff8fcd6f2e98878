//! FFmpeg AAC backend
//!
//! Wraps FFmpeg's native AAC-LC encoder behind [`AudioConverter`]. The
//! encoder is opened once the bitrate is set, since FFmpeg fixes codec
//! parameters at open time. High-efficiency variants and sample rate
//! conversion are not available and are refused at creation.
//!
//! FFmpeg takes interleaved input in its native channel order, so the
//! channel map and layout properties are reported as unsupported.

use crate::converter::{
    AudioConverter, BitrateRange, ChannelLayoutTag, ConverterFactory, ConverterStatus,
    FillOutcome, FormatId, InputDataProc, PacketDescription, PrimeInfo, RateControl, StreamFormat,
};
use crate::extradata::EsDescriptorBuilder;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};
use tracing::{debug, error};

/// AAC frame size in samples per channel
pub const AAC_FRAME_SIZE: u32 = 1024;

/// AAC caps one channel at 6144 bits per frame
const MAX_BITS_PER_CHANNEL_FRAME: u32 = 6144;

const ENCODER_SAMPLE_FMT: Sample = Sample::F32(Type::Planar);

/// Check whether the FFmpeg build includes an AAC encoder
pub fn is_aac_encoder_available() -> bool {
    codec::encoder::find(codec::Id::AAC).is_some()
}

/// Creates FFmpeg-backed converters
#[derive(Debug)]
pub struct FfmpegFactory {
    _private: (),
}

impl FfmpegFactory {
    /// Initialise FFmpeg and check for an AAC encoder
    pub fn new() -> Result<Self, ffmpeg::Error> {
        ffmpeg::init()?;
        if !is_aac_encoder_available() {
            return Err(ffmpeg::Error::EncoderNotFound);
        }
        Ok(Self { _private: () })
    }
}

impl ConverterFactory for FfmpegFactory {
    fn create(
        &self,
        input: &StreamFormat,
        output: &StreamFormat,
    ) -> Result<Box<dyn AudioConverter>, ConverterStatus> {
        if input.format_id != FormatId::LINEAR_PCM || output.format_id != FormatId::MPEG4_AAC {
            debug!("FFmpeg backend cannot encode {} to {}", input.format_id, output.format_id);
            return Err(ConverterStatus::FORMAT_NOT_SUPPORTED);
        }
        if output.sample_rate != input.sample_rate {
            debug!(
                "FFmpeg backend cannot resample {} Hz to {} Hz",
                input.sample_rate, output.sample_rate
            );
            return Err(ConverterStatus::FORMAT_NOT_SUPPORTED);
        }
        if input.channels_per_frame == 0 || input.channels_per_frame > 8 {
            return Err(ConverterStatus::FORMAT_NOT_SUPPORTED);
        }

        let output = StreamFormat {
            frames_per_packet: AAC_FRAME_SIZE,
            bytes_per_packet: 0,
            ..*output
        };

        Ok(Box::new(FfmpegConverter {
            input: *input,
            output,
            bitrate: None,
            open: None,
        }))
    }
}

struct OpenEncoder {
    encoder: ffmpeg::encoder::Audio,
    frame: ffmpeg::util::frame::Audio,
    packet: ffmpeg::codec::packet::Packet,
    priming: u32,
    cookie: Vec<u8>,
    pts: i64,
}

/// FFmpeg AAC-LC encoder
pub struct FfmpegConverter {
    input: StreamFormat,
    output: StreamFormat,
    bitrate: Option<u32>,
    open: Option<OpenEncoder>,
}

// SAFETY: the codec context is owned exclusively and only used through &mut self.
unsafe impl Send for FfmpegConverter {}

impl FfmpegConverter {
    fn channels(&self) -> u32 {
        self.input.channels_per_frame
    }

    fn layout(&self) -> ChannelLayout {
        ChannelLayout::default(self.channels() as i32)
    }

    fn open_encoder(&self, bitrate: u32) -> Result<OpenEncoder, ConverterStatus> {
        let aac = codec::encoder::find(codec::Id::AAC).ok_or(ConverterStatus::FORMAT_NOT_SUPPORTED)?;
        let sample_rate = self.input.sample_rate as i32;

        let mut context = codec::Context::new_with_codec(aac);
        context.set_time_base(ffmpeg::Rational::new(1, sample_rate));

        let mut audio_enc = context.encoder().audio().map_err(status_from)?;
        audio_enc.set_rate(sample_rate);
        audio_enc.set_format(ENCODER_SAMPLE_FMT);
        audio_enc.set_channel_layout(self.layout());
        audio_enc.set_bit_rate(bitrate as usize);

        let encoder = audio_enc.open_as(aac).map_err(|e| {
            error!("Failed to open AAC encoder: {}", e);
            status_from(e)
        })?;

        let frame_size = match encoder.frame_size() as u32 {
            0 => AAC_FRAME_SIZE,
            n => n,
        };
        if frame_size != AAC_FRAME_SIZE {
            error!("Unexpected AAC frame size {}", frame_size);
            return Err(ConverterStatus::FORMAT_NOT_SUPPORTED);
        }

        let (priming, asc) = {
            let ctx: &codec::Context = &encoder;
            // SAFETY: the context is open and outlives this borrow; extradata
            // is owned by the context and valid for extradata_size bytes.
            unsafe {
                let raw = ctx.as_ptr();
                let priming = (*raw).initial_padding.max(0) as u32;
                let size = (*raw).extradata_size.max(0) as usize;
                let asc = if size == 0 || (*raw).extradata.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts((*raw).extradata as *const u8, size).to_vec()
                };
                (priming, asc)
            }
        };

        let cookie = if asc.is_empty() {
            Vec::new()
        } else {
            EsDescriptorBuilder::new()
                .buffer_size(self.max_packet_size())
                .bitrate(bitrate, bitrate)
                .build(&asc)
                .map_err(|_| ConverterStatus::BAD_PROPERTY_SIZE)?
        };

        let mut frame =
            ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FMT, frame_size as usize, self.layout());
        frame.set_rate(sample_rate as u32);

        Ok(OpenEncoder {
            encoder,
            frame,
            packet: ffmpeg::codec::packet::Packet::empty(),
            priming,
            cookie,
            pts: 0,
        })
    }

    fn max_packet_size(&self) -> u32 {
        MAX_BITS_PER_CHANNEL_FRAME / 8 * self.channels()
    }

    fn opened(&self) -> Result<&OpenEncoder, ConverterStatus> {
        self.open.as_ref().ok_or(ConverterStatus::OPERATION_NOT_SUPPORTED)
    }
}

impl AudioConverter for FfmpegConverter {
    fn set_rate_control(&mut self, mode: RateControl) -> Result<(), ConverterStatus> {
        match mode {
            RateControl::Constant => Ok(()),
            _ => Err(ConverterStatus::PROPERTY_NOT_SUPPORTED),
        }
    }

    fn applicable_encode_bitrates(&self) -> Result<Vec<BitrateRange>, ConverterStatus> {
        let ceiling = f64::from(MAX_BITS_PER_CHANNEL_FRAME) * self.input.sample_rate
            / f64::from(AAC_FRAME_SIZE)
            * f64::from(self.channels());
        Ok(vec![BitrateRange {
            minimum: 8_000.0 * f64::from(self.channels()),
            maximum: ceiling,
        }])
    }

    fn set_codec_quality(&mut self, _quality: u32) -> Result<(), ConverterStatus> {
        Ok(())
    }

    fn set_encode_bitrate(&mut self, bitrate: u32) -> Result<(), ConverterStatus> {
        if self.bitrate == Some(bitrate) && self.open.is_some() {
            return Ok(());
        }
        self.open = Some(self.open_encoder(bitrate)?);
        self.bitrate = Some(bitrate);
        Ok(())
    }

    fn current_input_format(&self) -> Result<StreamFormat, ConverterStatus> {
        Ok(self.input)
    }

    fn current_output_format(&self) -> Result<StreamFormat, ConverterStatus> {
        Ok(self.output)
    }

    fn prime_info(&self) -> Result<PrimeInfo, ConverterStatus> {
        let open = self.opened()?;
        Ok(PrimeInfo {
            leading_frames: open.priming,
            trailing_frames: 0,
        })
    }

    fn set_channel_map(&mut self, _map: &[i32]) -> Result<(), ConverterStatus> {
        Err(ConverterStatus::PROPERTY_NOT_SUPPORTED)
    }

    fn set_input_channel_layout(&mut self, _tag: ChannelLayoutTag) -> Result<(), ConverterStatus> {
        Err(ConverterStatus::PROPERTY_NOT_SUPPORTED)
    }

    fn set_output_channel_layout(&mut self, _tag: ChannelLayoutTag) -> Result<(), ConverterStatus> {
        Err(ConverterStatus::PROPERTY_NOT_SUPPORTED)
    }

    fn maximum_output_packet_size(&self) -> Result<u32, ConverterStatus> {
        Ok(self.max_packet_size())
    }

    fn magic_cookie_size(&self) -> Result<u32, ConverterStatus> {
        Ok(self.opened()?.cookie.len() as u32)
    }

    fn magic_cookie(&self, buf: &mut [u8]) -> Result<usize, ConverterStatus> {
        let cookie = &self.opened()?.cookie;
        let dst = buf
            .get_mut(..cookie.len())
            .ok_or(ConverterStatus::BAD_PROPERTY_SIZE)?;
        dst.copy_from_slice(cookie);
        Ok(cookie.len())
    }

    fn fill_complex_buffer(
        &mut self,
        input: &mut dyn InputDataProc,
        output: &mut [u8],
    ) -> FillOutcome {
        let channels = self.channels() as usize;
        let open = match self.open.as_mut() {
            Some(open) => open,
            None => return FillOutcome::empty(ConverterStatus::OPERATION_NOT_SUPPORTED),
        };

        loop {
            match open.encoder.receive_packet(&mut open.packet) {
                Ok(()) => {
                    let data = open.packet.data().unwrap_or(&[]);
                    if data.len() > output.len() {
                        return FillOutcome::empty(ConverterStatus::BAD_PROPERTY_SIZE);
                    }
                    output[..data.len()].copy_from_slice(data);
                    return FillOutcome {
                        status: ConverterStatus::OK,
                        packet: Some(PacketDescription {
                            start_offset: 0,
                            variable_frames: 0,
                            data_byte_size: data.len() as u32,
                        }),
                    };
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(e) => {
                    error!("AAC encoder receive_packet error: {}", e);
                    return FillOutcome::empty(status_from(e));
                }
            }

            let chunk = match input.next_input() {
                Ok(chunk) => chunk,
                Err(status) => return FillOutcome::empty(status),
            };

            let samples = open.frame.samples();
            if chunk.data.len() != samples * channels * 4 {
                return FillOutcome::empty(ConverterStatus::INVALID_INPUT_SIZE);
            }

            // interleaved f32 into one plane per channel
            for ch in 0..channels {
                let plane = open.frame.data_mut(ch);
                for (i, sample) in plane.chunks_exact_mut(4).take(samples).enumerate() {
                    let at = (i * channels + ch) * 4;
                    sample.copy_from_slice(&chunk.data[at..at + 4]);
                }
            }

            open.frame.set_pts(Some(open.pts));
            open.pts += samples as i64;

            if let Err(e) = open.encoder.send_frame(&open.frame) {
                error!("AAC encoder send_frame error: {}", e);
                return FillOutcome::empty(status_from(e));
            }
        }
    }
}

fn status_from(err: ffmpeg::Error) -> ConverterStatus {
    ConverterStatus(i32::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_high_efficiency() {
        let factory = match FfmpegFactory::new() {
            Ok(factory) => factory,
            Err(_) => return,
        };
        let input = StreamFormat::float_pcm(48_000.0, 2);
        let output = StreamFormat::compressed(FormatId::MPEG4_AAC_HE, 48_000.0, 2);
        assert_eq!(
            factory.create(&input, &output).err(),
            Some(ConverterStatus::FORMAT_NOT_SUPPORTED)
        );
    }

    #[test]
    fn test_bitrate_ceiling_scales_with_channels() {
        let factory = match FfmpegFactory::new() {
            Ok(factory) => factory,
            Err(_) => return,
        };
        let input = StreamFormat::float_pcm(48_000.0, 2);
        let output = StreamFormat::compressed(FormatId::MPEG4_AAC, 48_000.0, 2);
        let converter = factory.create(&input, &output).unwrap();

        let ranges = converter.applicable_encode_bitrates().unwrap();
        assert!(ranges[0].contains(128_000));
        assert!(ranges[0].contains(576_000));
        assert!(!ranges[0].contains(576_001));
    }
}
