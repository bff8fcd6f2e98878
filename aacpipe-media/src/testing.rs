//! Scripted converter for tests
//!
//! [`MockFactory`] hands out [`MockConverter`]s that behave according to a
//! shared [`MockScript`] and record every call in a log the test can inspect
//! afterwards.
//!
//! Each produced packet contains the PCM bytes the converter consumed for it,
//! truncated to the output buffer, so tests can check byte order end to end.

use crate::converter::{
    AudioConverter, BitrateRange, ChannelLayoutTag, ConverterFactory, ConverterStatus,
    FillOutcome, FormatId, InputDataProc, PacketDescription, PrimeInfo, RateControl, StreamFormat,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded converter call
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Factory created (or refused) a converter for a format
    Create(FormatId),
    /// Rate control set
    RateControl(RateControl),
    /// Codec quality set
    Quality(u32),
    /// Encode bitrate set
    Bitrate(u32),
    /// Channel map set
    ChannelMap(Vec<i32>),
    /// Input channel layout set
    InputLayout(ChannelLayoutTag),
    /// Output channel layout set
    OutputLayout(ChannelLayoutTag),
    /// Magic cookie read
    MagicCookie,
    /// Fill invoked
    Fill,
}

/// Behaviour of converters created by a [`MockFactory`]
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Formats the factory refuses to create
    pub unsupported_formats: Vec<FormatId>,
    /// Bitrate ranges advertised by every converter
    pub bitrate_ranges: Vec<BitrateRange>,
    /// Frames per output packet
    pub out_frames_per_packet: u32,
    /// Frames per input packet reported back
    pub in_frames_per_packet: u32,
    /// Fixed bytes per output packet, 0 for variable
    pub out_bytes_per_packet: u32,
    /// Maximum output packet size query result
    pub max_packet_size: Result<u32, ConverterStatus>,
    /// Leading priming frames
    pub priming_frames: u32,
    /// Full input blocks swallowed before the first packet
    pub warmup_blocks: u32,
    /// Magic cookie, or the status its size query fails with
    pub magic_cookie: Result<Vec<u8>, ConverterStatus>,
    /// Status every channel property setter returns
    pub channel_property_status: ConverterStatus,
    /// Status every fill fails with, before pulling any input
    pub fill_failure: Option<ConverterStatus>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            unsupported_formats: Vec::new(),
            bitrate_ranges: vec![BitrateRange {
                minimum: 32_000.0,
                maximum: 320_000.0,
            }],
            out_frames_per_packet: 1024,
            in_frames_per_packet: 1,
            out_bytes_per_packet: 0,
            max_packet_size: Ok(1 << 16),
            priming_frames: 2112,
            warmup_blocks: 0,
            magic_cookie: Ok(Vec::new()),
            channel_property_status: ConverterStatus::OK,
            fill_failure: None,
        }
    }
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

/// Factory producing scripted converters
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    script: MockScript,
    calls: CallLog,
}

impl MockFactory {
    /// Factory with the default script
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory following `script`
    pub fn with_script(script: MockScript) -> Self {
        Self {
            script,
            calls: CallLog::default(),
        }
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of converter creation attempts
    pub fn create_attempts(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Create(_)))
    }

    /// Number of magic cookie reads
    pub fn cookie_reads(&self) -> usize {
        self.count(|call| matches!(call, MockCall::MagicCookie))
    }

    /// Number of fills
    pub fn fills(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Fill))
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }
}

impl ConverterFactory for MockFactory {
    fn create(
        &self,
        input: &StreamFormat,
        output: &StreamFormat,
    ) -> Result<Box<dyn AudioConverter>, ConverterStatus> {
        self.calls.lock().push(MockCall::Create(output.format_id));

        if self.script.unsupported_formats.contains(&output.format_id) {
            return Err(ConverterStatus::FORMAT_NOT_SUPPORTED);
        }

        let input = StreamFormat {
            frames_per_packet: self.script.in_frames_per_packet,
            ..*input
        };
        let output = StreamFormat {
            frames_per_packet: self.script.out_frames_per_packet,
            bytes_per_packet: self.script.out_bytes_per_packet,
            ..*output
        };

        Ok(Box::new(MockConverter {
            script: self.script.clone(),
            calls: Arc::clone(&self.calls),
            input,
            output,
            pending: Vec::new(),
            warmup_remaining: self.script.warmup_blocks,
        }))
    }
}

/// Scripted converter
#[derive(Debug)]
pub struct MockConverter {
    script: MockScript,
    calls: CallLog,
    input: StreamFormat,
    output: StreamFormat,
    pending: Vec<u8>,
    warmup_remaining: u32,
}

impl MockConverter {
    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn block_bytes(&self) -> usize {
        self.output.frames_per_packet as usize * self.input.bytes_per_frame as usize
    }
}

impl AudioConverter for MockConverter {
    fn set_rate_control(&mut self, mode: RateControl) -> Result<(), ConverterStatus> {
        self.record(MockCall::RateControl(mode));
        Ok(())
    }

    fn applicable_encode_bitrates(&self) -> Result<Vec<BitrateRange>, ConverterStatus> {
        Ok(self.script.bitrate_ranges.clone())
    }

    fn set_codec_quality(&mut self, quality: u32) -> Result<(), ConverterStatus> {
        self.record(MockCall::Quality(quality));
        Ok(())
    }

    fn set_encode_bitrate(&mut self, bitrate: u32) -> Result<(), ConverterStatus> {
        self.record(MockCall::Bitrate(bitrate));
        Ok(())
    }

    fn current_input_format(&self) -> Result<StreamFormat, ConverterStatus> {
        Ok(self.input)
    }

    fn current_output_format(&self) -> Result<StreamFormat, ConverterStatus> {
        Ok(self.output)
    }

    fn prime_info(&self) -> Result<PrimeInfo, ConverterStatus> {
        Ok(PrimeInfo {
            leading_frames: self.script.priming_frames,
            trailing_frames: 0,
        })
    }

    fn set_channel_map(&mut self, map: &[i32]) -> Result<(), ConverterStatus> {
        self.record(MockCall::ChannelMap(map.to_vec()));
        status_result(self.script.channel_property_status)
    }

    fn set_input_channel_layout(&mut self, tag: ChannelLayoutTag) -> Result<(), ConverterStatus> {
        self.record(MockCall::InputLayout(tag));
        status_result(self.script.channel_property_status)
    }

    fn set_output_channel_layout(&mut self, tag: ChannelLayoutTag) -> Result<(), ConverterStatus> {
        self.record(MockCall::OutputLayout(tag));
        status_result(self.script.channel_property_status)
    }

    fn maximum_output_packet_size(&self) -> Result<u32, ConverterStatus> {
        self.script.max_packet_size
    }

    fn magic_cookie_size(&self) -> Result<u32, ConverterStatus> {
        match &self.script.magic_cookie {
            Ok(cookie) => Ok(cookie.len() as u32),
            Err(status) => Err(*status),
        }
    }

    fn magic_cookie(&self, buf: &mut [u8]) -> Result<usize, ConverterStatus> {
        self.record(MockCall::MagicCookie);
        match &self.script.magic_cookie {
            Ok(cookie) if cookie.len() <= buf.len() => {
                buf[..cookie.len()].copy_from_slice(cookie);
                Ok(cookie.len())
            }
            Ok(_) => Err(ConverterStatus::BAD_PROPERTY_SIZE),
            Err(status) => Err(*status),
        }
    }

    fn fill_complex_buffer(
        &mut self,
        input: &mut dyn InputDataProc,
        output: &mut [u8],
    ) -> FillOutcome {
        self.record(MockCall::Fill);
        if let Some(status) = self.script.fill_failure {
            return FillOutcome::empty(status);
        }
        let block = self.block_bytes();

        loop {
            while self.pending.len() < block {
                match input.next_input() {
                    Ok(chunk) => self.pending.extend_from_slice(chunk.data),
                    Err(status) => return FillOutcome::empty(status),
                }
            }

            let consumed: Vec<u8> = self.pending.drain(..block).collect();
            if self.warmup_remaining > 0 {
                self.warmup_remaining -= 1;
                continue;
            }

            let size = consumed.len().min(output.len());
            output[..size].copy_from_slice(&consumed[..size]);

            return FillOutcome {
                status: ConverterStatus::OK,
                packet: Some(PacketDescription {
                    start_offset: 0,
                    variable_frames: 0,
                    data_byte_size: size as u32,
                }),
            };
        }
    }
}

fn status_result(status: ConverterStatus) -> Result<(), ConverterStatus> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(status)
    }
}
