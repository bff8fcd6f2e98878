//! Host-side AAC encoder
//!
//! [`EncoderSession`] is the protocol client, usable over any pair of byte
//! streams. [`AacEncoder`] binds a session to a worker process started from
//! a [`WorkerConfig`].
//!
//! ```rust,no_run
//! use aacpipe::{AacEncoder, AudioInput, DiagnosticSink, EncoderConfig, WorkerConfig};
//!
//! # fn main() -> Result<(), aacpipe::PipeError> {
//! let input = AudioInput { sample_rate: 48_000, channels: 2 };
//! let worker = WorkerConfig::new("aacpipe-worker.exe").with_launcher("wine");
//! let mut encoder = AacEncoder::new("aac0", &EncoderConfig::default(), &input, &worker, DiagnosticSink::Log)?;
//!
//! let silence = vec![0.0f32; encoder.frame_size() as usize * 2];
//! if let Some(packet) = encoder.encode_samples(&silence, 0)? {
//!     println!("{} bytes at pts {}", packet.data.len(), packet.pts);
//! }
//! encoder.shutdown()?;
//! # Ok(())
//! # }
//! ```

use crate::config::{AudioInput, EncoderConfig, WorkerConfig};
use crate::supervisor::WorkerProcess;
use aacpipe_core::{
    negotiate, read_payload, write_message, DataHeader, EncoderSettings, HeaderFlags, PipeError,
    PipeResult, MAX_PAYLOAD_SIZE,
};
use aacpipe_diagnostics::DiagnosticSink;
use std::io::{BufReader, BufWriter, Read, Write};
use std::process::{ChildStdin, ChildStdout, ExitStatus};
use tracing::{debug, error};

/// One encoded AAC packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Raw AAC access unit
    pub data: Vec<u8>,
    /// Presentation timestamp in `timebase` units
    pub pts: i64,
    /// Decode timestamp, equal to `pts`
    pub dts: i64,
    /// Timebase as numerator and denominator
    pub timebase: (u32, u32),
    /// Every AAC packet is independently decodable
    pub keyframe: bool,
}

/// Protocol client for one encoding session
#[derive(Debug)]
pub struct EncoderSession<W: Write, R: Read> {
    name: String,
    writer: W,
    reader: R,
    settings: EncoderSettings,
    extra_data: Vec<u8>,
    response: Vec<u8>,
    failed: bool,
    finished: bool,
}

impl<W: Write, R: Read> EncoderSession<W, R> {
    /// Send `settings` and wait for the worker's echo
    pub fn negotiate(name: impl Into<String>, mut writer: W, mut reader: R, settings: EncoderSettings) -> PipeResult<Self> {
        let name = name.into();
        let settings = negotiate(&mut writer, &mut reader, settings).map_err(|e| {
            error!("[{}] handshake failed: {}", name, e);
            e
        })?;

        debug!(
            "[{}] worker encodes {} frames per packet",
            name, settings.out_frames_per_packet
        );

        Ok(Self {
            name,
            writer,
            reader,
            settings,
            extra_data: Vec::new(),
            response: Vec::new(),
            failed: false,
            finished: false,
        })
    }

    /// Encoder name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings as echoed by the worker
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Frames per AAC packet
    pub fn frame_size(&self) -> u32 {
        self.settings.out_frames_per_packet
    }

    /// Sample rate of the encoded stream
    pub fn output_samplerate(&self) -> u32 {
        self.settings.output_samplerate()
    }

    /// Timebase of packet timestamps
    pub fn timebase(&self) -> (u32, u32) {
        (1, self.settings.samplerate_in)
    }

    /// Whether an earlier call failed
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Send interleaved float PCM and return the packet produced, if any
    pub fn encode(&mut self, pcm: &[u8], pts: i64) -> PipeResult<Option<EncodedPacket>> {
        self.check_usable()?;
        let result = self.exchange_encode(pcm, pts);
        self.latch(result)
    }

    /// Encode samples given as interleaved `f32`
    pub fn encode_samples(&mut self, samples: &[f32], pts: i64) -> PipeResult<Option<EncodedPacket>> {
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        self.encode(&pcm, pts)
    }

    /// AudioSpecificConfig of the stream
    ///
    /// Queried from the worker until it returns something, then served from
    /// the session cache. `None` when the worker has no configuration.
    pub fn extra_data(&mut self) -> PipeResult<Option<&[u8]>> {
        self.check_usable()?;
        if self.extra_data.is_empty() {
            let result = self.exchange_extra_data();
            self.latch(result)?;
        }

        if self.extra_data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.extra_data.as_slice()))
        }
    }

    /// Ask the worker to end the session
    pub fn finish(&mut self) -> PipeResult<()> {
        self.check_usable()?;
        let result = write_message(&mut self.writer, &DataHeader::exit(), &[]);
        self.latch(result)?;
        self.finished = true;
        Ok(())
    }

    fn exchange_encode(&mut self, pcm: &[u8], pts: i64) -> PipeResult<Option<EncodedPacket>> {
        if pcm.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(PipeError::PayloadTooLarge {
                size: u32::try_from(pcm.len()).unwrap_or(u32::MAX),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let request = DataHeader::encode_request(pcm.len() as u32, 1, pts);
        write_message(&mut self.writer, &request, pcm)?;

        let header = self.read_response(HeaderFlags::ENCODE)?;
        if header.size == 0 {
            return Ok(None);
        }

        Ok(Some(EncodedPacket {
            data: self.response.clone(),
            pts: header.pts,
            dts: header.pts,
            timebase: self.timebase(),
            keyframe: true,
        }))
    }

    fn exchange_extra_data(&mut self) -> PipeResult<()> {
        write_message(&mut self.writer, &DataHeader::extra_data_request(), &[])?;
        self.read_response(HeaderFlags::EXTRA_DATA)?;
        if !self.response.is_empty() {
            debug!("[{}] got {} bytes of extra data", self.name, self.response.len());
            self.extra_data = std::mem::take(&mut self.response);
        }
        Ok(())
    }

    /// Read one response header and its payload into `self.response`
    fn read_response(&mut self, expected: HeaderFlags) -> PipeResult<DataHeader> {
        let header = DataHeader::read_from(&mut self.reader)?;
        if !header.flags.contains(expected) {
            return Err(PipeError::InvalidState {
                expected: format!("response flags {:#x}", expected.bits()),
                actual: format!("{:#x}", header.flags.bits()),
            });
        }
        read_payload(&mut self.reader, &header, &mut self.response)?;
        Ok(header)
    }

    fn check_usable(&self) -> PipeResult<()> {
        if self.failed {
            return Err(PipeError::SessionFailed {
                name: self.name.clone(),
            });
        }
        if self.finished {
            return Err(PipeError::InvalidState {
                expected: "open session".to_string(),
                actual: "exit already sent".to_string(),
            });
        }
        Ok(())
    }

    fn latch<T>(&mut self, result: PipeResult<T>) -> PipeResult<T> {
        if let Err(e) = &result {
            error!("[{}] session failed: {}", self.name, e);
            self.failed = true;
        }
        result
    }
}

/// Encoder backed by a worker process
#[derive(Debug)]
pub struct AacEncoder {
    // declared first so the pipes close before the worker is reaped
    session: EncoderSession<BufWriter<ChildStdin>, BufReader<ChildStdout>>,
    process: WorkerProcess,
}

impl AacEncoder {
    /// Start a worker and negotiate `config` for `input`
    pub fn new(
        name: impl Into<String>,
        config: &EncoderConfig,
        input: &AudioInput,
        worker: &WorkerConfig,
        diagnostics: DiagnosticSink,
    ) -> PipeResult<Self> {
        let name = name.into();
        let mut process = WorkerProcess::spawn(worker, name.clone(), diagnostics)?;
        let (stdin, stdout) = process.take_pipes()?;

        let session = EncoderSession::negotiate(
            name,
            BufWriter::new(stdin),
            BufReader::new(stdout),
            config.to_settings(input),
        )?;

        Ok(Self { session, process })
    }

    /// Session over the worker's pipes
    pub fn session(&mut self) -> &mut EncoderSession<BufWriter<ChildStdin>, BufReader<ChildStdout>> {
        &mut self.session
    }

    /// Process id of the worker
    pub fn worker_id(&self) -> u32 {
        self.process.id()
    }

    /// Frames per AAC packet
    pub fn frame_size(&self) -> u32 {
        self.session.frame_size()
    }

    /// See [`EncoderSession::encode`]
    pub fn encode(&mut self, pcm: &[u8], pts: i64) -> PipeResult<Option<EncodedPacket>> {
        self.session.encode(pcm, pts)
    }

    /// See [`EncoderSession::encode_samples`]
    pub fn encode_samples(&mut self, samples: &[f32], pts: i64) -> PipeResult<Option<EncodedPacket>> {
        self.session.encode_samples(samples, pts)
    }

    /// See [`EncoderSession::extra_data`]
    pub fn extra_data(&mut self) -> PipeResult<Option<&[u8]>> {
        self.session.extra_data()
    }

    /// Send the exit flag, close the pipes and reap the worker
    pub fn shutdown(mut self) -> PipeResult<ExitStatus> {
        if !self.session.is_failed() {
            self.session.finish()?;
        }
        let Self { session, process } = self;
        drop(session);
        process.shutdown()
    }
}
