//! Configuration types and defaults

use aacpipe_core::{EncoderSettings, PipeError, PipeResult, SettingsFlags};
use aacpipe_diagnostics::LogConfig;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Encoder settings chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Target bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// Output sample rate, 0 to match the input
    pub samplerate: u32,
    /// Let the worker pick HE-AAC when the bitrate allows it
    pub allow_he_aac: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 128,
            samplerate: 0,
            allow_he_aac: true,
        }
    }
}

impl EncoderConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> PipeResult<Self> {
        parse_json(json)
    }

    /// Wire settings for encoding `input`
    pub fn to_settings(&self, input: &AudioInput) -> EncoderSettings {
        let mut flags = SettingsFlags::empty();
        flags.set(SettingsFlags::ALLOW_HE_AAC, self.allow_he_aac);

        EncoderSettings::new(
            self.bitrate_kbps.saturating_mul(1000),
            input.channels,
            input.sample_rate,
        )
        .with_samplerate_out(self.samplerate)
        .with_flags(flags)
    }
}

/// Format of the PCM fed to the encoder
///
/// Samples are interleaved 32-bit floats in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    /// Input sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u32,
}

impl AudioInput {
    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }
}

/// How to start the worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable
    pub program: PathBuf,
    /// Program the worker is run through, such as `wine`
    pub launcher: Option<PathBuf>,
    /// Extra arguments passed to the worker
    pub args: Vec<String>,
    /// Environment added to the worker's
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("WINEDEBUG".to_string(), "fixme-all".to_string());

        Self {
            program: PathBuf::from("aacpipe-worker"),
            launcher: None,
            args: Vec::new(),
            env,
        }
    }
}

impl WorkerConfig {
    /// Worker run directly
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> PipeResult<Self> {
        parse_json(json)
    }

    /// Run the worker through `launcher`
    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    /// Append a worker argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command line as it is run, for logs
    pub fn display_command(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(launcher) = &self.launcher {
            parts.push(launcher.display().to_string());
        }
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Build the command; stdio is left for the caller to set up
    pub fn command(&self) -> Command {
        let mut command = match &self.launcher {
            Some(launcher) => {
                let mut command = Command::new(launcher);
                command.arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        };
        command.args(&self.args).envs(&self.env);
        command
    }
}

/// Everything the host needs to run encoders
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Encoder settings
    pub encoder: EncoderConfig,
    /// Worker process
    pub worker: WorkerConfig,
    /// Host logging
    pub log: LogConfig,
}

impl HostConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> PipeResult<Self> {
        parse_json(json)
    }

    /// Load a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> PipeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

fn parse_json<T: DeserializeOwned>(json: &str) -> PipeResult<T> {
    serde_json::from_str(json).map_err(|e| PipeError::InvalidSettings {
        reason: format!("invalid configuration: {}", e),
    })
}
