//! aacpipe-worker binary
//!
//! Speaks the aacpipe protocol on binary stdin/stdout and logs to stderr,
//! which the host drains as the diagnostic pipe.

use aacpipe_diagnostics::{init_logging, LogConfig};
use aacpipe_media::ConverterFactory;
use aacpipe_worker::serve;
use anyhow::{bail, Context, Result};
use std::io::{BufReader, BufWriter};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    if let Err(e) = init_logging(&LogConfig::worker()) {
        eprintln!("aacpipe-worker: {}", e);
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    if let Some(arg) = std::env::args().nth(1) {
        bail!("Unknown argument '{}'", arg);
    }

    let factory = backend()?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    let summary = serve(&mut reader, &mut writer, factory.as_ref()).context("Encoding session failed")?;
    info!(
        "{} session done: {} bytes of PCM in, {} packets out, exit flag {}",
        summary.format.name(),
        summary.pcm_bytes,
        summary.packets,
        if summary.exit_requested { "seen" } else { "missing" }
    );
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn backend() -> Result<Box<dyn ConverterFactory>> {
    let factory = aacpipe_media::backend::FfmpegFactory::new().context("FFmpeg AAC encoder could not be loaded")?;
    info!("Adding FFmpeg AAC encoder");
    Ok(Box::new(factory))
}

#[cfg(not(feature = "ffmpeg"))]
fn backend() -> Result<Box<dyn ConverterFactory>> {
    bail!("No AAC encoder backend built in; rebuild with the `ffmpeg` feature")
}
