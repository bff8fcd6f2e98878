//! Worker process supervision
//!
//! [`WorkerProcess`] owns the worker child together with its three pipes and
//! the drain thread reading the diagnostic pipe. Teardown closes the request
//! and data pipes, reaps the child, and then joins the drain, which closes
//! the diagnostic pipe on its way out.
//!
//! Pipe I/O has no timeouts; a worker that stops answering blocks the
//! caller until it exits.

use crate::config::WorkerConfig;
use aacpipe_core::{PipeError, PipeResult};
use aacpipe_diagnostics::{DiagnosticDrain, DiagnosticLine, DiagnosticSink};
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus, Stdio};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

/// Sink forwarding diagnostic lines to the returned receiver
pub fn diagnostic_channel() -> (DiagnosticSink, UnboundedReceiver<DiagnosticLine>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DiagnosticSink::Channel(tx), rx)
}

/// A running worker and its pipes
#[derive(Debug)]
pub struct WorkerProcess {
    name: String,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    child: Option<Child>,
    drain: Option<DiagnosticDrain>,
}

impl WorkerProcess {
    /// Start the worker described by `config`
    pub fn spawn(config: &WorkerConfig, name: impl Into<String>, diagnostics: DiagnosticSink) -> PipeResult<Self> {
        let name = name.into();
        let mut command = config.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| PipeError::WorkerSpawn {
            program: config.display_command(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut process = Self {
            name,
            pid,
            stdin,
            stdout,
            child: Some(child),
            drain: None,
        };

        if process.stdin.is_none() || process.stdout.is_none() {
            return Err(PipeError::WorkerSpawn {
                program: config.display_command(),
                reason: "worker pipes were not created".to_string(),
            });
        }

        // dropping `process` on error tears down what is already acquired
        let stderr = stderr.ok_or_else(|| PipeError::WorkerSpawn {
            program: config.display_command(),
            reason: "diagnostic pipe was not created".to_string(),
        })?;
        process.drain = Some(DiagnosticDrain::spawn(process.name.clone(), stderr, diagnostics)?);

        debug!("[{}] started {} as process {}", process.name, config.display_command(), pid);
        Ok(process)
    }

    /// Encoder name used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id of the worker
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Hand the request and data pipes to the protocol client
    ///
    /// The pipes can be taken once; the caller must drop them before the
    /// process is torn down or the teardown waits for the worker forever.
    pub fn take_pipes(&mut self) -> PipeResult<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            _ => Err(PipeError::InvalidState {
                expected: "worker pipes available".to_string(),
                actual: "pipes already taken".to_string(),
            }),
        }
    }

    /// Tear down and return the worker's exit status
    pub fn shutdown(mut self) -> PipeResult<ExitStatus> {
        match self.teardown()? {
            Some(status) => Ok(status),
            None => Err(PipeError::InvalidState {
                expected: "running worker".to_string(),
                actual: "already reaped".to_string(),
            }),
        }
    }

    fn teardown(&mut self) -> PipeResult<Option<ExitStatus>> {
        drop(self.stdin.take());
        drop(self.stdout.take());

        let status = match self.child.take() {
            Some(mut child) => {
                let status = child.wait()?;
                info!("[{}] process {} terminated", self.name, self.pid);
                Some(status)
            }
            None => None,
        };

        if let Some(drain) = self.drain.take() {
            let lines = drain.join();
            debug!("[{}] drained {} diagnostic lines", self.name, lines);
        }

        Ok(status)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("[{}] worker teardown failed: {}", self.name, e);
        }
    }
}
