//! Diagnostic pipe drain
//!
//! The worker writes its log to stderr. A background thread reads that pipe
//! line by line until EOF so the worker never blocks on a full pipe, and
//! forwards each line to a channel or to the host's own log.

use aacpipe_core::PipeResult;
use std::io::{BufRead, BufReader, Read};
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// One line read from a worker's diagnostic pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    /// Name of the encoder the worker belongs to
    pub source: String,
    /// Line text without its terminator
    pub line: String,
}

/// Where drained lines go
#[derive(Debug, Clone, Default)]
pub enum DiagnosticSink {
    /// Log each line at info level as `[name] pipe: line`
    #[default]
    Log,
    /// Send each line on a channel; falls back to logging once the receiver
    /// is gone
    Channel(UnboundedSender<DiagnosticLine>),
}

/// Background reader of one diagnostic pipe
///
/// Dropping the drain joins its thread, so the pipe must already be at EOF
/// (the worker exited) or the drop blocks until it is.
#[derive(Debug)]
pub struct DiagnosticDrain {
    name: String,
    handle: Option<JoinHandle<usize>>,
}

impl DiagnosticDrain {
    /// Start draining `pipe`, which is owned and closed by the drain thread
    pub fn spawn<R>(name: impl Into<String>, pipe: R, sink: DiagnosticSink) -> PipeResult<Self>
    where
        R: Read + Send + 'static,
    {
        let name = name.into();
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-stderr", name))
            .spawn(move || drain_lines(&thread_name, pipe, sink))?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    /// Wait for EOF and return the number of lines forwarded
    pub fn join(mut self) -> usize {
        self.join_inner()
    }

    /// Whether the drain thread has finished
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn join_inner(&mut self) -> usize {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                warn!("[{}] stderr thread panicked", self.name);
                0
            }),
            None => 0,
        }
    }
}

impl Drop for DiagnosticDrain {
    fn drop(&mut self) {
        self.join_inner();
    }
}

fn drain_lines<R: Read>(name: &str, pipe: R, mut sink: DiagnosticSink) -> usize {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::with_capacity(1024);
    let mut forwarded = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                forward(name, line, &mut sink);
                forwarded += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("[{}] pipe read failed: {}", name, e);
                break;
            }
        }
    }

    info!("[{}] pipe closed", name);
    forwarded
}

fn forward(name: &str, line: String, sink: &mut DiagnosticSink) {
    let line = match sink {
        DiagnosticSink::Channel(tx) => {
            let message = DiagnosticLine {
                source: name.to_string(),
                line,
            };
            match tx.send(message) {
                Ok(()) => return,
                Err(returned) => {
                    *sink = DiagnosticSink::Log;
                    returned.0.line
                }
            }
        }
        DiagnosticSink::Log => line,
    };
    info!("[{}] pipe: {}", name, line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lines_split_and_trimmed() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pipe = Cursor::new(b"first\nsecond\r\n\nlast without newline".to_vec());

        let forwarded = drain_lines("enc", pipe, DiagnosticSink::Channel(tx));
        assert_eq!(forwarded, 4);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            assert_eq!(line.source, "enc");
            lines.push(line.line);
        }
        assert_eq!(lines, vec!["first", "second", "", "last without newline"]);
    }

    #[test]
    fn test_closed_receiver_falls_back_to_log() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);

        let pipe = Cursor::new(b"a\nb\n".to_vec());
        assert_eq!(drain_lines("enc", pipe, DiagnosticSink::Channel(tx)), 2);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pipe = Cursor::new(vec![b'o', b'k', 0xff, b'\n']);

        drain_lines("enc", pipe, DiagnosticSink::Channel(tx));
        assert_eq!(rx.try_recv().unwrap().line, "ok\u{fffd}");
    }
}
