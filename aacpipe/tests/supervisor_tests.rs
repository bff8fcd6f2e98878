//! Worker process supervision tests using shell scripts as stand-in workers

#![cfg(unix)]

use aacpipe::*;
use std::io::{Read, Write};

fn script(body: &str) -> WorkerConfig {
    WorkerConfig::new("sh").arg("-c").arg(body)
}

fn collect_lines(mut rx: tokio::sync::mpsc::UnboundedReceiver<DiagnosticLine>) -> Vec<DiagnosticLine> {
    let mut lines = Vec::new();
    while let Some(line) = tokio_test::block_on(rx.recv()) {
        lines.push(line);
    }
    lines
}

#[test]
fn test_diagnostic_lines_forwarded_in_order() {
    let (sink, rx) = diagnostic_channel();
    let worker = WorkerProcess::spawn(
        &script("echo 'settings:' >&2; echo 'mode: AAC' >&2; cat > /dev/null"),
        "aac0",
        sink,
    )
    .unwrap();

    let status = worker.shutdown().unwrap();
    assert!(status.success());

    let lines = collect_lines(rx);
    let text: Vec<_> = lines.iter().map(|l| l.line.as_str()).collect();
    assert_eq!(text, ["settings:", "mode: AAC"]);
    assert!(lines.iter().all(|l| l.source == "aac0"));
}

#[test]
fn test_worker_environment_applied() {
    let (sink, rx) = diagnostic_channel();
    let worker = WorkerProcess::spawn(&script("echo \"$WINEDEBUG\" >&2"), "aac1", sink).unwrap();
    worker.shutdown().unwrap();

    let lines = collect_lines(rx);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].line, "fixme-all");
}

#[test]
fn test_launcher_runs_worker() {
    let (sink, rx) = diagnostic_channel();
    let config = WorkerConfig::new("sh")
        .with_launcher("env")
        .arg("-c")
        .arg("echo launched >&2");

    let worker = WorkerProcess::spawn(&config, "aac2", sink).unwrap();
    assert!(worker.shutdown().unwrap().success());
    assert_eq!(collect_lines(rx)[0].line, "launched");
}

#[test]
fn test_pipes_reach_the_worker() {
    let mut worker = WorkerProcess::spawn(&script("cat"), "aac3", DiagnosticSink::Log).unwrap();
    let (mut stdin, mut stdout) = worker.take_pipes().unwrap();

    stdin.write_all(b"pcm bytes").unwrap();
    drop(stdin);
    let mut echoed = Vec::new();
    stdout.read_to_end(&mut echoed).unwrap();
    drop(stdout);

    assert_eq!(echoed, b"pcm bytes");
    assert!(matches!(
        worker.take_pipes(),
        Err(PipeError::InvalidState { .. })
    ));
    assert!(worker.shutdown().unwrap().success());
}

#[test]
fn test_drop_closes_pipes_before_waiting() {
    let (sink, rx) = diagnostic_channel();
    let worker = WorkerProcess::spawn(&script("cat > /dev/null; echo eof >&2"), "aac4", sink).unwrap();
    assert!(worker.id() > 0);

    drop(worker);
    assert_eq!(collect_lines(rx)[0].line, "eof");
}

#[test]
fn test_missing_program() {
    let result = WorkerProcess::spawn(
        &WorkerConfig::new("/nonexistent/aacpipe-worker"),
        "aac5",
        DiagnosticSink::Log,
    );
    match result {
        Err(PipeError::WorkerSpawn { program, .. }) => {
            assert_eq!(program, "/nonexistent/aacpipe-worker")
        }
        other => panic!("Expected WorkerSpawn, got {:?}", other),
    }
}

#[test]
fn test_encoder_against_failing_worker() {
    let (sink, rx) = diagnostic_channel();
    let worker = script("echo 'CoreAudio AAC encoder not installed' >&2; exit 1");
    let input = AudioInput {
        sample_rate: 48_000,
        channels: 2,
    };

    let result = AacEncoder::new("aac6", &EncoderConfig::default(), &input, &worker, sink);
    match result {
        Err(e) => assert!(e.is_protocol_error(), "unexpected error {:?}", e),
        Ok(_) => panic!("worker never answered the handshake"),
    }
    assert_eq!(
        collect_lines(rx)[0].line,
        "CoreAudio AAC encoder not installed"
    );
}
