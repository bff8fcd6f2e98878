//! End-to-end tests of the host session against an in-process worker

#![cfg(unix)]

use aacpipe::{AudioInput, EncoderConfig, EncoderSession, PipeError};
use aacpipe_media::testing::{MockFactory, MockScript};
use aacpipe_media::{ConverterStatus, FormatId};
use aacpipe_worker::{serve, SessionSummary, WorkerResult};
use std::os::unix::net::UnixStream;
use std::thread::JoinHandle;

const ES_DESCRIPTOR: [u8; 27] = [
    0x03, 0x19, 0x00, 0x00, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xf4,
    0x00, 0x00, 0x01, 0xf4, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
];

type Session = EncoderSession<UnixStream, UnixStream>;

fn stereo() -> AudioInput {
    AudioInput {
        sample_rate: 48_000,
        channels: 2,
    }
}

fn start_worker(factory: &MockFactory) -> (UnixStream, UnixStream, JoinHandle<WorkerResult<SessionSummary>>) {
    let (host_req, mut worker_req) = UnixStream::pair().unwrap();
    let (mut worker_data, host_data) = UnixStream::pair().unwrap();
    let factory = factory.clone();

    let worker = std::thread::spawn(move || serve(&mut worker_req, &mut worker_data, &factory));
    (host_req, host_data, worker)
}

fn open(factory: &MockFactory, config: &EncoderConfig) -> (Session, JoinHandle<WorkerResult<SessionSummary>>) {
    let (req, data, worker) = start_worker(factory);
    let session = EncoderSession::negotiate("aac0", req, data, config.to_settings(&stereo())).unwrap();
    (session, worker)
}

fn block(frames: usize, value: f32) -> Vec<f32> {
    vec![value; frames * 2]
}

#[test]
fn test_negotiated_session_properties() {
    let factory = MockFactory::new();
    let config = EncoderConfig {
        samplerate: 44_100,
        ..EncoderConfig::default()
    };
    let (mut session, worker) = open(&factory, &config);

    assert_eq!(session.frame_size(), 1024);
    assert_eq!(session.timebase(), (1, 48_000));
    assert_eq!(session.output_samplerate(), 44_100);
    assert_eq!(session.settings().bitrate_bps, 128_000);

    session.finish().unwrap();
    let summary = worker.join().unwrap().unwrap();
    assert!(summary.exit_requested);
    assert_eq!(summary.format, FormatId::MPEG4_AAC_HE_V2);
}

#[test]
fn test_packets_carry_timestamps_and_flags() {
    let factory = MockFactory::new();
    let (mut session, worker) = open(&factory, &EncoderConfig::default());

    let mut packets = Vec::new();
    for i in 0..6 {
        // 512 frames per call, so every second call completes a block
        if let Some(packet) = session.encode_samples(&block(512, i as f32), i * 512).unwrap() {
            packets.push(packet);
        }
    }

    assert_eq!(packets.len(), 3);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.pts, i as i64 * 1024 - 2112);
        assert_eq!(packet.dts, packet.pts);
        assert_eq!(packet.timebase, (1, 48_000));
        assert!(packet.keyframe);
        assert_eq!(packet.data.len(), 1024 * 8);
    }

    // first packet holds the first two pushes in order
    let zero = 0.0f32.to_ne_bytes();
    let one = 1.0f32.to_ne_bytes();
    assert_eq!(&packets[0].data[..4], &zero);
    assert_eq!(&packets[0].data[4096..4100], &one);

    session.finish().unwrap();
    assert_eq!(worker.join().unwrap().unwrap().packets, 3);
}

#[test]
fn test_extra_data_queried_once() {
    let factory = MockFactory::with_script(MockScript {
        magic_cookie: Ok(ES_DESCRIPTOR.to_vec()),
        ..MockScript::default()
    });
    let (mut session, worker) = open(&factory, &EncoderConfig::default());

    assert_eq!(session.extra_data().unwrap(), Some(&[0x12, 0x10][..]));
    assert_eq!(session.extra_data().unwrap(), Some(&[0x12, 0x10][..]));

    session.finish().unwrap();
    let summary = worker.join().unwrap().unwrap();
    assert_eq!(summary.extra_data_requests, 1);
    assert_eq!(factory.cookie_reads(), 1);
}

#[test]
fn test_missing_extra_data_is_requeried() {
    let factory = MockFactory::new();
    let (mut session, worker) = open(&factory, &EncoderConfig::default());

    assert_eq!(session.extra_data().unwrap(), None);
    assert_eq!(session.extra_data().unwrap(), None);

    session.finish().unwrap();
    assert_eq!(worker.join().unwrap().unwrap().extra_data_requests, 2);
}

#[test]
fn test_worker_refusal_fails_handshake() {
    let factory = MockFactory::with_script(MockScript {
        unsupported_formats: vec![FormatId::MPEG4_AAC],
        ..MockScript::default()
    });
    let config = EncoderConfig {
        allow_he_aac: false,
        ..EncoderConfig::default()
    };
    let (req, data, worker) = start_worker(&factory);

    let result = EncoderSession::negotiate("aac0", req, data, config.to_settings(&stereo()));
    match result {
        Err(e) => assert!(e.is_protocol_error(), "unexpected error {:?}", e),
        Ok(_) => panic!("handshake should fail"),
    }
    assert!(worker.join().unwrap().is_err());
}

#[test]
fn test_session_unusable_after_failure() {
    let factory = MockFactory::with_script(MockScript {
        fill_failure: Some(ConverterStatus::PARAM_ERROR),
        ..MockScript::default()
    });
    let (mut session, worker) = open(&factory, &EncoderConfig::default());

    // below one block: answered without touching the codec
    assert!(session.encode_samples(&block(512, 0.0), 0).unwrap().is_none());

    let failed = session.encode_samples(&block(512, 0.0), 512);
    assert!(matches!(failed, Err(PipeError::ShortRead { .. })));
    assert!(session.is_failed());
    assert!(worker.join().unwrap().is_err());

    assert!(matches!(
        session.extra_data(),
        Err(PipeError::SessionFailed { .. })
    ));
    assert!(matches!(session.finish(), Err(PipeError::SessionFailed { .. })));
}

#[test]
fn test_finished_session_rejects_requests() {
    let factory = MockFactory::new();
    let (mut session, worker) = open(&factory, &EncoderConfig::default());

    session.finish().unwrap();
    worker.join().unwrap().unwrap();

    assert!(matches!(
        session.encode_samples(&block(1024, 0.0), 0),
        Err(PipeError::InvalidState { .. })
    ));
}
