//! Worker session tests against scripted converters

use aacpipe_core::*;
use aacpipe_media::testing::{MockFactory, MockScript};
use aacpipe_media::{ConverterStatus, EngineState, FormatId, MediaError};
use aacpipe_worker::{serve, WorkerError};
use std::io::Cursor;

// two channels of f32, 1024 frames
const BLOCK: usize = 1024 * 8;

const ES_DESCRIPTOR: [u8; 27] = [
    0x03, 0x19, 0x00, 0x00, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xf4,
    0x00, 0x00, 0x01, 0xf4, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
];

fn stereo() -> EncoderSettings {
    EncoderSettings::new(128_000, 2, 48_000)
}

fn requests(settings: &EncoderSettings, messages: &[(DataHeader, Vec<u8>)]) -> Cursor<Vec<u8>> {
    let mut raw = Vec::new();
    settings.write_to(&mut raw).unwrap();
    for (header, payload) in messages {
        write_message(&mut raw, header, payload).unwrap();
    }
    Cursor::new(raw)
}

fn pcm(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

fn encode(payload: Vec<u8>) -> (DataHeader, Vec<u8>) {
    (DataHeader::encode_request(payload.len() as u32, 1, 0), payload)
}

/// Split the worker's output into the settings echo and each response
fn responses(output: Vec<u8>) -> (EncoderSettings, Vec<(DataHeader, Vec<u8>)>) {
    let mut data = Cursor::new(output);
    let echoed = EncoderSettings::read_from(&mut data).unwrap();
    let mut messages = Vec::new();
    while let Some(header) = DataHeader::read_optional(&mut data).unwrap() {
        let mut payload = Vec::new();
        read_payload(&mut data, &header, &mut payload).unwrap();
        messages.push((header, payload));
    }
    (echoed, messages)
}

#[test]
fn test_version_mismatch_touches_no_codec() {
    let factory = MockFactory::new();
    let mut settings = stereo();
    settings.version = PROTOCOL_VERSION + 1;

    let mut output = Vec::new();
    let result = serve(&mut requests(&settings, &[]), &mut output, &factory);

    assert!(matches!(
        result,
        Err(WorkerError::Pipe(PipeError::VersionMismatch { .. }))
    ));
    assert_eq!(factory.create_attempts(), 0);
    assert!(output.is_empty());
}

#[test]
fn test_codec_refusal_writes_no_echo() {
    let factory = MockFactory::with_script(MockScript {
        unsupported_formats: vec![FormatId::MPEG4_AAC],
        ..MockScript::default()
    });

    let mut output = Vec::new();
    let result = serve(&mut requests(&stereo(), &[]), &mut output, &factory);

    assert!(matches!(
        result,
        Err(WorkerError::Media(MediaError::NoFormatAccepted { .. }))
    ));
    assert!(output.is_empty());
}

#[test]
fn test_echo_carries_block_size() {
    let factory = MockFactory::new();
    let mut output = Vec::new();
    let summary = serve(
        &mut requests(&stereo(), &[(DataHeader::exit(), Vec::new())]),
        &mut output,
        &factory,
    )
    .unwrap();

    let (echoed, messages) = responses(output);
    assert_eq!(echoed.out_frames_per_packet, 1024);
    assert_eq!(echoed.bitrate_bps, 128_000);
    assert!(messages.is_empty());
    assert_eq!(summary.settings, echoed);
    assert_eq!(summary.format, FormatId::MPEG4_AAC);
}

#[test]
fn test_high_efficiency_selected_when_allowed() {
    let factory = MockFactory::new();
    let settings = stereo().with_flags(SettingsFlags::ALLOW_HE_AAC);

    let summary = serve(&mut requests(&settings, &[]), &mut Vec::new(), &factory).unwrap();
    assert_eq!(summary.format, FormatId::MPEG4_AAC_HE_V2);
}

#[test]
fn test_packets_stamped_with_priming_offset() {
    let factory = MockFactory::new();
    let first = pcm(BLOCK, 0);
    let second = pcm(BLOCK, 7);
    let messages = [
        encode(first.clone()),
        encode(second.clone()),
        (DataHeader::exit(), Vec::new()),
    ];

    let mut output = Vec::new();
    let summary = serve(&mut requests(&stereo(), &messages), &mut output, &factory).unwrap();
    assert_eq!(summary.packets, 2);
    assert_eq!(summary.pcm_bytes, 2 * BLOCK as u64);

    let (_, packets) = responses(output);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].0.pts, -2112);
    assert_eq!(packets[1].0.pts, 1024 - 2112);
    for (i, (header, payload)) in packets.iter().enumerate() {
        assert_eq!(header.frames, 1);
        assert!(header.flags.contains(HeaderFlags::ENCODE));
        assert_eq!(header.size as usize, payload.len());
        assert_eq!(payload, if i == 0 { &first } else { &second });
    }
}

#[test]
fn test_encode_and_exit_in_one_message() {
    let factory = MockFactory::new();
    let header = DataHeader {
        flags: HeaderFlags::ENCODE | HeaderFlags::EXIT,
        ..DataHeader::encode_request(BLOCK as u32, 1, 0)
    };

    let mut output = Vec::new();
    let summary = serve(
        &mut requests(&stereo(), &[(header, pcm(BLOCK, 3))]),
        &mut output,
        &factory,
    )
    .unwrap();

    assert!(summary.exit_requested);
    assert_eq!(summary.requests, 1);
    assert_eq!(summary.final_state, EngineState::Closed);

    let (_, messages) = responses(output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0.size as usize, BLOCK);
}

#[test]
fn test_requests_after_exit_are_not_read() {
    let factory = MockFactory::new();
    let messages = [(DataHeader::exit(), Vec::new()), encode(pcm(BLOCK, 0))];

    let mut output = Vec::new();
    let summary = serve(&mut requests(&stereo(), &messages), &mut output, &factory).unwrap();

    assert_eq!(summary.requests, 1);
    assert_eq!(factory.fills(), 0);
    assert!(responses(output).1.is_empty());
}

#[test]
fn test_extra_data_served_from_cache() {
    let factory = MockFactory::with_script(MockScript {
        magic_cookie: Ok(ES_DESCRIPTOR.to_vec()),
        ..MockScript::default()
    });
    let messages = [
        (DataHeader::extra_data_request(), Vec::new()),
        (DataHeader::extra_data_request(), Vec::new()),
        (DataHeader::exit(), Vec::new()),
    ];

    let mut output = Vec::new();
    let summary = serve(&mut requests(&stereo(), &messages), &mut output, &factory).unwrap();
    assert_eq!(summary.extra_data_requests, 2);
    assert_eq!(factory.cookie_reads(), 1);

    let (_, replies) = responses(output);
    assert_eq!(replies.len(), 2);
    for (header, payload) in &replies {
        assert!(header.flags.contains(HeaderFlags::EXTRA_DATA));
        assert_eq!(payload, &[0x12, 0x10]);
    }
}

#[test]
fn test_missing_extra_data_is_empty_response() {
    let factory = MockFactory::new();
    let mut output = Vec::new();
    serve(
        &mut requests(&stereo(), &[(DataHeader::extra_data_request(), Vec::new())]),
        &mut output,
        &factory,
    )
    .unwrap();

    let (_, replies) = responses(output);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0.size, 0);
    assert!(replies[0].1.is_empty());
}

#[test]
fn test_codec_failure_ends_session_without_response() {
    let factory = MockFactory::with_script(MockScript {
        fill_failure: Some(ConverterStatus::PARAM_ERROR),
        ..MockScript::default()
    });
    let messages = [encode(pcm(BLOCK, 0)), (DataHeader::exit(), Vec::new())];

    let mut output = Vec::new();
    let result = serve(&mut requests(&stereo(), &messages), &mut output, &factory);

    match result {
        Err(WorkerError::Media(MediaError::Converter { status, .. })) => {
            assert_eq!(status, ConverterStatus::PARAM_ERROR)
        }
        other => panic!("Expected converter failure, got {:?}", other),
    }
    assert_eq!(output.len(), EncoderSettings::WIRE_SIZE);
}

#[cfg(unix)]
#[test]
fn test_interactive_session_over_socket_pair() {
    use std::os::unix::net::UnixStream;

    let (host_req, worker_req) = UnixStream::pair().unwrap();
    let (worker_data, host_data) = UnixStream::pair().unwrap();
    let factory = MockFactory::new();
    let worker_factory = factory.clone();

    let worker = std::thread::spawn(move || {
        let mut reader = worker_req;
        let mut writer = worker_data;
        serve(&mut reader, &mut writer, &worker_factory)
    });

    let mut host_req = host_req;
    let mut host_data = host_data;
    let echoed = negotiate(&mut host_req, &mut host_data, stereo()).unwrap();
    assert_eq!(echoed.out_frames_per_packet, 1024);

    // half a block first, so the worker answers with no packet
    let mut body = Vec::new();
    let mut pts = Vec::new();
    for half in [pcm(BLOCK / 2, 0), pcm(BLOCK / 2, 1), pcm(BLOCK / 2, 2), pcm(BLOCK / 2, 3)] {
        write_message(
            &mut host_req,
            &DataHeader::encode_request(half.len() as u32, 1, 0),
            &half,
        )
        .unwrap();
        let header = DataHeader::read_from(&mut host_data).unwrap();
        let mut payload = Vec::new();
        read_payload(&mut host_data, &header, &mut payload).unwrap();
        if header.size > 0 {
            pts.push(header.pts);
            body.extend_from_slice(&payload);
        }
    }

    write_message(&mut host_req, &DataHeader::exit(), &[]).unwrap();
    let summary = worker.join().unwrap().unwrap();

    assert_eq!(pts, vec![-2112, 1024 - 2112]);
    let mut expected = Vec::new();
    for seed in 0..4 {
        expected.extend(pcm(BLOCK / 2, seed));
    }
    assert_eq!(body, expected);
    assert_eq!(summary.packets, 2);
    assert_eq!(factory.fills(), 2);
}
