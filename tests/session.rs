//! Decode session tests against the in-process toy engine.

mod common;

use common::{MockEngine, toy_codestream};
use j2kdecode_rs::error::HostError;
use j2kdecode_rs::resources::ResourceKind;
use j2kdecode_rs::{
    BuiltinColor, CodecFormat, DecodeError, Field, HostAccess, HostState, InputDescriptor, Level,
    OutputPixelBuffer, Session, decode_with, inspect,
};

fn gray12() -> Vec<u8> {
    toy_codestream(4, 2, 12, (1, 1), 3, &[vec![0, 16, 256, 4095, 1, 2, 3, 4]])
}

fn rgb8() -> Vec<u8> {
    toy_codestream(
        2,
        1,
        8,
        (1, 1),
        2,
        &[vec![255, 0], vec![0, 128], vec![10, 20]],
    )
}

fn tiled() -> Vec<u8> {
    toy_codestream(2, 2, 8, (2, 2), 3, &[vec![1, 2, 3, 4]])
}

#[test]
fn test_single_component_12bit_is_gray16() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    let pixels = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
        .expect("decode");

    assert_eq!(
        pixels,
        OutputPixelBuffer::Gray16(vec![0, 16, 256, 4095, 1, 2, 3, 4])
    );
    assert_eq!((host.width, host.height, host.bits_per_sample), (4, 2, 12));
    assert_eq!((host.max_tiles, host.max_reduction), (1, 3));
    assert!(engine.live.is_empty(), "leaked {:?}", engine.live);
}

#[test]
fn test_three_component_8bit_is_opaque_argb() {
    let data = rgb8();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    let pixels = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
        .expect("decode");

    assert_eq!(
        pixels,
        OutputPixelBuffer::Argb32(vec![0xFFFF_000Au32 as i32, 0xFF00_8014u32 as i32])
    );
    assert_eq!((host.width, host.height, host.bits_per_sample), (2, 1, 8));
}

#[test]
fn test_default_request_decodes_whole_image_area() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    assert_eq!(
        engine.work_calls(),
        [
            "create_stream",
            "create_codec",
            "setup_decoder",
            "read_header",
            "capacity",
            "set_decode_area",
            "area=0,0,0,0",
            "decode",
            "end_decompress",
            "export_image",
        ]
    );
}

#[test]
fn test_resources_released_in_order_exactly_once() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    // stream#1, codec#2, image#3 by creation order
    assert_eq!(engine.destroyed, ["codec#2", "stream#1", "image#3"]);
    assert!(engine.live.is_empty());
}

#[test]
fn test_tile_takes_precedence_over_area() {
    let data = tiled();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();
    host.set_tile(2);
    host.set_reduction(1);
    host.set_area(0, 0, 1, 1);

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    let calls = engine.work_calls();
    assert!(calls.contains(&"tile=2"));
    assert!(calls.contains(&"reduce=1"));
    assert!(!calls.contains(&"set_decode_area"));
    assert!(!calls.contains(&"decode"));
}

#[test]
fn test_explicit_request_keeps_published_limits() {
    let data = tiled();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();
    host.set_tile(1);
    host.set_reduction(0);
    host.max_tiles = 99;
    host.max_reduction = 99;

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    assert_eq!((host.max_tiles, host.max_reduction), (99, 99));
    assert!(engine.work_calls().contains(&"tile=1"));
    assert!(!engine.work_calls().contains(&"set_resolution_factor"));
}

#[test]
fn test_area_is_passed_through() {
    let data = tiled();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();
    host.set_area(1, 0, 2, 2);

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    assert!(engine.work_calls().contains(&"area=1,0,2,2"));
}

#[test]
fn test_oversized_reduction_is_clamped_with_warning() {
    let data = tiled();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();
    host.set_tile(-1);
    host.set_reduction(9);

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    assert!(engine.work_calls().contains(&"reduce=2"));
    assert!(
        host.messages
            .iter()
            .any(|(level, m)| *level == Level::Warning && m.contains("reduction 9"))
    );
}

#[test]
fn test_tile_out_of_range_releases_everything() {
    let data = tiled();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();
    host.set_tile(4);
    host.set_reduction(0);

    let err = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
        .unwrap_err();

    assert!(matches!(err, DecodeError::Decode(_)), "{err:?}");
    assert_eq!(err.code(), -1);
    assert!(!engine.work_calls().contains(&"decoded_tile"));
    assert!(engine.live.is_empty());
}

#[test]
fn test_failure_at_any_step_releases_what_was_acquired() {
    let steps = [
        ("create_stream", false),
        ("create_codec", false),
        ("setup_decoder", false),
        ("read_header", true),
        ("capacity", true),
        ("set_decode_area", true),
        ("decode", true),
        ("end_decompress", true),
        ("export_image", true),
    ];
    let data = gray12();

    for (step, reaches_host) in steps {
        let mut engine = MockEngine::failing_at(step);
        let mut host = HostState::new();

        let err = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
            .unwrap_err();

        assert!(
            matches!(err, DecodeError::CodecInit(_) | DecodeError::Decode(_)),
            "{step}: {err:?}"
        );
        assert!(err.to_string().contains(step), "{step}: {err}");
        assert!(engine.live.is_empty(), "{step}: leaked {:?}", engine.live);
        assert_eq!(engine.work_calls().last(), Some(&step));
        if reaches_host {
            assert!(
                host.messages
                    .iter()
                    .any(|(level, m)| *level == Level::Error && m.contains(step)),
                "{step}: {:?}",
                host.messages
            );
        }
    }
}

#[test]
fn test_tile_and_reduction_failures_release_in_order() {
    let data = tiled();
    let cases: [(&str, fn(&mut HostState)); 3] = [
        ("decoded_tile", |host| {
            host.set_tile(3);
            host.set_reduction(0);
        }),
        ("set_resolution_factor", |host| {
            host.set_tile(-1);
            host.set_reduction(1);
        }),
        ("set_resolution_factor", |host| {
            host.set_tile(1);
            host.set_reduction(2);
        }),
    ];

    for (step, configure) in cases {
        let mut engine = MockEngine::failing_at(step);
        let mut host = HostState::new();
        configure(&mut host);

        let err = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
            .unwrap_err();

        assert!(matches!(err, DecodeError::Decode(_)), "{step}: {err:?}");
        assert_eq!(engine.work_calls().last(), Some(&step));
        assert!(!engine.work_calls().contains(&"end_decompress"), "{step}");
        assert_eq!(engine.destroyed, ["codec#2", "stream#1", "image#3"], "{step}");
        assert!(engine.live.is_empty(), "{step}: leaked {:?}", engine.live);
        assert!(
            host.messages
                .iter()
                .any(|(level, m)| *level == Level::Error && m.contains(step)),
            "{step}: {:?}",
            host.messages
        );
    }
}

#[test]
fn test_setup_failures_are_codec_init() {
    let data = gray12();
    for step in ["create_stream", "create_codec", "setup_decoder", "read_header"] {
        let mut engine = MockEngine::failing_at(step);
        let err = decode_with(
            &mut engine,
            &InputDescriptor::buffer(&data),
            &mut HostState::new(),
            &BuiltinColor,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::CodecInit(_)), "{step}: {err:?}");
    }
}

/// Host whose field access fails on one field. Once it has failed, any
/// further notification is recorded as a contract violation.
struct BrokenHost {
    inner: HostState,
    broken: Field,
    failed: bool,
    notified_after_failure: Vec<String>,
}

impl BrokenHost {
    fn new(broken: Field) -> Self {
        Self {
            inner: HostState::new(),
            broken,
            failed: false,
            notified_after_failure: Vec::new(),
        }
    }
}

impl HostAccess for BrokenHost {
    fn get(&mut self, field: Field) -> Result<i32, HostError> {
        if field == self.broken {
            self.failed = true;
            return Err(HostError::Read(field, "field missing".into()));
        }
        self.inner.get(field)
    }

    fn set(&mut self, field: Field, value: i32) -> Result<(), HostError> {
        if field == self.broken {
            self.failed = true;
            return Err(HostError::Write(field, "field is read-only".into()));
        }
        self.inner.set(field, value)
    }

    fn notify(&mut self, level: Level, message: &str) {
        if self.failed {
            self.notified_after_failure.push(message.to_string());
        }
        self.inner.notify(level, message);
    }
}

#[test]
fn test_host_read_failure_stops_before_decoding() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = BrokenHost::new(Field::MaxTiles);

    let err = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
        .unwrap_err();

    assert!(err.is_host_boundary(), "{err:?}");
    assert_eq!(engine.work_calls().last(), Some(&"capacity"));
    assert!(engine.live.is_empty());
    assert_eq!(engine.destroyed.len(), 3);
    assert!(
        host.notified_after_failure.is_empty(),
        "{:?}",
        host.notified_after_failure
    );
}

#[test]
fn test_host_write_failure_after_decode_releases() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = BrokenHost::new(Field::Width);

    let err = decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor)
        .unwrap_err();

    assert!(matches!(
        err,
        DecodeError::HostBoundary(HostError::Write(Field::Width, _))
    ));
    assert_eq!(host.inner.height, 0);
    assert!(engine.live.is_empty());
    assert!(host.notified_after_failure.is_empty());
}

#[test]
fn test_undetected_buffer_makes_no_engine_calls() {
    let mut engine = MockEngine::new();
    let data = [0u8; 32];

    let err = decode_with(
        &mut engine,
        &InputDescriptor::buffer(&data),
        &mut HostState::new(),
        &BuiltinColor,
    )
    .unwrap_err();

    assert_eq!(err, DecodeError::UnsupportedFormat);
    assert!(engine.calls.is_empty());
}

#[test]
fn test_session_release_is_idempotent() {
    let data = gray12();
    let mut engine = MockEngine::new();
    {
        let input = InputDescriptor::buffer(&data);
        let mut session = Session::open(&mut engine, &input).unwrap();
        assert_eq!(session.format(), CodecFormat::J2k);
        session.read_header().unwrap();
        assert_eq!(
            session.resources().live(),
            [
                ResourceKind::InputPin,
                ResourceKind::Stream,
                ResourceKind::Codec,
                ResourceKind::Image
            ]
        );

        let released = session.release();
        assert_eq!(
            released,
            [
                ResourceKind::Codec,
                ResourceKind::Stream,
                ResourceKind::Image,
                ResourceKind::InputPin
            ]
        );
        assert!(session.release().is_empty());
        assert!(session.resources().is_empty());
    }
    assert_eq!(engine.destroyed.len(), 3);
    assert!(engine.live.is_empty());
}

#[test]
fn test_dropping_session_releases() {
    let data = gray12();
    let mut engine = MockEngine::new();
    {
        let input = InputDescriptor::buffer(&data);
        let mut session = Session::open(&mut engine, &input).unwrap();
        session.read_header().unwrap();
    }
    assert!(engine.live.is_empty());
    assert_eq!(engine.destroyed.len(), 3);
}

#[test]
fn test_inspect_reports_capacity_without_decoding() {
    let data = tiled();
    let mut engine = MockEngine::new();

    let (format, capacity) = inspect(&mut engine, &InputDescriptor::buffer(&data)).unwrap();

    assert_eq!(format, CodecFormat::J2k);
    assert_eq!(capacity.tile_count(), 4);
    assert_eq!(capacity.max_resolution_levels, 3);
    assert!(!engine.work_calls().contains(&"decode"));
    assert!(engine.live.is_empty());
}

#[test]
fn test_engine_messages_reach_host() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();

    assert!(
        host.messages
            .iter()
            .any(|(level, m)| *level == Level::Info && m == "J2K codestream codec ready")
    );
}

#[test]
fn test_reused_state_collects_until_drained() {
    let data = gray12();
    let mut engine = MockEngine::new();
    let mut host = HostState::new();

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();
    let first = host.take_messages();
    assert!(!first.is_empty());
    assert!(host.messages.is_empty());

    decode_with(&mut engine, &InputDescriptor::buffer(&data), &mut host, &BuiltinColor).unwrap();
    assert_eq!(host.messages.len(), first.len());
    assert_eq!((host.width, host.height), (4, 2));
}
