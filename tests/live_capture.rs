//! End-to-end live sessions against the synthetic source

use std::time::Duration;

use livefps::capture::{CaptureConfiguration, PixelFormat, SyntheticSource};
use livefps::error::CaptureError;
use livefps::pipeline::capture_loop::LoopOptions;
use livefps::pipeline::{Delivery, LatestFrame, LoopState};
use livefps::{CameraService, LiveCamera, StopSignal};

fn options() -> LoopOptions {
    LoopOptions {
        stop_timeout: Duration::from_millis(200),
        warmup_reads: 3,
        pin_core: None,
    }
}

fn rotated_config() -> CaptureConfiguration {
    CaptureConfiguration::builder("synthetic0")
        .resolution(640, 480)
        .target_fps(60.0)
        .pixel_format("YUYV")
        .rotate_degrees(90)
        .build()
        .unwrap()
}

#[test]
fn test_rotated_session_publishes_gapless_sequences() {
    let mut camera = LiveCamera::with_options(SyntheticSource::new(), options());
    let mut latest = LatestFrame::default();
    assert!(
        !camera.try_get_latest_frame(&mut latest),
        "Nothing is published before the first session"
    );

    camera.open("synthetic0").unwrap();
    let frames = camera.subscribe_frames(16, Delivery::Block);
    camera.start_live(rotated_config(), StopSignal::new()).unwrap();
    assert_eq!(camera.live_state(), LoopState::Running);

    let mut sequences = Vec::new();
    while sequences.len() < 5 {
        let event = frames
            .recv_timeout(Duration::from_secs(2))
            .expect("frame notification");
        assert_eq!(event.frame.width(), 480);
        assert_eq!(event.frame.height(), 640);
        assert_eq!(event.frame.sequence(), event.sequence);
        sequences.push(event.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

    assert!(camera.try_get_latest_frame(&mut latest));
    assert_eq!((latest.width, latest.height), (480, 640));
    assert_eq!(latest.format, Some(PixelFormat::Rgb24));
    assert_eq!(latest.data.len(), 480 * 640 * 3);
    assert!(latest.sequence >= 5);

    // A blocked subscriber would hold the worker inside its send
    drop(frames);
    assert!(camera.stop_live(), "Worker should exit within the timeout");
    assert_eq!(camera.live_state(), LoopState::Idle);
    assert!(!camera.try_get_latest_frame(&mut latest));
    camera.close();
}

#[test]
fn test_one_shot_is_refused_while_live() {
    let mut camera = LiveCamera::with_options(SyntheticSource::new(), options());
    camera.open("synthetic").unwrap();
    let config = rotated_config();

    let frame = camera.capture_one(&config).unwrap();
    assert_eq!(frame.sequence(), 0, "One-shot frames carry sequence 0");
    assert_eq!((frame.width(), frame.height()), (480, 640));

    camera.start_live(config.clone(), StopSignal::new()).unwrap();
    assert!(matches!(
        camera.capture_one(&config),
        Err(CaptureError::AlreadyRunning)
    ));
    assert!(matches!(
        camera.start_live(config.clone(), StopSignal::new()),
        Err(CaptureError::AlreadyRunning)
    ));
    assert!(camera.stop_live());

    // Back to one-shot once idle
    assert!(camera.capture_one(&config).is_ok());
}

#[test]
fn test_unsupported_format_fails_at_start() {
    let mut camera = LiveCamera::with_options(SyntheticSource::new(), options());
    camera.open("synthetic").unwrap();
    let mjpeg = rotated_config().with_pixel_format("MJPG").unwrap();

    let result = camera.start_live(mjpeg, StopSignal::new());
    assert!(matches!(result, Err(CaptureError::Unsupported(_))));
    assert_eq!(camera.live_state(), LoopState::Idle);
}

#[test]
fn test_start_requires_open_device() {
    let mut camera = LiveCamera::with_options(SyntheticSource::new(), options());
    let result = camera.start_live(rotated_config(), StopSignal::new());
    assert!(matches!(result, Err(CaptureError::NotOpen)));
}

#[test]
fn test_rate_updates_arrive_once_per_second() {
    let mut camera = LiveCamera::with_options(SyntheticSource::new(), options());
    camera.open("synthetic").unwrap();
    let rates = camera.subscribe_rate();
    let config = rotated_config().with_target_fps(30.0).unwrap();
    camera.start_live(config, StopSignal::new()).unwrap();

    let update = rates
        .recv_timeout(Duration::from_secs(3))
        .expect("rate update");
    assert!(update.fps > 10.0 && update.fps < 40.0, "fps {}", update.fps);
    assert!(camera.latest_fps() > 0.0);

    assert!(camera.stop_live());
    assert_eq!(camera.latest_fps(), 0.0);
}

#[test]
fn test_read_failures_are_counted_and_skipped() {
    let source = SyntheticSource::new().unpaced().fail_reads_every(2);
    let mut camera = LiveCamera::with_options(source, options());
    camera.open("synthetic").unwrap();
    let frames = camera.subscribe_frames(64, Delivery::DropNewest);
    camera.start_live(rotated_config(), StopSignal::new()).unwrap();

    for _ in 0..10 {
        frames.recv_timeout(Duration::from_secs(2)).unwrap();
    }
    assert!(camera.stop_live());

    let stats = camera.live_stats();
    assert!(stats.frames_published >= 10);
    assert!(stats.read_failures > 0);
}
