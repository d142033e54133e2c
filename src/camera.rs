//! Camera facade: one-shot and live operations behind a single interface

use std::sync::Arc;

use flume::Receiver;
use tracing::instrument;

use crate::capture::config::CaptureConfiguration;
use crate::capture::frame::FrameSample;
use crate::capture::session::{lock_session, DeviceSession, SharedSession};
use crate::capture::source::FrameSource;
use crate::error::{CaptureError, Result};
use crate::pipeline::capture_loop::LoopOptions;
use crate::pipeline::{
    CaptureLoop, Delivery, FrameEvent, LatestFrame, LoopState, LoopStats, RateUpdate, StopSignal,
};

/// Everything a front end or the measurement harness needs from a camera.
///
/// Live-session control is part of the interface itself, so callers never
/// have to know which concrete camera they hold.
pub trait CameraService: Send {
    fn open(&mut self, device_id: &str) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Device currently held, if any
    fn device_id(&self) -> Option<String>;

    /// Synchronous single frame; fails with `AlreadyRunning` while live
    fn capture_one(&mut self, config: &CaptureConfiguration) -> Result<FrameSample>;

    fn start_live(&mut self, config: CaptureConfiguration, signal: StopSignal) -> Result<()>;

    /// Best-effort, bounded; `false` when the worker had to be abandoned
    fn stop_live(&mut self) -> bool;

    fn live_state(&self) -> LoopState;

    fn try_get_latest_frame(&self, dst: &mut LatestFrame) -> bool;

    fn subscribe_frames(&self, capacity: usize, delivery: Delivery) -> Receiver<FrameEvent>;

    fn subscribe_rate(&self) -> Receiver<RateUpdate>;

    fn live_stats(&self) -> LoopStats;
}

/// [`CameraService`] over a [`DeviceSession`] and its [`CaptureLoop`]
pub struct LiveCamera {
    session: SharedSession,
    live: CaptureLoop,
}

impl LiveCamera {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        let session = DeviceSession::new(source).into_shared();
        Self {
            live: CaptureLoop::new(Arc::clone(&session)),
            session,
        }
    }

    pub fn with_options(source: impl FrameSource + 'static, options: LoopOptions) -> Self {
        let session = DeviceSession::new(source).into_shared();
        Self {
            live: CaptureLoop::with_options(Arc::clone(&session), options),
            session,
        }
    }

    /// Handle for the async wrappers in [`crate::capture::session`]
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    pub fn capture_loop(&self) -> &CaptureLoop {
        &self.live
    }

    pub fn latest_fps(&self) -> f64 {
        self.live.latest_fps()
    }
}

impl CameraService for LiveCamera {
    #[instrument(skip(self))]
    fn open(&mut self, device_id: &str) -> Result<()> {
        if self.live.is_running() {
            self.live.stop();
        }
        lock_session(&self.session).open(device_id)
    }

    fn close(&mut self) {
        if self.live.is_running() {
            self.live.stop();
        }
        lock_session(&self.session).close();
    }

    fn is_open(&self) -> bool {
        lock_session(&self.session).is_open()
    }

    fn device_id(&self) -> Option<String> {
        let session = lock_session(&self.session);
        session
            .is_open()
            .then(|| session.device_id().map(String::from))
            .flatten()
    }

    fn capture_one(&mut self, config: &CaptureConfiguration) -> Result<FrameSample> {
        if self.live.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }
        lock_session(&self.session).capture_one(config)
    }

    fn start_live(&mut self, config: CaptureConfiguration, signal: StopSignal) -> Result<()> {
        self.live.start(config, signal)
    }

    fn stop_live(&mut self) -> bool {
        self.live.stop()
    }

    fn live_state(&self) -> LoopState {
        self.live.state()
    }

    fn try_get_latest_frame(&self, dst: &mut LatestFrame) -> bool {
        self.live.try_get_latest_frame(dst)
    }

    fn subscribe_frames(&self, capacity: usize, delivery: Delivery) -> Receiver<FrameEvent> {
        self.live.subscribe_frames(capacity, delivery)
    }

    fn subscribe_rate(&self) -> Receiver<RateUpdate> {
        self.live.subscribe_rate()
    }

    fn live_stats(&self) -> LoopStats {
        self.live.stats()
    }
}
