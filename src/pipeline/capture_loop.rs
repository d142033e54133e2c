//! Live acquisition: one dedicated worker thread per running session.
//!
//! ```text
//! DeviceSession::read_raw -> prepare_frame (convert, rotate, flip)
//!     -> LiveFrameBuffer::publish -> FpsMeter::tick -> EventHub
//! ```
//!
//! Cancellation is cooperative and only observed between iterations. A
//! read already blocked in the driver finishes (or hangs) before the worker
//! can notice, which is why [`CaptureLoop::stop`] waits for a bounded time
//! and then gives up on the worker instead of joining forever.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::utils::CachePadded;
use tracing::{debug, info, trace, warn};

use crate::capture::config::CaptureConfiguration;
use crate::capture::session::{lock_session, SharedSession, WARMUP_READS};
use crate::error::{CaptureError, Result};
use crate::pipeline::events::{Delivery, EventHub, FrameEvent, RateUpdate};
use crate::pipeline::fps::FpsMeter;
use crate::pipeline::live_buffer::{LatestFrame, LiveFrameBuffer};
use crate::pipeline::transform::GeometryTransform;
use crate::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Cooperative cancellation flag shared between a caller and the worker
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of the current (or last) run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopStats {
    pub frames_published: u64,
    pub read_failures: u64,
    pub notifications_dropped: u64,
    pub latest_fps: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// How long `stop` waits for the worker before abandoning it
    pub stop_timeout: Duration,
    /// Discarded reads during `start`
    pub warmup_reads: usize,
    /// Pin the worker to this CPU core
    pub pin_core: Option<usize>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(200),
            warmup_reads: WARMUP_READS,
            pin_core: None,
        }
    }
}

impl From<&PipelineConfig> for LoopOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            warmup_reads: config.warmup_reads,
            pin_core: config.pin_core,
        }
    }
}

#[derive(Default)]
struct Counters {
    published: CachePadded<AtomicU64>,
    failures: CachePadded<AtomicU64>,
}

struct Worker {
    handle: JoinHandle<()>,
    exited: Receiver<()>,
    signal: StopSignal,
}

pub struct CaptureLoop {
    session: SharedSession,
    options: LoopOptions,
    state: LoopState,
    config: Option<CaptureConfiguration>,
    live: Arc<LiveFrameBuffer>,
    hub: Arc<EventHub>,
    latest_fps: Arc<AtomicCell<f64>>,
    counters: Arc<Counters>,
    worker: Option<Worker>,
}

impl CaptureLoop {
    /// Loop over `session` using the pipeline section of the global config
    pub fn new(session: SharedSession) -> Self {
        let options = LoopOptions::from(&crate::CONFIG.load().pipeline);
        Self::with_options(session, options)
    }

    pub fn with_options(session: SharedSession, options: LoopOptions) -> Self {
        Self {
            session,
            options,
            state: LoopState::Idle,
            config: None,
            live: Arc::new(LiveFrameBuffer::new()),
            hub: Arc::new(EventHub::new()),
            latest_fps: Arc::new(AtomicCell::new(0.0)),
            counters: Arc::new(Counters::default()),
            worker: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LoopState::Starting | LoopState::Running)
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Configuration of the running session
    pub fn config(&self) -> Option<&CaptureConfiguration> {
        self.config.as_ref()
    }

    pub fn subscribe_frames(&self, capacity: usize, delivery: Delivery) -> flume::Receiver<FrameEvent> {
        self.hub.subscribe_frames(capacity, delivery)
    }

    pub fn subscribe_rate(&self) -> flume::Receiver<RateUpdate> {
        self.hub.subscribe_rate()
    }

    /// Configure the open device, flush it, and hand it to a fresh worker.
    /// Returns as soon as the worker is spawned.
    pub fn start(&mut self, config: CaptureConfiguration, signal: StopSignal) -> Result<()> {
        if self.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.state = LoopState::Starting;
        info!(
            device = config.device_id(),
            width = config.width(),
            height = config.height(),
            format = config.pixel_format(),
            rotate = config.rotate().degrees(),
            target_fps = config.target_fps(),
            "Starting capture loop"
        );

        if let Err(e) = self.prepare_device(&config) {
            warn!(error = %e, "Capture loop failed to start");
            self.state = LoopState::Idle;
            return Err(e);
        }

        self.live.reset();
        self.latest_fps.store(0.0);
        self.counters = Arc::new(Counters::default());

        let (exited_tx, exited) = channel::bounded(1);
        let ctx = WorkerContext {
            session: Arc::clone(&self.session),
            config: config.clone(),
            live: Arc::clone(&self.live),
            hub: Arc::clone(&self.hub),
            latest_fps: Arc::clone(&self.latest_fps),
            counters: Arc::clone(&self.counters),
            signal: signal.clone(),
            pin_core: self.options.pin_core,
            exited: exited_tx,
        };

        let handle = match thread::Builder::new()
            .name("capture-loop".into())
            .spawn(move || ctx.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.state = LoopState::Idle;
                return Err(e.into());
            }
        };

        self.worker = Some(Worker {
            handle,
            exited,
            signal,
        });
        self.config = Some(config);
        self.state = LoopState::Running;
        Ok(())
    }

    fn prepare_device(&self, config: &CaptureConfiguration) -> Result<()> {
        let mut session = lock_session(&self.session);
        let applied = session.apply_configuration(config)?;
        super::check_transformable(config, applied.format)?;
        let ok = session.warm_up(self.options.warmup_reads)?;
        debug!(ok, of = self.options.warmup_reads, "Warm-up reads done");
        Ok(())
    }

    /// Cancel the worker and wait up to the configured timeout for it.
    ///
    /// Returns `false` when the worker did not exit in time. It is then left
    /// running detached until its in-flight read returns; it can no longer
    /// reach the buffer or rate readers of this loop.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            self.reset_run_state();
            self.state = LoopState::Idle;
            return true;
        };
        self.state = LoopState::Stopping;
        worker.signal.cancel();

        let clean = match worker.exited.recv_timeout(self.options.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("Capture worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.options.stop_timeout.as_millis() as u64,
                    "Capture worker did not exit in time, abandoning it"
                );
                false
            }
        };

        self.reset_run_state();
        if !clean {
            // Detach the straggler from everything readers can observe
            self.live = Arc::new(LiveFrameBuffer::new());
            self.latest_fps = Arc::new(AtomicCell::new(0.0));
            self.hub = Arc::new(self.hub.detach());
        }
        self.config = None;
        self.state = LoopState::Idle;
        info!(clean, "Capture loop stopped");
        clean
    }

    fn reset_run_state(&self) {
        self.live.reset();
        self.latest_fps.store(0.0);
        metrics::gauge!("livefps_capture_fps").set(0.0);
    }

    /// Copy the latest published frame into `dst`
    pub fn try_get_latest_frame(&self, dst: &mut LatestFrame) -> bool {
        self.live.try_read(dst)
    }

    /// Rate of the last closed FPS window, 0.0 before the first one
    pub fn latest_fps(&self) -> f64 {
        self.latest_fps.load()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            frames_published: self.counters.published.load(Ordering::Relaxed),
            read_failures: self.counters.failures.load(Ordering::Relaxed),
            notifications_dropped: self.hub.dropped(),
            latest_fps: self.latest_fps(),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

struct WorkerContext {
    session: SharedSession,
    config: CaptureConfiguration,
    live: Arc<LiveFrameBuffer>,
    hub: Arc<EventHub>,
    latest_fps: Arc<AtomicCell<f64>>,
    counters: Arc<Counters>,
    signal: StopSignal,
    pin_core: Option<usize>,
    /// Dropped when the worker returns, which is what `stop` waits on
    exited: Sender<()>,
}

impl WorkerContext {
    fn run(self) {
        if let Some(id) = self.pin_core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                warn!(core = id, "Failed to pin capture worker");
            }
        }
        debug!("Capture worker running");

        let transform = GeometryTransform::from_config(&self.config);
        let mut meter = FpsMeter::new();
        let mut scratch = Vec::new();

        while !self.signal.is_cancelled() {
            // Lock scope is the read only
            let raw = lock_session(&self.session).read_raw();
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    self.count_failure(&e);
                    continue;
                }
            };

            let started = Instant::now();
            let frame = match super::prepare_frame(raw, &self.config, &transform, &mut scratch) {
                Ok(frame) => frame,
                Err(e) => {
                    self.count_failure(&e);
                    continue;
                }
            };
            metrics::histogram!("livefps_transform_time_us")
                .record(started.elapsed().as_micros() as f64);

            let sequence = self.live.publish(&frame);
            self.counters.published.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("livefps_frames_published").increment(1);

            let now = Instant::now();
            if let Some(fps) = meter.tick_at(now) {
                self.latest_fps.store(fps);
                metrics::gauge!("livefps_capture_fps").set(fps);
                debug!(fps, sequence, "Rate update");
                self.hub.emit_rate(RateUpdate {
                    fps,
                    at: Local::now(),
                    instant: now,
                });
            }

            let timestamp = frame.timestamp;
            self.hub.emit_frame(FrameEvent {
                frame: frame.with_sequence(sequence),
                timestamp,
                sequence,
            });
        }

        debug!(
            published = self.counters.published.load(Ordering::Relaxed),
            "Capture worker exiting"
        );
        let _ = self.exited.send(());
    }

    /// Failed reads are retried immediately without limit
    fn count_failure(&self, error: &CaptureError) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("livefps_read_failures").increment(1);
        trace!(error = %error, "Frame dropped");
        thread::yield_now();
    }
}
