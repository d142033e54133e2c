//! Ownership of the native device handle

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, trace};

use crate::capture::config::CaptureConfiguration;
use crate::capture::frame::FrameSample;
use crate::capture::source::{AppliedFormat, FrameSource, RawFrame};
use crate::error::{CaptureError, Result};
use crate::pipeline::{self, GeometryTransform};

/// Reads discarded before a measurement-relevant read to flush stale
/// buffered frames
pub const WARMUP_READS: usize = 3;

/// A session shared between the caller and the capture worker. The mutex is
/// what guarantees one thread at a time touches the driver.
pub type SharedSession = Arc<Mutex<DeviceSession>>;

pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, DeviceSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DeviceSession {
    source: Box<dyn FrameSource>,
    device_id: Option<String>,
    applied: Option<AppliedFormat>,
    scratch: Vec<u8>,
}

impl DeviceSession {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            device_id: None,
            applied: None,
            scratch: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Acquire `device_id`, closing whatever was open before
    #[instrument(skip(self))]
    pub fn open(&mut self, device_id: &str) -> Result<()> {
        self.close();
        self.source.open(device_id).map_err(|e| match e {
            e @ CaptureError::DeviceUnavailable { .. } => e,
            other => CaptureError::unavailable(device_id, other),
        })?;
        self.device_id = Some(device_id.to_string());
        info!(device = device_id, "Device opened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.device_id.is_some() && self.source.is_open()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Best-effort; the returned format is what the driver settled on
    #[instrument(skip(self, config), fields(device = config.device_id()))]
    pub fn apply_configuration(&mut self, config: &CaptureConfiguration) -> Result<AppliedFormat> {
        self.ensure_open()?;
        let applied = self.source.apply_configuration(config)?;
        if (applied.width, applied.height) != (config.width(), config.height()) {
            debug!(
                requested = %format!("{}x{}", config.width(), config.height()),
                effective = %format!("{}x{}", applied.width, applied.height),
                "Driver clamped resolution"
            );
        }
        self.applied = Some(applied);
        Ok(applied)
    }

    /// What the last successful `apply_configuration` settled on
    pub fn applied_format(&self) -> Option<AppliedFormat> {
        self.applied
    }

    /// One blocking read straight from the driver
    pub fn read_raw(&mut self) -> Result<RawFrame> {
        self.ensure_open()?;
        self.source.read()
    }

    /// Discard `reads` frames; returns how many reads succeeded
    pub fn warm_up(&mut self, reads: usize) -> Result<usize> {
        self.ensure_open()?;
        let mut ok = 0;
        for _ in 0..reads {
            match self.source.read() {
                Ok(_) => ok += 1,
                Err(e) => trace!(error = %e, "Warm-up read failed"),
            }
        }
        Ok(ok)
    }

    /// Configure, flush stale frames, then read and transform one live frame.
    /// One-shot frames carry sequence number 0.
    #[instrument(skip(self, config), fields(device = config.device_id()))]
    pub fn capture_one(&mut self, config: &CaptureConfiguration) -> Result<FrameSample> {
        let applied = self.apply_configuration(config)?;
        pipeline::check_transformable(config, applied.format)?;
        self.warm_up(WARMUP_READS)?;

        let raw = self
            .source
            .read()
            .map_err(|e| CaptureError::CaptureFailed(format!("read after warm-up: {e}")))?;
        let transform = GeometryTransform::from_config(config);
        let frame = pipeline::prepare_frame(raw, config, &transform, &mut self.scratch)?;
        debug!(
            width = frame.width(),
            height = frame.height(),
            bytes = frame.data.len(),
            "Captured one frame"
        );
        Ok(frame)
    }

    /// Release the device. Safe to call repeatedly or before any open.
    pub fn close(&mut self) {
        if let Some(device) = self.device_id.take() {
            info!(device = %device, "Device closed");
        }
        self.source.close();
        self.applied = None;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CaptureError::NotOpen)
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// `open` on the blocking pool, so async callers never wait on driver I/O
pub async fn open_async(session: SharedSession, device_id: String) -> Result<()> {
    tokio::task::spawn_blocking(move || lock_session(&session).open(&device_id)).await?
}

pub async fn close_async(session: SharedSession) -> Result<()> {
    tokio::task::spawn_blocking(move || lock_session(&session).close()).await?;
    Ok(())
}

pub async fn capture_one_async(
    session: SharedSession,
    config: CaptureConfiguration,
) -> Result<FrameSample> {
    tokio::task::spawn_blocking(move || lock_session(&session).capture_one(&config)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticSource;
    use crate::capture::PixelFormat;

    fn config() -> CaptureConfiguration {
        CaptureConfiguration::builder("synthetic0")
            .resolution(64, 48)
            .target_fps(1000.0)
            .pixel_format("RGB3")
            .rotate_degrees(90)
            .build()
            .unwrap()
    }

    #[test]
    fn operations_before_open_fail_with_not_open() {
        let mut session = DeviceSession::new(SyntheticSource::new());
        assert!(matches!(session.capture_one(&config()), Err(CaptureError::NotOpen)));
        assert!(matches!(session.read_raw(), Err(CaptureError::NotOpen)));
        session.close();
        session.close();
    }

    #[test]
    fn open_failure_is_device_unavailable() {
        let mut session = DeviceSession::new(SyntheticSource::new());
        assert!(matches!(
            session.open("/dev/does-not-exist"),
            Err(CaptureError::DeviceUnavailable { .. })
        ));
        assert!(!session.is_open());
    }

    #[test]
    fn capture_one_flushes_then_transforms() {
        let source = SyntheticSource::new();
        let reads = source.read_counter();
        let mut session = DeviceSession::new(source);
        session.open("synthetic0").unwrap();

        let frame = session.capture_one(&config()).unwrap();
        assert_eq!((frame.width(), frame.height()), (48, 64));
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!(frame.sequence(), 0);
        assert_eq!(reads.get(), WARMUP_READS as u64 + 1);
    }

    #[test]
    fn odd_sized_subsampled_frames_convert() {
        let mut session = DeviceSession::new(SyntheticSource::new().unpaced());
        session.open("synthetic0").unwrap();
        for (fmt, w, h) in [("NV12", 4, 3), ("NV12", 5, 5), ("YUYV", 3, 2)] {
            let config = CaptureConfiguration::builder("synthetic0")
                .resolution(w, h)
                .pixel_format(fmt)
                .rotate_degrees(90)
                .build()
                .unwrap();
            let frame = session.capture_one(&config).unwrap();
            assert_eq!((frame.width(), frame.height()), (h, w), "{fmt} {w}x{h}");
            assert_eq!(frame.data.len(), (w * h * 3) as usize);
        }
    }

    #[test]
    fn capture_one_reports_failed_read() {
        let mut session = DeviceSession::new(SyntheticSource::new().fail_reads_every(1));
        session.open("synthetic0").unwrap();
        assert!(matches!(
            session.capture_one(&config()),
            Err(CaptureError::CaptureFailed(_))
        ));
    }

    #[test]
    fn reopening_replaces_the_handle() {
        let mut session = DeviceSession::new(SyntheticSource::new());
        session.open("synthetic0").unwrap();
        session.open("synthetic1").unwrap();
        assert_eq!(session.device_id(), Some("synthetic1"));
        session.close();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn async_wrappers_run_off_thread() {
        let session = DeviceSession::new(SyntheticSource::new()).into_shared();
        open_async(session.clone(), "synthetic0".into()).await.unwrap();
        let frame = capture_one_async(session.clone(), config()).await.unwrap();
        assert_eq!(frame.width(), 48);
        close_async(session.clone()).await.unwrap();
        assert!(!lock_session(&session).is_open());
    }
}
