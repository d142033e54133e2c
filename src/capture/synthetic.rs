//! Deterministic test-pattern device.
//!
//! Paces reads at the configured frame rate and can be told to misbehave:
//! refuse to open, fail every Nth read, or block inside `read` for a while.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::capture::config::CaptureConfiguration;
use crate::capture::frame::{yuyv_stride, PixelFormat};
use crate::capture::source::{AppliedFormat, FrameSource, RawFrame};
use crate::error::{CaptureError, Result};

/// Device identifiers accepted by [`SyntheticSource::open`] start with this
pub const DEVICE_PREFIX: &str = "synthetic";

const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;
const MAX_FPS: f64 = 1000.0;

/// Shared view of how many reads a source has served
#[derive(Debug, Clone, Default)]
pub struct ReadCounter(Arc<AtomicU64>);

impl ReadCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct SyntheticSource {
    formats: Vec<PixelFormat>,
    fail_every: Option<u64>,
    read_delay: Option<Duration>,
    pace: bool,
    opened: Option<String>,
    applied: Option<AppliedFormat>,
    reads: ReadCounter,
    frames: u64,
    next_due: Option<Instant>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            formats: vec![
                PixelFormat::Rgb24,
                PixelFormat::Bgr24,
                PixelFormat::Gray8,
                PixelFormat::Yuyv,
                PixelFormat::Nv12,
            ],
            fail_every: None,
            read_delay: None,
            pace: true,
            opened: None,
            applied: None,
            reads: ReadCounter::default(),
            frames: 0,
            next_due: None,
        }
    }

    /// Restrict the formats `apply_configuration` accepts
    pub fn with_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Every `n`th read fails; `1` makes every read fail
    pub fn fail_reads_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Block inside every read, simulating a stuck driver
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Serve frames as fast as possible instead of at the target rate
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }

    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }

    fn wait_for_slot(&mut self, fps: f64) {
        if !self.pace {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / fps);
        let now = Instant::now();
        let due = match self.next_due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                due
            }
            _ => now,
        };
        self.next_due = Some(due + interval);
    }

    fn render(&self, applied: &AppliedFormat) -> Vec<u8> {
        let (w, h) = (applied.width as usize, applied.height as usize);
        let t = self.frames as u8;
        match applied.format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let mut data = Vec::with_capacity(w * h * 3);
                for y in 0..h {
                    for x in 0..w {
                        data.extend_from_slice(&[x as u8, y as u8, t]);
                    }
                }
                data
            }
            PixelFormat::Gray8 => (0..h)
                .flat_map(|y| (0..w).map(move |x| (x + y) as u8 ^ t))
                .collect(),
            PixelFormat::Yuyv => (0..h)
                .flat_map(|y| {
                    (0..yuyv_stride(w) / 2).flat_map(move |x| [((x + y) as u8).wrapping_add(t), 128])
                })
                .collect(),
            PixelFormat::Nv12 => {
                let mut data: Vec<u8> = (0..w * h).map(|i| (i as u8).wrapping_add(t)).collect();
                data.resize(applied.format.frame_len(applied.width, applied.height).unwrap_or(0), 128);
                data
            }
            // apply_configuration never admits these
            PixelFormat::Mjpeg | PixelFormat::Other(_) => Vec::new(),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, device_id: &str) -> Result<()> {
        if !device_id.starts_with(DEVICE_PREFIX) {
            return Err(CaptureError::unavailable(device_id, "no such synthetic device"));
        }
        self.opened = Some(device_id.to_string());
        self.frames = 0;
        self.next_due = None;
        Ok(())
    }

    fn apply_configuration(&mut self, config: &CaptureConfiguration) -> Result<AppliedFormat> {
        if self.opened.is_none() {
            return Err(CaptureError::NotOpen);
        }
        let format = config
            .requested_format()
            .filter(|f| self.formats.contains(f))
            .ok_or_else(|| {
                CaptureError::Unsupported(format!(
                    "synthetic device cannot produce {}",
                    config.pixel_format()
                ))
            })?;
        let applied = AppliedFormat {
            width: config.width().min(MAX_WIDTH),
            height: config.height().min(MAX_HEIGHT),
            format,
            fps: config.target_fps().min(MAX_FPS),
        };
        self.applied = Some(applied);
        self.next_due = None;
        Ok(applied)
    }

    fn read(&mut self) -> Result<RawFrame> {
        if self.opened.is_none() {
            return Err(CaptureError::NotOpen);
        }
        let applied = self
            .applied
            .ok_or_else(|| CaptureError::CaptureFailed("device not configured".into()))?;

        if let Some(delay) = self.read_delay {
            thread::sleep(delay);
        }
        self.wait_for_slot(applied.fps);

        let n = self.reads.bump();
        if let Some(every) = self.fail_every {
            if n % every == 0 {
                return Err(CaptureError::CaptureFailed(format!("injected failure on read {n}")));
            }
        }

        self.frames += 1;
        Ok(RawFrame {
            data: Bytes::from(self.render(&applied)),
            width: applied.width,
            height: applied.height,
            format: applied.format,
            timestamp: Instant::now(),
            device_timestamp: None,
        })
    }

    fn close(&mut self) {
        self.opened = None;
        self.applied = None;
    }

    fn is_open(&self) -> bool {
        self.opened.is_some()
    }
}
