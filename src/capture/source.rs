//! Driver boundary consumed by [`DeviceSession`](super::session::DeviceSession)

use bytes::Bytes;
use std::time::{Duration, Instant};

use crate::capture::config::CaptureConfiguration;
use crate::capture::frame::PixelFormat;
use crate::error::Result;

/// Undecoded bytes exactly as the driver handed them over
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Instant,
    pub device_timestamp: Option<Duration>,
}

/// What the driver actually settled on after a configuration request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedFormat {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: f64,
}

/// A native imaging device.
///
/// Implementations own the driver handle and are only ever driven from one
/// thread at a time; `DeviceSession` enforces that through its mutex.
pub trait FrameSource: Send {
    /// Acquire the device, failing with `DeviceUnavailable`
    fn open(&mut self, device_id: &str) -> Result<()>;

    /// Best-effort: hardware may clamp width, height or rate. A pixel format
    /// the device cannot produce at all is reported as `Unsupported`.
    fn apply_configuration(&mut self, config: &CaptureConfiguration) -> Result<AppliedFormat>;

    /// Blocking read of the next frame
    fn read(&mut self) -> Result<RawFrame>;

    /// Release the handle; a no-op when nothing is open
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
