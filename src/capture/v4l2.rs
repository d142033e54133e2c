//! V4L2 device backend with memory-mapped streaming

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::config::CaptureConfiguration;
use crate::capture::frame::{FourCc, PixelFormat};
use crate::capture::source::{AppliedFormat, FrameSource, RawFrame};
use crate::error::{CaptureError, Result};

/// V4L2 capture device
pub struct V4l2Source {
    stream: Option<MmapStream<'static>>,
    device: Option<Box<Device>>,
    path: Option<String>,
    buffer_count: u32,
    applied: Option<AppliedFormat>,
    /// Bytes per line reported by the driver, when it pads rows
    stride: Option<usize>,
}

impl V4l2Source {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            stream: None,
            device: None,
            path: None,
            buffer_count: buffer_count.max(1),
            applied: None,
            stride: None,
        }
    }

    fn device(&self) -> Result<&Device> {
        self.device.as_deref().ok_or(CaptureError::NotOpen)
    }
}

impl Default for V4l2Source {
    fn default() -> Self {
        Self::new(crate::CONFIG.load().pipeline.buffer_count)
    }
}

/// `/dev/videoN` paths, or a bare index `N`
fn open_device(device_id: &str) -> std::io::Result<Device> {
    match device_id.parse::<usize>() {
        Ok(index) => Device::new(index),
        Err(_) => Device::with_path(device_id),
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip(self))]
    fn open(&mut self, device_id: &str) -> Result<()> {
        self.close();
        let device = open_device(device_id).map_err(|e| CaptureError::unavailable(device_id, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::unavailable(device_id, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::unavailable(
                device_id,
                "device doesn't support video capture",
            ));
        }

        self.device = Some(Box::new(device));
        self.path = Some(device_id.to_string());
        Ok(())
    }

    fn apply_configuration(&mut self, config: &CaptureConfiguration) -> Result<AppliedFormat> {
        // Formats cannot change while buffers are mapped
        self.stream = None;

        let requested = config.requested_format().ok_or_else(|| {
            CaptureError::Unsupported(format!("unknown pixel format {}", config.pixel_format()))
        })?;
        let device = self.device()?;

        let mut fmt = device.format()?;
        fmt.width = config.width();
        fmt.height = config.height();
        fmt.fourcc = FourCC::new(requested.fourcc().as_bytes());
        let actual = device.set_format(&fmt)?;

        let format = PixelFormat::from_fourcc(FourCc::new(&actual.fourcc.repr));
        if format != requested {
            return Err(CaptureError::Unsupported(format!(
                "device offered {format} instead of {requested}"
            )));
        }

        // Rate is best-effort; many UVC devices ignore it
        let fps = match device.set_params(&Parameters::with_fps(config.target_fps().round() as u32)) {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator as f64 / params.interval.numerator as f64
            }
            Ok(_) => config.target_fps(),
            Err(e) => {
                warn!(error = %e, "Failed to set frame interval");
                config.target_fps()
            }
        };

        let packed = format
            .bytes_per_pixel()
            .map(|bpp| actual.width as usize * bpp);
        let stride = match packed {
            Some(row) if (actual.stride as usize) > row => Some(actual.stride as usize),
            _ => None,
        };

        let stream = MmapStream::with_buffers(device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        self.stride = stride;
        info!(
            "Capture stream started: {}x{} {} @ {:.2} fps with {} buffers",
            actual.width, actual.height, format, fps, self.buffer_count
        );

        let applied = AppliedFormat {
            width: actual.width,
            height: actual.height,
            format,
            fps,
        };
        self.applied = Some(applied);
        Ok(applied)
    }

    fn read(&mut self) -> Result<RawFrame> {
        let applied = self
            .applied
            .ok_or_else(|| CaptureError::CaptureFailed("stream not started".into()))?;
        let stride = self.stride;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::CaptureFailed("stream not started".into()))?;

        let timestamp = Instant::now();
        let (buf, meta) = stream.next()?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        if used == 0 {
            return Err(CaptureError::CaptureFailed("driver returned an empty buffer".into()));
        }

        let data = match (stride, applied.format.bytes_per_pixel()) {
            (Some(stride), Some(bpp)) => {
                let row = applied.width as usize * bpp;
                let mut packed = Vec::with_capacity(row * applied.height as usize);
                for line in buf[..used].chunks(stride).take(applied.height as usize) {
                    packed.extend_from_slice(&line[..row.min(line.len())]);
                }
                Bytes::from(packed)
            }
            _ => Bytes::copy_from_slice(&buf[..used]),
        };

        Ok(RawFrame {
            data,
            width: applied.width,
            height: applied.height,
            format: applied.format,
            timestamp,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        })
    }

    fn close(&mut self) {
        self.stream = None;
        if let Some(path) = self.path.take() {
            debug!(device = %path, "Releasing V4L2 device");
        }
        self.device = None;
        self.applied = None;
        self.stride = None;
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }
}
