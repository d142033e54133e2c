use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::frame::{FourCc, PixelFormat};
use crate::error::{CaptureError, Result};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
    pub formats: Vec<FourCc>,
}

impl FoundDevice {
    /// Preferred capture format: MJPEG, then YUYV, then whatever comes first
    pub fn preferred_format(&self) -> Option<PixelFormat> {
        let formats: Vec<PixelFormat> = self.formats.iter().copied().map(PixelFormat::from_fourcc).collect();
        [PixelFormat::Mjpeg, PixelFormat::Yuyv]
            .into_iter()
            .find(|f| formats.contains(f))
            .or_else(|| formats.first().copied())
    }
}

/// Enumerate capture-capable `/dev/videoN` nodes
pub fn list_devices() -> Vec<FoundDevice> {
    use std::path::Path;

    let mut found = Vec::new();
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Metadata nodes share the driver but cannot stream frames
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let formats: Vec<FourCc> = dev
            .enum_formats()
            .map(|fmts| fmts.iter().map(|f| FourCc::new(&f.fourcc.repr)).collect())
            .unwrap_or_default();
        found.push(FoundDevice {
            path,
            card: caps.card,
            formats,
        });
    }
    found
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    let devices = list_devices();
    let best = devices
        .iter()
        .find(|d| d.preferred_format() == Some(PixelFormat::Mjpeg))
        .or_else(|| devices.iter().find(|d| d.preferred_format() == Some(PixelFormat::Yuyv)))
        .or_else(|| devices.first())
        .cloned()
        .ok_or_else(|| CaptureError::unavailable("auto", "no suitable capture device found"))?;

    info!("Found device: {} - {}", best.path, best.card);
    Ok(best)
}
