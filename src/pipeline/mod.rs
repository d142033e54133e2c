pub mod capture_loop;
pub mod events;
pub mod fps;
pub mod live_buffer;
pub mod transform;

pub use capture_loop::{CaptureLoop, LoopState, LoopStats, StopSignal};
pub use events::{Delivery, EventHub, FrameEvent, RateUpdate};
pub use fps::FpsMeter;
pub use live_buffer::{LatestFrame, LiveFrameBuffer};
pub use transform::GeometryTransform;

use crate::capture::config::CaptureConfiguration;
use crate::capture::decode;
use crate::capture::frame::{FrameSample, PixelFormat};
use crate::capture::source::RawFrame;
use crate::error::{CaptureError, Result};

/// Format frames will have once they leave [`prepare_frame`]
pub fn output_format(config: &CaptureConfiguration, device_format: PixelFormat) -> PixelFormat {
    if config.convert_rgb() {
        PixelFormat::Rgb24
    } else {
        device_format
    }
}

/// Fail early when the configured transform cannot be applied to what the
/// device produces.
pub fn check_transformable(config: &CaptureConfiguration, device_format: PixelFormat) -> Result<()> {
    if config.convert_rgb() {
        if let PixelFormat::Other(code) = device_format {
            return Err(CaptureError::Unsupported(format!("no RGB conversion for {code}")));
        }
    }
    let format = output_format(config, device_format);
    if GeometryTransform::from_config(config).supports(format) {
        Ok(())
    } else {
        Err(CaptureError::Unsupported(format!(
            "rotate/flip needs RGB conversion for {format} frames"
        )))
    }
}

/// Raw driver output -> optional RGB conversion -> rotate -> flip
pub fn prepare_frame(
    raw: RawFrame,
    config: &CaptureConfiguration,
    transform: &GeometryTransform,
    scratch: &mut Vec<u8>,
) -> Result<FrameSample> {
    if raw.data.is_empty() {
        return Err(CaptureError::CaptureFailed("device returned an empty frame".into()));
    }

    let mut frame = if config.convert_rgb() {
        let rgb = decode::to_rgb24(&raw)?;
        FrameSample::new(rgb.data, rgb.width, rgb.height, PixelFormat::Rgb24)
    } else {
        FrameSample::new(raw.data, raw.width, raw.height, raw.format)
    };
    frame.timestamp = raw.timestamp;
    frame.meta.device_timestamp = raw.device_timestamp;

    transform.apply(frame, scratch)
}
