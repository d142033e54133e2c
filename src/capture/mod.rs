pub mod config;
pub mod decode;
pub mod frame;
pub mod session;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use config::{CaptureConfiguration, CaptureConfigurationBuilder, RotateAngle};
pub use frame::{FourCc, FrameSample, PixelFormat};
pub use session::{DeviceSession, SharedSession};
pub use source::{AppliedFormat, FrameSource, RawFrame};
pub use synthetic::SyntheticSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
