//! Validated, immutable capture configuration

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capture::frame::{FourCc, PixelFormat};
use crate::error::{CaptureError, Result};

/// Frame rates closer than this compare equal
pub const FPS_EPSILON: f64 = 1e-6;

/// Axis-aligned clockwise rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RotateAngle {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl RotateAngle {
    pub const ALL: [RotateAngle; 4] = [Self::Deg0, Self::Deg90, Self::Deg180, Self::Deg270];

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<u32> for RotateAngle {
    type Error = CaptureError;

    fn try_from(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(CaptureError::invalid(format!(
                "rotate angle must be one of 0, 90, 180, 270; got {other}"
            ))),
        }
    }
}

impl From<RotateAngle> for u32 {
    fn from(angle: RotateAngle) -> Self {
        angle.degrees()
    }
}

impl fmt::Display for RotateAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

/// Everything a capture session needs to know about one run.
///
/// Only obtainable through [`CaptureConfigurationBuilder::build`], so every
/// instance in circulation has passed validation.
#[derive(Debug, Clone)]
pub struct CaptureConfiguration {
    device_id: String,
    width: u32,
    height: u32,
    target_fps: f64,
    pixel_format: String,
    rotate: RotateAngle,
    flip_horizontal: bool,
    flip_vertical: bool,
    fourcc: Option<FourCc>,
    convert_rgb: bool,
}

impl CaptureConfiguration {
    pub fn builder(device_id: impl Into<String>) -> CaptureConfigurationBuilder {
        CaptureConfigurationBuilder::new(device_id)
    }

    pub fn to_builder(&self) -> CaptureConfigurationBuilder {
        CaptureConfigurationBuilder {
            device_id: self.device_id.clone(),
            width: self.width,
            height: self.height,
            target_fps: self.target_fps,
            pixel_format: self.pixel_format.clone(),
            rotate_degrees: self.rotate.degrees(),
            flip_horizontal: self.flip_horizontal,
            flip_vertical: self.flip_vertical,
            fourcc: self.fourcc.map(String::from),
            convert_rgb: self.convert_rgb,
        }
    }

    pub fn with_pixel_format(&self, pixel_format: &str) -> Result<Self> {
        self.to_builder().pixel_format(pixel_format).build()
    }

    pub fn with_rotate_degrees(&self, degrees: u32) -> Result<Self> {
        self.to_builder().rotate_degrees(degrees).build()
    }

    pub fn with_target_fps(&self, fps: f64) -> Result<Self> {
        self.to_builder().target_fps(fps).build()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// The pixel-format hint as given, upper-cased
    pub fn pixel_format(&self) -> &str {
        &self.pixel_format
    }

    pub fn rotate(&self) -> RotateAngle {
        self.rotate
    }

    pub fn flip_horizontal(&self) -> bool {
        self.flip_horizontal
    }

    pub fn flip_vertical(&self) -> bool {
        self.flip_vertical
    }

    pub fn fourcc(&self) -> Option<FourCc> {
        self.fourcc
    }

    pub fn convert_rgb(&self) -> bool {
        self.convert_rgb
    }

    /// Format to request from the driver: the fourcc override when present,
    /// otherwise the hint resolved through the usual aliases.
    pub fn requested_format(&self) -> Option<PixelFormat> {
        if let Some(code) = self.fourcc {
            return Some(PixelFormat::from_fourcc(code));
        }
        let code = match self.pixel_format.as_str() {
            "MJPEG" | "JPEG" => FourCc::new(b"MJPG"),
            "YUY2" | "YUV422" => FourCc::new(b"YUYV"),
            "RGB" | "RGB24" => FourCc::new(b"RGB3"),
            "BGR" | "BGR24" => FourCc::new(b"BGR3"),
            "GRAY" | "GRAY8" | "Y8" => FourCc::new(b"GREY"),
            other => other.parse().ok()?,
        };
        Some(PixelFormat::from_fourcc(code))
    }

    /// True when rotate and flip are all no-ops
    pub fn is_identity_transform(&self) -> bool {
        self.rotate == RotateAngle::Deg0 && !self.flip_horizontal && !self.flip_vertical
    }

    /// Frame dimensions after the geometric transform
    pub fn output_dimensions(&self) -> (u32, u32) {
        if self.rotate.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

impl PartialEq for CaptureConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
            && self.width == other.width
            && self.height == other.height
            && (self.target_fps - other.target_fps).abs() < FPS_EPSILON
            && self.pixel_format == other.pixel_format
            && self.rotate == other.rotate
            && self.flip_horizontal == other.flip_horizontal
            && self.flip_vertical == other.flip_vertical
            && self.fourcc == other.fourcc
            && self.convert_rgb == other.convert_rgb
    }
}

/// Loose, unvalidated form of [`CaptureConfiguration`]
#[derive(Debug, Clone)]
pub struct CaptureConfigurationBuilder {
    device_id: String,
    width: u32,
    height: u32,
    target_fps: f64,
    pixel_format: String,
    rotate_degrees: u32,
    flip_horizontal: bool,
    flip_vertical: bool,
    fourcc: Option<String>,
    convert_rgb: bool,
}

impl CaptureConfigurationBuilder {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            width: 640,
            height: 480,
            target_fps: 30.0,
            pixel_format: "MJPG".into(),
            rotate_degrees: 0,
            flip_horizontal: false,
            flip_vertical: false,
            fourcc: None,
            convert_rgb: true,
        }
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn pixel_format(mut self, hint: impl Into<String>) -> Self {
        self.pixel_format = hint.into();
        self
    }

    pub fn rotate_degrees(mut self, degrees: u32) -> Self {
        self.rotate_degrees = degrees;
        self
    }

    pub fn flip(mut self, horizontal: bool, vertical: bool) -> Self {
        self.flip_horizontal = horizontal;
        self.flip_vertical = vertical;
        self
    }

    pub fn fourcc(mut self, code: Option<impl Into<String>>) -> Self {
        self.fourcc = code.map(Into::into);
        self
    }

    pub fn convert_rgb(mut self, convert: bool) -> Self {
        self.convert_rgb = convert;
        self
    }

    pub fn build(self) -> Result<CaptureConfiguration> {
        if self.device_id.trim().is_empty() {
            return Err(CaptureError::invalid("device identifier must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::invalid(format!(
                "resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(CaptureError::invalid(format!(
                "target frame rate must be positive, got {}",
                self.target_fps
            )));
        }
        let pixel_format = self.pixel_format.trim().to_ascii_uppercase();
        if pixel_format.is_empty() {
            return Err(CaptureError::invalid("pixel format hint must not be empty"));
        }
        let rotate = RotateAngle::try_from(self.rotate_degrees)?;
        let fourcc = self.fourcc.as_deref().map(str::parse::<FourCc>).transpose()?;

        Ok(CaptureConfiguration {
            device_id: self.device_id,
            width: self.width,
            height: self.height,
            target_fps: self.target_fps,
            pixel_format,
            rotate,
            flip_horizontal: self.flip_horizontal,
            flip_vertical: self.flip_vertical,
            fourcc,
            convert_rgb: self.convert_rgb,
        })
    }
}
