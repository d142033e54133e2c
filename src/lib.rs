pub mod camera;
pub mod capture;
pub mod error;
pub mod measure;
pub mod pipeline;
#[cfg(feature = "v4l2")]
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use camera::{CameraService, LiveCamera};
pub use capture::{CaptureConfiguration, FrameSample, PixelFormat, RotateAngle};
pub use error::{CaptureError, Result};
pub use measure::{BatchGrid, MeasureWindow, MeasurementHarness};
pub use pipeline::{CaptureLoop, LoopState, StopSignal};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureSettings,
    pub pipeline: PipelineConfig,
    pub measure: MeasureConfig,
}

/// File form of [`CaptureConfiguration`]; validated by `to_configuration`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pixel_format: String,
    pub fourcc: Option<String>,
    pub rotate: u32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub convert_rgb: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stop_timeout_ms: u64,
    pub warmup_reads: usize,
    pub frame_channel_capacity: usize,
    pub pin_core: Option<usize>, // CPU pinning for the capture worker
    pub buffer_count: u32,       // Driver mmap buffers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub warmup_secs: f64,
    pub measure_secs: f64,
    pub output_dir: PathBuf,
    pub pixel_formats: Vec<String>,
    pub angles: Vec<u32>,
    pub target_fps: Vec<f64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30.0,
            pixel_format: "MJPG".into(),
            fourcc: None,
            rotate: 0,
            flip_horizontal: false,
            flip_vertical: false,
            convert_rgb: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 200,
            warmup_reads: capture::session::WARMUP_READS,
            frame_channel_capacity: 4,
            pin_core: None,
            buffer_count: 4,
        }
    }
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 2.0,
            measure_secs: 10.0,
            output_dir: PathBuf::from("measurements"),
            pixel_formats: vec!["MJPG".into(), "YUYV".into()],
            angles: vec![0, 90, 180, 270],
            target_fps: vec![30.0],
        }
    }
}

impl CaptureSettings {
    pub fn to_configuration(&self) -> Result<CaptureConfiguration> {
        CaptureConfiguration::builder(self.device.clone())
            .resolution(self.width, self.height)
            .target_fps(self.fps)
            .pixel_format(self.pixel_format.clone())
            .fourcc(self.fourcc.clone())
            .rotate_degrees(self.rotate)
            .flip(self.flip_horizontal, self.flip_vertical)
            .convert_rgb(self.convert_rgb)
            .build()
    }
}

impl MeasureConfig {
    pub fn window(&self) -> MeasureWindow {
        MeasureWindow::from_secs(self.warmup_secs, self.measure_secs)
    }

    pub fn grid(&self) -> BatchGrid {
        BatchGrid {
            pixel_formats: self.pixel_formats.clone(),
            angles: self.angles.clone(),
            target_fps: self.target_fps.clone(),
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `LIVEFPS__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("LIVEFPS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
