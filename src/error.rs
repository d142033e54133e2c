//! Error taxonomy shared by the capture engine and the measurement harness

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// A configuration field failed validation at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The device could not be acquired
    #[error("device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("device session is not open")]
    NotOpen,

    #[error("capture loop is already running")]
    AlreadyRunning,

    /// A read after warm-up produced no usable data
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The device or pipeline cannot honour the requested combination
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CaptureError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn unavailable(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}
