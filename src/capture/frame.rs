use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::CaptureError;

/// One decoded image sample produced by a single device read.
///
/// The pixel data is immutable once built, so handing a clone to a
/// subscriber transfers an independent view with no shared mutable state.
#[derive(Clone)]
pub struct FrameSample {
    pub data: Bytes,

    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// 0 for one-shot captures, 1.. within a live run
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl FrameSample {
    pub fn new(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            meta: FrameMetadata {
                sequence: 0,
                width,
                height,
                format,
                device_timestamp: None,
            },
            timestamp: Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.meta.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }
}

impl fmt::Debug for FrameSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSample")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Four-character pixel format code, e.g. `MJPG`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Construction only admits printable ASCII
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl FromStr for FourCc {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(CaptureError::invalid(format!(
                "fourcc must be exactly four printable ASCII characters, got {s:?}"
            )));
        }
        let mut code = [0u8; 4];
        code.copy_from_slice(bytes);
        Ok(Self(code))
    }
}

impl TryFrom<String> for FourCc {
    type Error = CaptureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel formats we know how to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
    Yuyv,
    Nv12,
    Mjpeg,
    /// Anything else the driver may offer; passed through untouched
    Other(FourCc),
}

impl PixelFormat {
    pub fn from_fourcc(code: FourCc) -> Self {
        match code.as_bytes() {
            b"RGB3" => Self::Rgb24,
            b"BGR3" => Self::Bgr24,
            b"GREY" => Self::Gray8,
            b"YUYV" | b"YUY2" => Self::Yuyv,
            b"NV12" => Self::Nv12,
            b"MJPG" => Self::Mjpeg,
            _ => Self::Other(code),
        }
    }

    pub fn fourcc(&self) -> FourCc {
        match self {
            Self::Rgb24 => FourCc::new(b"RGB3"),
            Self::Bgr24 => FourCc::new(b"BGR3"),
            Self::Gray8 => FourCc::new(b"GREY"),
            Self::Yuyv => FourCc::new(b"YUYV"),
            Self::Nv12 => FourCc::new(b"NV12"),
            Self::Mjpeg => FourCc::new(b"MJPG"),
            Self::Other(code) => *code,
        }
    }

    /// Size of one addressable pixel, for formats where every pixel owns
    /// its own bytes. Subsampled and compressed formats return `None`
    /// and cannot be rotated or flipped without conversion.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Rgb24 | Self::Bgr24 => Some(3),
            Self::Gray8 => Some(1),
            _ => None,
        }
    }

    /// Expected buffer length for an uncompressed frame. Chroma of the
    /// subsampled formats covers odd edges with a whole extra sample.
    pub fn frame_len(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        let pixels = w * h;
        match self {
            Self::Rgb24 | Self::Bgr24 => Some(pixels * 3),
            Self::Gray8 => Some(pixels),
            Self::Yuyv => Some(yuyv_stride(w) * h),
            Self::Nv12 => Some(pixels + nv12_chroma_stride(w) * h.div_ceil(2)),
            Self::Mjpeg | Self::Other(_) => None,
        }
    }
}

/// Bytes per YUYV row; an odd trailing pixel still takes a full macropixel
pub fn yuyv_stride(width: usize) -> usize {
    width.div_ceil(2) * 4
}

/// Bytes per interleaved UV row of an NV12 frame
pub fn nv12_chroma_stride(width: usize) -> usize {
    width.div_ceil(2) * 2
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fourcc(), f)
    }
}
