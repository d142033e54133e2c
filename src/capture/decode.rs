//! Conversion of driver output to interleaved 8-bit RGB

use bytes::Bytes;
use zune_jpeg::JpegDecoder;

use crate::capture::frame::{nv12_chroma_stride, yuyv_stride, PixelFormat};
use crate::capture::source::RawFrame;
use crate::error::{CaptureError, Result};

/// Decoded RGB24 image
#[derive(Debug)]
pub struct Rgb24 {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

pub fn to_rgb24(raw: &RawFrame) -> Result<Rgb24> {
    let (w, h) = (raw.width, raw.height);
    let data = match raw.format {
        PixelFormat::Rgb24 => {
            let len = expect_len(raw, PixelFormat::Rgb24)?;
            return Ok(Rgb24 {
                data: raw.data.slice(..len),
                width: w,
                height: h,
            });
        }
        PixelFormat::Bgr24 => {
            let len = expect_len(raw, PixelFormat::Bgr24)?;
            raw.data[..len]
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect()
        }
        PixelFormat::Gray8 => {
            let len = expect_len(raw, PixelFormat::Gray8)?;
            raw.data[..len].iter().flat_map(|&y| [y, y, y]).collect()
        }
        PixelFormat::Yuyv => {
            let len = expect_len(raw, PixelFormat::Yuyv)?;
            yuyv_to_rgb(&raw.data[..len], w as usize, h as usize)
        }
        PixelFormat::Nv12 => {
            let len = expect_len(raw, PixelFormat::Nv12)?;
            nv12_to_rgb(&raw.data[..len], w as usize, h as usize)
        }
        PixelFormat::Mjpeg => return decode_mjpeg(&raw.data),
        PixelFormat::Other(code) => {
            return Err(CaptureError::Unsupported(format!(
                "no RGB conversion for pixel format {code}"
            )))
        }
    };

    Ok(Rgb24 {
        data: Bytes::from(data),
        width: w,
        height: h,
    })
}

fn expect_len(raw: &RawFrame, format: PixelFormat) -> Result<usize> {
    let expected = format.frame_len(raw.width, raw.height).unwrap_or(0);
    if raw.data.len() < expected {
        return Err(CaptureError::CaptureFailed(format!(
            "short {format} frame: {} of {expected} bytes",
            raw.data.len()
        )));
    }
    Ok(expected)
}

fn decode_mjpeg(data: &[u8]) -> Result<Rgb24> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::CaptureFailed(format!("MJPEG decode: {e}")))?;
    let (w, h) = decoder
        .dimensions()
        .ok_or_else(|| CaptureError::CaptureFailed("MJPEG frame without dimensions".into()))?;

    // Single-channel JPEGs come back as luma only
    let pixels = if pixels.len() == w * h {
        pixels.iter().flat_map(|&y| [y, y, y]).collect()
    } else {
        pixels
    };

    Ok(Rgb24 {
        data: Bytes::from(pixels),
        width: w as u32,
        height: h as u32,
    })
}

/// BT.601 limited-range integer conversion
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// `src` is exactly `yuyv_stride(width) * height` bytes
fn yuyv_to_rgb(src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height * 3);
    for row in src.chunks_exact(yuyv_stride(width)).take(height) {
        let mut left = width;
        for chunk in row.chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            out.extend_from_slice(&yuv_to_rgb(y0, u, v));
            if left > 1 {
                out.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            left = left.saturating_sub(2);
        }
    }
    out
}

/// `src` is exactly `PixelFormat::Nv12.frame_len(width, height)` bytes
fn nv12_to_rgb(src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let (luma, chroma) = src.split_at(width * height);
    let stride = nv12_chroma_stride(width);
    let mut out = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let uv_row = &chroma[(row / 2) * stride..][..stride];
        for col in 0..width {
            let y = luma[row * width + col];
            let uv = (col / 2) * 2;
            let (u, v) = (uv_row[uv], uv_row[(uv + 1).min(stride - 1)]);
            out.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn raw(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> RawFrame {
        RawFrame {
            data: Bytes::from(data),
            width,
            height,
            format,
            timestamp: Instant::now(),
            device_timestamp: None,
        }
    }

    #[test]
    fn bgr_is_swizzled() {
        let out = to_rgb24(&raw(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr24)).unwrap();
        assert_eq!(&out.data[..], &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn yuyv_grey_maps_to_grey() {
        // Y=126 with neutral chroma is mid grey
        let out = to_rgb24(&raw(vec![126, 128, 126, 128], 2, 1, PixelFormat::Yuyv)).unwrap();
        assert_eq!(out.data.len(), 6);
        assert!(out.data.iter().all(|&c| c == out.data[0]));
    }

    #[test]
    fn nv12_produces_full_frame() {
        let out = to_rgb24(&raw(vec![16; 4 * 2 + 4], 4, 2, PixelFormat::Nv12)).unwrap();
        assert_eq!(out.data.len(), 4 * 2 * 3);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = to_rgb24(&raw(vec![0; 5], 2, 1, PixelFormat::Rgb24)).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
    }

    #[test]
    fn unknown_formats_are_unsupported() {
        let fmt = PixelFormat::Other(crate::capture::frame::FourCc::new(b"H264"));
        assert!(matches!(
            to_rgb24(&raw(vec![0; 4], 1, 1, fmt)),
            Err(CaptureError::Unsupported(_))
        ));
    }

    #[test]
    fn odd_sized_nv12_uses_padded_chroma() {
        // 4x3 luma, two chroma rows of 4 bytes
        let out = to_rgb24(&raw(vec![16; 12 + 8], 4, 3, PixelFormat::Nv12)).unwrap();
        assert_eq!(out.data.len(), 4 * 3 * 3);

        let out = to_rgb24(&raw(vec![16; 9 + 8], 3, 3, PixelFormat::Nv12)).unwrap();
        assert_eq!(out.data.len(), 3 * 3 * 3);

        let short = to_rgb24(&raw(vec![16; 18], 4, 3, PixelFormat::Nv12));
        assert!(matches!(short, Err(CaptureError::CaptureFailed(_))));
    }

    #[test]
    fn odd_width_yuyv_drops_the_padding_pixel() {
        // 3x2: each row is two macropixels
        let out = to_rgb24(&raw([126u8, 128].repeat(8), 3, 2, PixelFormat::Yuyv)).unwrap();
        assert_eq!(out.data.len(), 3 * 2 * 3);
    }

    // Baseline JPEGs with flat 8x8 blocks: pure red (Y 76, Cb 85, Cr 255) and luma 200
    const RED_8X16: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
        0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43,
        0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x10,
        0x00, 0x08, 0x03, 0x01, 0x11, 0x00, 0x02, 0x11, 0x00, 0x03, 0x11, 0x00,
        0xFF, 0xC4, 0x00, 0x1F, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
        0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0xFF, 0xC4, 0x00,
        0x15, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xDA, 0x00, 0x0C,
        0x03, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x3F, 0x00, 0x92, 0xF9,
        0x2A, 0x72, 0xBF, 0x80, 0x00, 0x00, 0xFF, 0xD9,
    ];

    const GREY_16X8: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
        0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43,
        0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08,
        0x00, 0x10, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00, 0x1F, 0x00, 0x00,
        0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
        0x09, 0x0A, 0x0B, 0xFF, 0xC4, 0x00, 0x15, 0x10, 0x00, 0x02, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x01, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00,
        0xA9, 0x00, 0x03, 0xFF, 0xD9,
    ];

    #[test]
    fn mjpeg_colour_frames_decode_to_rgb() {
        let out = to_rgb24(&raw(RED_8X16.to_vec(), 8, 16, PixelFormat::Mjpeg)).unwrap();
        assert_eq!((out.width, out.height), (8, 16));
        assert_eq!(out.data.len(), 8 * 16 * 3);
        for px in out.data.chunks_exact(3) {
            assert!(px[0] > 200 && px[1] < 60 && px[2] < 60, "{px:?}");
        }
    }

    #[test]
    fn mjpeg_greyscale_frames_are_expanded() {
        let out = to_rgb24(&raw(GREY_16X8.to_vec(), 16, 8, PixelFormat::Mjpeg)).unwrap();
        assert_eq!((out.width, out.height), (16, 8));
        assert_eq!(out.data.len(), 16 * 8 * 3);
        assert!(out.data.iter().all(|&c| c.abs_diff(200) <= 2));
    }

    #[test]
    fn corrupt_mjpeg_is_a_failed_capture() {
        let out = to_rgb24(&raw(RED_8X16[..40].to_vec(), 8, 16, PixelFormat::Mjpeg));
        assert!(matches!(out, Err(CaptureError::CaptureFailed(_))));
    }
}
