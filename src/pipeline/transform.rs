//! Exact pixel relocation: quarter-turn rotations and axis flips.
//!
//! No interpolation happens here; every output pixel is a byte-for-byte copy
//! of one input pixel. Rotation is always applied before flipping.

use bytes::Bytes;

use crate::capture::config::{CaptureConfiguration, RotateAngle};
use crate::capture::frame::{FrameSample, PixelFormat};
use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryTransform {
    pub rotate: RotateAngle,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl GeometryTransform {
    pub fn new(rotate: RotateAngle, flip_horizontal: bool, flip_vertical: bool) -> Self {
        Self {
            rotate,
            flip_horizontal,
            flip_vertical,
        }
    }

    pub fn from_config(config: &CaptureConfiguration) -> Self {
        Self::new(
            config.rotate(),
            config.flip_horizontal(),
            config.flip_vertical(),
        )
    }

    pub fn is_identity(&self) -> bool {
        self.rotate == RotateAngle::Deg0 && !self.flip_horizontal && !self.flip_vertical
    }

    fn flips(&self) -> bool {
        self.flip_horizontal || self.flip_vertical
    }

    /// Whether frames of `format` can go through this transform
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.is_identity() || format.bytes_per_pixel().is_some()
    }

    /// Rotate then flip. `scratch` holds the intermediate image when both
    /// steps run and is kept by the caller between frames.
    pub fn apply(&self, frame: FrameSample, scratch: &mut Vec<u8>) -> Result<FrameSample> {
        if self.is_identity() {
            return Ok(frame);
        }
        let bpp = pixel_stride(frame.format())?;
        let (w, h) = (frame.width(), frame.height());
        check_len(&frame.data, w, h, bpp)?;

        let mut out = Vec::with_capacity(frame.data.len());
        let (out_w, out_h) = if self.rotate == RotateAngle::Deg0 {
            flip_into(&frame.data, w, h, bpp, self.flip_horizontal, self.flip_vertical, &mut out);
            (w, h)
        } else if self.flips() {
            let (rw, rh) = rotate_into(&frame.data, w, h, bpp, self.rotate, scratch);
            flip_into(scratch, rw, rh, bpp, self.flip_horizontal, self.flip_vertical, &mut out);
            (rw, rh)
        } else {
            rotate_into(&frame.data, w, h, bpp, self.rotate, &mut out)
        };

        Ok(rebuild(frame, out, out_w, out_h))
    }
}

/// Rotate a whole frame. Angle 0 hands back the same buffer without copying.
pub fn rotate(frame: &FrameSample, angle: RotateAngle) -> Result<FrameSample> {
    if angle == RotateAngle::Deg0 {
        return Ok(frame.clone());
    }
    let bpp = pixel_stride(frame.format())?;
    check_len(&frame.data, frame.width(), frame.height(), bpp)?;
    let mut out = Vec::new();
    let (w, h) = rotate_into(&frame.data, frame.width(), frame.height(), bpp, angle, &mut out);
    Ok(rebuild(frame.clone(), out, w, h))
}

/// Flip a whole frame; both flags together cost a single pass
pub fn flip(frame: &FrameSample, horizontal: bool, vertical: bool) -> Result<FrameSample> {
    if !horizontal && !vertical {
        return Ok(frame.clone());
    }
    let bpp = pixel_stride(frame.format())?;
    check_len(&frame.data, frame.width(), frame.height(), bpp)?;
    let mut out = Vec::new();
    flip_into(&frame.data, frame.width(), frame.height(), bpp, horizontal, vertical, &mut out);
    Ok(rebuild(frame.clone(), out, frame.width(), frame.height()))
}

/// Clockwise rotation of a tightly packed image into `dst`.
/// Returns the output dimensions.
pub fn rotate_into(
    src: &[u8],
    width: u32,
    height: u32,
    bpp: usize,
    angle: RotateAngle,
    dst: &mut Vec<u8>,
) -> (u32, u32) {
    let (w, h) = (width as usize, height as usize);
    let len = w * h * bpp;
    let src = &src[..len];
    dst.clear();

    match angle {
        RotateAngle::Deg0 => {
            dst.extend_from_slice(src);
            return (width, height);
        }
        RotateAngle::Deg180 => {
            dst.resize(len, 0);
            reverse_pixels(src, dst, bpp);
            return (width, height);
        }
        RotateAngle::Deg90 | RotateAngle::Deg270 => dst.resize(len, 0),
    }

    for y in 0..h {
        let row = &src[y * w * bpp..(y + 1) * w * bpp];
        for (x, px) in row.chunks_exact(bpp).enumerate() {
            let d = match angle {
                RotateAngle::Deg90 => x * h + (h - 1 - y),
                _ => (w - 1 - x) * h + y,
            };
            dst[d * bpp..(d + 1) * bpp].copy_from_slice(px);
        }
    }
    (height, width)
}

/// Mirror a tightly packed image into `dst`
pub fn flip_into(
    src: &[u8],
    width: u32,
    height: u32,
    bpp: usize,
    horizontal: bool,
    vertical: bool,
    dst: &mut Vec<u8>,
) {
    let stride = width as usize * bpp;
    let len = stride * height as usize;
    let src = &src[..len];
    dst.clear();
    dst.resize(len, 0);

    match (horizontal, vertical) {
        (true, true) => reverse_pixels(src, dst, bpp),
        (false, true) => {
            for (src_row, dst_row) in src.chunks_exact(stride).zip(dst.chunks_exact_mut(stride).rev()) {
                dst_row.copy_from_slice(src_row);
            }
        }
        (true, false) => {
            for (src_row, dst_row) in src.chunks_exact(stride).zip(dst.chunks_exact_mut(stride)) {
                for (s, d) in src_row.chunks_exact(bpp).zip(dst_row.chunks_exact_mut(bpp).rev()) {
                    d.copy_from_slice(s);
                }
            }
        }
        (false, false) => dst.copy_from_slice(src),
    }
}

fn reverse_pixels(src: &[u8], dst: &mut [u8], bpp: usize) {
    for (s, d) in src.chunks_exact(bpp).zip(dst.chunks_exact_mut(bpp).rev()) {
        d.copy_from_slice(s);
    }
}

fn pixel_stride(format: PixelFormat) -> Result<usize> {
    format.bytes_per_pixel().ok_or_else(|| {
        CaptureError::Unsupported(format!(
            "cannot rotate or flip {format} frames without RGB conversion"
        ))
    })
}

fn check_len(data: &[u8], width: u32, height: u32, bpp: usize) -> Result<()> {
    let expected = width as usize * height as usize * bpp;
    if data.len() < expected {
        return Err(CaptureError::CaptureFailed(format!(
            "frame holds {} bytes, {width}x{height} needs {expected}",
            data.len()
        )));
    }
    Ok(())
}

fn rebuild(mut frame: FrameSample, data: Vec<u8>, width: u32, height: u32) -> FrameSample {
    frame.data = Bytes::from(data);
    frame.meta.width = width;
    frame.meta.height = height;
    frame
}
