//! Frame transcoding: raw planes → display-oriented RGB → JPEG.

use bytes::Bytes;
use image::{RgbImage, imageops};
use jpeg_encoder::{ColorType, Encoder, EncodingError};
use thiserror::Error;

use crate::frame::{Frame, PixelFormat, Plane};

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(PixelFormat),

    #[error("invalid frame size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("invalid rotation {0}, expected 0, 90, 180 or 270")]
    InvalidRotation(u32),

    #[error("plane {plane} holds {actual} bytes, needs {expected}")]
    Corrupt {
        plane: usize,
        expected: usize,
        actual: usize,
    },

    #[error("JPEG encode failed: {0}")]
    Encode(#[from] EncodingError),
}

/// Compressed image bytes, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage(Bytes);

impl EncodedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    quality: u8,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Converts and compresses a frame. The frame keeps its release handle.
    pub fn encode(&self, frame: &Frame) -> Result<EncodedImage, CodecError> {
        let rgb = self.to_rgb(frame)?;
        self.compress(&rgb)
    }

    /// Decodes the frame planes into RGB and applies the frame rotation.
    pub fn to_rgb(&self, frame: &Frame) -> Result<RgbImage, CodecError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        if !matches!(frame.rotation, 0 | 90 | 180 | 270) {
            return Err(CodecError::InvalidRotation(frame.rotation));
        }

        let upright = match frame.format {
            PixelFormat::Yuv420 => yuv420_to_rgb(frame)?,
            PixelFormat::Rgb24 => packed_to_rgb(frame, 3)?,
            PixelFormat::Rgba32 => packed_to_rgb(frame, 4)?,
            PixelFormat::Other(_) => return Err(CodecError::UnsupportedFormat(frame.format)),
        };

        Ok(match frame.rotation {
            90 => imageops::rotate90(&upright),
            180 => imageops::rotate180(&upright),
            270 => imageops::rotate270(&upright),
            _ => upright,
        })
    }

    pub fn compress(&self, image: &RgbImage) -> Result<EncodedImage, CodecError> {
        let (width, height) = image.dimensions();
        let too_large = || CodecError::InvalidDimensions { width, height };
        let w = u16::try_from(width).map_err(|_| too_large())?;
        let h = u16::try_from(height).map_err(|_| too_large())?;

        let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
        let encoder = Encoder::new(&mut buffer, self.quality);
        encoder.encode(image.as_raw(), w, h, ColorType::Rgb)?;
        Ok(EncodedImage(Bytes::from(buffer)))
    }
}

/// Bytes a plane must hold to cover `cols` x `rows` samples, each `sample`
/// bytes wide. `None` when the strides put the last sample out of range.
///
/// Every index the converters compute is bounded by this value, so once a
/// plane passes the check their arithmetic cannot overflow.
fn required_len(plane: &Plane, cols: usize, rows: usize, sample: usize) -> Option<usize> {
    (rows - 1)
        .checked_mul(plane.row_stride)?
        .checked_add((cols - 1).checked_mul(plane.pixel_stride)?)?
        .checked_add(sample)
}

fn check_plane(
    frame: &Frame,
    index: usize,
    cols: usize,
    rows: usize,
    sample: usize,
) -> Result<&Plane, CodecError> {
    let plane = frame.planes.get(index).ok_or(CodecError::Corrupt {
        plane: index,
        expected: 1,
        actual: 0,
    })?;
    // strides too large to address are reported as an unsatisfiable length
    let expected = required_len(plane, cols, rows, sample).unwrap_or(usize::MAX);
    if plane.pixel_stride == 0 || plane.data.len() < expected {
        return Err(CodecError::Corrupt {
            plane: index,
            expected,
            actual: plane.data.len(),
        });
    }
    Ok(plane)
}

fn yuv420_to_rgb(frame: &Frame) -> Result<RgbImage, CodecError> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    let y_plane = check_plane(frame, 0, width, height, 1)?;
    let u_plane = check_plane(frame, 1, chroma_width, chroma_height, 1)?;
    let v_plane = check_plane(frame, 2, chroma_width, chroma_height, 1)?;

    let mut rgb = Vec::with_capacity(width * height * 3);
    for j in 0..height {
        for i in 0..width {
            let y_idx = j * y_plane.row_stride + i * y_plane.pixel_stride;
            let u_idx = (j / 2) * u_plane.row_stride + (i / 2) * u_plane.pixel_stride;
            let v_idx = (j / 2) * v_plane.row_stride + (i / 2) * v_plane.pixel_stride;

            let y = y_plane.data[y_idx] as f32;
            let u = u_plane.data[u_idx] as f32 - 128.0;
            let v = v_plane.data[v_idx] as f32 - 128.0;

            // BT.601
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

            rgb.push(r);
            rgb.push(g);
            rgb.push(b);
        }
    }

    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or(CodecError::InvalidDimensions {
        width: frame.width,
        height: frame.height,
    })
}

fn packed_to_rgb(frame: &Frame, bytes_per_pixel: usize) -> Result<RgbImage, CodecError> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    // the last pixel needs all of its channels, not just the first byte
    let plane = check_plane(frame, 0, width, height, bytes_per_pixel)?;
    if plane.pixel_stride < bytes_per_pixel {
        return Err(CodecError::Corrupt {
            plane: 0,
            expected: bytes_per_pixel,
            actual: plane.pixel_stride,
        });
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for j in 0..height {
        let row = j * plane.row_stride;
        for i in 0..width {
            let px = row + i * plane.pixel_stride;
            rgb.extend_from_slice(&plane.data[px..px + 3]);
        }
    }

    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or(CodecError::InvalidDimensions {
        width: frame.width,
        height: frame.height,
    })
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
