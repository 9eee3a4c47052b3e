use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::{CodecError, DEFAULT_JPEG_QUALITY, FrameCodec};
use crate::frame::{Frame, PixelFormat, Plane};

fn grey_i420(width: u32, height: u32, luma: u8) -> Frame {
    let y = vec![luma; (width * height) as usize];
    let chroma = (width.div_ceil(2) * height.div_ceil(2)) as usize;
    Frame::i420(width, height, y, vec![128; chroma], vec![128; chroma])
}

/// 2x1 RGB frame: red pixel then blue pixel.
fn red_blue() -> Frame {
    Frame::rgb24(2, 1, vec![255, 0, 0, 0, 0, 255])
}

#[test]
fn test_default_quality() {
    assert_eq!(FrameCodec::default().quality(), DEFAULT_JPEG_QUALITY);
    assert_eq!(FrameCodec::new(0).quality(), 1);
    assert_eq!(FrameCodec::new(250).quality(), 100);
}

#[test]
fn test_grey_i420_converts_to_grey() {
    let codec = FrameCodec::default();
    let rgb = codec.to_rgb(&grey_i420(4, 4, 128)).unwrap();
    assert_eq!(rgb.dimensions(), (4, 4));
    for pixel in rgb.pixels() {
        assert_eq!(pixel.0, [128, 128, 128]);
    }
}

#[test]
fn test_odd_sized_i420() {
    let codec = FrameCodec::default();
    let rgb = codec.to_rgb(&grey_i420(5, 3, 200)).unwrap();
    assert_eq!(rgb.dimensions(), (5, 3));
}

#[test]
fn test_interleaved_chroma_with_pixel_stride() {
    // NV21 style: V and U share one buffer with pixel stride 2
    let (width, height) = (4u32, 2u32);
    let y = vec![76u8; 8];
    let vu: Vec<u8> = [255u8, 85].repeat(2);
    let frame = Frame::new(
        width,
        height,
        0,
        PixelFormat::Yuv420,
        vec![
            Plane::packed(y, 4, 1),
            Plane::new(vu[1..].to_vec(), 4, 2),
            Plane::new(vu.clone(), 4, 2),
        ],
    );

    let rgb = FrameCodec::default().to_rgb(&frame).unwrap();
    let [r, g, b] = rgb.get_pixel(0, 0).0;
    // Y=76, U=85, V=255 is roughly pure red
    assert!(r > 240, "r = {}", r);
    assert!(g < 20, "g = {}", g);
    assert!(b < 20, "b = {}", b);
}

#[test]
fn test_rgba_drops_alpha() {
    let frame = Frame::new(
        1,
        1,
        0,
        PixelFormat::Rgba32,
        vec![Plane::packed(vec![10, 20, 30, 0], 1, 4)],
    );
    let rgb = FrameCodec::default().to_rgb(&frame).unwrap();
    assert_eq!(rgb.get_pixel(0, 0).0, [10, 20, 30]);
}

#[test]
fn test_rotation_is_applied() {
    let codec = FrameCodec::default();

    let rgb = codec.to_rgb(&red_blue().with_rotation(90)).unwrap();
    assert_eq!(rgb.dimensions(), (1, 2));
    assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(rgb.get_pixel(0, 1).0, [0, 0, 255]);

    let rgb = codec.to_rgb(&red_blue().with_rotation(180)).unwrap();
    assert_eq!(rgb.dimensions(), (2, 1));
    assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);

    let rgb = codec.to_rgb(&red_blue().with_rotation(270)).unwrap();
    assert_eq!(rgb.dimensions(), (1, 2));
    assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
}

#[test]
fn test_unsupported_format() {
    let frame = Frame::new(2, 2, 0, PixelFormat::Other(0x23), vec![Plane::packed(vec![0; 8], 2, 2)]);
    assert!(matches!(
        FrameCodec::default().encode(&frame),
        Err(CodecError::UnsupportedFormat(PixelFormat::Other(0x23)))
    ));
}

#[test]
fn test_invalid_rotation_and_size() {
    let codec = FrameCodec::default();
    assert!(matches!(
        codec.to_rgb(&red_blue().with_rotation(45)),
        Err(CodecError::InvalidRotation(45))
    ));
    assert!(matches!(
        codec.to_rgb(&Frame::rgb24(0, 4, Vec::new())),
        Err(CodecError::InvalidDimensions { width: 0, height: 4 })
    ));
}

#[test]
fn test_short_plane_is_corrupt() {
    let codec = FrameCodec::default();
    let frame = Frame::rgb24(2, 2, vec![0; 11]);
    assert!(matches!(
        codec.to_rgb(&frame),
        Err(CodecError::Corrupt { plane: 0, expected: 12, actual: 11 })
    ));

    let mut frame = grey_i420(4, 4, 0);
    frame.planes.truncate(2);
    assert!(matches!(codec.to_rgb(&frame), Err(CodecError::Corrupt { plane: 2, .. })));
}

#[test]
fn test_encode_produces_jpeg() {
    let encoded = FrameCodec::default().encode(&grey_i420(16, 8, 90)).unwrap();
    let bytes = encoded.as_bytes();
    assert!(bytes.len() > 4);
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
}

#[test]
fn test_encode_keeps_release_obligation() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let frame = grey_i420(8, 8, 10).with_release(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    FrameCodec::default().encode(&frame).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 0);
    drop(frame);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_oversized_strides_are_corrupt() {
    let codec = FrameCodec::default();

    let frame = Frame::new(
        2,
        3,
        0,
        PixelFormat::Rgb24,
        vec![Plane::new(vec![0; 18], usize::MAX / 2 + 1, 3)],
    );
    assert!(matches!(
        codec.to_rgb(&frame),
        Err(CodecError::Corrupt { plane: 0, actual: 18, .. })
    ));

    let frame = Frame::new(
        4,
        1,
        0,
        PixelFormat::Rgb24,
        vec![Plane::new(vec![0; 12], 12, usize::MAX / 2)],
    );
    assert!(matches!(codec.to_rgb(&frame), Err(CodecError::Corrupt { plane: 0, .. })));

    let mut frame = grey_i420(4, 4, 0);
    frame.planes[1] = Plane::new(vec![128; 4], usize::MAX, 1);
    assert!(matches!(codec.to_rgb(&frame), Err(CodecError::Corrupt { plane: 1, .. })));
}
