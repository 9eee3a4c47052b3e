use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Three planes Y, U, V with 2x2 chroma subsampling. Row and pixel
    /// strides come from each [`Plane`], so I420, NV12 and NV21 layouts all
    /// map onto this.
    Yuv420,
    /// One packed plane, 3 bytes per pixel.
    Rgb24,
    /// One packed plane, 4 bytes per pixel, alpha ignored.
    Rgba32,
    /// Any source format id the codec does not know about.
    Other(u32),
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Yuv420 => f.write_str("yuv420"),
            PixelFormat::Rgb24 => f.write_str("rgb24"),
            PixelFormat::Rgba32 => f.write_str("rgba32"),
            PixelFormat::Other(id) => write!(f, "format#{}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// Tightly packed plane.
    pub fn packed(data: impl Into<Bytes>, width: usize, bytes_per_pixel: usize) -> Self {
        Self::new(data, width * bytes_per_pixel, bytes_per_pixel)
    }
}

/// Returns the frame's buffers to the capture source. Runs exactly once: on
/// [`ReleaseHandle::release`] or, failing that, on drop.
pub struct ReleaseHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.run();
    }
}

/// One raw capture sample. Whoever owns the `Frame` owns the release
/// obligation; dropping it releases it.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation needed to reach display orientation.
    pub rotation: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    release: ReleaseHandle,
}

impl Frame {
    pub fn new(width: u32, height: u32, rotation: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            rotation,
            format,
            planes,
            release: ReleaseHandle::noop(),
        }
    }

    /// Tightly packed I420 frame.
    pub fn i420(width: u32, height: u32, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Self {
        let chroma_width = (width as usize).div_ceil(2);
        Self::new(
            width,
            height,
            0,
            PixelFormat::Yuv420,
            vec![
                Plane::packed(y, width as usize, 1),
                Plane::packed(u, chroma_width, 1),
                Plane::packed(v, chroma_width, 1),
            ],
        )
    }

    pub fn rgb24(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(
            width,
            height,
            0,
            PixelFormat::Rgb24,
            vec![Plane::packed(data, width as usize, 3)],
        )
    }

    pub fn with_rotation(mut self, rotation: u32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = ReleaseHandle::new(release);
        self
    }

    /// Releases the frame now instead of at drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame {{ {}x{}, rotation: {}, format: {}, planes: {} }}",
            self.width,
            self.height,
            self.rotation,
            self.format,
            self.planes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counted(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let frame = Frame::rgb24(2, 2, vec![0; 12]).with_release(counted(&released));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_release_does_not_repeat() {
        let released = Arc::new(AtomicUsize::new(0));
        let handle = ReleaseHandle::new(counted(&released));
        handle.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let frame = Frame::rgb24(1, 1, vec![0; 3]).with_release(counted(&released));
        frame.release();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replacing_release_runs_previous() {
        let released = Arc::new(AtomicUsize::new(0));
        let frame = Frame::rgb24(1, 1, vec![0; 3])
            .with_release(counted(&released))
            .with_release(counted(&released));
        // the first handle was dropped when it got replaced
        assert_eq!(released.load(Ordering::SeqCst), 1);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
