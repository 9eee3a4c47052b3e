//! Where finished images go. Posting is fire and forget: a sink must not block
//! the worker and the worker never waits for an image to be shown.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    codec::{CodecError, EncodedImage, FrameCodec},
    overlay::AnnotatedImage,
};

pub trait DisplaySink: Send + Sync + 'static {
    fn present(&self, image: AnnotatedImage);
}

impl<T: DisplaySink + ?Sized> DisplaySink for Arc<T> {
    fn present(&self, image: AnnotatedImage) {
        (**self).present(image)
    }
}

/// Forwards images over a bounded channel, dropping them while it is full.
pub struct ChannelSink {
    sender: mpsc::Sender<AnnotatedImage>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AnnotatedImage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl DisplaySink for ChannelSink {
    fn present(&self, image: AnnotatedImage) {
        match self.sender.try_send(image) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("display channel full, image dropped"),
            Err(TrySendError::Closed(_)) => log::trace!("display channel closed, image dropped"),
        }
    }
}

/// Keeps only the most recent image, for the preview server to pick up.
#[derive(Default)]
pub struct PreviewSink {
    latest: Mutex<Option<Arc<AnnotatedImage>>>,
    presented: AtomicU64,
}

impl PreviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<AnnotatedImage>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// JPEG of the latest image, `None` before the first one arrives.
    pub fn latest_jpeg(&self, codec: &FrameCodec) -> Option<Result<EncodedImage, CodecError>> {
        self.latest().map(|latest| codec.compress(&latest.image))
    }
}

impl DisplaySink for PreviewSink {
    fn present(&self, image: AnnotatedImage) {
        let previous = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(image));
        drop(previous);
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}
