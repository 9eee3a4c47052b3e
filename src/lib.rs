//! Relays captured frames to a remote object detector and draws the returned
//! detections back onto them.
//!
//! `capture -> FrameCodec -> ProtocolClient -> parse -> OverlayRenderer -> sink`,
//! driven one frame at a time by [`worker::PipelineWorker`].

pub mod api;
pub mod codec;
pub mod config;
pub mod detection;
pub mod font;
pub mod frame;
pub mod inbox;
pub mod overlay;
pub mod sink;
pub mod source;
pub mod worker;

pub use codec::{CodecError, EncodedImage, FrameCodec};
pub use detection::{BoundingBox, Detection};
pub use frame::{Frame, PixelFormat, Plane};
pub use overlay::{AnnotatedImage, OverlayRenderer, OverlayStyle};
pub use worker::{PipelineWorker, WorkerConfig, WorkerHandle};
