//! Synthetic capture source, used when no camera is attached.

use std::{pin::pin, time::Duration};

use futures::{Stream, StreamExt, stream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{frame::Frame, inbox::Offer, worker::FrameSender};

/// Endless stream of moving I420 test frames at `fps`. Must be polled inside
/// a tokio runtime.
pub fn test_pattern(width: u32, height: u32, fps: u32) -> impl Stream<Item = Frame> {
    let period = Duration::from_secs(1) / fps.max(1);
    stream::unfold((None, 0u64), move |(ticker, index)| async move {
        let mut ticker = ticker.unwrap_or_else(|| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
        let frame = pattern_frame(width, height, index);
        Some((frame, (Some(ticker), index + 1)))
    })
}

/// Diagonal luma ramp with a white square sliding across it.
pub fn pattern_frame(width: u32, height: u32, index: u64) -> Frame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let side = (w.min(h) / 6).max(1);
    let travel = w.saturating_sub(side).max(1);
    let square_x = (index as usize * 4) % travel;
    let square_y = h.saturating_sub(side) / 2;

    let mut y = vec![0u8; w * h];
    for row in 0..h {
        for col in 0..w {
            let inside = (square_x..square_x + side).contains(&col)
                && (square_y..square_y + side).contains(&row);
            y[row * w + col] = if inside {
                235
            } else {
                ((row + col + index as usize) % 200 + 16) as u8
            };
        }
    }

    let u = vec![128u8; cw * ch];
    let v = (0..cw * ch).map(|i| (96 + (i % cw) * 64 / cw.max(1)) as u8).collect();
    Frame::i420(width, height, y, u, v)
}

/// Delivers frames from `frames` to the worker until the stream ends, the
/// worker stops or `cancel` fires. Returns how many frames were handed over.
pub async fn forward_frames<S>(frames: S, sender: FrameSender, cancel: CancellationToken) -> u64
where
    S: Stream<Item = Frame>,
{
    let mut frames = pin!(frames);
    let mut forwarded = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };
        let Some(frame) = next else {
            break;
        };
        if sender.deliver(frame) == Offer::Rejected {
            log::debug!("worker gone, frame source stopping");
            break;
        }
        forwarded += 1;
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::FrameCodec,
        sink::ChannelSink,
        worker::{PipelineWorker, WorkerConfig},
    };

    #[test]
    fn test_pattern_frame_layout() {
        let frame = pattern_frame(33, 17, 0);
        assert_eq!((frame.width, frame.height), (33, 17));
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].data.len(), 33 * 17);
        assert_eq!(frame.planes[1].data.len(), 17 * 9);
        assert!(FrameCodec::default().encode(&frame).is_ok());
    }

    #[test]
    fn test_pattern_moves() {
        let first = pattern_frame(64, 48, 0);
        let later = pattern_frame(64, 48, 5);
        assert_ne!(first.planes[0].data, later.planes[0].data);
    }

    #[tokio::test]
    async fn test_stream_yields_frames() {
        let frames: Vec<Frame> = test_pattern(16, 16, 1000).take(3).collect().await;
        assert_eq!(frames.len(), 3);
        assert_ne!(frames[0].planes[0].data, frames[2].planes[0].data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forward_until_stream_ends() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = WorkerConfig {
            server: listener.local_addr().unwrap().to_string(),
            ..WorkerConfig::default()
        };
        drop(listener);

        let (sink, _images) = ChannelSink::new(4);
        let handle = PipelineWorker::spawn(config, sink).unwrap();
        let frames = stream::iter((0..5).map(|i| pattern_frame(16, 16, i)));
        let forwarded = forward_frames(frames, handle.sender(), CancellationToken::new()).await;
        assert_eq!(forwarded, 5);
        assert_eq!(handle.stats().delivered, 5);

        let sender = handle.sender();
        tokio::task::spawn_blocking(move || handle.shutdown()).await.unwrap();
        let forwarded = forward_frames(
            stream::iter((0..3).map(|i| pattern_frame(16, 16, i))),
            sender,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(forwarded, 0);
    }

    #[tokio::test]
    async fn test_forward_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sink, _images) = ChannelSink::new(1);
        let config = WorkerConfig {
            server: "127.0.0.1:1".to_string(),
            ..WorkerConfig::default()
        };
        let handle = PipelineWorker::spawn(config, sink).unwrap();
        let forwarded = forward_frames(test_pattern(8, 8, 30), handle.sender(), cancel).await;
        assert_eq!(forwarded, 0);
        tokio::task::spawn_blocking(move || handle.shutdown()).await.unwrap();
    }
}
