//! The pipeline worker: takes the latest captured frame, sends it to the
//! inference endpoint and posts the annotated result to a display sink.
//!
//! Frames are handled one at a time on a dedicated thread. The capture side
//! hands frames over through a [`LatestSlot`], so while the worker is busy
//! newer frames replace older ones instead of queueing behind them.
//!
//! The worker fails open: whenever no detections can be obtained for a frame
//! (not connected yet, connection lost) the frame is still shown, without
//! annotations.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use detect_wire::{ConnectionError, ConnectionState, ProtocolClient, framing::DEFAULT_MAX_FRAME_LEN};
use image::RgbImage;
use serde::Serialize;
use tokio::{net::TcpStream, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{DEFAULT_JPEG_QUALITY, FrameCodec},
    detection::{Detection, parse_report},
    frame::Frame,
    inbox::{LatestSlot, Offer},
    overlay::{AnnotatedImage, OverlayRenderer, OverlayStyle},
    sink::DisplaySink,
};

pub const DEFAULT_SERVER: &str = "127.0.0.1:9999";

/// What the worker does once its connection has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay failed; every later frame passes through unannotated.
    #[default]
    Never,
    /// Start a new connection attempt with the first frame that arrives at
    /// least this long after the failure.
    Backoff(Duration),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Inference endpoint, `host:port`.
    pub server: String,
    pub jpeg_quality: u8,
    pub reconnect: ReconnectPolicy,
    /// Upper bound for one request/response round trip. `None` waits forever.
    pub exchange_timeout: Option<Duration>,
    pub max_response_len: u32,
    pub overlay: OverlayStyle,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            reconnect: ReconnectPolicy::Never,
            exchange_timeout: None,
            max_response_len: DEFAULT_MAX_FRAME_LEN,
            overlay: OverlayStyle::default(),
        }
    }
}

/// Counters updated by the worker and its senders.
#[derive(Debug, Default)]
pub struct WorkerStats {
    delivered: AtomicU64,
    replaced: AtomicU64,
    processed: AtomicU64,
    annotated: AtomicU64,
    passthrough: AtomicU64,
    codec_failures: AtomicU64,
    exchange_failures: AtomicU64,
    malformed_responses: AtomicU64,
    skipped_detections: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub delivered: u64,
    /// Frames dropped from the inbox because a newer one arrived.
    pub replaced: u64,
    pub processed: u64,
    pub annotated: u64,
    pub passthrough: u64,
    pub codec_failures: u64,
    pub exchange_failures: u64,
    pub malformed_responses: u64,
    pub skipped_detections: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            annotated: self.annotated.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
            exchange_failures: self.exchange_failures.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            skipped_detections: self.skipped_detections.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Capture-side handle for delivering frames. Cheap to clone.
#[derive(Clone)]
pub struct FrameSender {
    inbox: Arc<LatestSlot<Frame>>,
    stats: Arc<WorkerStats>,
}

impl FrameSender {
    /// Hands a frame to the worker without blocking. A frame still waiting
    /// in the inbox is released and replaced; after shutdown the frame is
    /// released immediately.
    pub fn deliver(&self, frame: Frame) -> Offer {
        let offer = self.inbox.put(frame);
        match offer {
            Offer::Queued => bump(&self.stats.delivered),
            Offer::Replaced => {
                bump(&self.stats.delivered);
                bump(&self.stats.replaced);
            }
            Offer::Rejected => log::trace!("worker stopped, frame released"),
        }
        offer
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

enum Link {
    Disconnected,
    Connecting(JoinHandle<Result<ProtocolClient<TcpStream>, ConnectionError>>),
    Connected(ProtocolClient<TcpStream>),
    Failed { since: Instant },
}

enum Event {
    Shutdown,
    Connect(Result<ProtocolClient<TcpStream>, ConnectionError>),
    Frame(Frame),
}

pub struct PipelineWorker<K> {
    config: WorkerConfig,
    codec: FrameCodec,
    renderer: OverlayRenderer,
    sink: K,
    inbox: Arc<LatestSlot<Frame>>,
    stats: Arc<WorkerStats>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    link: Link,
}

impl<K: DisplaySink> PipelineWorker<K> {
    /// Starts the worker thread. The connection attempt begins right away;
    /// frames delivered before it completes pass through unannotated.
    pub fn spawn(config: WorkerConfig, sink: K) -> io::Result<WorkerHandle> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let inbox = Arc::new(LatestSlot::new());
        let stats = Arc::new(WorkerStats::default());
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let worker = PipelineWorker {
            codec: FrameCodec::new(config.jpeg_quality),
            renderer: OverlayRenderer::new(config.overlay.clone()),
            config,
            sink,
            inbox: inbox.clone(),
            stats: stats.clone(),
            state,
            cancel: cancel.clone(),
            link: Link::Disconnected,
        };

        let thread = thread::Builder::new()
            .name("pipeline-worker".into())
            .spawn(move || runtime.block_on(worker.run()))?;

        Ok(WorkerHandle {
            sender: FrameSender { inbox, stats: stats.clone() },
            state: state_rx,
            stats,
            cancel,
            thread: Some(thread),
        })
    }

    async fn run(mut self) {
        log::info!("pipeline worker started, endpoint {}", self.config.server);
        self.start_connect();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Event::Shutdown,
                result = wait_connect(&mut self.link) => Event::Connect(result),
                frame = self.inbox.recv() => match frame {
                    Some(frame) => Event::Frame(frame),
                    None => Event::Shutdown,
                },
            };

            match event {
                Event::Shutdown => break,
                Event::Connect(result) => self.finish_connect(result),
                Event::Frame(frame) => self.process(frame).await,
            }
        }

        // dropping the client closes the socket
        self.link = Link::Disconnected;
        self.publish(ConnectionState::Disconnected);
        log::info!("pipeline worker stopped: {:?}", self.stats.snapshot());
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("connection {} -> {}", previous, state);
        }
    }

    fn start_connect(&mut self) {
        let server = self.config.server.clone();
        let max_response_len = self.config.max_response_len;
        let task = tokio::spawn(async move {
            let client = ProtocolClient::connect(server).await?;
            Ok::<_, ConnectionError>(client.with_max_response_len(max_response_len))
        });
        self.link = Link::Connecting(task);
        self.publish(ConnectionState::Connecting);
    }

    fn finish_connect(&mut self, result: Result<ProtocolClient<TcpStream>, ConnectionError>) {
        match result {
            Ok(client) => {
                self.link = Link::Connected(client);
                self.publish(ConnectionState::Connected);
            }
            Err(e) => {
                log::warn!("connect to {} failed: {}", self.config.server, e);
                self.link = Link::Failed {
                    since: Instant::now(),
                };
                self.publish(ConnectionState::Failed);
            }
        }
    }

    fn fail(&mut self, e: ConnectionError) {
        log::warn!("exchange with {} failed: {}", self.config.server, e);
        bump(&self.stats.exchange_failures);
        self.link = Link::Failed {
            since: Instant::now(),
        };
        self.publish(ConnectionState::Failed);
    }

    /// Starts a new attempt when the reconnect policy allows it.
    fn maybe_reconnect(&mut self) {
        let Link::Failed { since } = self.link else {
            return;
        };
        if let ReconnectPolicy::Backoff(delay) = self.config.reconnect {
            if since.elapsed() >= delay {
                log::info!("reconnecting to {}", self.config.server);
                self.start_connect();
            }
        }
    }

    async fn process(&mut self, frame: Frame) {
        let started = Instant::now();
        bump(&self.stats.processed);

        let rgb = match self.codec.to_rgb(&frame) {
            Ok(rgb) => rgb,
            Err(e) => {
                log::warn!("dropping {}: {}", frame, e);
                bump(&self.stats.codec_failures);
                return;
            }
        };
        // planes are no longer needed once converted
        frame.release();

        self.maybe_reconnect();
        let output = match self.detect(&rgb).await {
            Detect::Annotate(detections) => {
                bump(&self.stats.annotated);
                self.renderer.render(&rgb, &detections)
            }
            Detect::PassThrough => {
                bump(&self.stats.passthrough);
                AnnotatedImage::passthrough(rgb)
            }
            Detect::Drop => return,
        };

        log::trace!(
            "frame {}x{} with {} detections in {:?}",
            output.width(),
            output.height(),
            output.detections,
            started.elapsed()
        );
        self.sink.present(output);
    }

    async fn detect(&mut self, rgb: &RgbImage) -> Detect {
        if !matches!(self.link, Link::Connected(_)) {
            return Detect::PassThrough;
        }

        let jpeg = match self.codec.compress(rgb) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("dropping frame: {}", e);
                bump(&self.stats.codec_failures);
                return Detect::Drop;
            }
        };

        let Link::Connected(client) = &mut self.link else {
            return Detect::PassThrough;
        };
        let timeout = self.config.exchange_timeout;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = timed_exchange(client, jpeg.as_bytes(), timeout) => result,
        };

        match outcome {
            Ok(text) => match parse_report(&text) {
                Ok(report) => {
                    for skipped in &report.skipped {
                        log::debug!("skipping {}", skipped);
                    }
                    self.stats
                        .skipped_detections
                        .fetch_add(report.skipped.len() as u64, Ordering::Relaxed);
                    Detect::Annotate(report.detections)
                }
                Err(e) => {
                    log::warn!("{}", e);
                    bump(&self.stats.malformed_responses);
                    Detect::PassThrough
                }
            },
            Err(ConnectionError::Cancelled) => {
                self.link = Link::Disconnected;
                self.publish(ConnectionState::Disconnected);
                Detect::Drop
            }
            Err(e) => {
                self.fail(e);
                Detect::PassThrough
            }
        }
    }
}

impl<K> Drop for PipelineWorker<K> {
    /// Runs however the worker ends, panics included: later deliveries are
    /// rejected and released instead of parking in a slot nobody reads.
    fn drop(&mut self) {
        self.inbox.close();
    }
}

enum Detect {
    Annotate(Vec<Detection>),
    PassThrough,
    Drop,
}

/// Resolves when a pending connection attempt finishes; never otherwise.
async fn wait_connect(link: &mut Link) -> Result<ProtocolClient<TcpStream>, ConnectionError> {
    match link {
        Link::Connecting(task) => match task.await {
            Ok(result) => result,
            Err(e) => Err(ConnectionError::Io(io::Error::other(e))),
        },
        _ => std::future::pending().await,
    }
}

async fn timed_exchange(
    client: &mut ProtocolClient<TcpStream>,
    image: &[u8],
    timeout: Option<Duration>,
) -> Result<String, ConnectionError> {
    let Some(limit) = timeout else {
        return client.exchange(image).await;
    };
    match tokio::time::timeout(limit, client.exchange(image)).await {
        Ok(result) => result,
        Err(_) => {
            // the stream may hold half a reply now
            client.mark_failed();
            Err(ConnectionError::Timeout)
        }
    }
}

/// Owner side of a running worker. Dropping it shuts the worker down.
pub struct WorkerHandle {
    sender: FrameSender,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn deliver(&self, frame: Frame) -> Offer {
        self.sender.deliver(frame)
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the worker reports `target`. Returns false if the worker
    /// exits first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        self.state.clone().wait_for(|s| *s == target).await.is_ok()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Stops the worker and waits for its thread. A blocked exchange is
    /// abandoned and its connection closed; frames still in the inbox are
    /// released.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.sender.inbox.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("pipeline worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;
