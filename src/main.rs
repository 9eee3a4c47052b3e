use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use detect_relay::{
    FrameCodec, PipelineWorker,
    api::{self, PreviewState},
    config::RelayConfig,
    sink::PreviewSink,
    source,
};

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("detect_relay", log::LevelFilter::Debug)
        .filter_module("detect_wire", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = RelayConfig::from_env()?;

    let preview = Arc::new(PreviewSink::new());
    let worker = PipelineWorker::spawn(config.worker_config(), preview.clone())?;

    let cancel = CancellationToken::new();
    let stats = worker.stats_handle();
    let state = PreviewState {
        sink: preview,
        stats: stats.clone(),
        connection: worker.subscribe_state(),
        codec: FrameCodec::new(config.jpeg_quality()),
    };
    let (_, server) = api::start_preview_server(config.preview_addr(), state, cancel.clone()).await?;

    let (width, height) = config.frame_size();
    let frames = source::test_pattern(width, height, config.fps());
    let feeder = tokio::spawn(source::forward_frames(frames, worker.sender(), cancel.clone()));

    tokio::select! {
        _ = cancel.cancelled() => {},
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, shutting down");
            cancel.cancel();
        },
    }

    let forwarded = feeder.await?;
    tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    server.await?;
    log::info!("forwarded {} frames, worker stats {:?}", forwarded, stats.snapshot());
    Ok(())
}
