use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use detect_wire::ConnectionState;
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::FrameCodec,
    sink::PreviewSink,
    worker::{StatsSnapshot, WorkerStats},
};

#[derive(Clone)]
pub struct PreviewState {
    pub sink: Arc<PreviewSink>,
    pub stats: Arc<WorkerStats>,
    pub connection: watch::Receiver<ConnectionState>,
    pub codec: FrameCodec,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    connection: String,
    presented: u64,
    #[serde(flatten)]
    worker: StatsSnapshot,
}

/// Binds the preview server and serves it until `cancel` fires.
pub async fn start_preview_server(
    addr: &str,
    state: PreviewState,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind preview server on {}", addr))?;
    let local = listener.local_addr()?;
    log::info!("preview server listening on {}", local);

    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("preview server error: {}", e);
        }
    });
    Ok((local, handle))
}

fn router(state: PreviewState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/latest.jpg", get(latest_jpeg))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down preview server");
}

async fn index() -> Html<&'static str> {
    Html(
        "<!doctype html><html><head><title>detect-relay</title></head><body>\
         <img id=\"latest\" src=\"/latest.jpg\">\
         <script>setInterval(() => { \
         document.getElementById('latest').src = '/latest.jpg?t=' + Date.now(); }, 200);</script>\
         </body></html>",
    )
}

async fn latest_jpeg(State(state): State<PreviewState>) -> Response {
    let sink = state.sink.clone();
    let codec = state.codec;
    let encoded = match tokio::task::spawn_blocking(move || sink.latest_jpeg(&codec)).await {
        Ok(encoded) => encoded,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match encoded {
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame yet").into_response(),
        Some(Ok(jpeg)) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            jpeg.into_bytes(),
        )
            .into_response(),
        Some(Err(e)) => {
            log::warn!("preview encode failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn stats(State(state): State<PreviewState>) -> Json<StatsResponse> {
    let connection = state.connection.borrow().to_string();
    Json(StatsResponse {
        connection,
        presented: state.sink.presented(),
        worker: state.stats.snapshot(),
    })
}
