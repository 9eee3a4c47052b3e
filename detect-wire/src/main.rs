//! Stand-in inference endpoint: answers every image with a fixed detection
//! list. Useful for running the relay without a model server.

use anyhow::Context;
use detect_wire::{LengthPrefixCodec, server::serve_connection};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

fn default_reply() -> String {
    serde_json::json!([
        { "class_name": "person", "confidence": 0.91, "box": [40.0, 60.0, 200.0, 420.0] },
        { "class_name": "cup", "confidence": 0.58, "box": [260.0, 300.0, 330.0, 380.0] }
    ])
    .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let addr = std::env::var("STUB_INFER_ADDR").unwrap_or_else(|_| "0.0.0.0:9999".to_string());
    let reply = match std::env::var("STUB_INFER_REPLY") {
        Ok(reply) => {
            serde_json::from_str::<serde_json::Value>(&reply)
                .context("STUB_INFER_REPLY is not valid JSON")?;
            reply
        }
        Err(_) => default_reply(),
    };

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    log::info!("stub-infer listening on {}", addr);

    let cancel = CancellationToken::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            },
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                log::info!("client connected: {}", peer);
                let reply = reply.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let result = serve_connection(stream, LengthPrefixCodec::new(), cancel, |image| {
                        log::debug!("image of {} bytes from {}", image.len(), peer);
                        std::future::ready(reply.clone())
                    })
                    .await;
                    match result {
                        Ok(served) => log::info!("client {} done after {} frames", peer, served),
                        Err(e) => log::warn!("client {} dropped: {:#}", peer, e),
                    }
                });
            },
        }
    }

    Ok(())
}
