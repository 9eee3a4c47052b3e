//! Serving side of the protocol: a loop answering each framed image with one
//! framed JSON reply. Used by the `stub-infer` binary and by tests.

use std::future::Future;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::codec::LengthPrefixCodec;
use crate::error::Result;

/// Answers requests on `stream` until the peer disconnects or `cancel` fires.
///
/// Returns the number of requests served. A clean disconnect between frames
/// is not an error; one in the middle of a frame is.
pub async fn serve_connection<S, F, Fut>(
    stream: S,
    codec: LengthPrefixCodec,
    cancel: CancellationToken,
    mut handler: F,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = String>,
{
    let mut framed = Framed::new(stream, codec);
    let mut served = 0u64;
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = framed.next() => request,
        };

        let image = match request {
            Some(image) => image?,
            None => break,
        };

        let reply = handler(image).await;
        framed.send(reply.as_bytes()).await?;
        served += 1;
    }
    Ok(served)
}
