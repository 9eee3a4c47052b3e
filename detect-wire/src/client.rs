use std::fmt::{Display, Formatter};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
};

use crate::error::{ConnectionError, Result};
use crate::framing::{DEFAULT_MAX_FRAME_LEN, read_frame, write_frame};

/// Lifecycle of the single inference connection.
///
/// `Disconnected -> Connecting -> Connected -> Failed`. Nothing moves out of
/// `Failed` on its own; a new connection has to be established explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Request/response client over one persistent byte stream.
///
/// `exchange` takes `&mut self`, so at most one exchange is ever in flight
/// and the header, payload and flush of a request are never interleaved with
/// another request.
pub struct ProtocolClient<S> {
    stream: S,
    state: ConnectionState,
    max_response_len: u32,
}

impl ProtocolClient<TcpStream> {
    /// Opens the TCP connection. This is the one-time setup that has to finish
    /// before any exchange.
    pub async fn connect<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            log::info!("connected to inference endpoint {}", peer);
        }
        Ok(Self::new(stream))
    }
}

impl<S> ProtocolClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already established stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnectionState::Connected,
            max_response_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_response_len(mut self, max_response_len: u32) -> Self {
        self.max_response_len = max_response_len;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sends one encoded image and returns the JSON text of the reply.
    ///
    /// Any failure marks the client `Failed`; later calls return
    /// [`ConnectionError::Failed`] without touching the stream.
    pub async fn exchange(&mut self, image: &[u8]) -> Result<String> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::Failed);
        }

        match self.exchange_inner(image).await {
            Ok(text) => Ok(text),
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn exchange_inner(&mut self, image: &[u8]) -> Result<String> {
        write_frame(&mut self.stream, image).await?;
        let payload = read_frame(&mut self.stream, self.max_response_len).await?;
        log::trace!("exchange: sent {} bytes, received {}", image.len(), payload.len());
        Ok(String::from_utf8(payload.to_vec())?)
    }

    /// Marks the client failed without performing I/O, e.g. after an exchange
    /// was abandoned half way.
    pub fn mark_failed(&mut self) {
        self.state = ConnectionState::Failed;
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
