//! Length-prefixed request/response protocol between the relay and a remote
//! inference endpoint.

pub mod client;
pub mod codec;
pub mod error;
pub mod framing;
pub mod server;

pub use client::{ConnectionState, ProtocolClient};
pub use codec::LengthPrefixCodec;
pub use error::ConnectionError;
