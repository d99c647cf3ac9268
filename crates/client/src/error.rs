//! Error types for the kite client

use kite_protocol::{ErrorPayload, ProtocolError};
use kite_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client errors
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with an error
    #[error("Remote error: {0}")]
    Remote(ErrorPayload),

    /// No response within the call's timeout
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed and will not be reestablished
    #[error("Connection closed")]
    ConnectionClosed,

    /// The request went out on a link that dropped; the call was not replayed
    #[error("Connection reset before a response arrived")]
    ConnectionReset,

    /// Empty method name
    #[error("Method name must not be empty")]
    InvalidMethod,

    /// The client was dropped
    #[error("Client shut down")]
    Shutdown,

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Result did not match the requested type
    #[error("Failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),

    /// URL missing or unparseable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// The remote payload, for [`Error::Remote`]
    #[must_use]
    pub const fn remote(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Remote(payload) => Some(payload),
            _ => None,
        }
    }
}
