//! Error types for the kite server

use kite_transport::TransportError;
use thiserror::Error;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server was closed
    #[error("Server is closed")]
    Closed,

    /// Listen address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Two methods share a name
    #[error("Method '{0}' registered twice")]
    DuplicateMethod(String),

    /// Empty or reserved method name
    #[error("Invalid method name '{0}'")]
    InvalidMethod(String),
}
