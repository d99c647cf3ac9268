//! Error types for transports

use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The link is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// Address unusable by this transport
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No transport registered for the URL scheme
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Address already has a listener
    #[error("Address in use: {0}")]
    AddressInUse(String),

    /// Frame exceeds the configured maximum
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
