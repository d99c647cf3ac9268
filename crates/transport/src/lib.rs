//! Generic transport abstraction for kite connections
//!
//! This crate provides a transport-agnostic socket contract. Specific transports
//! (WebSocket, in-memory, etc.) are provided in separate crates.
//!
//! A transport turns a URL into a [`Socket`]:
//! - Inbound traffic surfaces as [`TransportEvent`]s: `Open` once the link is usable,
//!   `Message` per frame, `Error` for failures that do not close the link, and exactly one
//!   `Close` when the link ends
//! - Outbound frames go through a [`SocketSender`] and are dropped while the link is not open
//! - No retry or reconnection logic lives here
//!
//! On the listening side, a [`Listener`] yields one already-open [`Socket`] per accepted peer.

pub mod error;
mod registry;
mod socket;

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

pub use error::TransportError;
pub use registry::Transports;
pub use socket::{CloseFrame, Frame, Socket, SocketDriver, SocketSender, TransportEvent, socket};

/// Transport trait for opening and accepting sockets
///
/// Implementations spawn their own I/O tasks, so both methods must be called from within a
/// tokio runtime.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// URL schemes served by this transport
    fn schemes(&self) -> &'static [&'static str];

    /// Start connecting to `url`
    ///
    /// Returns immediately; the outcome is reported through the socket's events. A failed
    /// attempt emits `Error` followed by `Close`.
    fn open(&self, url: &Url, config: &Config) -> Socket;

    /// Bind a listener on `url`
    async fn listen(&self, url: &Url, config: &Config) -> Result<Box<dyn Listener>, TransportError>;
}

/// Listener trait for accepting peer sockets
#[async_trait]
pub trait Listener: Debug + Send + Sync {
    /// URL peers can connect to (with the bound port filled in)
    fn local_url(&self) -> &Url;

    /// Wait for the next peer
    async fn accept(&self) -> Result<Socket, TransportError>;

    /// Stop accepting; pending and future `accept` calls fail
    async fn close(&self) -> Result<(), TransportError>;
}

/// Configuration for transports
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a connection attempt may take
    pub connect_timeout: Duration,
    /// Maximum frame size in bytes
    pub max_frame_size: usize,
    /// Capacity of bounded per-connection channels
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_size: 10 * 1024 * 1024, // 10MB
            channel_capacity: 1000,
        }
    }
}
