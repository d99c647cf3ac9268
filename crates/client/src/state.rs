use kite_transport::CloseFrame;
use std::fmt;

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Built, never connected
    Init,
    /// Waiting for the transport to open
    Connecting,
    /// Calls flow
    Open,
    /// Close requested, waiting for the transport
    Closing,
    /// No link
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Connection events, for observation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The link opened
    Open,
    /// The link closed
    Close(CloseFrame),
    /// A failure that did not close the link by itself
    Error(String),
}
