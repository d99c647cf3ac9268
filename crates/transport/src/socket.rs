//! The socket pair shared by every transport implementation.
//!
//! [`socket`] creates two halves: the [`Socket`] handed to the connection owner, and the
//! [`SocketDriver`] kept by the transport's I/O task. The driver reports link events and
//! pulls outbound frames; the socket consumes events and pushes frames.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// One transport-level message unit.
pub type Frame = Bytes;

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket-style close code.
    pub code: u16,
    /// Free-form reason.
    pub reason: String,
}

impl CloseFrame {
    /// Orderly shutdown.
    pub const NORMAL: u16 = 1000;
    /// Link lost without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    /// Close with an explicit code.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Orderly close.
    #[must_use]
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    /// Link lost.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }
}

/// Event surfaced by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is usable.
    Open,
    /// An inbound frame.
    Message(Frame),
    /// The link ended. Emitted exactly once and always last.
    Close(CloseFrame),
    /// A failure that does not by itself end the link.
    Error(String),
}

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

#[derive(Debug, Default)]
struct LinkState {
    open: AtomicBool,
    closed: AtomicBool,
}

/// Cloneable handle for pushing frames into a socket.
#[derive(Debug, Clone)]
pub struct SocketSender {
    outbound: flume::Sender<Outbound>,
    link: Arc<LinkState>,
}

impl SocketSender {
    /// Enqueue a frame.
    ///
    /// Returns `false` and drops the frame when the link is not open.
    pub fn send(&self, frame: Frame) -> bool {
        if !self.is_open() {
            trace!("dropping {} byte frame: socket not open", frame.len());
            return false;
        }
        self.outbound.send(Outbound::Frame(frame)).is_ok()
    }

    /// Ask the transport to end the link. A `Close` event follows.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Whether frames are currently accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.link.open.load(Ordering::Acquire) && !self.link.closed.load(Ordering::Acquire)
    }
}

/// Owner side of a socket: outbound sender plus the inbound event stream.
#[derive(Debug)]
pub struct Socket {
    sender: SocketSender,
    events: flume::Receiver<TransportEvent>,
}

impl Socket {
    /// Handle for sending frames, cloneable across tasks.
    #[must_use]
    pub const fn sender(&self) -> &SocketSender {
        &self.sender
    }

    /// See [`SocketSender::send`].
    pub fn send(&self, frame: Frame) -> bool {
        self.sender.send(frame)
    }

    /// See [`SocketSender::close`].
    pub fn close(&self) {
        self.sender.close();
    }

    /// Next event, or `None` once the transport side is gone and all events were read.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv_async().await.ok()
    }
}

/// Transport side of a socket.
///
/// Dropping the driver without calling [`SocketDriver::closed`] emits an abnormal close.
#[derive(Debug)]
pub struct SocketDriver {
    outbound: flume::Receiver<Outbound>,
    events: flume::Sender<TransportEvent>,
    link: Arc<LinkState>,
}

impl SocketDriver {
    /// Report the link as usable.
    pub fn opened(&self) {
        if self.is_closed() {
            return;
        }
        self.link.open.store(true, Ordering::Release);
        let _ = self.events.send(TransportEvent::Open);
    }

    /// Deliver an inbound frame.
    pub fn message(&self, frame: Frame) {
        if !self.is_closed() {
            let _ = self.events.send(TransportEvent::Message(frame));
        }
    }

    /// Report a non-fatal failure.
    pub fn error(&self, detail: impl Into<String>) {
        if !self.is_closed() {
            let _ = self.events.send(TransportEvent::Error(detail.into()));
        }
    }

    /// Report the end of the link. Later calls are ignored.
    pub fn closed(&self, frame: CloseFrame) {
        if self.link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.link.open.store(false, Ordering::Release);
        let _ = self.events.send(TransportEvent::Close(frame));
    }

    /// Whether `closed` was already reported.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// Next frame to write.
    ///
    /// Returns `None` when the owner asked to close or dropped every sender; the transport
    /// should then end the link and call [`SocketDriver::closed`].
    pub async fn next_outbound(&self) -> Option<Frame> {
        match self.outbound.recv_async().await {
            Ok(Outbound::Frame(frame)) => Some(frame),
            Ok(Outbound::Close) | Err(_) => None,
        }
    }
}

impl Drop for SocketDriver {
    fn drop(&mut self) {
        self.closed(CloseFrame::abnormal("transport task ended"));
    }
}

/// Create a connected socket pair.
#[must_use]
pub fn socket() -> (Socket, SocketDriver) {
    let (outbound_tx, outbound_rx) = flume::unbounded();
    let (events_tx, events_rx) = flume::unbounded();
    let link = Arc::new(LinkState::default());

    let socket = Socket {
        sender: SocketSender {
            outbound: outbound_tx,
            link: Arc::clone(&link),
        },
        events: events_rx,
    };
    let driver = SocketDriver {
        outbound: outbound_rx,
        events: events_tx,
        link,
    };

    (socket, driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_dropped_until_open() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut socket, driver) = socket();

        assert!(!socket.send(Bytes::from_static(b"early")));

        driver.opened();
        assert_eq!(socket.next_event().await, Some(TransportEvent::Open));
        assert!(socket.send(Bytes::from_static(b"hello")));
        assert_eq!(
            driver.next_outbound().await,
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn test_close_is_emitted_once() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut socket, driver) = socket();
        driver.opened();
        driver.closed(CloseFrame::normal());
        driver.closed(CloseFrame::abnormal("again"));
        drop(driver);

        assert_eq!(socket.next_event().await, Some(TransportEvent::Open));
        assert_eq!(
            socket.next_event().await,
            Some(TransportEvent::Close(CloseFrame::normal()))
        );
        assert_eq!(socket.next_event().await, None);
        assert!(!socket.sender().is_open());
    }

    #[tokio::test]
    async fn test_close_request_ends_outbound() {
        let _ = tracing_subscriber::fmt::try_init();

        let (socket, driver) = socket();
        driver.opened();
        socket.close();
        assert_eq!(driver.next_outbound().await, None);
    }

    #[tokio::test]
    async fn test_dropped_driver_reports_abnormal_close() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut socket, driver) = socket();
        drop(driver);

        let event = socket.next_event().await;
        assert!(matches!(
            event,
            Some(TransportEvent::Close(CloseFrame { code: CloseFrame::ABNORMAL, .. }))
        ));
    }
}
