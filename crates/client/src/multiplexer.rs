//! Correlation of requests and responses
//!
//! Pending calls live in an ordered map keyed by correlation id. A call is first queued, then
//! marked as sent once its frame was handed to an open socket. The driver decides what
//! happens to each group when the link goes away.

use crate::error::{Error, Result};

use kite_protocol::{Bytes, CorrelationId, Value};
use kite_transport::SocketSender;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::oneshot;
use tracing::trace;

/// Where a call's outcome is delivered
pub(crate) type Completion = oneshot::Sender<Result<Value>>;

/// A call on its way from `tell` to the driver
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) id: CorrelationId,
    pub(crate) method: String,
    pub(crate) frame: Bytes,
    pub(crate) completion: Completion,
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    frame: Bytes,
    completion: Completion,
    sent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Multiplexer {
    pending: BTreeMap<CorrelationId, PendingCall>,
    queue: VecDeque<CorrelationId>,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a call and queue its frame. Ids are allocated monotonically, so never reused.
    pub(crate) fn register(&mut self, outgoing: Outgoing) {
        let Outgoing {
            id,
            method,
            frame,
            completion,
        } = outgoing;

        self.pending.insert(
            id,
            PendingCall {
                method,
                frame,
                completion,
                sent: false,
            },
        );
        self.queue.push_back(id);
    }

    /// Send queued frames in issue order. Stops at the first frame the socket refuses.
    pub(crate) fn flush(&mut self, sender: &SocketSender) {
        while let Some(id) = self.queue.front().copied() {
            let Some(call) = self.pending.get_mut(&id) else {
                // Forgotten while queued.
                self.queue.pop_front();
                continue;
            };

            if !sender.send(call.frame.clone()) {
                trace!(id, "socket refused frame, keeping queue");
                return;
            }

            trace!(id, method = %call.method, "sent");
            call.sent = true;
            self.queue.pop_front();
        }
    }

    /// Deliver an outcome. Returns `false` when no call waits for `id`.
    pub(crate) fn complete(&mut self, id: CorrelationId, outcome: Result<Value>) -> bool {
        let Some(call) = self.pending.remove(&id) else {
            return false;
        };

        trace!(id, method = %call.method, ok = outcome.is_ok(), "completing call");
        // The caller may have stopped waiting; that is fine.
        let _ = call.completion.send(outcome);
        true
    }

    /// Drop a call without delivering anything.
    pub(crate) fn forget(&mut self, id: CorrelationId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every call.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> Error) {
        self.queue.clear();
        for (id, call) in std::mem::take(&mut self.pending) {
            trace!(id, method = %call.method, "failing call");
            let _ = call.completion.send(Err(error()));
        }
    }

    /// Fail calls whose frames already went out. Queued calls stay.
    pub(crate) fn fail_sent(&mut self, error: impl Fn() -> Error) -> usize {
        let sent: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, call)| call.sent)
            .map(|(id, _)| *id)
            .collect();

        for id in &sent {
            self.complete(*id, Err(error()));
        }
        sent.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use kite_protocol::json;
    use kite_transport::{TransportEvent, socket};
    use tokio::sync::oneshot::Receiver;

    fn outgoing(id: CorrelationId) -> (Outgoing, Receiver<Result<Value>>) {
        let (completion, rx) = oneshot::channel();
        let frame = Bytes::from(format!("frame-{id}"));
        (
            Outgoing {
                id,
                method: "square".to_string(),
                frame,
                completion,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_complete_each_call_once() {
        let mut multiplexer = Multiplexer::new();
        let (first, mut first_rx) = outgoing(1);
        let (second, mut second_rx) = outgoing(2);
        multiplexer.register(first);
        multiplexer.register(second);

        assert!(multiplexer.complete(2, Ok(json!("two"))));
        assert!(multiplexer.complete(1, Ok(json!("one"))));
        assert!(!multiplexer.complete(1, Ok(json!("late"))));

        assert_eq!(second_rx.try_recv().unwrap().unwrap(), json!("two"));
        assert_eq!(first_rx.try_recv().unwrap().unwrap(), json!("one"));
        assert_eq!(multiplexer.len(), 0);
    }

    #[tokio::test]
    async fn test_flush_only_when_open() {
        let (mut socket, driver) = socket();
        let mut multiplexer = Multiplexer::new();
        let (first, _first_rx) = outgoing(1);
        let (second, _second_rx) = outgoing(2);
        multiplexer.register(first);
        multiplexer.register(second);

        multiplexer.flush(socket.sender());
        assert_eq!(multiplexer.queued(), 2);

        driver.opened();
        assert_eq!(socket.next_event().await, Some(TransportEvent::Open));
        multiplexer.flush(socket.sender());
        assert_eq!(multiplexer.queued(), 0);

        assert_eq!(driver.next_outbound().await, Some(Bytes::from("frame-1")));
        assert_eq!(driver.next_outbound().await, Some(Bytes::from("frame-2")));
    }

    #[tokio::test]
    async fn test_fail_sent_keeps_queued_calls() {
        let (socket, driver) = socket();
        driver.opened();

        let mut multiplexer = Multiplexer::new();
        let (sent, mut sent_rx) = outgoing(1);
        multiplexer.register(sent);
        multiplexer.flush(socket.sender());

        let (queued, mut queued_rx) = outgoing(2);
        multiplexer.register(queued);

        assert_eq!(multiplexer.fail_sent(|| Error::ConnectionReset), 1);
        assert_matches!(sent_rx.try_recv(), Ok(Err(Error::ConnectionReset)));
        assert!(queued_rx.try_recv().is_err());
        assert_eq!(multiplexer.len(), 1);
        assert_eq!(multiplexer.queued(), 1);
    }

    #[tokio::test]
    async fn test_forgotten_calls_are_skipped() {
        let (socket, driver) = socket();
        driver.opened();

        let mut multiplexer = Multiplexer::new();
        let (first, _first_rx) = outgoing(1);
        let (second, _second_rx) = outgoing(2);
        multiplexer.register(first);
        multiplexer.register(second);

        assert!(multiplexer.forget(1));
        multiplexer.flush(socket.sender());

        assert_eq!(driver.next_outbound().await, Some(Bytes::from("frame-2")));
    }

    #[test]
    fn test_fail_all() {
        let mut multiplexer = Multiplexer::new();
        let (first, mut first_rx) = outgoing(1);
        let (second, mut second_rx) = outgoing(2);
        multiplexer.register(first);
        multiplexer.register(second);

        multiplexer.fail_all(|| Error::ConnectionClosed);

        assert_matches!(first_rx.try_recv(), Ok(Err(Error::ConnectionClosed)));
        assert_matches!(second_rx.try_recv(), Ok(Err(Error::ConnectionClosed)));
        assert_eq!(multiplexer.len(), 0);
        assert_eq!(multiplexer.queued(), 0);
    }
}
