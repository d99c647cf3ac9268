//! Completion handle passed to method handlers.

use crate::auth::CallContext;

use kite_protocol::{CallFrame, CorrelationId, ErrorPayload, Response, Value};
use kite_transport::SocketSender;
use tracing::{error, trace, warn};

/// Completes one call. Consumed by the first `ok`, `err` or `respond`.
///
/// A responder dropped without answering leaves the call pending on the client.
#[derive(Debug)]
pub struct Responder {
    id: CorrelationId,
    context: CallContext,
    sender: SocketSender,
    settled: bool,
}

impl Responder {
    pub(crate) const fn new(id: CorrelationId, context: CallContext, sender: SocketSender) -> Self {
        Self {
            id,
            context,
            sender,
            settled: false,
        }
    }

    /// Correlation id of the call.
    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        self.id
    }

    /// Who is calling what.
    #[must_use]
    pub const fn context(&self) -> &CallContext {
        &self.context
    }

    /// Answer with a result.
    pub fn ok(self, result: Value) {
        self.respond(Ok(result));
    }

    /// Answer with an error.
    pub fn err(self, error: impl Into<ErrorPayload>) {
        self.respond(Err(error.into()));
    }

    /// Answer with either outcome.
    pub fn respond(mut self, outcome: Result<Value, ErrorPayload>) {
        self.settled = true;
        send_response(
            &self.sender,
            Response {
                id: self.id,
                outcome,
            },
        );
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                id = self.id,
                method = %self.context.method,
                "responder dropped without an answer, call stays pending"
            );
        }
    }
}

pub(crate) fn send_response(sender: &SocketSender, response: Response) {
    let id = response.id;
    match CallFrame::Response(response).encode() {
        Ok(frame) => {
            if !sender.send(frame) {
                trace!(id, "connection gone, response dropped");
            }
        }
        Err(e) => error!(id, "failed to encode response: {}", e),
    }
}
