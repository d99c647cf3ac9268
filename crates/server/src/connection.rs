//! Per-peer dispatch loop
//!
//! Every accepted socket is driven by one task that owns the peer's [`AuthSession`]. Frames
//! are handled in arrival order; handlers may answer later and in any order.

use crate::auth::{AuthSession, CallContext};
use crate::responder::{Responder, send_response};
use crate::server::ServerState;

use kite_protocol::{AUTHENTICATE_METHOD, CallFrame, ErrorPayload, Request, Response, Value};
use kite_transport::{Socket, TransportEvent};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub(crate) struct PeerConnection {
    id: Uuid,
    socket: Socket,
    state: Arc<ServerState>,
    session: AuthSession,
}

impl PeerConnection {
    pub(crate) fn new(id: Uuid, socket: Socket, state: Arc<ServerState>) -> Self {
        Self {
            id,
            socket,
            state,
            session: AuthSession::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.socket.next_event().await {
            match event {
                TransportEvent::Open => trace!(connection = %self.id, "peer socket open"),
                TransportEvent::Message(frame) => self.handle_frame(&frame).await,
                TransportEvent::Error(detail) => {
                    warn!(connection = %self.id, "transport error: {}", detail);
                }
                TransportEvent::Close(close) => {
                    debug!(
                        connection = %self.id,
                        code = close.code,
                        reason = %close.reason,
                        "peer closed"
                    );
                    break;
                }
            }
        }

        self.state.connections.remove(&self.id);
        info!(connection = %self.id, "connection removed");
    }

    fn reply(&self, response: Response) {
        send_response(self.socket.sender(), response);
    }

    async fn handle_frame(&mut self, data: &[u8]) {
        let frame = match CallFrame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                match e.correlation_id() {
                    Some(id) => {
                        debug!(connection = %self.id, id, "malformed request: {}", e);
                        self.reply(Response::err(id, ErrorPayload::malformed(e.to_string())));
                    }
                    None => warn!(connection = %self.id, "dropping malformed frame: {}", e),
                }
                return;
            }
        };

        match frame {
            CallFrame::Request(request) => self.dispatch(request).await,
            CallFrame::Response(response) => {
                debug!(connection = %self.id, id = response.id, "ignoring unsolicited response");
            }
        }
    }

    async fn dispatch(&mut self, request: Request) {
        if request.method == AUTHENTICATE_METHOD {
            self.handshake(request);
            return;
        }

        let state = Arc::clone(&self.state);
        let Some(entry) = state.registry.get(&request.method) else {
            debug!(connection = %self.id, method = %request.method, "no such method");
            self.reply(Response::err(
                request.id,
                ErrorPayload::method_not_found(&request.method),
            ));
            return;
        };

        let context = CallContext {
            connection_id: self.id,
            method: request.method,
            credentials: self.session.credentials().cloned(),
        };
        let policy = entry.auth().unwrap_or(&state.default_auth);

        if let Err(error) = state
            .negotiator
            .authorize(policy, &mut self.session, &context)
            .await
        {
            self.reply(Response::err(request.id, error));
            return;
        }

        trace!(connection = %self.id, id = request.id, method = %context.method, "invoking");
        let responder = Responder::new(request.id, context, self.socket.sender().clone());
        entry.invoke(request.args, responder);
    }

    fn handshake(&mut self, request: Request) {
        match request.args.get(0).filter(|credentials| !credentials.is_null()) {
            Some(credentials) => {
                self.session.authenticate(credentials.clone());
                info!(connection = %self.id, "credentials presented");
                self.reply(Response::ok(request.id, Value::Bool(true)));
            }
            None => self.reply(Response::err(
                request.id,
                ErrorPayload::invalid_arguments("credentials are required"),
            )),
        }
    }
}
