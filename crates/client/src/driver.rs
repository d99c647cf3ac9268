//! Connection driver
//!
//! One task owns the socket, the pending calls and the reconnect timer. The [`Kite`] handle
//! talks to it through [`Command`]s; it reports back through watch channels for the ready
//! state and auth status, and a broadcast channel for events.
//!
//! [`Kite`]: crate::Kite

use crate::config::ClientConfig;
use crate::error::Error;
use crate::multiplexer::{Multiplexer, Outgoing};
use crate::reconnect::ReconnectSchedule;
use crate::state::{Event, ReadyState};

use kite_protocol::{
    AUTHENTICATE_METHOD, Args, AuthStatus, CallFrame, CorrelationId, ErrorPayload, Request,
    Response, Value,
};
use kite_transport::{CloseFrame, Socket, TransportEvent, Transports};
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect { reconnect: bool },
    Call(Outgoing),
    Forget(CorrelationId),
    Shutdown,
}

pub(crate) struct Driver {
    config: ClientConfig,
    transports: Transports,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ReadyState>,
    auth: watch::Sender<AuthStatus>,
    events: broadcast::Sender<Event>,
    ids: Arc<AtomicU64>,
    socket: Option<Socket>,
    /// Set by `disconnect` until the link it closes is gone
    disconnect_intent: Option<bool>,
    schedule: ReconnectSchedule,
    multiplexer: Multiplexer,
    handshake_id: Option<CorrelationId>,
}

async fn next_event(socket: &mut Option<Socket>) -> Option<TransportEvent> {
    match socket {
        Some(socket) => socket.next_event().await,
        None => pending().await,
    }
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ClientConfig,
        transports: Transports,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ReadyState>,
        auth: watch::Sender<AuthStatus>,
        events: broadcast::Sender<Event>,
        ids: Arc<AtomicU64>,
    ) -> Self {
        let schedule = ReconnectSchedule::new(config.reconnect.clone());
        Self {
            config,
            transports,
            commands,
            state,
            auth,
            events,
            ids,
            socket: None,
            disconnect_intent: None,
            schedule,
            multiplexer: Multiplexer::new(),
            handshake_id: None,
        }
    }

    pub(crate) async fn run(mut self) {
        if self.config.auto_connect {
            self.connect();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = next_event(&mut self.socket) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        self.socket = None;
                        self.on_closed(CloseFrame::abnormal("transport gone"));
                    }
                },
                () = self.schedule.fired() => self.on_reconnect_timer(),
            }
        }

        self.shutdown();
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ReadyState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(url = %self.config.url, from = %previous, to = %next, "ready state changed");
        }
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect { reconnect } => self.disconnect(reconnect),
            Command::Call(outgoing) => self.call(outgoing),
            Command::Forget(id) => {
                if self.multiplexer.forget(id) {
                    trace!(id, "call forgotten");
                }
            }
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(frame) => self.on_message(&frame),
            TransportEvent::Error(detail) => {
                warn!(url = %self.config.url, "transport error: {}", detail);
                self.emit(Event::Error(detail));
            }
            TransportEvent::Close(frame) => {
                self.socket = None;
                self.on_closed(frame);
            }
        }
    }

    fn connect(&mut self) {
        match self.ready_state() {
            ReadyState::Init | ReadyState::Closed => {}
            state => {
                trace!(%state, "connect ignored");
                return;
            }
        }

        if self.schedule.cancel() {
            debug!("manual connect replaces scheduled reconnect");
        }
        self.open_socket();
    }

    fn open_socket(&mut self) {
        self.disconnect_intent = None;
        self.set_state(ReadyState::Connecting);
        info!(url = %self.config.url, "connecting");

        match self
            .transports
            .open(&self.config.url, &self.config.transport)
        {
            Ok(socket) => self.socket = Some(socket),
            Err(e) => {
                error!(url = %self.config.url, "cannot open transport: {}", e);
                self.emit(Event::Error(e.to_string()));
                self.on_closed(CloseFrame::abnormal(e.to_string()));
            }
        }
    }

    fn disconnect(&mut self, reconnect: bool) {
        match self.ready_state() {
            ReadyState::Init | ReadyState::Closed => {
                if self.schedule.cancel() {
                    debug!("disconnect cancels scheduled reconnect");
                }
                self.set_state(ReadyState::Closed);
                self.reconnect_or_fail(reconnect);
            }
            ReadyState::Connecting => {
                // Abandon the attempt; the transport winds down once the socket is dropped.
                self.disconnect_intent = Some(reconnect);
                self.set_state(ReadyState::Closing);
                self.socket = None;
                if !reconnect {
                    self.multiplexer.fail_all(|| Error::ConnectionClosed);
                }
                self.on_closed(CloseFrame::normal());
            }
            ReadyState::Open | ReadyState::Closing => {
                self.disconnect_intent = Some(reconnect);
                self.set_state(ReadyState::Closing);
                if let Some(socket) = &self.socket {
                    socket.close();
                }
                if !reconnect {
                    self.multiplexer.fail_all(|| Error::ConnectionClosed);
                }
            }
        }
    }

    fn call(&mut self, outgoing: Outgoing) {
        trace!(id = outgoing.id, method = %outgoing.method, "call issued");
        self.multiplexer.register(outgoing);

        if self.ready_state() == ReadyState::Open {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Some(socket) = &self.socket {
            self.multiplexer.flush(socket.sender());
        }
    }

    fn on_open(&mut self) {
        if self.ready_state() != ReadyState::Connecting {
            debug!(state = %self.ready_state(), "ignoring open");
            return;
        }

        self.schedule.reset();
        self.set_state(ReadyState::Open);
        info!(url = %self.config.url, "connection open");

        let reset = self.multiplexer.fail_sent(|| Error::ConnectionReset);
        if reset > 0 {
            debug!(reset, "failed calls sent on the previous link");
        }

        if let Some(credentials) = self.config.credentials.clone() {
            self.send_handshake(credentials);
        }

        self.flush();
        self.emit(Event::Open);
    }

    fn on_closed(&mut self, frame: CloseFrame) {
        let intent = self.disconnect_intent.take();

        self.set_state(ReadyState::Closed);
        self.handshake_id = None;
        self.auth.send_replace(AuthStatus::Unauthenticated);
        info!(
            url = %self.config.url,
            code = frame.code,
            reason = %frame.reason,
            "connection closed"
        );
        self.emit(Event::Close(frame));

        self.reconnect_or_fail(intent.unwrap_or(self.config.auto_reconnect));
    }

    /// Arm the next reconnect attempt, or fail every pending call when none will come.
    fn reconnect_or_fail(&mut self, reconnect: bool) {
        if reconnect {
            match self.schedule.schedule() {
                Some(delay) => {
                    debug!(?delay, attempt = self.schedule.attempts(), "reconnect scheduled");
                    return;
                }
                None => warn!(
                    attempts = self.schedule.attempts(),
                    "giving up on reconnecting"
                ),
            }
        }

        self.multiplexer.fail_all(|| Error::ConnectionClosed);
    }

    fn on_reconnect_timer(&mut self) {
        if self.ready_state() != ReadyState::Closed {
            return;
        }

        info!(attempt = self.schedule.attempts(), "reconnecting");
        self.open_socket();
    }

    fn on_message(&mut self, data: &[u8]) {
        match CallFrame::decode(data) {
            Ok(CallFrame::Response(response)) => self.on_response(response),
            Ok(CallFrame::Request(request)) => {
                debug!(id = request.id, method = %request.method, "server called the client");
                self.reply(Response::err(
                    request.id,
                    ErrorPayload::method_not_found(&request.method),
                ));
            }
            Err(e) => {
                warn!("malformed frame from server: {}", e);
                if let Some(id) = e.correlation_id() {
                    self.multiplexer.complete(id, Err(Error::Protocol(e)));
                }
            }
        }
    }

    fn on_response(&mut self, response: Response) {
        if self.handshake_id == Some(response.id) {
            self.on_handshake_response(response);
            return;
        }

        let id = response.id;
        let outcome = response.outcome.map_err(Error::Remote);
        if !self.multiplexer.complete(id, outcome) {
            debug!(id, "discarding response for unknown call");
        }
    }

    fn reply(&self, response: Response) {
        let Some(socket) = &self.socket else {
            return;
        };
        match CallFrame::Response(response).encode() {
            Ok(frame) => {
                socket.send(frame);
            }
            Err(e) => error!("failed to encode response: {}", e),
        }
    }

    fn send_handshake(&mut self, credentials: Value) {
        let Some(socket) = &self.socket else {
            return;
        };

        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, AUTHENTICATE_METHOD, Args::single(credentials));

        match CallFrame::Request(request).encode() {
            Ok(frame) => {
                if socket.send(frame) {
                    debug!(id, "authentication handshake sent");
                    self.handshake_id = Some(id);
                    self.auth.send_replace(AuthStatus::Pending);
                }
            }
            Err(e) => error!("failed to encode handshake: {}", e),
        }
    }

    fn on_handshake_response(&mut self, response: Response) {
        self.handshake_id = None;

        match response.outcome {
            Ok(_) => {
                let credentials = self.config.credentials.clone().unwrap_or(Value::Null);
                info!(url = %self.config.url, "authenticated");
                self.auth.send_replace(AuthStatus::Authenticated(credentials));
            }
            Err(e) => {
                warn!(url = %self.config.url, "authentication handshake rejected: {}", e);
                self.auth.send_replace(AuthStatus::Unauthenticated);
                self.emit(Event::Error(format!("authentication rejected: {e}")));
            }
        }
    }

    fn shutdown(&mut self) {
        debug!(
            url = %self.config.url,
            pending = self.multiplexer.len(),
            queued = self.multiplexer.queued(),
            reconnect_scheduled = self.schedule.is_scheduled(),
            "driver shutting down"
        );

        self.schedule.cancel();
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.multiplexer.fail_all(|| Error::Shutdown);
        self.set_state(ReadyState::Closed);
    }
}
