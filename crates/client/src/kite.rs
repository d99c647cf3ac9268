use crate::call::Call;
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::driver::{Command, Driver};
use crate::error::{Error, Result};
use crate::multiplexer::Outgoing;
use crate::state::{Event, ReadyState};

use kite_protocol::{Args, AuthStatus, CallFrame, Request, Value};
use kite_transport::{Transport, Transports};
use kite_transport_memory::MemoryTransport;
use kite_transport_ws::WebSocketTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};
use url::Url;

/// Handle to a client connection.
///
/// The connection itself runs on a background task; this handle issues commands to it.
/// Dropping the handle shuts the connection down and fails whatever is still pending with
/// [`Error::Shutdown`].
pub struct Kite {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    ids: Arc<AtomicU64>,
    state: watch::Receiver<ReadyState>,
    auth: watch::Receiver<AuthStatus>,
    events: broadcast::Sender<Event>,
    default_timeout: Option<Duration>,
}

impl Kite {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client for `url` with the default configuration. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if `url` does not parse or no transport serves its scheme.
    pub fn new(url: &str) -> Result<Self> {
        Self::builder().url(url).build()
    }

    /// Client for a complete configuration, using the built-in transports.
    ///
    /// # Errors
    ///
    /// Fails if no transport serves the URL's scheme.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::spawn(config, default_transports())
    }

    fn spawn(config: ClientConfig, transports: Transports) -> Result<Self> {
        transports.resolve(&config.url)?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ReadyState::Init);
        let (auth_tx, auth) = watch::channel(AuthStatus::Unauthenticated);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let ids = Arc::new(AtomicU64::new(1));

        let kite = Self {
            url: config.url.clone(),
            commands,
            ids: Arc::clone(&ids),
            state,
            auth,
            events: events.clone(),
            default_timeout: config.default_timeout,
        };

        info!(url = %kite.url, "starting client");
        let driver = Driver::new(config, transports, commands_rx, state_tx, auth_tx, events, ids);
        tokio::spawn(driver.run());

        Ok(kite)
    }

    /// Server address
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Open the connection. Ignored unless the state is `Init` or `Closed`; cancels a
    /// scheduled reconnect.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection.
    ///
    /// With `reconnect` the connection is reopened after the usual backoff and pending calls
    /// survive; without it every pending call fails with [`Error::ConnectionClosed`].
    pub fn disconnect(&self, reconnect: bool) {
        self.command(Command::Disconnect { reconnect });
    }

    /// Current lifecycle state
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Outcome of the authentication handshake on the current link
    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        self.auth.borrow().clone()
    }

    /// Receive connection events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Wait until the connection reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the connection task is gone.
    pub async fn wait_for(&self, state: ReadyState) -> Result<()> {
        let mut receiver = self.state.clone();
        let reached = receiver.wait_for(|current| *current == state).await.is_ok();
        if reached { Ok(()) } else { Err(Error::Shutdown) }
    }

    /// Call `method` with the client's default timeout.
    ///
    /// A JSON array is sent as the positional argument list, any other value as a single
    /// argument. The call is queued until the connection is open.
    pub fn tell(&self, method: &str, args: impl Into<Args>) -> Call {
        self.issue(method, args.into(), self.default_timeout)
    }

    /// Call `method`, failing with [`Error::Timeout`] if no response arrives within `timeout`.
    pub fn tell_with_timeout(&self, method: &str, args: impl Into<Args>, timeout: Duration) -> Call {
        self.issue(method, args.into(), Some(timeout))
    }

    fn issue(&self, method: &str, args: Args, timeout: Option<Duration>) -> Call {
        if method.is_empty() {
            return Call::ready(Err(Error::InvalidMethod), self.commands.clone());
        }

        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let frame = match CallFrame::Request(Request::new(id, method, args)).encode() {
            Ok(frame) => frame,
            Err(e) => return Call::ready(Err(e.into()), self.commands.clone()),
        };

        let (completion, receiver) = oneshot::channel();
        let outgoing = Outgoing {
            id,
            method: method.to_string(),
            frame,
            completion,
        };

        // If the driver is gone the completion is dropped and the call resolves to `Shutdown`.
        let _ = self.commands.send(Command::Call(outgoing));
        Call::waiting(id, receiver, timeout, self.commands.clone())
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(url = %self.url, "connection task already gone");
        }
    }
}

impl std::fmt::Debug for Kite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kite")
            .field("url", &self.url.as_str())
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl Drop for Kite {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

fn default_transports() -> Transports {
    Transports::new()
        .with(Arc::new(WebSocketTransport::new()))
        .with(Arc::new(MemoryTransport::new()))
}

/// Builder for [`Kite`]
#[derive(Debug, Default)]
pub struct ClientBuilder {
    url: Option<String>,
    auto_connect: Option<bool>,
    auto_reconnect: Option<bool>,
    reconnect: Option<ReconnectPolicy>,
    default_timeout: Option<Duration>,
    credentials: Option<Value>,
    transport_config: Option<kite_transport::Config>,
    event_capacity: Option<usize>,
    transports: Vec<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server address
    #[must_use]
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Connect as soon as the client is built (default `true`)
    #[must_use]
    pub const fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = Some(enabled);
        self
    }

    /// Reconnect after unrequested closes (default `true`)
    #[must_use]
    pub const fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    /// Set the reconnection backoff
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Timeout for calls made with [`Kite::tell`]
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Credentials presented after every open
    #[must_use]
    pub fn credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the transport configuration
    #[must_use]
    pub fn transport_config(mut self, config: kite_transport::Config) -> Self {
        self.transport_config = Some(config);
        self
    }

    /// Events buffered per subscriber before the slowest one starts lagging
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Use an extra transport, overriding the built-in one for its schemes
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Build the client and start its connection task
    ///
    /// # Errors
    ///
    /// Fails if the URL is missing, does not parse, or no transport serves its scheme.
    pub fn build(self) -> Result<Kite> {
        let raw = self
            .url
            .ok_or_else(|| Error::InvalidUrl("no url given".to_string()))?;
        let url = Url::parse(&raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;

        let mut config = ClientConfig::new(url);
        if let Some(enabled) = self.auto_connect {
            config.auto_connect = enabled;
        }
        if let Some(enabled) = self.auto_reconnect {
            config.auto_reconnect = enabled;
        }
        if let Some(policy) = self.reconnect {
            config.reconnect = policy;
        }
        if let Some(transport) = self.transport_config {
            config.transport = transport;
        }
        if let Some(capacity) = self.event_capacity {
            config.event_capacity = capacity;
        }
        config.default_timeout = self.default_timeout;
        config.credentials = self.credentials;

        let mut transports = default_transports();
        for transport in self.transports {
            transports.register(transport);
        }

        Kite::spawn(config, transports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use kite_protocol::json;

    #[tokio::test]
    async fn test_builder_requires_url() {
        assert_matches!(Kite::builder().build(), Err(Error::InvalidUrl(_)));
        assert_matches!(Kite::new("not a url"), Err(Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        assert_matches!(Kite::new("ftp://localhost/"), Err(Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_empty_method_fails_immediately() {
        let kite = Kite::builder()
            .url("memory://kite-empty-method")
            .auto_connect(false)
            .build()
            .unwrap();

        let call = kite.tell("", json!(1));
        assert_eq!(call.id(), None);
        assert_matches!(call.await, Err(Error::InvalidMethod));
        assert_eq!(kite.ready_state(), ReadyState::Init);
    }

    #[tokio::test]
    async fn test_ids_are_fresh_per_call() {
        let kite = Kite::builder()
            .url("memory://kite-fresh-ids")
            .auto_connect(false)
            .build()
            .unwrap();

        let first = kite.tell("a", ());
        let second = kite.tell("b", ());
        assert_ne!(first.id(), second.id());
    }
}
