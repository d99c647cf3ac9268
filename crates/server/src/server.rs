//! Kite server implementation

use crate::auth::{AuthCaching, AuthNegotiator, AuthPolicy};
use crate::config::ServerConfig;
use crate::connection::PeerConnection;
use crate::error::{Result, ServerError};
use crate::registry::{Method, MethodRegistry};

use dashmap::DashMap;
use kite_transport::{Listener, SocketSender, Transport, Transports};
use kite_transport_memory::MemoryTransport;
use kite_transport_ws::WebSocketTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

pub(crate) struct ServerState {
    pub(crate) name: String,
    pub(crate) registry: MethodRegistry,
    pub(crate) default_auth: AuthPolicy,
    pub(crate) negotiator: AuthNegotiator,
    pub(crate) connections: DashMap<Uuid, SocketSender>,
    closed: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
    transports: Transports,
    transport_config: kite_transport::Config,
}

/// Serves a method registry on any number of listeners.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct KiteServer {
    state: Arc<ServerState>,
}

impl std::fmt::Debug for KiteServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteServer")
            .field("name", &self.state.name)
            .field("methods", &self.state.registry.len())
            .field("connections", &self.state.connections.len())
            .finish_non_exhaustive()
    }
}

impl KiteServer {
    /// Create a builder
    #[must_use]
    pub fn builder() -> KiteServerBuilder {
        KiteServerBuilder::new()
    }

    /// Server name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Registered methods
    #[must_use]
    pub fn api(&self) -> &MethodRegistry {
        &self.state.registry
    }

    /// Policy applied to methods without their own
    #[must_use]
    pub fn default_policy(&self) -> &AuthPolicy {
        &self.state.default_auth
    }

    /// Effective policy of `method`: its own, or the default. `None` for unknown methods.
    #[must_use]
    pub fn policy_for(&self, method: &str) -> Option<&AuthPolicy> {
        self.state
            .registry
            .get(method)
            .map(|entry| entry.auth().unwrap_or(&self.state.default_auth))
    }

    /// Number of connected peers
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Listen for WebSocket peers on all interfaces.
    ///
    /// Port `0` picks a free port; the returned URL carries the bound one.
    ///
    /// # Errors
    ///
    /// Fails when the server is closed or the port cannot be bound.
    pub async fn listen(&self, port: u16) -> Result<Url> {
        self.listen_on(&format!("ws://0.0.0.0:{port}/")).await
    }

    /// Listen on `url`, with the transport chosen by its scheme.
    ///
    /// # Errors
    ///
    /// Fails when the server is closed, the URL is invalid, no transport serves its scheme,
    /// or binding fails.
    #[instrument(skip(self), fields(server = %self.state.name))]
    pub async fn listen_on(&self, url: &str) -> Result<Url> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(ServerError::Closed);
        }

        let url = Url::parse(url).map_err(|e| ServerError::InvalidAddress(format!("{url}: {e}")))?;
        let listener: Arc<dyn Listener> = Arc::from(
            self.state
                .transports
                .listen(&url, &self.state.transport_config)
                .await?,
        );
        let local_url = listener.local_url().clone();

        self.state.listeners.lock().push(Arc::clone(&listener));
        tokio::spawn(accept_loop(Arc::clone(&self.state), listener));

        // A close racing with the bind above must not leave this listener running.
        if self.state.closed.load(Ordering::Acquire) {
            self.close_listeners().await;
            return Err(ServerError::Closed);
        }

        info!("Listening on {}", local_url);
        Ok(local_url)
    }

    /// Stop accepting and terminate every connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Currently infallible; listener shutdown failures are logged.
    #[instrument(skip(self), fields(server = %self.state.name))]
    pub async fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            debug!("Server already closed");
            return Ok(());
        }

        self.close_listeners().await;

        for connection in self.state.connections.iter() {
            connection.value().close();
        }

        info!("Server closed");
        Ok(())
    }

    /// Whether [`KiteServer::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    async fn close_listeners(&self) {
        let listeners = std::mem::take(&mut *self.state.listeners.lock());
        for listener in listeners {
            if let Err(e) = listener.close().await {
                warn!("Failed to close listener {}: {}", listener.local_url(), e);
            }
        }
    }
}

async fn accept_loop(state: Arc<ServerState>, listener: Arc<dyn Listener>) {
    loop {
        match listener.accept().await {
            Ok(socket) => {
                if state.closed.load(Ordering::Acquire) {
                    socket.close();
                    break;
                }

                let id = Uuid::new_v4();
                state.connections.insert(id, socket.sender().clone());

                // `close` may have swept the connections between the check above and the insert.
                if state.closed.load(Ordering::Acquire) {
                    state.connections.remove(&id);
                    socket.close();
                    break;
                }

                info!(connection = %id, "Accepted connection on {}", listener.local_url());

                tokio::spawn(PeerConnection::new(id, socket, Arc::clone(&state)).run());
            }
            Err(e) => {
                debug!("Accept loop on {} ended: {}", listener.local_url(), e);
                break;
            }
        }
    }
}

/// Builder for [`KiteServer`]
#[derive(Debug, Default)]
pub struct KiteServerBuilder {
    config: ServerConfig,
    methods: Vec<(String, Method)>,
    transports: Vec<Arc<dyn Transport>>,
}

impl KiteServerBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the server name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the default policy
    #[must_use]
    pub fn auth(mut self, policy: AuthPolicy) -> Self {
        self.config.auth = policy;
        self
    }

    /// Set how predicate outcomes are cached
    #[must_use]
    pub fn auth_caching(mut self, caching: AuthCaching) -> Self {
        self.config.auth_caching = caching;
        self
    }

    /// Set the transport configuration
    #[must_use]
    pub fn transport_config(mut self, config: kite_transport::Config) -> Self {
        self.config.transport = config;
        self
    }

    /// Serve an extra transport, overriding the built-in one for its schemes
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Register a method
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.push((name.into(), method));
        self
    }

    /// Build the server
    ///
    /// # Errors
    ///
    /// Fails on empty, reserved or duplicate method names.
    pub fn build(self) -> Result<KiteServer> {
        let registry = MethodRegistry::from_methods(self.methods)?;

        let mut transports = Transports::new()
            .with(Arc::new(WebSocketTransport::new()))
            .with(Arc::new(MemoryTransport::new()));
        for transport in self.transports {
            transports.register(transport);
        }

        info!(
            "Built server {} with {} methods",
            self.config.name,
            registry.len()
        );

        Ok(KiteServer {
            state: Arc::new(ServerState {
                name: self.config.name,
                registry,
                default_auth: self.config.auth,
                negotiator: AuthNegotiator::new(self.config.auth_caching),
                connections: DashMap::new(),
                closed: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                transports,
                transport_config: self.config.transport,
            }),
        })
    }
}
