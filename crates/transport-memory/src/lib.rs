//! In-memory transport implementation
//!
//! This transport routes frames between sockets within the same process, which makes it
//! the transport of choice for tests and embedded setups. Listeners register under a name
//! and are addressed as `memory://<name>`.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use kite_transport::{
    CloseFrame, Config, Listener, Socket, SocketDriver, Transport, TransportError, socket,
};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Global registry of listeners, keyed by name
static GLOBAL_REGISTRY: Lazy<DashMap<String, Registration>> = Lazy::new(DashMap::new);

#[derive(Debug, Clone)]
struct Registration {
    listener_id: Uuid,
    incoming_tx: flume::Sender<Socket>,
}

/// Memory transport implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a new memory transport
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }
}

fn endpoint_name(url: &Url) -> Result<String, TransportError> {
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::InvalidAddress(format!("No endpoint name in {url}")))
}

#[async_trait]
impl Transport for MemoryTransport {
    fn schemes(&self) -> &'static [&'static str] {
        &["memory"]
    }

    fn open(&self, url: &Url, _config: &Config) -> Socket {
        let (client, client_driver) = socket();

        let target = endpoint_name(url).and_then(|name| {
            GLOBAL_REGISTRY
                .get(&name)
                .map(|registration| registration.incoming_tx.clone())
                .ok_or_else(|| {
                    TransportError::ConnectionFailed(format!("No listener for {name}"))
                })
        });

        tokio::spawn(async move {
            let incoming_tx = match target {
                Ok(incoming_tx) => incoming_tx,
                Err(e) => {
                    debug!("Memory connect failed: {}", e);
                    client_driver.error(e.to_string());
                    client_driver.closed(CloseFrame::abnormal("connection refused"));
                    return;
                }
            };

            let (server, server_driver) = socket();
            server_driver.opened();

            if incoming_tx.send_async(server).await.is_err() {
                client_driver.error("Listener closed");
                client_driver.closed(CloseFrame::abnormal("connection refused"));
                return;
            }

            let conn_id = Uuid::new_v4();
            info!("Memory connection {} established", conn_id);
            client_driver.opened();

            relay(conn_id, client_driver, server_driver).await;
        });

        client
    }

    async fn listen(
        &self,
        url: &Url,
        _config: &Config,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let name = endpoint_name(url)?;

        debug!("Creating memory listener for {}", name);

        let (incoming_tx, incoming_rx) = flume::unbounded();
        let listener_id = Uuid::new_v4();

        match GLOBAL_REGISTRY.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse(format!(
                    "{name} already has a listener"
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(Registration {
                    listener_id,
                    incoming_tx,
                });
            }
        }

        info!("Memory listener created for {}", name);

        Ok(Box::new(MemoryListener {
            listener_id,
            name,
            url: url.clone(),
            incoming_rx,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Shuttle frames between the two ends until either asks to close
async fn relay(conn_id: Uuid, client: SocketDriver, server: SocketDriver) {
    loop {
        tokio::select! {
            frame = client.next_outbound() => match frame {
                Some(frame) => server.message(frame),
                None => break,
            },
            frame = server.next_outbound() => match frame {
                Some(frame) => client.message(frame),
                None => break,
            },
        }
    }

    debug!("Closing memory connection {}", conn_id);
    client.closed(CloseFrame::normal());
    server.closed(CloseFrame::normal());
}

/// Memory listener implementation
#[derive(Debug)]
struct MemoryListener {
    listener_id: Uuid,
    name: String,
    url: Url,
    incoming_rx: flume::Receiver<Socket>,
    closed: AtomicBool,
}

impl MemoryListener {
    fn unregister(&self) {
        GLOBAL_REGISTRY.remove_if(&self.name, |_, registration| {
            registration.listener_id == self.listener_id
        });
    }
}

#[async_trait]
impl Listener for MemoryListener {
    fn local_url(&self) -> &Url {
        &self.url
    }

    async fn accept(&self) -> Result<Socket, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let socket = self
            .incoming_rx
            .recv_async()
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        debug!("Memory listener {} accepted connection", self.name);
        Ok(socket)
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory listener for {}", self.name);
        self.closed.store(true, Ordering::Release);
        self.unregister();
        Ok(())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kite_transport::TransportEvent;

    fn url(name: &str) -> Url {
        Url::parse(&format!("memory://{name}")).unwrap()
    }

    #[tokio::test]
    async fn test_node_already_listening() {
        let _ = tracing_subscriber::fmt::try_init();

        let transport = MemoryTransport::new();
        let _listener1 = transport
            .listen(&url("already-listening"), &Config::default())
            .await
            .unwrap();

        let result = transport
            .listen(&url("already-listening"), &Config::default())
            .await;
        assert!(matches!(result, Err(TransportError::AddressInUse(_))));
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let _ = tracing_subscriber::fmt::try_init();

        let transport = MemoryTransport::new();
        let listener = transport
            .listen(&url("close-unregisters"), &Config::default())
            .await
            .unwrap();
        listener.close().await.unwrap();

        assert!(!GLOBAL_REGISTRY.contains_key("close-unregisters"));
        assert!(listener.accept().await.is_err());

        // The name is free again.
        let _again = transport
            .listen(&url("close-unregisters"), &Config::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_listener() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut socket = MemoryTransport::new().open(&url("nobody-home"), &Config::default());

        assert!(matches!(
            socket.next_event().await,
            Some(TransportEvent::Error(_))
        ));
        assert!(matches!(
            socket.next_event().await,
            Some(TransportEvent::Close(CloseFrame {
                code: CloseFrame::ABNORMAL,
                ..
            }))
        ));
    }

    #[test]
    fn test_endpoint_name_required() {
        let url = Url::parse("memory:").unwrap();
        assert!(endpoint_name(&url).is_err());
    }
}
