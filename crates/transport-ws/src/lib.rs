//! WebSocket transport implementation
//!
//! - For connecting: uses standard WebSocket client connections via tokio-tungstenite
//! - For listening: binds a TCP listener and serves the upgrade route with axum
//!
//! `http` and `https` URLs are accepted and dialed as `ws` and `wss`. Frames that are valid
//! UTF-8 go out as text messages, anything else as binary.

use async_trait::async_trait;
use axum::Router;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::{self, WebSocket};
use axum::routing::get;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use kite_transport::{
    CloseFrame, Config, Frame, Listener, Socket, SocketDriver, Transport, TransportError, socket,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport implementation
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Normalize `url` to a `ws`/`wss` URL.
///
/// # Errors
///
/// Returns [`TransportError::UnsupportedScheme`] for schemes other than ws, wss, http and https.
pub fn websocket_url(url: &Url) -> Result<Url, TransportError> {
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };

    let mut target = url.clone();
    target
        .set_scheme(scheme)
        .map_err(|()| TransportError::InvalidAddress(format!("Cannot dial {url} as {scheme}")))?;
    Ok(target)
}

fn fail(driver: &SocketDriver, detail: String) {
    warn!("{}", detail);
    driver.error(detail.clone());
    driver.closed(CloseFrame::abnormal(detail));
}

fn oversized(frame_len: usize, max_frame_size: usize) -> Option<String> {
    (frame_len > max_frame_size).then(|| {
        TransportError::FrameTooLarge {
            size: frame_len,
            max: max_frame_size,
        }
        .to_string()
    })
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn schemes(&self) -> &'static [&'static str] {
        &["ws", "wss", "http", "https"]
    }

    fn open(&self, url: &Url, config: &Config) -> Socket {
        let (socket, driver) = socket();
        let target = websocket_url(url);
        let connect_timeout = config.connect_timeout;
        let max_frame_size = config.max_frame_size;

        tokio::spawn(async move {
            let target = match target {
                Ok(target) => target,
                Err(e) => return fail(&driver, e.to_string()),
            };

            debug!("Connecting to WebSocket at {}", target);

            match tokio::time::timeout(connect_timeout, connect_async(target.as_str())).await {
                Ok(Ok((stream, _))) => {
                    info!("WebSocket connected to {}", target);
                    driver.opened();
                    pump_client(stream, driver, max_frame_size).await;
                }
                Ok(Err(e)) => fail(&driver, format!("WebSocket connect failed: {e}")),
                Err(_) => fail(
                    &driver,
                    format!("WebSocket connect to {target} timed out after {connect_timeout:?}"),
                ),
            }
        });

        socket
    }

    async fn listen(
        &self,
        url: &Url,
        config: &Config,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let mut local_url = websocket_url(url)?;
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidAddress(format!("No host in {url}")))?;
        let port = local_url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let tcp = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse(addr.clone())
            } else {
                TransportError::Io(e)
            }
        })?;
        let bound = tcp.local_addr()?;
        local_url
            .set_port(Some(bound.port()))
            .map_err(|()| TransportError::InvalidAddress(format!("Cannot set port on {url}")))?;

        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        let (incoming_tx, incoming_rx) = mpsc::channel(config.channel_capacity);
        let (closed_tx, _) = watch::channel(false);
        let max_frame_size = config.max_frame_size;

        let handler = move |upgrade: WebSocketUpgrade| {
            let incoming_tx = incoming_tx.clone();

            async move {
                upgrade.on_upgrade(move |websocket| async move {
                    let (socket, driver) = socket();
                    driver.opened();
                    if incoming_tx.send(socket).await.is_err() {
                        error!("Failed to send connection to listener");
                        return;
                    }
                    pump_server(websocket, driver, max_frame_size).await;
                })
            }
        };
        let router = Router::new().route(&path, get(handler));

        let mut shutdown = closed_tx.subscribe();
        let server = axum::serve(tcp, router).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        });
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("WebSocket server error: {}", e);
            }
        });

        info!("WebSocket listener bound to {} at {}", bound, path);

        Ok(Box::new(WebSocketListener {
            local_url,
            incoming_rx: Mutex::new(incoming_rx),
            closed_tx,
        }))
    }
}

/// Listener fed by the axum upgrade handler
#[derive(Debug)]
struct WebSocketListener {
    local_url: Url,
    incoming_rx: Mutex<mpsc::Receiver<Socket>>,
    closed_tx: watch::Sender<bool>,
}

#[async_trait]
impl Listener for WebSocketListener {
    fn local_url(&self) -> &Url {
        &self.local_url
    }

    async fn accept(&self) -> Result<Socket, TransportError> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut incoming_rx = self.incoming_rx.lock().await;
        tokio::select! {
            socket = incoming_rx.recv() => socket.ok_or(TransportError::ConnectionClosed),
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing WebSocket listener at {}", self.local_url);
        self.closed_tx.send_replace(true);
        Ok(())
    }
}

impl Drop for WebSocketListener {
    fn drop(&mut self) {
        self.closed_tx.send_replace(true);
    }
}

fn client_message(frame: Frame) -> Message {
    match std::str::from_utf8(&frame) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(frame),
    }
}

fn server_message(frame: Frame) -> ws::Message {
    match std::str::from_utf8(&frame) {
        Ok(text) => ws::Message::Text(text.to_owned().into()),
        Err(_) => ws::Message::Binary(frame),
    }
}

/// Drive a dialed connection until either side ends it
async fn pump_client(stream: ClientStream, driver: SocketDriver, max_frame_size: usize) {
    let (mut sink, mut stream) = stream.split();

    let close = loop {
        tokio::select! {
            outbound = driver.next_outbound() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(client_message(frame)).await {
                        driver.error(e.to_string());
                        break CloseFrame::abnormal(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break CloseFrame::normal();
                }
            },
            inbound = stream.next() => {
                let frame = match inbound {
                    Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(CloseFrame::normal, |frame| {
                            CloseFrame::new(u16::from(frame.code), frame.reason.as_str())
                        });
                    }
                    // Ping, pong and raw frames are handled by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        driver.error(e.to_string());
                        break CloseFrame::abnormal(e.to_string());
                    }
                    None => break CloseFrame::abnormal("stream ended"),
                };

                match oversized(frame.len(), max_frame_size) {
                    Some(detail) => driver.error(detail),
                    None => driver.message(frame),
                }
            }
        }
    };

    debug!("WebSocket client connection closed: {:?}", close);
    driver.closed(close);
}

/// Drive an accepted connection until either side ends it
async fn pump_server(websocket: WebSocket, driver: SocketDriver, max_frame_size: usize) {
    let (mut sink, mut stream) = websocket.split();

    let close = loop {
        tokio::select! {
            outbound = driver.next_outbound() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(server_message(frame)).await {
                        driver.error(e.to_string());
                        break CloseFrame::abnormal(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(ws::Message::Close(None)).await;
                    break CloseFrame::normal();
                }
            },
            inbound = stream.next() => {
                let frame = match inbound {
                    Some(Ok(ws::Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(ws::Message::Binary(data))) => data,
                    Some(Ok(ws::Message::Close(frame))) => {
                        break frame.map_or_else(CloseFrame::normal, |frame| {
                            CloseFrame::new(frame.code, frame.reason.as_str())
                        });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        driver.error(e.to_string());
                        break CloseFrame::abnormal(e.to_string());
                    }
                    None => break CloseFrame::abnormal("stream ended"),
                };

                match oversized(frame.len(), max_frame_size) {
                    Some(detail) => driver.error(detail),
                    None => driver.message(frame),
                }
            }
        }
    };

    debug!("WebSocket server connection closed: {:?}", close);
    driver.closed(close);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_urls_dial_as_websocket() {
        let url = Url::parse("http://localhost:8080/rpc").unwrap();
        assert_eq!(
            websocket_url(&url).unwrap().as_str(),
            "ws://localhost:8080/rpc"
        );

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(websocket_url(&url).unwrap().as_str(), "wss://example.com/");
    }

    #[test]
    fn test_rejects_foreign_scheme() {
        let url = Url::parse("memory://math").unwrap();
        assert!(matches!(
            websocket_url(&url),
            Err(TransportError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_text_frames_for_utf8() {
        assert!(matches!(
            client_message(Bytes::from_static(b"{\"id\":1}")),
            Message::Text(_)
        ));
        assert!(matches!(
            client_message(Bytes::from_static(&[0xff, 0xfe])),
            Message::Binary(_)
        ));
    }

    #[tokio::test]
    async fn test_listener_reports_bound_port() {
        let _ = tracing_subscriber::fmt::try_init();

        let url = Url::parse("ws://127.0.0.1:0/").unwrap();
        let listener = WebSocketTransport::new()
            .listen(&url, &Config::default())
            .await
            .unwrap();

        assert_ne!(listener.local_url().port(), Some(0));
        assert!(listener.local_url().port().is_some());

        listener.close().await.unwrap();
        assert!(matches!(
            listener.accept().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
