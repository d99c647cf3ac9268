//! Integration tests for WebSocket transport

use bytes::Bytes;
use kite_transport::{Config, Socket, Transport, TransportEvent};
use kite_transport_ws::WebSocketTransport;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;
use url::Url;

async fn next_event(socket: &mut Socket) -> Option<TransportEvent> {
    timeout(Duration::from_secs(5), socket.next_event())
        .await
        .expect("timed out waiting for socket event")
}

#[tokio::test]
async fn test_websocket_echo_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = WebSocketTransport::new();
    let listener = transport
        .listen(
            &Url::parse("ws://127.0.0.1:0/echo").unwrap(),
            &Config::default(),
        )
        .await
        .expect("Failed to create listener");
    let url = listener.local_url().clone();
    info!("Test server listening on {}", url);

    let accept_task = tokio::spawn(async move {
        let mut peer = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("Accept timeout")
            .expect("Failed to accept connection");

        info!("Server accepted connection");

        while let Some(event) = peer.next_event().await {
            match event {
                TransportEvent::Message(frame) => {
                    info!("Server received: {} bytes", frame.len());
                    peer.send(frame);
                }
                TransportEvent::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut client = transport.open(&url, &Config::default());
    assert_eq!(next_event(&mut client).await, Some(TransportEvent::Open));

    let json = Bytes::from_static(br#"{"id":1,"method":"square","args":[5]}"#);
    assert!(client.send(json.clone()));
    assert_eq!(next_event(&mut client).await, Some(TransportEvent::Message(json)));

    let binary = Bytes::from_static(&[0, 159, 146, 150]);
    assert!(client.send(binary.clone()));
    assert_eq!(
        next_event(&mut client).await,
        Some(TransportEvent::Message(binary))
    );

    client.close();
    assert!(matches!(
        next_event(&mut client).await,
        Some(TransportEvent::Close(_))
    ));

    timeout(Duration::from_secs(5), accept_task)
        .await
        .expect("server did not observe close")
        .unwrap();
}

#[tokio::test]
async fn test_http_scheme_is_accepted() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = WebSocketTransport::new();
    let listener = transport
        .listen(&Url::parse("http://127.0.0.1:0/").unwrap(), &Config::default())
        .await
        .unwrap();

    let mut url = listener.local_url().clone();
    assert_eq!(url.scheme(), "ws");
    url.set_scheme("http").unwrap();

    let mut client = transport.open(&url, &Config::default());
    let _peer = listener.accept().await.unwrap();
    assert_eq!(next_event(&mut client).await, Some(TransportEvent::Open));
}

#[tokio::test]
async fn test_connection_refused() {
    let _ = tracing_subscriber::fmt::try_init();

    // Bind and immediately release a port so nothing is listening there.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
    let mut client = WebSocketTransport::new().open(&url, &Config::default());

    assert!(matches!(
        next_event(&mut client).await,
        Some(TransportEvent::Error(_))
    ));
    assert!(matches!(
        next_event(&mut client).await,
        Some(TransportEvent::Close(_))
    ));
}

#[tokio::test]
async fn test_server_close_reaches_client() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = WebSocketTransport::new();
    let listener = transport
        .listen(&Url::parse("ws://127.0.0.1:0/").unwrap(), &Config::default())
        .await
        .unwrap();

    let mut client = transport.open(listener.local_url(), &Config::default());
    let mut peer = listener.accept().await.unwrap();

    assert_eq!(next_event(&mut client).await, Some(TransportEvent::Open));
    assert_eq!(next_event(&mut peer).await, Some(TransportEvent::Open));

    peer.close();

    assert!(matches!(
        next_event(&mut client).await,
        Some(TransportEvent::Close(_))
    ));
}
