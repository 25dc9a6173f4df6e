//! Integration tests for the relay serving real WebSocket clients through
//! the standalone tokio-tungstenite listener.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_core::{Relay, RelayConfig};
use relay_transport::{WebSocketConfig, WebSocketTransport};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(200);

async fn spawn_relay(config: RelayConfig) -> (Relay, SocketAddr, JoinHandle<()>) {
    let transport = WebSocketTransport::new(WebSocketConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_message_size: config.max_message_size,
        handshake_timeout: Duration::from_secs(30),
    })
    .await
    .unwrap();
    let addr = transport.local_addr();

    let relay = Relay::new(config);
    let server = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.serve(&transport).await })
    };
    (relay, addr, server)
}

async fn connect(relay: &Relay, addr: SocketAddr) -> Client {
    let before = relay.registry().len();
    let (ws, _) = timeout(WAIT, connect_async(format!("ws://{addr}/any/path")))
        .await
        .expect("handshake timed out")
        .unwrap();
    wait_for_connections(relay, before + 1).await;
    ws
}

async fn wait_for_connections(relay: &Relay, expected: usize) {
    timeout(WAIT, async {
        while relay.registry().len() != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} connections, have {}",
            relay.registry().len()
        )
    });
}

async fn next_data(ws: &mut Client) -> Message {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => return msg,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no message delivered")
}

async fn assert_quiet(ws: &mut Client) {
    if let Ok(Some(Ok(msg))) = timeout(QUIET, ws.next()).await {
        assert!(
            !matches!(msg, Message::Text(_) | Message::Binary(_)),
            "unexpected delivery: {msg:?}"
        );
    }
}

#[tokio::test]
async fn test_frames_relayed_between_websocket_clients() {
    let (relay, addr, server) = spawn_relay(RelayConfig::default()).await;
    let mut a = connect(&relay, addr).await;
    let mut b = connect(&relay, addr).await;

    a.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_data(&mut b).await, Message::Text("hello".into()));
    assert_quiet(&mut a).await;

    b.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(next_data(&mut a).await, Message::Binary(vec![1, 2, 3]));

    // A clean close unregisters the client
    a.close(None).await.unwrap();
    wait_for_connections(&relay, 1).await;

    relay.shutdown().await;
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_tcp_client_does_not_stall_accept_loop() {
    let (relay, addr, server) = spawn_relay(RelayConfig::default()).await;

    // Opens a socket but never sends the upgrade request
    let _idle = TcpStream::connect(addr).await.unwrap();

    let mut a = connect(&relay, addr).await;
    let mut b = connect(&relay, addr).await;

    a.send(Message::Text("still accepting".into())).await.unwrap();
    assert_eq!(
        next_data(&mut b).await,
        Message::Text("still accepting".into())
    );

    relay.shutdown().await;
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_frame_dropped_connection_kept() {
    let (relay, addr, server) = spawn_relay(RelayConfig {
        max_message_size: 8,
        ..Default::default()
    })
    .await;
    let mut a = connect(&relay, addr).await;
    let mut b = connect(&relay, addr).await;

    a.send(Message::Text("far more than eight bytes".into()))
        .await
        .unwrap();
    a.send(Message::Text("ok".into())).await.unwrap();

    assert_eq!(next_data(&mut b).await, Message::Text("ok".into()));
    assert_eq!(relay.registry().len(), 2);

    relay.shutdown().await;
    timeout(WAIT, server).await.unwrap().unwrap();
}
