//! End-to-end integration tests using real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use relay_server::{RelayServer, ServerConfig, ShutdownCoordinator};
use relay_store::{MemoryDirectory, MemoryStore};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    store: Arc<MemoryStore>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl TestServer {
    fn ws_url(&self, user: &str) -> String {
        format!("ws://{}/ws?user={user}", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Boot a test server with the given chat memberships.
async fn boot_server(memberships: &[(&str, &str)]) -> TestServer {
    // Default config binds port 0 = auto-assign.
    boot_server_with(ServerConfig::default(), memberships).await
}

/// Boot a test server with a custom config.
async fn boot_server_with(config: ServerConfig, memberships: &[(&str, &str)]) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    for (chat, user) in memberships {
        directory.add_member(&(*chat).into(), &(*user).into());
    }

    let server = RelayServer::new(config, store.clone(), directory);
    let shutdown = server.shutdown().clone();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(tokio::spawn(server.serve(listener)));

    TestServer {
        addr,
        store,
        shutdown,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Poll `/health` until the expected connection count is visible.
async fn wait_for_connections(server: &TestServer, expected: u64) {
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let health: Value = client
            .get(server.http_url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if health["connections"] == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected} connections, health: {health}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Read the next text frame and parse each newline-joined payload as JSON.
async fn read_payloads(ws: &mut WsStream) -> Vec<Value> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text
                .split('\n')
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
        }
    }
}

/// Read a single payload, asserting the frame carried exactly one.
async fn read_one(ws: &mut WsStream) -> Value {
    let mut payloads = read_payloads(ws).await;
    assert_eq!(payloads.len(), 1, "expected one payload: {payloads:?}");
    payloads.remove(0)
}

/// Expect silence on this socket for `dur`.
async fn assert_no_message(ws: &mut WsStream, dur: Duration) {
    let got = timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(_)) => {}
                _ => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = got {
        panic!("expected no message, got: {text}");
    }
}

fn chat_frame(chat: &str, text: &str) -> String {
    json!({"type": "chat", "chatId": chat, "content": text}).to_string()
}

#[tokio::test]
async fn e2e_fan_out_to_every_session_of_every_member() {
    let server = boot_server(&[("x", "alice"), ("x", "bob")]).await;

    // Alice on two devices, Bob on one.
    let mut a1 = connect(&server.ws_url("alice")).await;
    let mut a2 = connect(&server.ws_url("alice")).await;
    let mut b1 = connect(&server.ws_url("bob")).await;
    wait_for_connections(&server, 3).await;

    a1.send(Message::text(chat_frame("x", "hello"))).await.unwrap();

    // Exactly three deliveries, one per session, sender included.
    for ws in [&mut a1, &mut a2, &mut b1] {
        let msg = read_one(ws).await;
        assert_eq!(msg["chatId"], "x");
        assert_eq!(msg["senderId"], "alice");
        assert_eq!(msg["type"], "text");
        assert_eq!(msg["content"]["text"], "hello");
        assert!(msg["id"].is_string());
        assert!(msg["createdAt"].is_string());
    }
    for ws in [&mut a1, &mut a2, &mut b1] {
        assert_no_message(ws, Duration::from_millis(200)).await;
    }

    assert_eq!(server.store.len(), 1);
    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_non_member_receives_nothing() {
    let server = boot_server(&[("x", "alice"), ("x", "bob")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    let mut bob = connect(&server.ws_url("bob")).await;
    let mut carol = connect(&server.ws_url("carol")).await;
    wait_for_connections(&server, 3).await;

    alice
        .send(Message::text(chat_frame("x", "members only")))
        .await
        .unwrap();

    let _ = read_one(&mut alice).await;
    let _ = read_one(&mut bob).await;
    assert_no_message(&mut carol, Duration::from_millis(200)).await;

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_malformed_frame_keeps_connection_alive() {
    let server = boot_server(&[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    alice.send(Message::text("this is not json")).await.unwrap();
    alice
        .send(Message::text(r#"{"type":"video","chatId":"x","content":"?"}"#))
        .await
        .unwrap();

    // The connection survives and the next well-formed frame goes through.
    alice
        .send(Message::text(chat_frame("x", "still here")))
        .await
        .unwrap();
    let msg = read_one(&mut alice).await;
    assert_eq!(msg["content"]["text"], "still here");
    assert_eq!(server.store.len(), 1);

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_oversized_frame_is_skipped_not_fatal() {
    let config = ServerConfig {
        max_frame_bytes: 256,
        ..ServerConfig::default()
    };
    let server = boot_server_with(config, &[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    // Well-formed but over the app limit (and under the transport cap):
    // never persisted or echoed.
    let big = chat_frame("x", &"x".repeat(300));
    assert!(big.len() > 256 && big.len() < 512);
    alice.send(Message::text(big)).await.unwrap();

    // The connection survives and a frame within the limit goes through.
    alice
        .send(Message::text(chat_frame("x", "small enough")))
        .await
        .unwrap();
    let msg = read_one(&mut alice).await;
    assert_eq!(msg["content"]["text"], "small enough");
    assert_eq!(server.store.len(), 1);

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_unresponsive_client_is_disconnected() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = boot_server_with(config, &[("x", "alice")]).await;

    // A client that never reads never answers the server's Pings.
    let alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    wait_for_connections(&server, 0).await;
    drop(alice);

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_binary_frames_are_decoded_as_json() {
    let server = boot_server(&[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    let frame = chat_frame("x", "from binary");
    alice
        .send(Message::binary(frame.into_bytes()))
        .await
        .unwrap();

    let msg = read_one(&mut alice).await;
    assert_eq!(msg["content"]["text"], "from binary");

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_code_and_file_kinds_round_trip() {
    let server = boot_server(&[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    let code = json!({
        "type": "code", "chatId": "x",
        "content": "fn main() {}", "language": "rust"
    });
    alice.send(Message::text(code.to_string())).await.unwrap();
    let msg = read_one(&mut alice).await;
    assert_eq!(msg["type"], "code");
    assert_eq!(msg["content"]["code"]["language"], "rust");
    assert_eq!(msg["content"]["code"]["content"], "fn main() {}");

    let file = json!({
        "type": "file", "chatId": "x",
        "content": "blob_99", "fileName": "photo.png"
    });
    alice.send(Message::text(file.to_string())).await.unwrap();
    let msg = read_one(&mut alice).await;
    assert_eq!(msg["type"], "file");
    assert_eq!(msg["content"]["fileId"], "blob_99");
    assert_eq!(msg["content"]["fileName"], "photo.png");

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_messages_arrive_in_send_order() {
    let server = boot_server(&[("x", "alice"), ("x", "bob")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    let mut bob = connect(&server.ws_url("bob")).await;
    wait_for_connections(&server, 2).await;

    for i in 0..10 {
        alice
            .send(Message::text(chat_frame("x", &format!("m{i}"))))
            .await
            .unwrap();
    }

    // Frames may arrive coalesced; flatten and check order.
    let mut received = Vec::new();
    while received.len() < 10 {
        for msg in read_payloads(&mut bob).await {
            received.push(msg["content"]["text"].as_str().unwrap().to_string());
        }
    }
    let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    assert_eq!(received, expected);

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_disconnect_cleans_up_registry() {
    let server = boot_server(&[("x", "alice"), ("x", "bob")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    let mut bob = connect(&server.ws_url("bob")).await;
    wait_for_connections(&server, 2).await;

    alice.close(None).await.unwrap();
    wait_for_connections(&server, 1).await;

    // Broadcast still works for the remaining member.
    bob.send(Message::text(chat_frame("x", "after close")))
        .await
        .unwrap();
    let msg = read_one(&mut bob).await;
    assert_eq!(msg["content"]["text"], "after close");

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_dropped_socket_cleans_up_registry() {
    let server = boot_server(&[("x", "alice")]).await;

    let alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    drop(alice);
    wait_for_connections(&server, 0).await;

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_health_reports_users_and_connections() {
    let server = boot_server(&[("x", "alice")]).await;

    let _a1 = connect(&server.ws_url("alice")).await;
    let _a2 = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 2).await;

    let health: Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 2);
    assert_eq!(health["users"], 1);

    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_persist_survives_sender_disconnect() {
    let server = boot_server(&[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    alice
        .send(Message::text(chat_frame("x", "durable")))
        .await
        .unwrap();
    let _ = read_one(&mut alice).await;
    drop(alice);
    wait_for_connections(&server, 0).await;

    assert_eq!(server.store.len(), 1);
    server.shutdown.shutdown();
}

#[tokio::test]
async fn e2e_graceful_shutdown_closes_clients() {
    let server = boot_server(&[("x", "alice")]).await;

    let mut alice = connect(&server.ws_url("alice")).await;
    wait_for_connections(&server, 1).await;

    server.shutdown.shutdown();

    // The session watches the shutdown token, drains, and sends Close.
    let closed = timeout(Duration::from_secs(3), async {
        loop {
            match alice.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client saw no close after shutdown");
}
