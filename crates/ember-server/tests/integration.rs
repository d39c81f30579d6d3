//! End-to-end tests against a live relay using real WebSocket clients.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use ember_server::{RelayHandle, RelayServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a relay on an ephemeral loopback port.
async fn boot_server() -> (String, RelayHandle) {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    let handle = RelayServer::new(config, None).start().await.unwrap();
    let url = format!("ws://{}/ws", handle.local_addr());
    (url, handle)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect `n` clients and wait until the dispatcher has registered them all.
async fn connect_many(url: &str, handle: &RelayHandle, n: usize) -> Vec<WsStream> {
    let mut clients = Vec::with_capacity(n);
    for _ in 0..n {
        clients.push(connect(url).await);
    }
    wait_for_connections(handle, n).await;
    clients
}

async fn wait_for_connections(handle: &RelayHandle, n: usize) {
    let mut stats = handle.stats();
    let _ = timeout(TIMEOUT, stats.wait_for(|s| s.connections == n))
        .await
        .expect("timeout waiting for connection count")
        .unwrap();
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("expected no message, got {text}");
    }
}

fn render_request(effect_id: &str, count: i64, layers: i64) -> Value {
    json!({
        "command": "render_effect",
        "effectType": "fire_tornado",
        "effectId": effect_id,
        "config": {
            "position": {"x": 320.0, "y": 240.0},
            "parameters": {
                "particleCount": count,
                "spiralLayers": layers,
                "duration": 2500,
                "colorScheme": "fire"
            }
        }
    })
}

#[tokio::test]
async fn e2e_echo_reply() {
    let (url, handle) = boot_server().await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, &json!({"hello": "relay", "n": [1, 2, 3]})).await;
    let reply = read_json(&mut ws).await;

    assert_eq!(reply["type"], "response");
    assert_eq!(reply["original"], json!({"hello": "relay", "n": [1, 2, 3]}));
    assert_eq!(reply["processed"], true);
    assert_eq!(reply["port"], handle.port());
    assert!(reply["timestamp"].as_i64().unwrap() > 0);

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_render_reply_and_peer_broadcast() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 3).await;

    send_json(&mut clients[0], &render_request("fx-42", 24, 3)).await;

    let reply = read_json(&mut clients[0]).await;
    assert_eq!(reply["type"], "effect_rendered");
    assert_eq!(reply["effectType"], "fire_tornado");
    assert_eq!(reply["effectId"], "fx-42");
    assert!(reply["renderTime"].as_f64().unwrap() >= 0.0);
    let particles = reply["data"]["particles"].as_array().unwrap();
    assert_eq!(particles.len(), 24);
    for (i, p) in particles.iter().enumerate() {
        assert_eq!(p["layer"], i % 3);
    }

    for peer in &mut clients[1..] {
        let note = read_json(peer).await;
        assert_eq!(note["type"], "effect_broadcast");
        assert_eq!(note["effectType"], "fire_tornado");
        assert_eq!(note["position"], json!({"x": 320.0, "y": 240.0}));
        assert_eq!(note["config"]["spiralLayers"], 3);
        assert!(note.get("data").is_none());
        assert!(note.get("particles").is_none());
    }

    assert_silent(&mut clients[0]).await;
    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_echo_is_not_broadcast() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 2).await;

    send_json(&mut clients[0], &json!({"command": "ping"})).await;
    assert_eq!(read_json(&mut clients[0]).await["type"], "response");
    assert_silent(&mut clients[1]).await;

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_malformed_json_is_dropped() {
    let (url, handle) = boot_server().await;
    let mut ws = connect(&url).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    assert_silent(&mut ws).await;

    // Connection survives and keeps working.
    send_json(&mut ws, &json!({"after": true})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["original"]["after"], true);

    let mut stats = handle.stats();
    let _ = timeout(TIMEOUT, stats.wait_for(|s| s.messages == 2))
        .await
        .unwrap()
        .unwrap();

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_message_counter_spans_clients() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 2).await;

    for i in 0..3 {
        send_json(&mut clients[0], &json!({"i": i})).await;
        let _ = read_json(&mut clients[0]).await;
    }
    clients[1].send(Message::Text("garbage".into())).await.unwrap();
    send_json(&mut clients[1], &json!({})).await;
    let _ = read_json(&mut clients[1]).await;

    let mut stats = handle.stats();
    let _ = timeout(TIMEOUT, stats.wait_for(|s| s.messages == 5))
        .await
        .unwrap()
        .unwrap();

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_binary_utf8_frame_is_processed() {
    let (url, handle) = boot_server().await;
    let mut ws = connect(&url).await;

    let payload = json!({"via": "binary"}).to_string().into_bytes();
    ws.send(Message::Binary(payload.into())).await.unwrap();
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["original"]["via"], "binary");

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_invalid_config_gets_error_and_no_broadcast() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 2).await;

    send_json(&mut clients[0], &render_request("fx-bad", 10, 0)).await;
    let reply = read_json(&mut clients[0]).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "INVALID_EFFECT_CONFIG");
    assert_eq!(reply["effectId"], "fx-bad");

    assert_silent(&mut clients[1]).await;
    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_disconnect_shrinks_roster() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 3).await;

    let mut leaving = clients.remove(2);
    leaving.close(None).await.unwrap();
    wait_for_connections(&handle, 2).await;

    send_json(&mut clients[0], &render_request("fx-after", 5, 1)).await;
    assert_eq!(read_json(&mut clients[0]).await["type"], "effect_rendered");
    assert_eq!(read_json(&mut clients[1]).await["type"], "effect_broadcast");

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_client_close_gets_close_reply() {
    let (url, handle) = boot_server().await;
    let mut ws = connect(&url).await;
    wait_for_connections(&handle, 1).await;

    ws.send(Message::Close(None)).await.unwrap();

    let mut got_close = false;
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("server never closed") {
            Some(Ok(Message::Close(_))) => got_close = true,
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("close handshake not completed: {e}"),
            None => break,
        }
    }
    assert!(got_close);
    wait_for_connections(&handle, 0).await;

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_root_path_accepts_websocket() {
    let (_, handle) = boot_server().await;
    let mut ws = connect(&format!("ws://{}/", handle.local_addr())).await;

    send_json(&mut ws, &json!({"path": "/"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "response");

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_health_endpoint() {
    let (url, handle) = boot_server().await;
    let _clients = connect_many(&url, &handle, 2).await;

    let body: Value = reqwest::get(format!("http://{}/health", handle.local_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["port"], handle.port());

    handle.stop(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn e2e_shutdown_closes_clients() {
    let (url, handle) = boot_server().await;
    let mut clients = connect_many(&url, &handle, 2).await;
    let addr = handle.local_addr();

    handle.stop(Some(TIMEOUT)).await;

    for ws in &mut clients {
        loop {
            match timeout(TIMEOUT, ws.next()).await.expect("client not closed") {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    }

    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
}
