//! End-to-end tests over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SET_COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lanpair_signal::{RoomRegistry, ServerOptions, SignalServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

async fn start_server() -> (SocketAddr, Arc<RoomRegistry>) {
    start_server_with(Duration::from_secs(60)).await
}

async fn start_server_with(heartbeat_interval: Duration) -> (SocketAddr, Arc<RoomRegistry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(RoomRegistry::new());

    let options = ServerOptions {
        heartbeat_interval,
        secure_cookie: false,
    };
    let server = SignalServer::new(Arc::clone(&registry), options);
    tokio::spawn(async move {
        let _ = server.serve_listener(listener).await;
    });

    (addr, registry)
}

async fn connect(addr: SocketAddr, headers: &[(&'static str, &str)]) -> (Client, Option<String>) {
    let mut request = format!("ws://{}/server/webrtc", addr)
        .into_client_request()
        .unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(*name, value.parse().unwrap());
    }

    let (ws, response) = connect_async(request).await.unwrap();
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    (ws, cookie)
}

/// Next protocol event, skipping pings and the display-name echo
async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .expect("websocket error");

        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] != "ping" && value["type"] != "display-name" {
                return value;
            }
        }
    }
}

async fn assert_quiet(ws: &mut Client) {
    assert!(timeout(QUIET, next_event(ws)).await.is_err());
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

/// Read for `period`, answering every ping with a pong; returns the other events
async fn answer_pings_for(ws: &mut Client, period: Duration) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + period;
    let mut events = Vec::new();

    loop {
        let frame = match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return events,
            Ok(frame) => frame.expect("connection closed").expect("websocket error"),
        };

        match frame {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "ping" {
                    send(ws, r#"{"type":"pong"}"#).await;
                } else if value["type"] != "display-name" {
                    events.push(value);
                }
            }
            Message::Close(_) => panic!("server closed a responsive peer"),
            _ => {}
        }
    }
}

/// Send raw bytes in pieces and read the whole HTTP response
async fn http_exchange(addr: SocketAddr, pieces: &[&[u8]]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    for piece in pieces {
        stream.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_discovery_and_relay() {
    let (addr, registry) = start_server().await;

    let (mut a, _) = connect(addr, &[]).await;
    let first = next_event(&mut a).await;
    assert_eq!(first, json!({"type": "peers", "peers": []}));

    let (mut b, _) = connect(addr, &[]).await;
    let joined = next_event(&mut a).await;
    assert_eq!(joined["type"], "peer-joined");
    assert_eq!(joined["peer"]["rtcSupported"], true);
    let b_id = joined["peer"]["id"].as_str().unwrap().to_string();

    let listing = next_event(&mut b).await;
    assert_eq!(listing["type"], "peers");
    let listed = listing["peers"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    let a_id = listed[0]["id"].as_str().unwrap().to_string();
    assert_ne!(a_id, b_id);

    send(
        &mut a,
        &json!({"type": "signal", "to": b_id, "sdp": "X"}).to_string(),
    )
    .await;
    assert_eq!(
        next_event(&mut b).await,
        json!({"type": "signal", "sdp": "X", "sender": a_id})
    );

    // Unknown target and garbage are both dropped without a word
    send(&mut a, r#"{"type":"signal","to":"nobody","sdp":"X"}"#).await;
    send(&mut b, "{not json").await;
    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;
    assert_eq!(registry.peer_count(), 2);

    send(&mut b, r#"{"type":"disconnect"}"#).await;
    assert_eq!(
        next_event(&mut a).await,
        json!({"type": "peer-left", "peerId": b_id})
    );
    assert_eq!(registry.peer_count(), 1);
}

#[tokio::test]
async fn test_networks_do_not_mix() {
    let (addr, registry) = start_server().await;

    let (mut a1, _) = connect(addr, &[("x-forwarded-for", "10.0.0.5")]).await;
    next_event(&mut a1).await;
    let (mut a2, _) = connect(addr, &[("x-forwarded-for", "10.0.0.5")]).await;
    next_event(&mut a1).await;
    let a2_list = next_event(&mut a2).await;
    assert_eq!(a2_list["peers"].as_array().unwrap().len(), 1);

    let (mut c, _) = connect(addr, &[("x-forwarded-for", "10.0.0.9")]).await;
    assert_eq!(next_event(&mut c).await, json!({"type": "peers", "peers": []}));

    assert_quiet(&mut a1).await;
    assert_quiet(&mut a2).await;
    assert_eq!(registry.room_count(), 2);

    c.close(None).await.unwrap();
    assert_quiet(&mut a1).await;
}

#[tokio::test]
async fn test_cookie_identity() {
    let (addr, _registry) = start_server().await;

    let (mut fresh, cookie) = connect(addr, &[]).await;
    let cookie = cookie.expect("new peers get an identity cookie");
    assert!(cookie.starts_with("peerid="));
    assert!(cookie.contains("SameSite=Strict"));
    next_event(&mut fresh).await;

    let id = "0f8e0c1e-3b9d-4f6a-9a43-5d0b2c6e7f18";
    let header = format!("peerid={}", id);
    let (mut known, cookie) = connect(addr, &[("cookie", header.as_str())]).await;
    assert!(cookie.is_none());
    next_event(&mut known).await;

    let joined = next_event(&mut fresh).await;
    assert_eq!(joined["peer"]["id"], id);
}

#[tokio::test]
async fn test_socket_close_is_implicit_leave() {
    let (addr, registry) = start_server().await;

    let (mut a, _) = connect(addr, &[]).await;
    next_event(&mut a).await;
    let (mut b, _) = connect(addr, &[]).await;
    let b_id = next_event(&mut a).await["peer"]["id"].clone();
    next_event(&mut b).await;

    drop(b);
    let left = next_event(&mut a).await;
    assert_eq!(left, json!({"type": "peer-left", "peerId": b_id}));

    a.close(None).await.unwrap();
    timeout(WAIT, async {
        while registry.room_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room should be removed once empty");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _registry) = start_server().await;

    let request = b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let response = http_exchange(addr, &[request]).await;

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with(r#"{"status":"healthy","rooms":0,"peers":0}"#));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (addr, registry) = start_server().await;

    let request = b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let response = http_exchange(addr, &[request]).await;

    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "got {:?}", response);
    assert!(response.ends_with(r#"{"error":"not found"}"#));
    assert_eq!(registry.peer_count(), 0);
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let (addr, _registry) = start_server().await;

    let response = http_exchange(
        addr,
        &[b"GET /hea", b"lth HTTP/1.1\r\nHost: local", b"host\r\n\r\n"],
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "got {:?}", response);
    assert!(response.contains(r#""status":"healthy""#));
}

#[tokio::test]
async fn test_heartbeat_keeps_responsive_and_evicts_silent() {
    let interval = Duration::from_millis(100);
    let (addr, registry) = start_server_with(interval).await;

    let (mut live, _) = connect(addr, &[]).await;
    assert_eq!(next_event(&mut live).await, json!({"type": "peers", "peers": []}));
    let (_silent, _) = connect(addr, &[]).await;

    // Ten intervals: well past the silent peer's 2T window
    let events = answer_pings_for(&mut live, interval * 10).await;

    assert_eq!(events.len(), 2, "got {:?}", events);
    assert_eq!(events[0]["type"], "peer-joined");
    let silent_id = events[0]["peer"]["id"].clone();
    assert_eq!(events[1], json!({"type": "peer-left", "peerId": silent_id}));

    assert_eq!(registry.peer_count(), 1);
    assert_eq!(registry.room_count(), 1);
}
