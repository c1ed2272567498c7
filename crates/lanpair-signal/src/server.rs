//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};

use lanpair_core::{Config, PeerLabel};

use crate::dispatch::dispatch;
use crate::error::ServerError;
use crate::handshake::ConnectionIdentity;
use crate::heartbeat;
use crate::messages::ServerMessage;
use crate::peer::{Outbound, Peer, PeerConnection};
use crate::registry::{RegistryStats, RoomRegistry};

/// Per-connection settings
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    /// Heartbeat interval `T`
    pub heartbeat_interval: Duration,
    /// Mark freshly issued identity cookies `Secure`
    pub secure_cookie: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat.interval(),
            secure_cookie: config.server.secure_cookie,
        }
    }
}

/// Signal server state
pub struct SignalServer {
    registry: Arc<RoomRegistry>,
    options: ServerOptions,
}

impl SignalServer {
    pub fn new(registry: Arc<RoomRegistry>, options: ServerOptions) -> Self {
        Self { registry, options }
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, remote) = listener.accept().await?;
            let registry = Arc::clone(&self.registry);
            let options = self.options;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, remote, registry, options).await {
                    debug!("Connection error from {}: {}", remote, e);
                }
            });
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.registry.room_count()
    }

    /// Get peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.registry.peer_count()
    }
}

/// Handle a single connection (monitoring HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    registry: Arc<RoomRegistry>,
    options: ServerOptions,
) -> Result<(), ServerError> {
    // Plain HTTP requests are monitoring; only upgrades become peers
    if let Some(head) = peek_request_head(&stream).await? {
        if !head.upgrade {
            return handle_http_request(&mut stream, &head, registry.stats()).await;
        }
    }

    let mut identity = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        let resolved = ConnectionIdentity::resolve(request, remote);
        let response = resolved.apply(response, options.secure_cookie);
        identity = Some(resolved);
        Ok::<_, ErrorResponse>(response)
    })
    .await?;
    let identity = identity.ok_or(ServerError::NoIdentity)?;

    let (conn, mut outbound) = PeerConnection::channel();
    let label = PeerLabel::new(&identity.peer_id, identity.user_agent.as_deref());
    let display_name = ServerMessage::display_name(&label);
    let peer = Peer::new(
        identity.peer_id,
        identity.group_key,
        label,
        identity.rtc_supported,
        registry.next_session(),
        conn.clone(),
    );

    let me = registry.join(peer);
    conn.send(&display_name);
    heartbeat::start(&registry, me.clone(), options.heartbeat_interval);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let outcome = dispatch(&registry, &me, &text);
                    trace!("Message from {}: {:?}", me.id, outcome);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error from {}: {}", me.id, e);
                    break;
                }
            },
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    // Cleanup on disconnect
    registry.leave(&me);

    debug!("Connection closed: {}", me.id);
    Ok(())
}

/// Largest request head we are willing to wait for
const MAX_REQUEST_HEAD: usize = 4096;

/// How long a client gets to finish sending its request head
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const PEEK_BACKOFF: Duration = Duration::from_millis(5);

/// The parts of an HTTP request head used for routing
#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    method: String,
    path: String,
    /// `Upgrade: websocket` was present
    upgrade: bool,
    /// Bytes up to and including the blank line
    len: usize,
}

/// Peek at the request head without consuming it
///
/// Re-peeks until the blank line ending the head shows up, the head grows past
/// [`MAX_REQUEST_HEAD`], or the client stalls for [`REQUEST_HEAD_TIMEOUT`].
async fn peek_request_head(stream: &TcpStream) -> Result<Option<RequestHead>, ServerError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let deadline = Instant::now() + REQUEST_HEAD_TIMEOUT;
    let mut seen = 0;

    loop {
        let n = match timeout_at(deadline, stream.peek(&mut buf)).await {
            Ok(n) => n?,
            Err(_) => break,
        };
        if n == 0 {
            return Ok(None);
        }
        seen = n;
        if n == buf.len() || head_end(&buf[..n]).is_some() || Instant::now() >= deadline {
            break;
        }
        sleep(PEEK_BACKOFF).await;
    }

    Ok(parse_request_head(&buf[..seen]))
}

fn head_end(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_request_head(bytes: &[u8]) -> Option<RequestHead> {
    let len = head_end(bytes).unwrap_or(bytes.len());
    let head = String::from_utf8_lossy(&bytes[..len]);
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let upgrade = lines
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        });

    Some(RequestHead {
        method,
        path,
        upgrade,
        len,
    })
}

/// Answer a plain HTTP request (health checks and stats)
async fn handle_http_request(
    stream: &mut TcpStream,
    head: &RequestHead,
    stats: RegistryStats,
) -> Result<(), ServerError> {
    // Consume the head we peeked at
    let mut buf = vec![0u8; head.len];
    stream.read_exact(&mut buf).await?;

    let (status, body) = monitoring_response(&head.method, &head.path, stats);

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

fn monitoring_response(method: &str, path: &str, stats: RegistryStats) -> (&'static str, String) {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        ("GET", "/health") => (
            "200 OK",
            serde_json::json!({
                "status": "healthy",
                "rooms": stats.rooms,
                "peers": stats.peers,
            })
            .to_string(),
        ),
        ("GET", "/stats") => (
            "200 OK",
            serde_json::to_string(&stats).unwrap_or_else(|_| "{}".to_string()),
        ),
        _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
    }
}
