//! Connected peers

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use lanpair_core::PeerLabel;

use crate::heartbeat::HeartbeatHandle;
use crate::messages::{PeerInfo, ServerMessage};

/// Frames queued for a peer's socket
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame
    Text(String),
    /// Close the connection
    Close,
}

/// Sending half of a peer's outbound queue
///
/// All sends are fire-and-forget: if the socket task is already gone there is
/// nobody left to tell.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerConnection {
    /// Create a connection handle and the receiver the socket task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a server message
    pub fn send(&self, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(json) => self.send_text(json),
            Err(e) => trace!("Dropping unserializable message: {}", e),
        }
    }

    /// Queue a raw text frame
    pub fn send_text(&self, text: String) {
        if self.tx.send(Outbound::Text(text)).is_err() {
            trace!("Outbound queue closed, dropping frame");
        }
    }

    /// Ask the socket task to close the connection
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Names one connection's peer: which room, which id, which session
///
/// Two connections presenting the same identity token get different
/// sessions, so a stale connection can never remove its successor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerRef {
    pub group_key: String,
    pub id: String,
    pub session: u64,
}

/// A peer in a room
pub struct Peer {
    /// Identity token, unique within the room
    pub id: String,

    /// Room selector (network address); never shown to other peers
    pub group_key: String,

    /// Descriptive label
    pub label: PeerLabel,

    /// Whether the peer connected on the WebRTC-capable path
    pub rtc_supported: bool,

    session: u64,
    last_live_at: Instant,
    heartbeat: Option<HeartbeatHandle>,
    conn: PeerConnection,
}

impl Peer {
    pub fn new(
        id: String,
        group_key: String,
        label: PeerLabel,
        rtc_supported: bool,
        session: u64,
        conn: PeerConnection,
    ) -> Self {
        Self {
            id,
            group_key,
            label,
            rtc_supported,
            session,
            last_live_at: Instant::now(),
            heartbeat: None,
            conn,
        }
    }

    /// Handle naming this peer's connection
    pub fn reference(&self) -> PeerRef {
        PeerRef {
            group_key: self.group_key.clone(),
            id: self.id.clone(),
            session: self.session,
        }
    }

    /// Whether `peer` names this exact connection
    pub fn is(&self, peer: &PeerRef) -> bool {
        self.session == peer.session && self.id == peer.id
    }

    /// Public info shown to other peers
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            name: self.label.clone(),
            rtc_supported: self.rtc_supported,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn connection(&self) -> &PeerConnection {
        &self.conn
    }

    pub fn send(&self, msg: &ServerMessage) {
        self.conn.send(msg);
    }

    /// Record a liveness acknowledgment
    pub fn mark_live(&mut self) {
        self.last_live_at = Instant::now();
    }

    pub fn last_live_at(&self) -> Instant {
        self.last_live_at
    }

    /// Install the heartbeat task, cancelling any previous one
    pub fn set_heartbeat(&mut self, handle: HeartbeatHandle) {
        if let Some(old) = self.heartbeat.replace(handle) {
            old.cancel();
        }
    }

    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Cancel the heartbeat and close the socket
    ///
    /// Called exactly once, by whoever takes the peer out of its room.
    pub fn shut_down(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        self.conn.close();
    }
}

/// Build a peer wired to an in-memory queue
#[cfg(test)]
pub(crate) fn test_peer(
    id: &str,
    group: &str,
    session: u64,
) -> (Peer, mpsc::UnboundedReceiver<Outbound>) {
    let (conn, rx) = PeerConnection::channel();
    let label = PeerLabel::new(id, None);
    (
        Peer::new(id.into(), group.into(), label, true, session, conn),
        rx,
    )
}
