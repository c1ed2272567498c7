//! Room management for signal server

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::messages::{PeerInfo, ServerMessage};
use crate::peer::{Peer, PeerRef};

/// Peers sharing one network address
///
/// Iteration (broadcast, snapshots) follows join order.
pub struct Room {
    /// Grouping key for this room
    pub key: String,

    /// Connected peers
    peers: HashMap<String, Peer>,

    /// Peer ids in join order
    order: Vec<String>,

    /// When the room was created
    created_at: Instant,
}

impl Room {
    /// Create a new room
    pub fn new(key: String) -> Self {
        Self {
            key,
            peers: HashMap::new(),
            order: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Add a peer to the room, returning the peer it displaced (same id)
    pub fn add_peer(&mut self, peer: Peer) -> Option<Peer> {
        let id = peer.id.clone();
        let displaced = self.peers.insert(id.clone(), peer);

        match displaced {
            // Rejoining keeps its slot in the order
            Some(_) => {}
            None => self.order.push(id),
        }
        displaced
    }

    /// Remove the peer named by `peer`, if that exact connection is present
    pub fn remove_peer(&mut self, peer: &PeerRef) -> Option<Peer> {
        if !self.peers.get(&peer.id).is_some_and(|p| p.is(peer)) {
            return None;
        }

        self.order.retain(|id| id != &peer.id);
        self.peers.remove(&peer.id)
    }

    /// Get a peer by id
    pub fn get_peer(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Get the exact connection named by `peer`
    pub fn get_connection_mut(&mut self, peer: &PeerRef) -> Option<&mut Peer> {
        self.peers.get_mut(&peer.id).filter(|p| p.is(peer))
    }

    /// All peers in join order
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.order.iter().filter_map(|id| self.peers.get(id))
    }

    /// Public info of every peer except `except`
    pub fn infos_except(&self, except: &str) -> Vec<PeerInfo> {
        self.peers()
            .filter(|p| p.id != except)
            .map(Peer::info)
            .collect()
    }

    /// Send `msg` to every peer except `except`
    pub fn broadcast(&self, msg: &ServerMessage, except: Option<&str>) {
        let Ok(json) = msg.to_json() else {
            return;
        };

        for peer in self.peers() {
            if Some(peer.id.as_str()) != except {
                peer.connection().send_text(json.clone());
            }
        }
    }

    /// Number of peers in the room
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Check if the room is empty
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// How long the room has existed
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
