//! Room registry
//!
//! Maps a grouping key (the peers' network address) to the room of peers
//! currently sharing it. Rooms are created on first join and removed the
//! moment their last peer leaves.
//!
//! Every operation that touches a room runs while holding that room's map
//! guard, so join, leave, relay, and heartbeat probes are each applied as one
//! indivisible step from the point of view of the room's members. Outbound
//! sends only enqueue onto unbounded channels and never block under the guard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::heartbeat::HeartbeatHandle;
use crate::messages::ServerMessage;
use crate::peer::{Peer, PeerRef};
use crate::room::Room;

/// Result of a heartbeat probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// Peer is alive; a ping was queued
    Pinged,
    /// Nothing acknowledged within the window
    Expired,
    /// Peer is no longer registered
    Gone,
}

/// Counters for monitoring
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rooms: usize,
    pub peers: usize,
}

/// All rooms on this server
pub struct RoomRegistry {
    /// Active rooms by grouping key
    rooms: DashMap<String, Room>,
    /// Source of connection session numbers
    sessions: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            sessions: AtomicU64::new(1),
        }
    }

    /// Issue a session number for a new connection
    pub fn next_session(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::Relaxed)
    }

    /// Add `peer` to its room
    ///
    /// Existing members are told about the newcomer first, then the newcomer
    /// receives the list of everyone who was already there. If a connection
    /// with the same id is present it is replaced and closed without a
    /// `peer-left`, since the id itself never left.
    pub fn join(&self, peer: Peer) -> PeerRef {
        let peer_ref = peer.reference();
        let conn = peer.connection().clone();
        let joined = ServerMessage::PeerJoined { peer: peer.info() };

        let mut room = self
            .rooms
            .entry(peer.group_key.clone())
            .or_insert_with(|| {
                debug!("Room {} created", peer.group_key);
                Room::new(peer.group_key.clone())
            });

        let existing = room.infos_except(&peer.id);
        room.broadcast(&joined, Some(&peer.id));

        if let Some(mut displaced) = room.add_peer(peer) {
            debug!(
                "Peer {} reconnected, closing session {}",
                displaced.id,
                displaced.session()
            );
            displaced.shut_down();
        }

        conn.send(&ServerMessage::Peers { peers: existing });

        info!(
            "Peer {} joined room {} ({} peers)",
            peer_ref.id,
            peer_ref.group_key,
            room.peer_count()
        );
        peer_ref
    }

    /// Remove the peer named by `peer`
    ///
    /// Cancels its heartbeat, closes its connection, and tells the remaining
    /// members. Returns false (and does nothing) if that connection is not
    /// registered, so calling it twice is harmless.
    pub fn leave(&self, peer: &PeerRef) -> bool {
        let Some(mut room) = self.rooms.get_mut(&peer.group_key) else {
            return false;
        };

        let Some(mut departed) = room.remove_peer(peer) else {
            return false;
        };
        departed.shut_down();

        info!("Peer {} left room {}", peer.id, peer.group_key);

        if room.is_empty() {
            let age = room.age();
            drop(room);
            // A join may have slipped in between; only drop the room if still empty
            if self
                .rooms
                .remove_if(&peer.group_key, |_, r| r.is_empty())
                .is_some()
            {
                debug!("Room {} removed (empty after {:?})", peer.group_key, age);
            }
        } else {
            room.broadcast(
                &ServerMessage::PeerLeft {
                    peer_id: peer.id.clone(),
                },
                None,
            );
        }

        true
    }

    /// Run `f` on the peer with `peer_id` in the room `group_key`
    pub fn lookup<R>(
        &self,
        group_key: &str,
        peer_id: &str,
        f: impl FnOnce(&Peer) -> R,
    ) -> Option<R> {
        let room = self.rooms.get(group_key)?;
        room.get_peer(peer_id).map(f)
    }

    /// Whether a peer with `peer_id` is in the room `group_key`
    pub fn contains(&self, group_key: &str, peer_id: &str) -> bool {
        self.lookup(group_key, peer_id, |_| ()).is_some()
    }

    /// Record a liveness acknowledgment from `peer`
    pub fn acknowledge(&self, peer: &PeerRef) -> bool {
        let Some(mut room) = self.rooms.get_mut(&peer.group_key) else {
            return false;
        };

        match room.get_connection_mut(peer) {
            Some(p) => {
                p.mark_live();
                true
            }
            None => false,
        }
    }

    /// Deliver `text` from `sender` to the peer `to` in the sender's room
    ///
    /// Returns false when the target is unknown; nobody is notified.
    pub fn relay(&self, sender: &PeerRef, to: &str, text: String) -> bool {
        let Some(room) = self.rooms.get(&sender.group_key) else {
            return false;
        };

        if !room.get_peer(&sender.id).is_some_and(|p| p.is(sender)) {
            trace!("Relay from stale session {} of {}", sender.session, sender.id);
            return false;
        }

        match room.get_peer(to) {
            Some(target) => {
                target.connection().send_text(text);
                true
            }
            None => false,
        }
    }

    /// Heartbeat tick for `peer`: ping it, or report it expired
    pub fn probe(&self, peer: &PeerRef, window: Duration) -> Probe {
        let Some(room) = self.rooms.get(&peer.group_key) else {
            return Probe::Gone;
        };

        let Some(p) = room.get_peer(&peer.id).filter(|p| p.is(peer)) else {
            return Probe::Gone;
        };

        if Instant::now().duration_since(p.last_live_at()) > window {
            Probe::Expired
        } else {
            p.send(&ServerMessage::Ping);
            Probe::Pinged
        }
    }

    /// Hand the heartbeat task's handle to its peer
    ///
    /// If the peer is already gone the handle is dropped, which cancels the
    /// task.
    pub fn attach_heartbeat(&self, peer: &PeerRef, handle: HeartbeatHandle) -> bool {
        let Some(mut room) = self.rooms.get_mut(&peer.group_key) else {
            return false;
        };

        match room.get_connection_mut(peer) {
            Some(p) => {
                p.set_heartbeat(handle);
                true
            }
            None => false,
        }
    }

    /// Ids in the room `group_key`, in join order
    pub fn members(&self, group_key: &str) -> Vec<String> {
        self.rooms
            .get(group_key)
            .map(|room| room.peers().map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.rooms.iter().map(|room| room.peer_count()).sum()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.room_count(),
            peers: self.peer_count(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PeerInfo;
    use crate::peer::{test_peer, Outbound};
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn frames(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
        frames.iter().filter(|f| f["type"] == kind).collect()
    }

    fn listed_ids(peers_msg: &Value) -> Vec<String> {
        let peers: Vec<PeerInfo> = serde_json::from_value(peers_msg["peers"].clone()).unwrap();
        let mut ids: Vec<String> = peers.into_iter().map(|p| p.id).collect();
        ids.sort();
        ids
    }

    fn join(
        registry: &RoomRegistry,
        id: &str,
        group: &str,
    ) -> (PeerRef, UnboundedReceiver<Outbound>) {
        let (peer, rx) = test_peer(id, group, registry.next_session());
        (registry.join(peer), rx)
    }

    #[test]
    fn test_first_peer_gets_empty_list() {
        let registry = RoomRegistry::new();
        let (_a, mut rx_a) = join(&registry, "a", "10.0.0.5");

        let got = frames(&mut rx_a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "peers");
        assert!(listed_ids(&got[0]).is_empty());
        assert_eq!(registry.stats(), RegistryStats { rooms: 1, peers: 1 });
    }

    #[test]
    fn test_join_notifies_existing_members_once() {
        let registry = RoomRegistry::new();
        let (_a, mut rx_a) = join(&registry, "a", "10.0.0.5");
        let (_b, mut rx_b) = join(&registry, "b", "10.0.0.5");
        frames(&mut rx_a);
        frames(&mut rx_b);

        let (_c, mut rx_c) = join(&registry, "c", "10.0.0.5");

        for rx in [&mut rx_a, &mut rx_b] {
            let got = frames(rx);
            let joined = of_type(&got, "peer-joined");
            assert_eq!(joined.len(), 1);
            assert_eq!(joined[0]["peer"]["id"], "c");
            assert!(of_type(&got, "peers").is_empty());
        }

        let got = frames(&mut rx_c);
        let peers = of_type(&got, "peers");
        assert_eq!(peers.len(), 1);
        assert_eq!(listed_ids(peers[0]), vec!["a", "b"]);
        assert!(of_type(&got, "peer-joined").is_empty());
    }

    #[test]
    fn test_leave_is_idempotent() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = join(&registry, "a", "10.0.0.5");
        let (b, _rx_b) = join(&registry, "b", "10.0.0.5");
        frames(&mut rx_a);

        assert!(registry.leave(&b));
        assert!(!registry.leave(&b));

        let got = frames(&mut rx_a);
        let left = of_type(&got, "peer-left");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["peerId"], "b");
        assert_eq!(registry.members("10.0.0.5"), vec![a.id]);
    }

    #[test]
    fn test_leave_closes_departing_connection() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = join(&registry, "a", "10.0.0.5");
        frames(&mut rx_a);

        registry.leave(&a);
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_empty_room_is_destroyed_and_recreated_fresh() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = join(&registry, "a", "10.0.0.5");
        registry.leave(&a);

        assert_eq!(registry.room_count(), 0);
        assert!(registry.members("10.0.0.5").is_empty());

        let (_b, mut rx_b) = join(&registry, "b", "10.0.0.5");
        let got = frames(&mut rx_b);
        assert!(listed_ids(of_type(&got, "peers")[0]).is_empty());
    }

    #[test]
    fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (_a, mut rx_a) = join(&registry, "a", "10.0.0.5");
        let (_b, mut rx_b) = join(&registry, "b", "10.0.0.5");
        let (c, mut rx_c) = join(&registry, "c", "10.0.0.9");
        registry.leave(&c);
        let (_d, mut rx_d) = join(&registry, "d", "10.0.0.9");

        for rx in [&mut rx_a, &mut rx_b] {
            for frame in frames(rx) {
                let text = frame.to_string();
                assert!(!text.contains("\"c\""), "leaked: {}", text);
                assert!(!text.contains("\"d\""), "leaked: {}", text);
            }
        }
        for frame in frames(&mut rx_c).into_iter().chain(frames(&mut rx_d)) {
            let text = frame.to_string();
            assert!(!text.contains("\"a\""), "leaked: {}", text);
            assert!(!text.contains("\"b\""), "leaked: {}", text);
        }
        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn test_reconnect_replaces_stale_session() {
        let registry = RoomRegistry::new();
        let (_other, mut rx_other) = join(&registry, "z", "10.0.0.5");
        let (old, mut rx_old) = join(&registry, "a", "10.0.0.5");
        let (new, _rx_new) = join(&registry, "a", "10.0.0.5");
        frames(&mut rx_other);

        // Old socket was told to close
        let mut saw_close = false;
        while let Ok(frame) = rx_old.try_recv() {
            saw_close |= frame == Outbound::Close;
        }
        assert!(saw_close);

        // Stale leave is ignored, nobody hears peer-left
        assert!(!registry.leave(&old));
        assert!(frames(&mut rx_other).is_empty());
        assert!(registry.contains("10.0.0.5", "a"));

        assert!(registry.leave(&new));
        assert!(!registry.contains("10.0.0.5", "a"));
    }

    #[test]
    fn test_relay_targets_same_room_only() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = join(&registry, "a", "10.0.0.5");
        let (_b, mut rx_b) = join(&registry, "b", "10.0.0.5");
        let (_c, mut rx_c) = join(&registry, "c", "10.0.0.9");
        frames(&mut rx_b);
        frames(&mut rx_c);

        assert!(registry.relay(&a, "b", "hello".into()));
        assert!(!registry.relay(&a, "c", "hello".into()));
        assert!(!registry.relay(&a, "nobody", "hello".into()));

        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Text("hello".into()));
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_lookup_miss_is_none() {
        let registry = RoomRegistry::new();
        let (_a, _rx_a) = join(&registry, "a", "10.0.0.5");

        assert_eq!(
            registry.lookup("10.0.0.5", "a", |p| p.rtc_supported),
            Some(true)
        );
        assert!(registry.lookup("10.0.0.5", "b", |_| ()).is_none());
        assert!(registry.lookup("10.0.0.9", "a", |_| ()).is_none());
    }
}
