//! Inbound message dispatch
//!
//! The server only understands two control types, `pong` and `disconnect`.
//! Everything else is opaque: a message with a `to` field is forwarded to that
//! peer with `to` replaced by `sender`, and a message that can't be parsed or
//! routed is dropped without telling anyone.

use tracing::{debug, trace};

use crate::messages::Envelope;
use crate::peer::PeerRef;
use crate::registry::RoomRegistry;

/// Control type for an explicit leave
pub const DISCONNECT: &str = "disconnect";

/// Control type for a liveness acknowledgment
pub const PONG: &str = "pong";

/// What happened to one inbound message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Not a JSON object; dropped
    Malformed,
    /// Sender asked to leave
    Disconnected,
    /// Liveness recorded, nothing to relay
    Acknowledged,
    /// Forwarded to the target
    Relayed,
    /// Target not in the sender's room; dropped
    Unrouted,
    /// Well-formed but nothing to do
    Ignored,
}

/// Handle one text frame from `sender`
pub fn dispatch(registry: &RoomRegistry, sender: &PeerRef, raw: &str) -> Outcome {
    let Some(envelope) = Envelope::from_json(raw) else {
        trace!("Dropping malformed message from {}", sender.id);
        return Outcome::Malformed;
    };

    let acknowledged = match envelope.kind() {
        Some(DISCONNECT) => {
            debug!("Peer {} disconnected", sender.id);
            registry.leave(sender);
            return Outcome::Disconnected;
        }
        Some(PONG) => registry.acknowledge(sender),
        _ => false,
    };

    let Some(to) = envelope.to().map(str::to_owned) else {
        return if acknowledged {
            Outcome::Acknowledged
        } else {
            Outcome::Ignored
        };
    };

    let relayed = envelope.into_relayed(&sender.id).to_json();
    if registry.relay(sender, &to, relayed) {
        trace!("Relayed {} -> {}", sender.id, to);
        Outcome::Relayed
    } else {
        trace!("Dropping message from {} for unknown peer {}", sender.id, to);
        Outcome::Unrouted
    }
}
