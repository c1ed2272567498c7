//! Signal protocol messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lanpair_core::PeerLabel;

/// Messages the server sends over the signaling WebSocket
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Identity echo sent right after joining
    DisplayName { message: DisplayName },

    /// A new peer appeared in the room
    PeerJoined { peer: PeerInfo },

    /// Snapshot of the room for a newcomer
    Peers { peers: Vec<PeerInfo> },

    /// A peer left the room
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: String },

    /// Liveness probe
    Ping,
}

/// Payload of `display-name`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayName {
    pub display_name: String,
    pub device_name: String,
}

/// Public view of a peer
///
/// The grouping key is deliberately absent: peers never learn each other's
/// network address through the server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Identity token
    pub id: String,

    /// Descriptive label
    pub name: PeerLabel,

    /// Whether the peer can take part in direct WebRTC connections
    pub rtc_supported: bool,
}

impl ServerMessage {
    /// Create the `display-name` message for a label
    pub fn display_name(label: &PeerLabel) -> Self {
        Self::DisplayName {
            message: DisplayName {
                display_name: label.display_name.clone(),
                device_name: label.device_name.clone(),
            },
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound message from a peer
///
/// Kept as a raw JSON object: the server only looks at `type` and `to` and
/// forwards everything else untouched, in its original field order.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Parse from JSON; anything but a JSON object is rejected
    pub fn from_json(json: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Some(Self(map)),
            _ => None,
        }
    }

    /// Control type, if present and a string
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Relay target, if present and a string
    pub fn to(&self) -> Option<&str> {
        self.0.get("to").and_then(Value::as_str)
    }

    /// Rewrite for delivery: drop `to`, stamp `sender`
    pub fn into_relayed(mut self, sender_id: &str) -> Self {
        self.0.shift_remove("to");
        self.0
            .insert("sender".to_string(), Value::String(sender_id.to_string()));
        self
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Borrow the underlying object
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}
