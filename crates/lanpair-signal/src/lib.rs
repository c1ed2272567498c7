//! Lanpair Signal Server
//!
//! Discovery and signaling relay for devices on the same network. Clients
//! connect via WebSocket, are grouped into rooms by their public address, and
//! exchange connection-setup messages through the server until they can talk
//! to each other directly.
//!
//! # Protocol
//!
//! 1. Client connects; the server assigns (or recognises) an identity token
//! 2. Existing room members get `peer-joined`, the newcomer gets `peers`
//! 3. Server pings every peer periodically and evicts the silent ones
//! 4. Any message carrying `to` is relayed to that peer with `sender` set
//! 5. On disconnect the remaining members get `peer-left`

pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod messages;
pub mod peer;
pub mod registry;
pub mod room;
pub mod server;

pub use dispatch::{dispatch, Outcome};
pub use error::ServerError;
pub use heartbeat::HeartbeatHandle;
pub use messages::{Envelope, PeerInfo, ServerMessage};
pub use peer::{Outbound, Peer, PeerConnection, PeerRef};
pub use registry::{Probe, RegistryStats, RoomRegistry};
pub use room::Room;
pub use server::{ServerOptions, SignalServer};

pub use lanpair_core::DEFAULT_PORT;
