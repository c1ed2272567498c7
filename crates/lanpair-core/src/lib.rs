//! Lanpair Core - Shared configuration, identity, and labelling utilities
//!
//! This crate contains the pieces of the relay that have nothing to do with
//! sockets: how a server is configured, how peers are identified, and how a
//! peer's cosmetic device label is derived. It has no dependencies on
//! networking code.

pub mod config;
pub mod device;
pub mod error;
pub mod identity;
pub mod label;

pub use config::{Config, HeartbeatConfig, ServerConfig};
pub use error::*;
pub use identity::{generate_peer_id, parse_peer_id, token_hash};
pub use label::PeerLabel;

/// Default listening port for the signal server
pub const DEFAULT_PORT: u16 = 3000;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Name of the cookie carrying a peer's identity token
pub const PEER_ID_COOKIE: &str = "peerid";
