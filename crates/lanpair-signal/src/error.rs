//! Error types for the signal server

use thiserror::Error;

/// Connection-level errors
///
/// None of these are fatal to the server: the accept loop logs them and the
/// affected peer is treated as having left.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake finished without resolving an identity")]
    NoIdentity,
}
