//! Peer identity tokens
//!
//! Provides:
//! - Random v4-style identity tokens for connections without a cookie
//! - Validation of tokens presented back by clients
//! - A pure, deterministic hash of a token for seeding cosmetic names

use tracing::debug;
use uuid::{Builder, Uuid};

use crate::error::IdentityError;

/// Length of a rendered identity token (8-4-4-4-12 hex digits with dashes)
pub const PEER_ID_LENGTH: usize = 36;

/// Generate a random peer identity token (e.g., "0f8e0c1e-3b9d-4f6a-9a43-5d0b2c6e7f18")
///
/// # Panics
/// Panics if the system random number generator fails (extremely rare).
/// Use `try_generate_peer_id` if you need to handle this case.
pub fn generate_peer_id() -> String {
    try_generate_peer_id().expect("RNG failed - system entropy source unavailable")
}

/// Try to generate a random peer identity token, returning an error if RNG fails
pub fn try_generate_peer_id() -> Result<String, IdentityError> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|_| IdentityError::Entropy)?;

    // Builder pins the version nibble to 4 and the variant to 10xx
    let id = Builder::from_random_bytes(bytes).into_uuid();
    Ok(id.hyphenated().to_string())
}

/// Validate a client-presented token and return it in canonical lowercase form
pub fn parse_peer_id(token: &str) -> Result<String, IdentityError> {
    let trimmed = token.trim();
    if trimmed.len() != PEER_ID_LENGTH {
        return Err(IdentityError::Malformed(token.to_string()));
    }

    let id = Uuid::parse_str(trimmed).map_err(|e| {
        debug!("Rejected peer id {:?}: {}", token, e);
        IdentityError::Malformed(token.to_string())
    })?;
    Ok(id.hyphenated().to_string())
}

/// Deterministic 64-bit hash of an identity token
///
/// Same input, same output, across processes and platforms.
pub fn token_hash(token: &str) -> u64 {
    let digest = blake3::hash(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}
