//! Session token and execution marker generation
//!
//! # Security Model
//!
//! - Session tokens are 32 bytes from the thread-local CSPRNG, hex-encoded
//!   (64 chars). Nothing about them is derived from the clock.
//! - Execution markers carry 16 random bytes behind a fixed `XXXX` prefix, so
//!   the chance of a command printing one by accident is negligible.
//! - Digest comparison is constant-time.

use rand::Rng;

/// Length of a session token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Length of the random part of an execution marker in bytes
const MARKER_BYTES: usize = 16;

/// Fixed prefix of every execution marker
pub const MARKER_PREFIX: &str = "XXXX";

/// Generate a new random session token
///
/// Returns a 64-character hex string (32 random bytes)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh per-call marker for the execution protocol
pub fn generate_marker() -> String {
    let mut bytes = [0u8; MARKER_BYTES];
    rand::thread_rng().fill(&mut bytes);
    format!("{}{}", MARKER_PREFIX, hex::encode(bytes))
}

/// Short, loggable form of a token
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}

/// Constant-time byte comparison (length is not secret), used for digests
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
