//! ID generation utilities for swapchat
//!
//! Provides identifiers for streamed messages, text parts, sources, and
//! tool calls that the model left unnamed.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate an assistant message ID
///
/// Format: `msg-{timestamp_ms}-{random_hex}`
/// Example: `msg-1738300800123-a1b2c3d4`
pub fn generate_message_id() -> String {
    let random: u32 = rand::rng().random();
    format!("msg-{}-{:08x}", now_ms(), random)
}

/// Generate a part ID with the given prefix
///
/// Format: `{prefix}-{random_hex}`
/// Example: `txt-3f9a0c12`
pub fn generate_part_id(prefix: &str) -> String {
    let random: u32 = rand::rng().random();
    format!("{}-{:08x}", prefix, random)
}
