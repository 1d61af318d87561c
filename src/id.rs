//! Unique ID minting for server-side resources

use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a unique ID of the form `<prefix>_<unix-nanos>_<16 hex chars>`.
///
/// Room IDs use the prefix `room`; the timestamp component keeps IDs sortable
/// by creation time and the random suffix makes collisions within a
/// nanosecond irrelevant.
pub fn generate(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let suffix: u64 = rand::random();
    format!("{}_{}_{:016x}", prefix, nanos, suffix)
}
