use std::time::{SystemTime, UNIX_EPOCH};

pub mod duration;

/// Milliseconds since the unix epoch, the unit of membership expiry scores.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
