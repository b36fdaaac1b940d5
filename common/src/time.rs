use std::time::{SystemTime, UNIX_EPOCH};

pub type TimestampSeconds = u64;

/// Current unix time in coarse seconds.
pub fn now_secs() -> TimestampSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
