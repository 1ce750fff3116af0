//! Utility functions for the rating pipeline

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique invocation ID
pub fn generate_invocation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Sum of both players' ratings, used to check the zero-sum property
pub fn rating_total(rating_a: i64, rating_b: i64) -> i64 {
    rating_a + rating_b
}

/// Render a byte payload for log output, truncated to `max_len` bytes
pub fn payload_preview(payload: &[u8], max_len: usize) -> String {
    let preview_len = std::cmp::min(max_len, payload.len());
    String::from_utf8_lossy(&payload[..preview_len]).into_owned()
}
