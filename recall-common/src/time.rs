//! Timestamp utilities
//!
//! Timestamps are persisted as INTEGER milliseconds since the Unix epoch so
//! that SQL ordering is numeric and exact.

use chrono::{DateTime, TimeZone, Utc};

/// Convert a UTC timestamp to epoch milliseconds for storage
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a UTC timestamp
///
/// Out-of-range values clamp to the Unix epoch rather than panicking.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
