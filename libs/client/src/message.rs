//! Protocol-agnostic message wrapper

use std::time::{SystemTime, UNIX_EPOCH};

/// The message the wire boundary moves in both directions.
///
/// `sequence` is the payload-embedded monotonic identifier a driver assigns
/// at send time and reads back at receive time to detect duplication, gaps,
/// and ordering downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Monotonic identifier assigned by the sender
    pub sequence: u64,
    /// Send timestamp (nanoseconds since epoch)
    pub timestamp_ns: u64,
    /// Message body
    pub body: String,
}

impl WireMessage {
    /// Create a message stamped with the current time
    pub fn new(sequence: u64, body: impl Into<String>) -> Self {
        Self {
            sequence,
            timestamp_ns: current_timestamp_ns(),
            body: body.into(),
        }
    }
}

/// Current time in nanoseconds since the Unix epoch.
///
/// Saturates to zero on a pre-epoch clock rather than panicking.
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
