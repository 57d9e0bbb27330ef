//! Queue and topic destinations

use std::fmt;

/// Whether a destination delivers point-to-point or fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    /// Point-to-point: each message goes to exactly one competing consumer
    Queue,
    /// Publish-subscribe: each message goes to every subscription
    Topic,
}

impl DestinationKind {
    /// Get human-readable name for log output
    pub fn name(self) -> &'static str {
        match self {
            DestinationKind::Queue => "queue",
            DestinationKind::Topic => "topic",
        }
    }
}

/// A named destination on the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Delivery semantics of this destination
    pub kind: DestinationKind,
    /// Broker-side name
    pub name: String,
}

impl Destination {
    /// Create a queue destination
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Queue,
            name: name.into(),
        }
    }

    /// Create a topic destination
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Topic,
            name: name.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.name)
    }
}
