//! # Broker Client Boundary
//!
//! Everything the workload driver needs from a message broker, expressed as
//! traits: connect, send, subscribe, receive (push and pull), acknowledge,
//! commit/rollback, unsubscribe, and non-destructive browsing. Ships with
//! [`MemoryBroker`], a process-local reference implementation used for
//! loopback runs and tests.

pub mod destination;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod message;
pub mod session;

pub use destination::{Destination, DestinationKind};
pub use endpoint::{Credentials, Endpoint};
pub use error::{ClientError, Result};
pub use memory::{BrokerStatsSnapshot, MemoryBroker, MemorySession};
pub use message::{current_timestamp_ns, WireMessage};
pub use session::{AckMode, Broker, Session, SubscribeOptions};
