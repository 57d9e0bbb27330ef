//! The wire-client boundary: `Broker` and `Session` traits
//!
//! The workload driver is written entirely against these traits. A concrete
//! wire-protocol client (AMQP, STOMP, a vendor SDK) plugs in here without the
//! driver knowing; the in-process [`crate::MemoryBroker`] is the reference
//! implementation used by the test suite.

use crate::{Credentials, Destination, Endpoint, Result, WireMessage};
use async_trait::async_trait;
use std::time::Duration;

/// Policy governing when a received message is considered durably consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The delivery mechanism acknowledges implicitly on delivery
    #[default]
    Auto,
    /// The consumer issues explicit `acknowledge()` calls
    Client,
}

/// Options for establishing a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Acknowledgment policy for this subscription
    pub ack_mode: AckMode,
    /// Run the session transacted: deliveries settle on `commit()`,
    /// `rollback()` requeues everything since the last commit
    pub transacted: bool,
    /// Keep the subscription alive across disconnects (topics only)
    pub durable: bool,
    /// Identifier of a durable subscription; required when `durable` is set
    pub subscription_id: Option<String>,
}

impl SubscribeOptions {
    /// Options for a plain auto-acknowledged subscription
    pub fn auto() -> Self {
        Self::default()
    }

    /// Set the acknowledgment mode
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// Run the session transacted
    pub fn with_transacted(mut self, transacted: bool) -> Self {
        self.transacted = transacted;
        self
    }

    /// Make the subscription durable under the given id
    pub fn durable(mut self, subscription_id: impl Into<String>) -> Self {
        self.durable = true;
        self.subscription_id = Some(subscription_id.into());
        self
    }
}

/// Entry point to a broker: hands out sessions
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a session against the given endpoint
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>>;
}

/// A single conversation with the broker.
///
/// Sessions are single-owner and not thread-safe; each worker holds its own.
#[async_trait]
pub trait Session: Send {
    /// Send one message to a destination
    async fn send(&mut self, destination: &Destination, message: WireMessage) -> Result<()>;

    /// Establish a subscription on a destination
    async fn subscribe(
        &mut self,
        destination: &Destination,
        options: SubscribeOptions,
    ) -> Result<()>;

    /// Await the next delivery on the active subscription.
    ///
    /// This call blocks until a message arrives and cannot be preempted from
    /// outside; callers that need bounded waits use [`Session::receive_timeout`].
    async fn receive(&mut self) -> Result<WireMessage>;

    /// Await the next delivery, giving up after `timeout`
    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<WireMessage>>;

    /// Explicitly acknowledge every delivery since the last acknowledge
    async fn acknowledge(&mut self) -> Result<()>;

    /// Commit the transacted work since the last commit
    async fn commit(&mut self) -> Result<()>;

    /// Discard the transacted work since the last commit; the broker
    /// redelivers the affected messages
    async fn rollback(&mut self) -> Result<()>;

    /// Tear down the active subscription; durable state is removed
    async fn unsubscribe(&mut self) -> Result<()>;

    /// Non-destructive snapshot of a queue's current contents.
    ///
    /// Must not alter delivery state or ordering.
    async fn browse(&mut self, queue: &str) -> Result<Vec<WireMessage>>;

    /// Close the session; unsettled deliveries go back to the broker
    async fn close(&mut self) -> Result<()>;
}
