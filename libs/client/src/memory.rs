//! # In-Memory Reference Broker
//!
//! A process-local broker implementing the [`Broker`]/[`Session`] boundary.
//! Queues are shared buffers drained by competing consumers; topics fan out
//! to every live subscription, and durable subscriptions keep buffering while
//! their consumer is away. Unsettled deliveries (client-ack or transacted)
//! are requeued at the front on rollback or session close, which is exactly
//! how redelivered duplicates become observable downstream.
//!
//! Loopback runs and the test suite use this broker; production traffic goes
//! through a wire-protocol implementation of the same traits.

use crate::{
    AckMode, Broker, ClientError, Credentials, Destination, DestinationKind, Endpoint, Result,
    Session, SubscribeOptions, WireMessage,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Aggregate counts of broker calls, for observing discipline cadence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStatsSnapshot {
    /// Messages accepted by `send`
    pub messages_sent: u64,
    /// Explicit `acknowledge` calls across all sessions
    pub acknowledges: u64,
    /// `commit` calls across all sessions
    pub commits: u64,
    /// `rollback` calls across all sessions
    pub rollbacks: u64,
}

#[derive(Debug, Default)]
struct BrokerStats {
    messages_sent: AtomicU64,
    acknowledges: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl BrokerStats {
    fn snapshot(&self) -> BrokerStatsSnapshot {
        BrokerStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            acknowledges: self.acknowledges.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// FIFO buffer with async wakeup, shared by queues and topic subscriptions
#[derive(Debug)]
struct DeliveryBuffer {
    messages: Mutex<VecDeque<WireMessage>>,
    notify: Notify,
}

impl DeliveryBuffer {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push_back(&self, message: WireMessage) {
        self.messages.lock().push_back(message);
        self.notify.notify_one();
    }

    /// Put redelivered messages back at the head, oldest first
    fn requeue_front(&self, messages: Vec<WireMessage>) {
        if messages.is_empty() {
            return;
        }
        {
            let mut queue = self.messages.lock();
            for message in messages.into_iter().rev() {
                queue.push_front(message);
            }
        }
        // Wake everyone currently parked, and leave a permit for a consumer
        // that checks the buffer just before parking.
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    async fn pop_front(&self) -> WireMessage {
        loop {
            {
                let mut queue = self.messages.lock();
                if let Some(message) = queue.pop_front() {
                    return message;
                }
            }
            self.notify.notified().await;
        }
    }

    fn snapshot(&self) -> Vec<WireMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

/// Per-topic subscription registry
#[derive(Debug, Default)]
struct TopicState {
    /// Non-durable subscriptions, keyed by session token; dropped with the session
    live: Mutex<HashMap<u64, Arc<DeliveryBuffer>>>,
    /// Durable subscriptions, keyed by subscription id; survive disconnects
    durable: Mutex<HashMap<String, Arc<DeliveryBuffer>>>,
}

impl TopicState {
    fn publish(&self, message: &WireMessage) {
        for buffer in self.live.lock().values() {
            buffer.push_back(message.clone());
        }
        for buffer in self.durable.lock().values() {
            buffer.push_back(message.clone());
        }
    }
}

#[derive(Debug, Default)]
struct BrokerCore {
    queues: DashMap<String, Arc<DeliveryBuffer>>,
    topics: DashMap<String, Arc<TopicState>>,
    stats: BrokerStats,
    subscriber_tokens: AtomicU64,
}

impl BrokerCore {
    fn queue(&self, name: &str) -> Arc<DeliveryBuffer> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DeliveryBuffer::new()))
            .clone()
    }

    fn topic(&self, name: &str) -> Arc<TopicState> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicState::default()))
            .clone()
    }
}

/// Process-local broker handing out [`MemorySession`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    core: Arc<BrokerCore>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate call counts across every session of this broker
    pub fn stats(&self) -> BrokerStatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Current depth of a queue (0 when it does not exist yet)
    pub fn queue_depth(&self, name: &str) -> usize {
        self.core.queues.get(name).map(|b| b.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>> {
        debug!(
            "memory broker session opened for {} as '{}'",
            endpoint, credentials.username
        );
        Ok(Box::new(MemorySession {
            core: Arc::clone(&self.core),
            subscription: None,
            options: SubscribeOptions::default(),
            pending: Vec::new(),
            removed_subscription: None,
            closed: false,
        }))
    }
}

#[derive(Debug)]
enum ActiveSubscription {
    Queue {
        buffer: Arc<DeliveryBuffer>,
    },
    Topic {
        state: Arc<TopicState>,
        buffer: Arc<DeliveryBuffer>,
        token: TopicToken,
    },
}

#[derive(Debug, Clone)]
enum TopicToken {
    Live(u64),
    Durable(String),
}

impl ActiveSubscription {
    fn buffer(&self) -> Arc<DeliveryBuffer> {
        match self {
            ActiveSubscription::Queue { buffer } => Arc::clone(buffer),
            ActiveSubscription::Topic { buffer, .. } => Arc::clone(buffer),
        }
    }
}

/// One conversation with a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemorySession {
    core: Arc<BrokerCore>,
    subscription: Option<ActiveSubscription>,
    options: SubscribeOptions,
    /// Deliveries not yet settled by acknowledge/commit
    pending: Vec<WireMessage>,
    /// Id of a torn-down durable subscription, for error reporting
    removed_subscription: Option<String>,
    closed: bool,
}

impl MemorySession {
    fn tracks_pending(&self) -> bool {
        self.options.transacted || self.options.ack_mode == AckMode::Client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        Ok(())
    }

    fn active_buffer(&self) -> Result<Arc<DeliveryBuffer>> {
        match &self.subscription {
            Some(sub) => Ok(sub.buffer()),
            None => match &self.removed_subscription {
                Some(id) => Err(ClientError::Unsubscribed(id.clone())),
                None => Err(ClientError::NotSubscribed),
            },
        }
    }

    /// Requeue unsettled deliveries and detach from the topic registry.
    /// Shared by `close` and `Drop`; idempotent.
    fn release(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if let Some(sub) = self.subscription.take() {
            sub.buffer().requeue_front(pending);
            if let ActiveSubscription::Topic { state, token, .. } = sub {
                // Live subscriptions die with the session; durable ones keep
                // buffering until an explicit unsubscribe.
                if let TopicToken::Live(token) = token {
                    state.live.lock().remove(&token);
                }
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn send(&mut self, destination: &Destination, message: WireMessage) -> Result<()> {
        self.ensure_open()?;
        match destination.kind {
            DestinationKind::Queue => {
                self.core.queue(&destination.name).push_back(message);
            }
            DestinationKind::Topic => {
                self.core.topic(&destination.name).publish(&message);
            }
        }
        self.core.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        destination: &Destination,
        options: SubscribeOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        // Replacing a subscription detaches the old one first; its unsettled
        // deliveries go back to the broker.
        if self.subscription.is_some() {
            self.release();
        }
        let subscription = match destination.kind {
            DestinationKind::Queue => ActiveSubscription::Queue {
                buffer: self.core.queue(&destination.name),
            },
            DestinationKind::Topic => {
                let state = self.core.topic(&destination.name);
                if options.durable {
                    let id = options.subscription_id.clone().ok_or_else(|| {
                        ClientError::Unsupported(
                            "durable subscription requires a subscription id".to_string(),
                        )
                    })?;
                    // Reattaching under a known id resumes the retained buffer.
                    let buffer = state
                        .durable
                        .lock()
                        .entry(id.clone())
                        .or_insert_with(|| Arc::new(DeliveryBuffer::new()))
                        .clone();
                    ActiveSubscription::Topic {
                        state,
                        buffer,
                        token: TopicToken::Durable(id),
                    }
                } else {
                    let token = self.core.subscriber_tokens.fetch_add(1, Ordering::Relaxed);
                    let buffer = Arc::new(DeliveryBuffer::new());
                    state.live.lock().insert(token, Arc::clone(&buffer));
                    ActiveSubscription::Topic {
                        state,
                        buffer,
                        token: TopicToken::Live(token),
                    }
                }
            }
        };
        self.subscription = Some(subscription);
        self.options = options;
        self.removed_subscription = None;
        Ok(())
    }

    async fn receive(&mut self) -> Result<WireMessage> {
        self.ensure_open()?;
        let buffer = self.active_buffer()?;
        let message = buffer.pop_front().await;
        if self.tracks_pending() {
            self.pending.push(message.clone());
        }
        Ok(message)
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<WireMessage>> {
        self.ensure_open()?;
        let buffer = self.active_buffer()?;
        match tokio::time::timeout(timeout, buffer.pop_front()).await {
            Ok(message) => {
                if self.tracks_pending() {
                    self.pending.push(message.clone());
                }
                Ok(Some(message))
            }
            Err(_) => Ok(None),
        }
    }

    async fn acknowledge(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.subscription.is_none() {
            return Err(ClientError::NotSubscribed);
        }
        self.core.stats.acknowledges.fetch_add(1, Ordering::Relaxed);
        self.pending.clear();
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.core.stats.commits.fetch_add(1, Ordering::Relaxed);
        self.pending.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.core.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        let pending = std::mem::take(&mut self.pending);
        if let Some(sub) = &self.subscription {
            sub.buffer().requeue_front(pending);
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.subscription.take() {
            Some(ActiveSubscription::Topic { state, token, .. }) => {
                match token {
                    TopicToken::Durable(id) => {
                        state.durable.lock().remove(&id);
                        self.removed_subscription = Some(id);
                    }
                    TopicToken::Live(token) => {
                        state.live.lock().remove(&token);
                    }
                }
                self.pending.clear();
                Ok(())
            }
            Some(ActiveSubscription::Queue { .. }) => {
                self.pending.clear();
                Ok(())
            }
            None => Err(ClientError::NotSubscribed),
        }
    }

    async fn browse(&mut self, queue: &str) -> Result<Vec<WireMessage>> {
        self.ensure_open()?;
        Ok(self
            .core
            .queues
            .get(queue)
            .map(|buffer| buffer.snapshot())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.release();
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("localhost", 5672)
    }

    async fn session(broker: &MemoryBroker) -> Box<dyn Session> {
        broker
            .connect(&endpoint(), &Credentials::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn queue_roundtrip() {
        let broker = MemoryBroker::new();
        let mut producer = session(&broker).await;
        let mut consumer = session(&broker).await;

        let dest = Destination::queue("orders");
        consumer
            .subscribe(&dest, SubscribeOptions::auto())
            .await
            .unwrap();
        producer
            .send(&dest, WireMessage::new(1, "first"))
            .await
            .unwrap();

        let got = consumer.receive().await.unwrap();
        assert_eq!(got.sequence, 1);
        assert_eq!(got.body, "first");
        assert_eq!(broker.stats().messages_sent, 1);
    }

    #[tokio::test]
    async fn queue_competing_consumers_split_the_stream() {
        let broker = MemoryBroker::new();
        let dest = Destination::queue("work");

        let mut a = session(&broker).await;
        let mut b = session(&broker).await;
        a.subscribe(&dest, SubscribeOptions::auto()).await.unwrap();
        b.subscribe(&dest, SubscribeOptions::auto()).await.unwrap();

        let mut producer = session(&broker).await;
        for seq in 1..=4 {
            producer
                .send(&dest, WireMessage::new(seq, format!("m{seq}")))
                .await
                .unwrap();
        }

        let mut seen = vec![
            a.receive().await.unwrap().sequence,
            b.receive().await.unwrap().sequence,
            a.receive().await.unwrap().sequence,
            b.receive().await.unwrap().sequence,
        ];
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(broker.queue_depth("work"), 0);
    }

    #[tokio::test]
    async fn topic_fans_out_to_every_subscription() {
        let broker = MemoryBroker::new();
        let dest = Destination::topic("alerts");

        let mut a = session(&broker).await;
        let mut b = session(&broker).await;
        a.subscribe(&dest, SubscribeOptions::auto()).await.unwrap();
        b.subscribe(&dest, SubscribeOptions::auto()).await.unwrap();

        let mut producer = session(&broker).await;
        producer
            .send(&dest, WireMessage::new(9, "ping"))
            .await
            .unwrap();

        assert_eq!(a.receive().await.unwrap().sequence, 9);
        assert_eq!(b.receive().await.unwrap().sequence, 9);
    }

    #[tokio::test]
    async fn topic_without_subscribers_drops_messages() {
        let broker = MemoryBroker::new();
        let dest = Destination::topic("void");
        let mut producer = session(&broker).await;
        producer
            .send(&dest, WireMessage::new(1, "gone"))
            .await
            .unwrap();

        let mut late = session(&broker).await;
        late.subscribe(&dest, SubscribeOptions::auto())
            .await
            .unwrap();
        let got = late
            .receive_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn durable_subscription_buffers_across_disconnect() {
        let broker = MemoryBroker::new();
        let dest = Destination::topic("prices");

        let mut first = session(&broker).await;
        first
            .subscribe(&dest, SubscribeOptions::auto().durable("sub-1"))
            .await
            .unwrap();
        first.close().await.unwrap();
        drop(first);

        let mut producer = session(&broker).await;
        producer
            .send(&dest, WireMessage::new(5, "while away"))
            .await
            .unwrap();

        let mut resumed = session(&broker).await;
        resumed
            .subscribe(&dest, SubscribeOptions::auto().durable("sub-1"))
            .await
            .unwrap();
        assert_eq!(resumed.receive().await.unwrap().sequence, 5);

        // After unsubscribe the retained buffer is gone for good.
        resumed.unsubscribe().await.unwrap();
        assert!(matches!(
            resumed.receive_timeout(Duration::from_millis(10)).await,
            Err(ClientError::Unsubscribed(_))
        ));
    }

    #[tokio::test]
    async fn rollback_redelivers_in_order() {
        let broker = MemoryBroker::new();
        let dest = Destination::queue("tx");

        let mut producer = session(&broker).await;
        for seq in 1..=3 {
            producer
                .send(&dest, WireMessage::new(seq, format!("m{seq}")))
                .await
                .unwrap();
        }

        let mut consumer = session(&broker).await;
        consumer
            .subscribe(&dest, SubscribeOptions::auto().with_transacted(true))
            .await
            .unwrap();
        assert_eq!(consumer.receive().await.unwrap().sequence, 1);
        assert_eq!(consumer.receive().await.unwrap().sequence, 2);
        consumer.rollback().await.unwrap();

        // Both uncommitted deliveries come back, oldest first.
        assert_eq!(consumer.receive().await.unwrap().sequence, 1);
        assert_eq!(consumer.receive().await.unwrap().sequence, 2);
        assert_eq!(consumer.receive().await.unwrap().sequence, 3);
        assert_eq!(broker.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn close_requeues_unacknowledged_deliveries() {
        let broker = MemoryBroker::new();
        let dest = Destination::queue("unacked");

        let mut producer = session(&broker).await;
        producer
            .send(&dest, WireMessage::new(1, "m1"))
            .await
            .unwrap();

        let mut consumer = session(&broker).await;
        consumer
            .subscribe(
                &dest,
                SubscribeOptions::auto().with_ack_mode(AckMode::Client),
            )
            .await
            .unwrap();
        assert_eq!(consumer.receive().await.unwrap().sequence, 1);
        consumer.close().await.unwrap();

        assert_eq!(broker.queue_depth("unacked"), 1);
    }

    #[tokio::test]
    async fn browse_is_non_destructive() {
        let broker = MemoryBroker::new();
        let dest = Destination::queue("depth");
        let mut producer = session(&broker).await;
        for seq in 1..=3 {
            producer
                .send(&dest, WireMessage::new(seq, format!("m{seq}")))
                .await
                .unwrap();
        }

        let mut browser = session(&broker).await;
        let snapshot = browser.browse("depth").await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(broker.queue_depth("depth"), 3);

        // Browsing an unknown queue reports empty rather than creating it.
        assert!(browser.browse("nowhere").await.unwrap().is_empty());
        assert_eq!(broker.queue_depth("nowhere"), 0);
    }

    #[tokio::test]
    async fn closed_session_rejects_operations() {
        let broker = MemoryBroker::new();
        let mut s = session(&broker).await;
        s.close().await.unwrap();
        let err = s
            .send(&Destination::queue("q"), WireMessage::new(1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));
    }
}
