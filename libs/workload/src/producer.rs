//! # Producer Workers
//!
//! Each producer runs on its own task and competes with its siblings for
//! sequence numbers from a shared per-class generator: a worker claims the
//! next number, sends a message carrying it, and stops once the claimed
//! number passes the run's total. Numbers are never reused, so N workers
//! sending toward a target of M emit exactly the ids `1..=M` between them.

use crate::counters::{RunCounters, SequenceGenerator};
use broker_client::{Broker, Credentials, Destination, Endpoint, Session, WireMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Tunables shared by every producer of a run
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Total messages for the destination class, across all workers
    pub message_count: u64,
    /// Pause between consecutive sends on one worker
    pub delay: Duration,
    /// Progress line cadence
    pub print_every: u64,
    /// Log every send individually
    pub print_each: bool,
    /// Fixed payload body; a generated one embeds the sequence otherwise
    pub payload: Option<Arc<String>>,
}

/// Cooperative stop control for one producer.
///
/// The flag is observed at the next loop boundary; an in-flight send is
/// never interrupted, so stop latency is bounded by one send/delay cycle.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    stop: Arc<AtomicBool>,
}

impl ProducerHandle {
    /// Ask the producer to stop at its next loop boundary
    pub fn stop_sending(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// One sending worker
pub struct Producer {
    worker: usize,
    endpoint: Endpoint,
    destination: Destination,
    settings: ProducerSettings,
    sequence: Arc<SequenceGenerator>,
    counters: Arc<RunCounters>,
    stop: Arc<AtomicBool>,
}

impl Producer {
    /// Build a producer for worker `worker` against its allocated
    /// endpoint/destination pair
    pub fn new(
        worker: usize,
        endpoint: Endpoint,
        destination: Destination,
        settings: ProducerSettings,
        sequence: Arc<SequenceGenerator>,
        counters: Arc<RunCounters>,
    ) -> Self {
        Self {
            worker,
            endpoint,
            destination,
            settings,
            sequence,
            counters,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop control for this producer
    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Drive the send loop to completion.
    ///
    /// Failures are contained here: a connect or send error is logged and
    /// ends (or skips within) this worker only.
    pub async fn run(self, broker: Arc<dyn Broker>, credentials: Credentials) {
        let mut session = match broker.connect(&self.endpoint, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "producer {} could not connect to {}: {}",
                    self.worker, self.endpoint, e
                );
                return;
            }
        };

        let mut sent = 0u64;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("producer {} observed stop signal", self.worker);
                break;
            }
            let sequence = self.sequence.claim();
            if sequence > self.settings.message_count {
                break;
            }

            let body = match &self.settings.payload {
                Some(payload) => payload.as_ref().clone(),
                None => format!("message {sequence}"),
            };
            match session.send(&self.destination, WireMessage::new(sequence, body)).await {
                Ok(()) => {
                    sent += 1;
                    self.counters.record(self.destination.kind);
                    if self.settings.print_each {
                        info!(
                            "producer {} sent message {} to {}",
                            self.worker, sequence, self.destination
                        );
                    }
                    if sequence % self.settings.print_every == 0 {
                        info!(
                            "{} of {} messages claimed on {}",
                            sequence, self.settings.message_count, self.destination
                        );
                    }
                }
                Err(e) => {
                    // The claimed number is gone; it will surface as a gap in
                    // the analysis rather than being silently reissued.
                    error!(
                        "producer {} failed to send message {} to {}: {}",
                        self.worker, sequence, self.destination, e
                    );
                    if e.is_terminal() {
                        break;
                    }
                }
            }

            if !self.settings.delay.is_zero() {
                sleep(self.settings.delay).await;
            }
        }

        if let Err(e) = session.close().await {
            debug!("producer {} close failed: {}", self.worker, e);
        }
        info!(
            "producer {} finished after {} sends to {}",
            self.worker, sent, self.destination
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_client::{DestinationKind, MemoryBroker};

    fn settings(message_count: u64) -> ProducerSettings {
        ProducerSettings {
            message_count,
            delay: Duration::ZERO,
            print_every: u64::MAX / 2,
            print_each: false,
            payload: None,
        }
    }

    #[tokio::test]
    async fn sends_exactly_the_configured_total() {
        let broker = MemoryBroker::new();
        let counters = Arc::new(RunCounters::new());
        let sequence = Arc::new(SequenceGenerator::new());

        let producer = Producer::new(
            0,
            Endpoint::new("localhost", 5672),
            Destination::queue("out"),
            settings(25),
            Arc::clone(&sequence),
            Arc::clone(&counters),
        );
        producer
            .run(Arc::new(broker.clone()), Credentials::default())
            .await;

        assert_eq!(broker.queue_depth("out"), 25);
        assert_eq!(counters.seen(DestinationKind::Queue), 25);
    }

    #[tokio::test]
    async fn stop_is_observed_at_the_loop_boundary() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(
            0,
            Endpoint::new("localhost", 5672),
            Destination::queue("out"),
            ProducerSettings {
                delay: Duration::from_millis(20),
                ..settings(u64::MAX)
            },
            Arc::new(SequenceGenerator::new()),
            Arc::new(RunCounters::new()),
        );
        let handle = producer.handle();

        let task = tokio::spawn(producer.run(Arc::new(broker.clone()), Credentials::default()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop_sending();

        // One delay cycle bounds the stop latency.
        tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("producer should stop within one cycle")
            .unwrap();
        assert!(broker.queue_depth("out") > 0);
    }

    #[tokio::test]
    async fn fixed_payload_overrides_generated_body() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(
            0,
            Endpoint::new("localhost", 5672),
            Destination::queue("out"),
            ProducerSettings {
                payload: Some(Arc::new("fixed body".to_string())),
                ..settings(1)
            },
            Arc::new(SequenceGenerator::new()),
            Arc::new(RunCounters::new()),
        );
        producer
            .run(Arc::new(broker.clone()), Credentials::default())
            .await;

        let mut session = broker
            .connect(&Endpoint::new("localhost", 5672), &Credentials::default())
            .await
            .unwrap();
        let snapshot = session.browse("out").await.unwrap();
        assert_eq!(snapshot[0].body, "fixed body");
        assert_eq!(snapshot[0].sequence, 1);
    }
}
