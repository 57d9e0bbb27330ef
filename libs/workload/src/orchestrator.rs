//! # Run Lifecycle
//!
//! The orchestrator owns one run: it resolves the configured mode into a set
//! of workers through the round-robin allocator, spawns each worker as an
//! independent task, and exposes the shared counters plus a cooperative
//! `shutdown()`. It never blocks on its workers — callers poll the counters
//! or wait with an explicit bound.
//!
//! Purge composes the browser (learn the depth) with a single bounded
//! consumer (drain exactly that many messages).

use crate::allocator::WorkerAllocator;
use crate::browser::browse_queue;
use crate::config::{Mode, WorkloadConfig};
use crate::consumer::{Consumer, ConsumerHandle, ConsumerSettings, PULL_POLL_INTERVAL};
use crate::counters::{RunCounters, SequenceGenerator};
use crate::error::{Result, WorkloadError};
use crate::output_log::OutputLog;
use crate::producer::{Producer, ProducerHandle, ProducerSettings};
use broker_client::{Broker, Credentials, Destination, DestinationKind, SubscribeOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// How often counter polls re-check progress
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a purge to drain
const PURGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// What `start` set in motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Workers were spawned and are running in the background
    Workers {
        /// Spawned producer count
        producers: usize,
        /// Spawned consumer count
        consumers: usize,
    },
    /// Browse completed with the observed queue depth
    BrowseDepth(u64),
    /// Purge completed having drained this many messages
    Purged(u64),
}

/// Owns the workers and shared state of one run
pub struct WorkloadOrchestrator {
    config: WorkloadConfig,
    broker: Arc<dyn Broker>,
    credentials: Credentials,
    counters: Arc<RunCounters>,
    queue_sequence: Arc<SequenceGenerator>,
    topic_sequence: Arc<SequenceGenerator>,
    producers: Vec<ProducerHandle>,
    consumers: Vec<ConsumerHandle>,
    tasks: Vec<JoinHandle<()>>,
    log_path: PathBuf,
}

impl WorkloadOrchestrator {
    /// Orchestrator for one run of `config` against `broker`, logging
    /// deliveries to `log_path`
    pub fn new(
        config: WorkloadConfig,
        broker: Arc<dyn Broker>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            broker,
            credentials: Credentials::default(),
            counters: Arc::new(RunCounters::new()),
            queue_sequence: Arc::new(SequenceGenerator::new()),
            topic_sequence: Arc::new(SequenceGenerator::new()),
            producers: Vec::new(),
            consumers: Vec::new(),
            tasks: Vec::new(),
            log_path: log_path.into(),
        }
    }

    /// Override the default broker credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// The configuration this run was built from
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Queue messages seen by this run's workers so far
    pub fn queue_messages_received(&self) -> u64 {
        self.counters.queue_messages_seen()
    }

    /// Topic messages seen by this run's workers so far
    pub fn topic_messages_received(&self) -> u64 {
        self.counters.topic_messages_seen()
    }

    /// Resolve the configured mode and set the run in motion.
    ///
    /// Send and receive return immediately with workers running in the
    /// background; browse and purge complete inline. Analyse has no workers
    /// and is driven through [`crate::OutputLogAnalyzer`] instead.
    pub async fn start(&mut self) -> Result<StartOutcome> {
        match self.config.mode {
            Mode::Send => self.start_producers().await,
            Mode::Receive => self.start_consumers(),
            Mode::Browse => Ok(StartOutcome::BrowseDepth(self.browse().await?)),
            Mode::Purge => Ok(StartOutcome::Purged(self.purge().await?)),
            Mode::Analyse => Err(WorkloadError::NoWorkersForMode(
                self.config.mode.name().to_string(),
            )),
        }
    }

    async fn start_producers(&mut self) -> Result<StartOutcome> {
        self.counters.reset();
        let payload = match &self.config.payload_file {
            Some(path) => Some(Arc::new(std::fs::read_to_string(path)?)),
            None => None,
        };
        let settings = ProducerSettings {
            message_count: self.config.message_count,
            delay: self.config.delay_between_messages,
            print_every: self.config.print_every,
            print_each: self.config.print_each_message,
            payload,
        };

        let classes = [
            (
                self.config.queue_names.clone(),
                DestinationKind::Queue,
                Arc::clone(&self.queue_sequence),
            ),
            (
                self.config.topic_names.clone(),
                DestinationKind::Topic,
                Arc::clone(&self.topic_sequence),
            ),
        ];
        for (names, kind, sequence) in classes {
            if names.is_empty() {
                continue;
            }
            let allocator = WorkerAllocator::new(&self.config.endpoints, &names, kind);
            for worker in 0..self.config.thread_count {
                let (endpoint, destination) = allocator.assignment(worker);
                let producer = Producer::new(
                    worker,
                    endpoint,
                    destination,
                    settings.clone(),
                    Arc::clone(&sequence),
                    Arc::clone(&self.counters),
                );
                self.producers.push(producer.handle());
                self.tasks.push(tokio::spawn(
                    producer.run(Arc::clone(&self.broker), self.credentials.clone()),
                ));
            }
        }

        info!(
            "started {} producers toward {} message(s) per destination class",
            self.producers.len(),
            self.config.message_count
        );
        Ok(StartOutcome::Workers {
            producers: self.producers.len(),
            consumers: 0,
        })
    }

    fn start_consumers(&mut self) -> Result<StartOutcome> {
        self.counters.reset();
        let log = Arc::new(OutputLog::prepare(
            &self.log_path,
            self.config.print_each_message,
        )?);
        let settings = ConsumerSettings {
            options: self.config.subscribe_options(),
            use_listener: self.config.use_listener,
            delay: self.config.delay_between_messages,
            print_every: self.config.print_every,
            print_each: self.config.print_each_message,
            stop_after: self.config.stop_after,
            ack_after_each: self.config.ack_after_each,
            commit_after_each: self.config.commit_after_each,
            rollback_after_each: self.config.rollback_after_each,
            unsubscribe_after: self.config.unsubscribe_after,
        };

        let classes = [
            (self.config.queue_names.clone(), DestinationKind::Queue),
            (self.config.topic_names.clone(), DestinationKind::Topic),
        ];
        for (names, kind) in classes {
            if names.is_empty() {
                continue;
            }
            let allocator = WorkerAllocator::new(&self.config.endpoints, &names, kind);
            for worker in 0..self.config.thread_count {
                let (endpoint, destination) = allocator.assignment(worker);
                let consumer = Consumer::new(
                    worker,
                    endpoint,
                    destination,
                    settings.clone(),
                    Arc::clone(&self.counters),
                    Some(Arc::clone(&log)),
                );
                self.consumers.push(consumer.handle());
                self.tasks.push(tokio::spawn(
                    consumer.run(Arc::clone(&self.broker), self.credentials.clone()),
                ));
            }
        }

        info!(
            "started {} consumers, logging deliveries to {}",
            self.consumers.len(),
            self.log_path.display()
        );
        Ok(StartOutcome::Workers {
            producers: 0,
            consumers: self.consumers.len(),
        })
    }

    /// Browse the first configured queue on the first endpoint and return its
    /// depth
    pub async fn browse(&self) -> Result<u64> {
        let endpoint = &self.config.endpoints[0];
        let queue = &self.config.queue_names[0];
        let depth = browse_queue(
            &self.broker,
            &self.credentials,
            endpoint,
            queue,
            self.config.print_every,
            self.config.print_each_message,
        )
        .await?;
        info!("queue {} currently holds {} message(s)", queue, depth);
        Ok(depth)
    }

    /// Drain the first configured queue: browse its depth, then run one
    /// bounded consumer for exactly that many messages
    pub async fn purge(&mut self) -> Result<u64> {
        let endpoint = self.config.endpoints[0].clone();
        let queue = self.config.queue_names[0].clone();
        let depth = browse_queue(
            &self.broker,
            &self.credentials,
            &endpoint,
            &queue,
            u64::MAX,
            false,
        )
        .await?;
        if depth == 0 {
            info!("queue {} is already empty", queue);
            return Ok(0);
        }

        self.counters.reset();
        let consumer = Consumer::new(
            0,
            endpoint,
            Destination::queue(&queue),
            ConsumerSettings {
                options: SubscribeOptions::auto(),
                // Pull mode keeps the drain cancellable if the backlog
                // shrinks under us.
                use_listener: false,
                delay: Duration::ZERO,
                print_every: u64::MAX,
                print_each: false,
                stop_after: Some(depth),
                ack_after_each: None,
                commit_after_each: None,
                rollback_after_each: None,
                unsubscribe_after: None,
            },
            Arc::clone(&self.counters),
            None,
        );
        let handle = consumer.handle();
        self.consumers.push(handle.clone());
        let task = tokio::spawn(consumer.run(Arc::clone(&self.broker), self.credentials.clone()));

        let deadline = Instant::now() + PURGE_DRAIN_TIMEOUT;
        while self.counters.queue_messages_seen() < depth && Instant::now() < deadline {
            sleep(POLL_INTERVAL).await;
        }
        handle.stop_listening();
        let _ = tokio::time::timeout(PULL_POLL_INTERVAL + Duration::from_secs(1), task).await;

        let drained = self.counters.queue_messages_seen();
        if drained < depth {
            warn!(
                "purge drained {} of {} messages from {} before timing out",
                drained, depth, queue
            );
        } else {
            info!("purged {} message(s) from {}", drained, queue);
        }
        Ok(drained)
    }

    /// Cooperatively stop every tracked worker of this run.
    ///
    /// Does not join them; each observes the signal at its next loop
    /// boundary, so latency is bounded by one delivery/delay cycle per
    /// worker.
    pub fn shutdown(&self) {
        match self.config.mode {
            Mode::Send => {
                for producer in &self.producers {
                    producer.stop_sending();
                }
            }
            Mode::Receive | Mode::Purge => {
                for consumer in &self.consumers {
                    consumer.stop_listening();
                }
            }
            Mode::Browse | Mode::Analyse => {}
        }
        info!("shutdown signalled to {} worker(s)", self.worker_count());
    }

    /// Number of workers this run tracks
    pub fn worker_count(&self) -> usize {
        self.producers.len() + self.consumers.len()
    }

    /// Poll the shared counters until `predicate` holds or `timeout` passes.
    /// Returns whether the predicate held.
    pub async fn wait_until<F>(&self, predicate: F, timeout: Option<Duration>) -> bool
    where
        F: Fn(&RunCounters) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if predicate(&self.counters) {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until every active destination class has seen the configured
    /// message count, bounded by `timeout`.
    ///
    /// This is the send-side notion of done; receive runs with tighter caps
    /// (`stopAfter`) rely on the timeout instead.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let queue_target = if self.config.queue_names.is_empty() {
            0
        } else {
            self.config.message_count
        };
        let topic_target = if self.config.topic_names.is_empty() {
            0
        } else {
            self.config.message_count
        };
        self.wait_until(
            move |counters| {
                counters.queue_messages_seen() >= queue_target
                    && counters.topic_messages_seen() >= topic_target
            },
            timeout,
        )
        .await
    }

    /// Await every spawned worker task. Call after `shutdown()`; a push-mode
    /// consumer blocked in `receive()` may never finish, so bound this with a
    /// timeout when that can happen.
    pub async fn await_workers(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
