//! # Consumer Workers
//!
//! A consumer subscribes, then loops over deliveries applying the configured
//! discipline: explicit acknowledges every `ackAfterEach` messages under
//! client-ack, commits every `commitAfterEach`, rollbacks every
//! `rollbackAfterEach` (commit wins when both land on the same delivery),
//! subscription teardown after `unsubscribeAfter`, and a hard stop at
//! `stopAfter`. Every delivery is appended to the run's output log and
//! counted toward the shared per-class counter.
//!
//! Cancellation is cooperative: the stop flag is checked between deliveries.
//! In pull mode the wait is bounded by the poll interval; in push mode a
//! `receive()` that never returns cannot be preempted — that latency is
//! unbounded if the broker goes silent.

use crate::counters::RunCounters;
use crate::output_log::{OutputLog, ReceivedMessageRecord};
use broker_client::{AckMode, Broker, Credentials, Destination, Endpoint, Session};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// How long a pull-mode consumer waits per poll before re-checking its stop
/// flag
pub const PULL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of one consumer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Establishing the session and subscription
    Subscribing,
    /// Waiting for or handling deliveries
    Listening,
    /// Issuing an explicit acknowledge
    Acknowledging,
    /// Committing transacted work
    Committing,
    /// Rolling transacted work back
    RollingBack,
    /// Subscription torn down; no further receives
    Unsubscribed,
    /// Worker finished
    Stopped,
}

/// Which discipline calls a delivery triggered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryActions {
    /// Issue an explicit acknowledge
    pub acknowledge: bool,
    /// Commit the session
    pub commit: bool,
    /// Roll the session back
    pub rollback: bool,
}

/// Counting logic behind the acknowledge/commit/rollback cadences.
///
/// Cadences are independent of each other; when a commit and a rollback are
/// due on the same delivery the commit wins, since rolling back would discard
/// the work just counted. There is no terminal flush: a remainder below the
/// acknowledge threshold at teardown stays unacknowledged.
#[derive(Debug, Clone)]
pub struct DeliveryDiscipline {
    ack_mode: AckMode,
    ack_after_each: Option<u64>,
    commit_after_each: Option<u64>,
    rollback_after_each: Option<u64>,
    tally: u64,
}

impl DeliveryDiscipline {
    /// Discipline with the given cadences; `None` disables a cadence
    pub fn new(
        ack_mode: AckMode,
        ack_after_each: Option<u64>,
        commit_after_each: Option<u64>,
        rollback_after_each: Option<u64>,
    ) -> Self {
        Self {
            ack_mode,
            ack_after_each,
            commit_after_each,
            rollback_after_each,
            tally: 0,
        }
    }

    /// Deliveries counted so far
    pub fn tally(&self) -> u64 {
        self.tally
    }

    /// Count one delivery and report which calls are now due
    pub fn on_delivered(&mut self) -> DeliveryActions {
        self.tally += 1;
        let due = |cadence: Option<u64>| match cadence {
            Some(n) if n > 0 => self.tally % n == 0,
            _ => false,
        };

        let acknowledge = self.ack_mode == AckMode::Client && due(self.ack_after_each);
        let commit = due(self.commit_after_each);
        let rollback = !commit && due(self.rollback_after_each);
        DeliveryActions {
            acknowledge,
            commit,
            rollback,
        }
    }
}

/// Tunables shared by every consumer of a run
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Subscription options (ack mode, transacted, durable id)
    pub options: broker_client::SubscribeOptions,
    /// Await push deliveries instead of pull polling
    pub use_listener: bool,
    /// Pause between consecutive deliveries on one worker
    pub delay: Duration,
    /// Progress line cadence
    pub print_every: u64,
    /// Log every delivery individually
    pub print_each: bool,
    /// Hard cap on deliveries this worker accepts
    pub stop_after: Option<u64>,
    /// Explicit acknowledge cadence (client-ack only)
    pub ack_after_each: Option<u64>,
    /// Commit cadence
    pub commit_after_each: Option<u64>,
    /// Rollback cadence
    pub rollback_after_each: Option<u64>,
    /// Tear the subscription down after this many deliveries
    pub unsubscribe_after: Option<u64>,
}

/// Cooperative stop control and state window for one consumer
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<ConsumerState>>,
}

impl ConsumerHandle {
    /// Ask the consumer to stop between deliveries
    pub fn stop_listening(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }
}

/// One receiving worker
pub struct Consumer {
    worker: usize,
    endpoint: Endpoint,
    destination: Destination,
    settings: ConsumerSettings,
    counters: Arc<RunCounters>,
    log: Option<Arc<OutputLog>>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<ConsumerState>>,
}

impl Consumer {
    /// Build a consumer for worker `worker` against its allocated
    /// endpoint/destination pair. `log` is absent for drain-only runs.
    pub fn new(
        worker: usize,
        endpoint: Endpoint,
        destination: Destination,
        settings: ConsumerSettings,
        counters: Arc<RunCounters>,
        log: Option<Arc<OutputLog>>,
    ) -> Self {
        Self {
            worker,
            endpoint,
            destination,
            settings,
            counters,
            log,
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ConsumerState::Subscribing)),
        }
    }

    /// Stop control and state window for this consumer
    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            stop: Arc::clone(&self.stop),
            state: Arc::clone(&self.state),
        }
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.lock() = state;
    }

    /// Drive the receive loop to completion.
    ///
    /// Failures are contained here: connect, subscribe, and receive errors
    /// end this worker only; log-append errors merely degrade persistence.
    pub async fn run(self, broker: Arc<dyn Broker>, credentials: Credentials) {
        self.set_state(ConsumerState::Subscribing);
        let mut session = match broker.connect(&self.endpoint, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "consumer {} could not connect to {}: {}",
                    self.worker, self.endpoint, e
                );
                self.set_state(ConsumerState::Stopped);
                return;
            }
        };
        if let Err(e) = session
            .subscribe(&self.destination, self.settings.options.clone())
            .await
        {
            error!(
                "consumer {} could not subscribe to {}: {}",
                self.worker, self.destination, e
            );
            self.set_state(ConsumerState::Stopped);
            return;
        }
        self.set_state(ConsumerState::Listening);

        let mut discipline = DeliveryDiscipline::new(
            self.settings.options.ack_mode,
            self.settings.ack_after_each,
            self.settings.commit_after_each,
            self.settings.rollback_after_each,
        );

        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("consumer {} observed stop signal", self.worker);
                break;
            }
            if let Some(cap) = self.settings.stop_after {
                if discipline.tally() >= cap {
                    info!(
                        "consumer {} reached its stopAfter cap of {}",
                        self.worker, cap
                    );
                    break;
                }
            }

            let message = if self.settings.use_listener {
                match session.receive().await {
                    Ok(message) => message,
                    Err(e) => {
                        error!("consumer {} receive failed: {}", self.worker, e);
                        break;
                    }
                }
            } else {
                match session.receive_timeout(PULL_POLL_INTERVAL).await {
                    Ok(Some(message)) => message,
                    // Poll expired; loop to re-check the stop flag.
                    Ok(None) => continue,
                    Err(e) => {
                        error!("consumer {} receive failed: {}", self.worker, e);
                        break;
                    }
                }
            };

            if let Some(log) = &self.log {
                if let Err(e) = log.append(&ReceivedMessageRecord::new(&message)) {
                    warn!(
                        "consumer {} could not persist delivery {}: {}",
                        self.worker, message.sequence, e
                    );
                }
            }
            self.counters.record(self.destination.kind);

            if self.settings.print_each {
                info!(
                    "consumer {} received message {} from {}",
                    self.worker, message.sequence, self.destination
                );
            }

            let actions = discipline.on_delivered();
            if discipline.tally() % self.settings.print_every == 0 {
                info!(
                    "consumer {} has received {} messages from {}",
                    self.worker,
                    discipline.tally(),
                    self.destination
                );
            }

            if actions.acknowledge {
                self.set_state(ConsumerState::Acknowledging);
                if let Err(e) = session.acknowledge().await {
                    error!("consumer {} acknowledge failed: {}", self.worker, e);
                }
                self.set_state(ConsumerState::Listening);
            }
            if actions.commit {
                self.set_state(ConsumerState::Committing);
                if let Err(e) = session.commit().await {
                    error!("consumer {} commit failed: {}", self.worker, e);
                }
                self.set_state(ConsumerState::Listening);
            } else if actions.rollback {
                self.set_state(ConsumerState::RollingBack);
                if let Err(e) = session.rollback().await {
                    error!("consumer {} rollback failed: {}", self.worker, e);
                }
                self.set_state(ConsumerState::Listening);
            }

            if let Some(limit) = self.settings.unsubscribe_after {
                if discipline.tally() >= limit {
                    self.set_state(ConsumerState::Unsubscribed);
                    info!(
                        "consumer {} tearing down its subscription after {} deliveries",
                        self.worker,
                        discipline.tally()
                    );
                    if let Err(e) = session.unsubscribe().await {
                        error!("consumer {} unsubscribe failed: {}", self.worker, e);
                    }
                    break;
                }
            }

            if !self.settings.delay.is_zero() {
                sleep(self.settings.delay).await;
            }
        }

        if let Err(e) = session.close().await {
            debug!("consumer {} close failed: {}", self.worker, e);
        }
        info!(
            "consumer {} stopped after {} deliveries from {}",
            self.worker,
            discipline.tally(),
            self.destination
        );
        self.set_state(ConsumerState::Stopped);
    }
}
