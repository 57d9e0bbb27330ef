//! Shared run state: per-class delivery counters and the sequence source
//!
//! Both are plain atomics so concurrent workers never lose an update and the
//! orchestrator can read progress without coordination.

use broker_client::DestinationKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Messages seen so far in the current run, split by destination class.
///
/// Reset to zero at run start, monotonically non-decreasing through the run,
/// read-only after shutdown.
#[derive(Debug, Default)]
pub struct RunCounters {
    queue_messages: AtomicU64,
    topic_messages: AtomicU64,
}

impl RunCounters {
    /// Fresh counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero both counters for a new run
    pub fn reset(&self) {
        self.queue_messages.store(0, Ordering::Relaxed);
        self.topic_messages.store(0, Ordering::Relaxed);
    }

    /// Record one message for the given class
    pub fn record(&self, kind: DestinationKind) {
        match kind {
            DestinationKind::Queue => self.queue_messages.fetch_add(1, Ordering::Relaxed),
            DestinationKind::Topic => self.topic_messages.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Messages seen for the given class
    pub fn seen(&self, kind: DestinationKind) -> u64 {
        match kind {
            DestinationKind::Queue => self.queue_messages.load(Ordering::Relaxed),
            DestinationKind::Topic => self.topic_messages.load(Ordering::Relaxed),
        }
    }

    /// Queue messages seen so far
    pub fn queue_messages_seen(&self) -> u64 {
        self.seen(DestinationKind::Queue)
    }

    /// Topic messages seen so far
    pub fn topic_messages_seen(&self) -> u64 {
        self.seen(DestinationKind::Topic)
    }
}

/// Hands out 1-based sequence numbers to concurrent producers.
///
/// `claim` is an atomic increment-and-read: no two callers ever observe the
/// same value, so the union of numbers emitted by N producers is exactly the
/// set of claimed values with no repeats.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    /// A generator whose first claim returns 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next sequence number
    pub fn claim(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Highest number claimed so far (0 before the first claim)
    pub fn claimed(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn counters_track_classes_independently() {
        let counters = RunCounters::new();
        counters.record(DestinationKind::Queue);
        counters.record(DestinationKind::Queue);
        counters.record(DestinationKind::Topic);
        assert_eq!(counters.queue_messages_seen(), 2);
        assert_eq!(counters.topic_messages_seen(), 1);

        counters.reset();
        assert_eq!(counters.queue_messages_seen(), 0);
        assert_eq!(counters.topic_messages_seen(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_repeat() {
        const WORKERS: usize = 8;
        const CLAIMS: usize = 500;

        let generator = Arc::new(SequenceGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let generator = Arc::clone(&generator);
            handles.push(tokio::spawn(async move {
                (0..CLAIMS).map(|_| generator.claim()).collect::<Vec<_>>()
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for seq in handle.await.unwrap() {
                assert!(all.insert(seq), "sequence {seq} claimed twice");
            }
        }
        assert_eq!(all.len(), WORKERS * CLAIMS);
        assert_eq!(all.iter().max(), Some(&((WORKERS * CLAIMS) as u64)));
        assert_eq!(all.iter().min(), Some(&1));
    }
}
