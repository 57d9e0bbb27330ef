//! # Messaging Workload Driver
//!
//! Exercises a queue/topic broker and measures what it actually delivers:
//! producers send at controlled rates from concurrent workers, consumers
//! apply configurable acknowledgment/commit/rollback disciplines and log
//! every delivery, the browser inspects queue depth non-destructively, purge
//! drains a backlog, and the analyzer turns the delivery log into duplicate,
//! gap, and ordering verdicts.
//!
//! The driver talks to brokers only through the `broker_client` trait
//! boundary, so the same run logic works against the in-memory loopback
//! broker or a wire-protocol client.

pub mod allocator;
pub mod analysis;
pub mod browser;
pub mod config;
pub mod consumer;
pub mod counters;
pub mod error;
pub mod orchestrator;
pub mod output_log;
pub mod producer;

pub use allocator::WorkerAllocator;
pub use analysis::{AnalysisOp, AnalysisReport, OutputLogAnalyzer};
pub use browser::browse_queue;
pub use config::{Mode, RawWorkload, WorkloadConfig};
pub use consumer::{
    Consumer, ConsumerHandle, ConsumerSettings, ConsumerState, DeliveryActions,
    DeliveryDiscipline,
};
pub use counters::{RunCounters, SequenceGenerator};
pub use error::{ConfigError, Result, WorkloadError};
pub use orchestrator::{StartOutcome, WorkloadOrchestrator};
pub use output_log::{read_records, OutputLog, ReceivedMessageRecord};
pub use producer::{Producer, ProducerHandle, ProducerSettings};
