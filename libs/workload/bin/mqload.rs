//! Workload driver binary - one executable covering every mode
//!
//! Usage:
//!   mqload send --endpoints localhost:5672 --destinations "queue:orders" --count 1000 --threads 4
//!   mqload receive --endpoints localhost:5672 --destinations "queue:orders" --params "ackMode=client,ackAfterEach=100"
//!   mqload browse --endpoints localhost:5672 --destinations "queue:orders"
//!   mqload purge --endpoints localhost:5672 --destinations "queue:orders"
//!   mqload analyse --operation printMissing --expected 1000

use anyhow::{Context, Result};
use broker_client::{Broker, MemoryBroker};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use workload::{
    AnalysisOp, Mode, OutputLogAnalyzer, RawWorkload, StartOutcome, WorkloadConfig,
    WorkloadOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "mqload")]
#[command(about = "Messaging workload driver and delivery-correctness analyzer")]
#[command(version)]
struct Args {
    /// Operating mode: send, receive, browse, purge, analyse
    mode: String,

    /// Comma-separated host:port broker endpoints
    #[arg(long, default_value = "")]
    endpoints: String,

    /// `|`-separated destination groups, each queue:names or topic:names
    #[arg(long, default_value = "")]
    destinations: String,

    /// Messages per destination class, across all workers
    #[arg(long, default_value = "")]
    count: String,

    /// Concurrent workers per destination class
    #[arg(long, default_value = "")]
    threads: String,

    /// Progress line cadence
    #[arg(long, default_value = "")]
    print_every: String,

    /// Log every individual message
    #[arg(long)]
    print_each: bool,

    /// Wall-clock bound on the run, in seconds
    #[arg(long, default_value = "")]
    run_for: String,

    /// Comma-separated key=value parameter list (listener, durable,
    /// subscriptionID, file, ackMode, delayBetweenMsg, stopAfter,
    /// ackAfterEach, commitAfterEach, rollbackAfterEach, unsubscribeAfter)
    #[arg(long, default_value = "")]
    params: String,

    /// Opaque connection string handed through to the wire client
    #[arg(long, default_value = "")]
    connection_url: String,

    /// Received-message log path
    #[arg(long, default_value = "received-messages.log")]
    log: String,

    /// Analyse operation: printMessages, printDuplicates, printMissing,
    /// printSorted, checkOrder, clearFile
    #[arg(long)]
    operation: Option<String>,

    /// Expected total number of messages, for printMissing
    #[arg(long)]
    expected: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let raw = RawWorkload {
        mode: args.mode.clone(),
        endpoints: args.endpoints.clone(),
        destinations: args.destinations.clone(),
        message_count: args.count.clone(),
        thread_count: args.threads.clone(),
        print_every: args.print_every.clone(),
        print_each: args.print_each.to_string(),
        run_for_secs: args.run_for.clone(),
        params: args.params.clone(),
        connection_url: args.connection_url.clone(),
    };
    let config = WorkloadConfig::parse(&raw).context("invalid run parameters")?;
    info!("mode: {}", config.mode.name());

    if config.mode == Mode::Analyse {
        return run_analysis(&args);
    }

    // Loopback broker; a wire-protocol client plugs in at the Broker trait.
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());

    let run_for = config.run_for;
    let mut orchestrator = WorkloadOrchestrator::new(config, broker, &args.log);
    match orchestrator.start().await? {
        StartOutcome::BrowseDepth(depth) => {
            println!("browsed message count: {depth}");
        }
        StartOutcome::Purged(count) => {
            println!("purged message count: {count}");
        }
        StartOutcome::Workers {
            producers,
            consumers,
        } => {
            info!("{} producer(s) and {} consumer(s) running", producers, consumers);
            tokio::select! {
                done = orchestrator.wait_for_completion(run_for) => {
                    if done {
                        info!("run target reached");
                    } else {
                        warn!("run timed out before reaching its target");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting workers down");
                }
            }
            orchestrator.shutdown();
            if tokio::time::timeout(Duration::from_secs(5), orchestrator.await_workers())
                .await
                .is_err()
            {
                warn!("some workers were still blocked in receive at exit");
            }
            println!(
                "queue messages seen: {}",
                orchestrator.queue_messages_received()
            );
            println!(
                "topic messages seen: {}",
                orchestrator.topic_messages_received()
            );
        }
    }

    Ok(())
}

fn run_analysis(args: &Args) -> Result<()> {
    let operation = args
        .operation
        .as_deref()
        .context("analyse mode requires --operation")?;
    let op = AnalysisOp::parse(operation, args.expected)?;
    let analyzer = OutputLogAnalyzer::new(&args.log);

    match op {
        AnalysisOp::PrintMessages => {
            for record in analyzer.records()? {
                println!("{} : {}", record.sequence, record.body);
            }
        }
        AnalysisOp::PrintDuplicates => {
            let duplicates = analyzer.duplicates()?;
            if duplicates.is_empty() {
                println!("no duplicate messages");
            }
            for (sequence, count) in duplicates {
                println!("message {sequence} delivered {count} times");
            }
        }
        AnalysisOp::PrintMissing { expected } => {
            let missing = analyzer.missing(expected)?;
            println!("{} missing message(s) out of {}", missing.len(), expected);
            for sequence in missing {
                println!("missing: {sequence}");
            }
        }
        AnalysisOp::PrintSorted => {
            for sequence in analyzer.sorted_view()? {
                println!("{sequence}");
            }
        }
        AnalysisOp::CheckOrder => {
            println!("message order preserved: {}", analyzer.order_preserved()?);
        }
        AnalysisOp::ClearFile => {
            analyzer.clear_file()?;
            info!("cleared {}", args.log);
        }
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();
}
