//! Error types for the workload driver

use broker_client::ClientError;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, WorkloadError>;

/// A run-parameter string that failed to parse or validate.
///
/// Raised before any worker starts; the offending token or key is named in
/// the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An endpoint token was not `host:port`
    #[error("malformed endpoint '{0}': expected host:port")]
    MalformedEndpoint(String),

    /// The endpoint list was empty for a mode that talks to a broker
    #[error("no endpoints configured")]
    NoEndpoints,

    /// A destination group had no recognizable `queue:`/`topic:` prefix
    #[error("malformed destination group '{0}': expected queue:names or topic:names")]
    MalformedDestination(String),

    /// Send/receive was asked for with nothing to send to or receive from
    #[error("send/receive need at least one queue or topic destination")]
    NoDestinations,

    /// Browse/purge only operate on queues
    #[error("browse/purge need a queue destination")]
    QueueRequired,

    /// A parameter token carried no `=`
    #[error("malformed parameter '{0}': expected key=value")]
    MalformedParameter(String),

    /// A numeric parameter carried a non-integer value
    #[error("invalid value '{value}' for numeric parameter '{key}'")]
    InvalidNumber {
        /// The recognized key
        key: String,
        /// The value that failed to parse
        value: String,
    },

    /// A parameter value was outside its allowed set
    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidValue {
        /// The recognized key
        key: String,
        /// The rejected value
        value: String,
    },

    /// A durable subscription was requested without naming it
    #[error("durable subscription requires subscriptionID")]
    DurableWithoutSubscriptionId,

    /// The mode string matched no supported mode
    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    /// The analyse sub-operation matched nothing
    #[error("unknown analyse operation '{0}'")]
    UnknownOperation(String),
}

/// Top-level driver error
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Run parameters failed to parse or validate
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The broker client reported a failure
    #[error("broker client error: {0}")]
    Client(#[from] ClientError),

    /// Reading or writing the output log failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line of the output log did not parse as a record
    #[error("malformed log record at line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number in the log file
        line: usize,
        /// Parser diagnostic
        reason: String,
    },

    /// `start()` was asked to run a mode that has no workers
    #[error("mode '{0}' does not start workers")]
    NoWorkersForMode(String),
}
