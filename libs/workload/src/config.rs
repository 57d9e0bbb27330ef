//! # Run Configuration
//!
//! Turns the loosely-structured string grammar arriving at the boundary into
//! a validated, immutable [`WorkloadConfig`]:
//!
//! - endpoint list: comma-separated `host:port` tokens
//! - destination list: `|`-separated groups, each `queue:n1,n2` or `topic:n1,n2`
//! - parameter list: comma-separated `key=value` tokens
//!
//! Unknown parameter keys are ignored so older drivers keep working against
//! newer callers; malformed tokens and non-integer values for numeric keys
//! fail the parse naming the offender. An empty value for a recognized key
//! means "not provided" and the default applies.

use crate::error::ConfigError;
use broker_client::{AckMode, Endpoint, SubscribeOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operating mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Produce messages
    Send,
    /// Consume messages and log each delivery
    Receive,
    /// Count queue contents without consuming
    Browse,
    /// Drain a queue's current backlog
    Purge,
    /// Analyze a previously written output log
    Analyse,
}

impl Mode {
    /// Get human-readable name for log output
    pub fn name(self) -> &'static str {
        match self {
            Mode::Send => "send",
            Mode::Receive => "receive",
            Mode::Browse => "browse",
            Mode::Purge => "purge",
            Mode::Analyse => "analyse",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send" => Ok(Mode::Send),
            "receive" => Ok(Mode::Receive),
            "browse" => Ok(Mode::Browse),
            "purge" => Ok(Mode::Purge),
            "analyse" => Ok(Mode::Analyse),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Raw, string-encoded run parameters as they arrive at the boundary.
///
/// Every field is optional in the sense that the empty string selects the
/// documented default.
#[derive(Debug, Clone, Default)]
pub struct RawWorkload {
    /// One of `send`, `receive`, `browse`, `purge`, `analyse`
    pub mode: String,
    /// Comma-separated `host:port` list
    pub endpoints: String,
    /// `|`-separated `queue:...`/`topic:...` groups
    pub destinations: String,
    /// Per-destination-class total message target
    pub message_count: String,
    /// Number of concurrent workers
    pub thread_count: String,
    /// Progress print cadence
    pub print_every: String,
    /// Whether to log every individual message
    pub print_each: String,
    /// Wall-clock bound on the run, in seconds
    pub run_for_secs: String,
    /// Comma-separated `key=value` parameter list
    pub params: String,
    /// Opaque connection string handed through to the wire client
    pub connection_url: String,
}

/// Typed, validated run parameters. Immutable after parsing.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Operating mode
    pub mode: Mode,
    /// Broker addresses, in caller order
    pub endpoints: Vec<Endpoint>,
    /// Queue names, in caller order (may be empty)
    pub queue_names: Vec<String>,
    /// Topic names, in caller order (may be empty)
    pub topic_names: Vec<String>,
    /// Total messages per destination class, across all workers
    pub message_count: u64,
    /// Concurrent workers per destination class
    pub thread_count: usize,
    /// Log a progress line once per this many messages
    pub print_every: u64,
    /// Log every individual message
    pub print_each_message: bool,
    /// Wall-clock bound on the run; `None` waits indefinitely
    pub run_for: Option<Duration>,
    /// Receive by push notification rather than pull polling
    pub use_listener: bool,
    /// Use a durable topic subscription
    pub durable: bool,
    /// Identifier of the durable subscription
    pub subscription_id: Option<String>,
    /// File whose contents become the message payload
    pub payload_file: Option<PathBuf>,
    /// Opaque connection string for the wire client
    pub connection_url: Option<String>,
    /// Acknowledgment policy
    pub ack_mode: AckMode,
    /// Pause between consecutive sends/deliveries on one worker
    pub delay_between_messages: Duration,
    /// Hard cap on messages a single consumer accepts
    pub stop_after: Option<u64>,
    /// Explicit acknowledge once per this many deliveries
    pub ack_after_each: Option<u64>,
    /// Commit once per this many deliveries
    pub commit_after_each: Option<u64>,
    /// Roll back once per this many deliveries
    pub rollback_after_each: Option<u64>,
    /// Tear down the subscription after this many deliveries
    pub unsubscribe_after: Option<u64>,
}

impl WorkloadConfig {
    /// Parse and validate the raw string grammar.
    ///
    /// Fails fast with a [`ConfigError`] naming the offending token; nothing
    /// is started on failure.
    pub fn parse(raw: &RawWorkload) -> Result<Self, ConfigError> {
        let mode = raw.mode.parse::<Mode>()?;
        let endpoints = parse_endpoints(&raw.endpoints)?;
        let (queue_names, topic_names) = parse_destinations(&raw.destinations)?;
        let params = Params::parse(&raw.params)?;

        let config = Self {
            mode,
            endpoints,
            queue_names,
            topic_names,
            message_count: parse_count(&raw.message_count, "messageCount", 1)?,
            thread_count: parse_count(&raw.thread_count, "threadCount", 1)? as usize,
            print_every: parse_count(&raw.print_every, "printEvery", 1)?,
            print_each_message: parse_bool(&raw.print_each),
            run_for: parse_optional(&raw.run_for_secs, "runFor")?.map(Duration::from_secs),
            use_listener: params.use_listener,
            durable: params.durable,
            subscription_id: params.subscription_id,
            payload_file: params.payload_file,
            connection_url: non_empty(&raw.connection_url),
            ack_mode: params.ack_mode,
            delay_between_messages: Duration::from_millis(params.delay_ms),
            stop_after: params.stop_after,
            ack_after_each: params.ack_after_each,
            commit_after_each: params.commit_after_each,
            rollback_after_each: params.rollback_after_each,
            unsubscribe_after: params.unsubscribe_after,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            Mode::Send | Mode::Receive => {
                if self.endpoints.is_empty() {
                    return Err(ConfigError::NoEndpoints);
                }
                if self.queue_names.is_empty() && self.topic_names.is_empty() {
                    return Err(ConfigError::NoDestinations);
                }
            }
            Mode::Browse | Mode::Purge => {
                if self.endpoints.is_empty() {
                    return Err(ConfigError::NoEndpoints);
                }
                if self.queue_names.is_empty() {
                    return Err(ConfigError::QueueRequired);
                }
            }
            Mode::Analyse => {}
        }
        if self.durable
            && self
                .subscription_id
                .as_deref()
                .map(str::is_empty)
                .unwrap_or(true)
        {
            return Err(ConfigError::DurableWithoutSubscriptionId);
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "threadCount".to_string(),
                value: "0".to_string(),
            });
        }
        if self.print_every == 0 {
            return Err(ConfigError::InvalidValue {
                key: "printEvery".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Whether receive sessions run transacted
    pub fn transacted(&self) -> bool {
        self.commit_after_each.is_some() || self.rollback_after_each.is_some()
    }

    /// Subscription options derived from this configuration
    pub fn subscribe_options(&self) -> SubscribeOptions {
        let mut options = SubscribeOptions::auto()
            .with_ack_mode(self.ack_mode)
            .with_transacted(self.transacted());
        if self.durable {
            if let Some(id) = &self.subscription_id {
                options = options.durable(id.clone());
            }
        }
        options
    }
}

/// Recognized `key=value` parameters with their defaults applied
#[derive(Debug)]
struct Params {
    use_listener: bool,
    durable: bool,
    subscription_id: Option<String>,
    payload_file: Option<PathBuf>,
    ack_mode: AckMode,
    delay_ms: u64,
    stop_after: Option<u64>,
    ack_after_each: Option<u64>,
    commit_after_each: Option<u64>,
    rollback_after_each: Option<u64>,
    unsubscribe_after: Option<u64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            use_listener: true,
            durable: false,
            subscription_id: None,
            payload_file: None,
            ack_mode: AckMode::Auto,
            delay_ms: 0,
            stop_after: None,
            ack_after_each: None,
            commit_after_each: None,
            rollback_after_each: None,
            unsubscribe_after: None,
        }
    }
}

impl Params {
    fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut params = Self::default();
        for token in input.split(',') {
            if token.is_empty() {
                continue;
            }
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedParameter(token.to_string()))?;
            if value.is_empty() {
                // Recognized-but-empty keeps the default.
                continue;
            }
            match key {
                "listener" => params.use_listener = parse_bool(value),
                "durable" => params.durable = parse_bool(value),
                "subscriptionID" => params.subscription_id = Some(value.to_string()),
                "file" => params.payload_file = Some(PathBuf::from(value)),
                "ackMode" => params.ack_mode = parse_ack_mode(value)?,
                "delayBetweenMsg" => params.delay_ms = parse_number(value, key)?,
                "stopAfter" => params.stop_after = Some(parse_number(value, key)?),
                "ackAfterEach" => params.ack_after_each = Some(parse_number(value, key)?),
                "commitAfterEach" => params.commit_after_each = Some(parse_number(value, key)?),
                "rollbackAfterEach" => params.rollback_after_each = Some(parse_number(value, key)?),
                "unsubscribeAfter" => params.unsubscribe_after = Some(parse_number(value, key)?),
                // Unknown keys are ignored on purpose.
                _ => {}
            }
        }
        Ok(params)
    }
}

fn parse_endpoints(input: &str) -> Result<Vec<Endpoint>, ConfigError> {
    let mut endpoints = Vec::new();
    for token in input.split(',') {
        if token.is_empty() {
            continue;
        }
        let endpoint = token
            .parse::<Endpoint>()
            .map_err(|_| ConfigError::MalformedEndpoint(token.to_string()))?;
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

fn parse_destinations(input: &str) -> Result<(Vec<String>, Vec<String>), ConfigError> {
    let mut queues = Vec::new();
    let mut topics = Vec::new();
    for group in input.split('|') {
        if group.is_empty() {
            continue;
        }
        let (kind, names) = group
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedDestination(group.to_string()))?;
        let names = names
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        match kind {
            "queue" => queues.extend(names),
            "topic" => topics.extend(names),
            _ => return Err(ConfigError::MalformedDestination(group.to_string())),
        }
    }
    Ok((queues, topics))
}

fn parse_number(value: &str, key: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Count field with a default for the empty string
fn parse_count(value: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
    if value.is_empty() {
        return Ok(default);
    }
    parse_number(value, key)
}

/// Count field where the empty string means unbounded
fn parse_optional(value: &str, key: &str) -> Result<Option<u64>, ConfigError> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_number(value, key).map(Some)
}

/// Anything but (case-insensitive) `true` is false, matching the lenient
/// boolean handling the grammar has always had.
fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn parse_ack_mode(value: &str) -> Result<AckMode, ConfigError> {
    match value {
        // Named values plus the legacy numeric session modes.
        "auto" | "1" => Ok(AckMode::Auto),
        "client" | "2" => Ok(AckMode::Client),
        other => Err(ConfigError::InvalidValue {
            key: "ackMode".to_string(),
            value: other.to_string(),
        }),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(mode: &str) -> RawWorkload {
        RawWorkload {
            mode: mode.to_string(),
            endpoints: "localhost:5672".to_string(),
            destinations: "queue:q1".to_string(),
            ..RawWorkload::default()
        }
    }

    #[test]
    fn defaults_apply_for_empty_fields() {
        let config = WorkloadConfig::parse(&raw("send")).unwrap();
        assert_eq!(config.message_count, 1);
        assert_eq!(config.thread_count, 1);
        assert_eq!(config.print_every, 1);
        assert!(!config.print_each_message);
        assert_eq!(config.run_for, None);
        assert!(config.use_listener);
        assert!(!config.durable);
        assert_eq!(config.ack_mode, AckMode::Auto);
        assert_eq!(config.delay_between_messages, Duration::ZERO);
        assert_eq!(config.stop_after, None);
        assert_eq!(config.ack_after_each, None);
        assert_eq!(config.commit_after_each, None);
        assert_eq!(config.rollback_after_each, None);
        assert_eq!(config.unsubscribe_after, None);
    }

    #[test]
    fn parses_endpoint_and_destination_lists() {
        let mut input = raw("receive");
        input.endpoints = "broker-a:5672,broker-b:5673".to_string();
        input.destinations = "queue:q1,q2|topic:t1".to_string();
        let config = WorkloadConfig::parse(&input).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1], Endpoint::new("broker-b", 5673));
        assert_eq!(config.queue_names, vec!["q1", "q2"]);
        assert_eq!(config.topic_names, vec!["t1"]);
    }

    #[test]
    fn malformed_endpoint_names_the_token() {
        let mut input = raw("send");
        input.endpoints = "localhost:5672,nonsense".to_string();
        let err = WorkloadConfig::parse(&input).unwrap_err();
        assert_eq!(err, ConfigError::MalformedEndpoint("nonsense".to_string()));
    }

    #[test]
    fn malformed_destination_group_fails() {
        let mut input = raw("send");
        input.destinations = "queue:q1|exchange:x1".to_string();
        let err = WorkloadConfig::parse(&input).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MalformedDestination("exchange:x1".to_string())
        );
    }

    #[test]
    fn parses_recognized_parameters() {
        let mut input = raw("receive");
        input.params = "listener=false,ackMode=client,delayBetweenMsg=200,stopAfter=12,\
                        ackAfterEach=300,commitAfterEach=300,rollbackAfterEach=400,\
                        unsubscribeAfter=500"
            .to_string();
        let config = WorkloadConfig::parse(&input).unwrap();
        assert!(!config.use_listener);
        assert_eq!(config.ack_mode, AckMode::Client);
        assert_eq!(config.delay_between_messages, Duration::from_millis(200));
        assert_eq!(config.stop_after, Some(12));
        assert_eq!(config.ack_after_each, Some(300));
        assert_eq!(config.commit_after_each, Some(300));
        assert_eq!(config.rollback_after_each, Some(400));
        assert_eq!(config.unsubscribe_after, Some(500));
        assert!(config.transacted());
    }

    #[test]
    fn legacy_numeric_ack_modes_still_parse() {
        let mut input = raw("receive");
        input.params = "ackMode=1".to_string();
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap().ack_mode,
            AckMode::Auto
        );
        input.params = "ackMode=2".to_string();
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap().ack_mode,
            AckMode::Client
        );
        input.params = "ackMode=3".to_string();
        assert!(WorkloadConfig::parse(&input).is_err());
    }

    #[test]
    fn unknown_parameter_keys_are_ignored() {
        let mut input = raw("send");
        input.params = "futureKnob=42,delayBetweenMsg=5".to_string();
        let config = WorkloadConfig::parse(&input).unwrap();
        assert_eq!(config.delay_between_messages, Duration::from_millis(5));
    }

    #[test]
    fn parameter_without_equals_fails() {
        let mut input = raw("send");
        input.params = "delayBetweenMsg".to_string();
        let err = WorkloadConfig::parse(&input).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MalformedParameter("delayBetweenMsg".to_string())
        );
    }

    #[test]
    fn non_integer_numeric_value_names_key_and_value() {
        let mut input = raw("send");
        input.params = "stopAfter=soon".to_string();
        let err = WorkloadConfig::parse(&input).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                key: "stopAfter".to_string(),
                value: "soon".to_string(),
            }
        );
    }

    #[test]
    fn empty_value_for_recognized_key_keeps_default() {
        let mut input = raw("receive");
        input.params = "stopAfter=,listener=".to_string();
        let config = WorkloadConfig::parse(&input).unwrap();
        assert_eq!(config.stop_after, None);
        assert!(config.use_listener);
    }

    #[test]
    fn send_without_destinations_fails() {
        let mut input = raw("send");
        input.destinations = String::new();
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap_err(),
            ConfigError::NoDestinations
        );
    }

    #[test]
    fn durable_requires_subscription_id() {
        let mut input = raw("receive");
        input.destinations = "topic:t1".to_string();
        input.params = "durable=true".to_string();
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap_err(),
            ConfigError::DurableWithoutSubscriptionId
        );

        input.params = "durable=true,subscriptionID=sub1".to_string();
        let config = WorkloadConfig::parse(&input).unwrap();
        assert!(config.durable);
        assert_eq!(config.subscription_id.as_deref(), Some("sub1"));
        let options = config.subscribe_options();
        assert!(options.durable);
        assert_eq!(options.subscription_id.as_deref(), Some("sub1"));
    }

    #[test]
    fn unknown_mode_is_an_error() {
        let input = raw("replay");
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap_err(),
            ConfigError::UnknownMode("replay".to_string())
        );
    }

    #[test]
    fn browse_requires_a_queue() {
        let mut input = raw("browse");
        input.destinations = "topic:t1".to_string();
        assert_eq!(
            WorkloadConfig::parse(&input).unwrap_err(),
            ConfigError::QueueRequired
        );
    }
}
