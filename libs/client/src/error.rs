//! Error types for broker client operations

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for broker client operations
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection to the broker endpoint could not be established
    #[error("Connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        /// The endpoint that refused the connection
        endpoint: String,
        /// Reason for the failure
        reason: String,
    },

    /// The session was closed and can no longer be used
    #[error("Session closed")]
    SessionClosed,

    /// A receive/ack/commit was issued without an active subscription
    #[error("No active subscription")]
    NotSubscribed,

    /// The subscription was torn down; no further receives are possible
    #[error("Subscription '{0}' has been removed")]
    Unsubscribed(String),

    /// The named destination does not exist on the broker
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// The operation is not valid for the subscribed destination kind
    #[error("Operation not supported for this destination: {0}")]
    Unsupported(String),

    /// Authentication was rejected by the broker
    #[error("Authentication failed for user '{username}'")]
    AuthenticationFailed {
        /// The user the broker rejected
        username: String,
    },
}

impl ClientError {
    /// Create a connection failed error
    pub fn connection_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        ClientError::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates the session is unusable
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientError::SessionClosed | ClientError::Unsubscribed(_)
        )
    }
}
