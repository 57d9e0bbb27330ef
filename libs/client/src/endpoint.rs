//! Broker endpoints and credentials

use crate::ClientError;
use std::fmt;
use std::str::FromStr;

/// A single broker address as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.split_once(':').ok_or_else(|| {
            ClientError::connection_failed(s, "expected host:port")
        })?;
        if host.is_empty() {
            return Err(ClientError::connection_failed(s, "empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ClientError::connection_failed(s, "invalid port"))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Broker login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
}

impl Credentials {
    /// Create credentials from a username/password pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        // Stock broker installs ship with this account; callers override for
        // anything beyond a local test run.
        Self::new("admin", "admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep: Endpoint = "localhost:5672".parse().unwrap();
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 5672);
        assert_eq!(ep.to_string(), "localhost:5672");
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":5672".parse::<Endpoint>().is_err());
        assert!("localhost:notaport".parse::<Endpoint>().is_err());
        assert!("localhost:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn default_credentials() {
        let creds = Credentials::default();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "admin");
    }
}
