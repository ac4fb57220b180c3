//! Timing and connection settings for the RCON client.

use std::net::SocketAddr;
use std::time::Duration;

/// Everything the driver needs to run one RCON connection.
///
/// Defaults mirror the protocol's reference policy: a keep-alive well under the
/// server's 45 second silence ceiling, a 60 second watchdog, a 5 second
/// response window for `players` and a 120 second roster expiry.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub password: String,
    pub keepalive_interval: Duration,
    pub watchdog_timeout: Duration,
    /// How long a login may go unanswered before the attempt counts as failed.
    pub login_timeout: Duration,
    pub response_timeout: Duration,
    pub gather_debounce: Duration,
    /// Consecutive `players` timeouts before a forced reconnect.
    pub timeout_threshold: u32,
    pub player_expiry: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Polling starts automatically at this interval once logged in.
    pub poll_interval: Option<Duration>,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr, password: &str) -> Self {
        Self {
            server_addr,
            password: password.to_string(),
            keepalive_interval: Duration::from_secs(30),
            watchdog_timeout: Duration::from_secs(60),
            login_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
            gather_debounce: Duration::from_secs(1),
            timeout_threshold: 3,
            player_expiry: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            poll_interval: Some(Duration::from_secs(30)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_defaults() {
        let config = ClientConfig::new("127.0.0.1:2306".parse().unwrap(), "pw");

        assert_eq!(config.password, "pw");
        assert!(config.keepalive_interval < Duration::from_secs(45));
        assert!(config.keepalive_interval < config.watchdog_timeout);
        assert!(config.login_timeout <= config.watchdog_timeout);
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.gather_debounce, Duration::from_secs(1));
        assert_eq!(config.timeout_threshold, 3);
        assert_eq!(config.player_expiry, Duration::from_secs(120));
        assert_eq!(config.initial_backoff, Duration::from_secs(5));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
    }
}
