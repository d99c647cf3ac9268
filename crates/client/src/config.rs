//! Client configuration

use kite_protocol::Value;
use std::time::Duration;
use url::Url;

/// Backoff between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub initial_backoff: Duration,
    /// Upper bound for any delay
    pub max_backoff: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Attempts before giving up, `None` for unlimited
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        if !factor.is_finite() || factor < 0.0 {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }
}

/// Configuration for a [`Kite`](crate::Kite) client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address; the scheme picks the transport
    pub url: Url,
    /// Connect as soon as the client is built
    pub auto_connect: bool,
    /// Reconnect after a close that was not requested with `disconnect`
    pub auto_reconnect: bool,
    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,
    /// Timeout applied by `tell`, `None` to wait forever
    pub default_timeout: Option<Duration>,
    /// Credentials presented after every open
    pub credentials: Option<Value>,
    /// Transport configuration
    pub transport: kite_transport::Config,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Defaults for `url`
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auto_connect: true,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            default_timeout: None,
            credentials: None,
            transport: kite_transport::Config::default(),
            event_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_for_attempt(20), Duration::from_secs(5));
        assert_eq!(policy.backoff_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_attempt_zero_uses_initial_backoff() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(10),
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(10));
    }
}
