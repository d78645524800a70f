//! WebSocket connection state, reconnect policy and client configuration.
//!
//! The driver loop itself lives in `connection_native`.

use std::collections::BTreeSet;
use std::time::Duration;

use livehub_shared::{ClientError, StreamId};
use rand::Rng;
use url::Url;

mod connection_native;
pub(crate) use connection_native::run_connection_loop;

/// Connection state for the hub socket.
///
/// `Disconnected → Connecting → Connected → Joined(rooms) → Disconnected`,
/// looping until the client is closed (`Closed`) or gives up (`Failed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// `attempt` counts consecutive failures; 0 is the first try.
    Connecting { attempt: u32 },
    Connected,
    Joined { rooms: BTreeSet<StreamId> },
    Failed { reason: String },
    Closed,
}

impl ConnectionState {
    /// Live socket, whether or not any room is joined.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Joined { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed { .. })
    }

    /// The live state for a given set of joined rooms.
    pub(crate) fn live(rooms: BTreeSet<StreamId>) -> Self {
        if rooms.is_empty() {
            ConnectionState::Connected
        } else {
            ConnectionState::Joined { rooms }
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.2 = ±20%).
    pub jitter: f64,
    /// Consecutive failures before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Backoff for the given (1-based) retry, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::from_secs_f64(base * factor)
    }

    pub(crate) fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint, e.g. `ws://localhost:8080/api/ws`.
    pub url: String,
    /// Bearer token; `None` connects as an anonymous viewer.
    pub token: Option<String>,
    pub reconnect: ReconnectConfig,
    /// How often `ping` is sent while connected.
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// The URL actually dialed: `url` with the token as a query parameter.
    pub fn endpoint(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| ClientError::Transport(format!("invalid url {}: {}", self.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::Transport(format!(
                    "unsupported scheme {} in {}",
                    other, self.url
                )))
            }
        }
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(500), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig::default();
        for _ in 0..100 {
            let delay = config.jittered_delay(3).as_secs_f64();
            assert!((3.2..=4.8).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn attempts_are_unlimited_by_default() {
        let config = ReconnectConfig::default();
        assert!(!config.exhausted(10_000));
        let bounded = ReconnectConfig {
            max_attempts: Some(3),
            ..ReconnectConfig::default()
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }

    #[test]
    fn endpoint_carries_the_token() {
        let url = ClientConfig::new("ws://localhost:8080/api/ws")
            .with_token("a b&c")
            .endpoint()
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/api/ws?token=a+b%26c");

        let anonymous = ClientConfig::new("ws://localhost:8080/api/ws").endpoint().unwrap();
        assert_eq!(anonymous.query(), None);

        assert!(ClientConfig::new("http://localhost/api/ws").endpoint().is_err());
    }

    #[test]
    fn joined_and_connected_both_count_as_connected() {
        assert_eq!(ConnectionState::live(BTreeSet::new()), ConnectionState::Connected);
        let joined = ConnectionState::live(BTreeSet::from(["s1".to_string()]));
        assert!(joined.is_connected());
        assert!(!ConnectionState::Connecting { attempt: 2 }.is_connected());
        assert!(ConnectionState::Closed.is_terminal());
    }
}
