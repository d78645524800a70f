//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Hub configuration.
///
/// Environment variables:
/// - `LIVEHUB_BIND_ADDR`: listen address (default: "0.0.0.0:8080")
/// - `LIVEHUB_HEARTBEAT_TIMEOUT_SECS`: idle window before a connection is dropped (default: 30)
/// - `LIVEHUB_HEARTBEAT_SWEEP_SECS`: how often idle connections are swept (default: 5)
/// - `LIVEHUB_PRESENCE_DEBOUNCE_MS`: viewer count settling window (default: 500)
/// - `LIVEHUB_MAX_MESSAGE_CHARS`: chat message limit in characters (default: 200)
/// - `LIVEHUB_OUTBOUND_CAPACITY`: per-connection outbound queue bound (default: 256)
/// - `LIVEHUB_ALLOW_ANONYMOUS_CHAT`: "true" lets viewers without an account chat (default: false)
/// - `LIVEHUB_MAX_FRAME_VIOLATIONS`: malformed frames tolerated before disconnect (default: 5)
/// - `LIVEHUB_FRAME_VIOLATION_WINDOW_SECS`: window those frames are counted over (default: 60)
/// - `LIVEHUB_ROOM_REAP_SECS`: reap empty rooms after this many seconds, 0 keeps them (default: 300)
/// - `LIVEHUB_IDENTITY_URL`: base URL of the identity service (default: unset)
/// - `LIVEHUB_IDENTITY_FILE`: JSON token → profile table (default: unset)
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind_addr: SocketAddr,
    pub heartbeat_timeout: Duration,
    pub heartbeat_sweep: Duration,
    pub presence_debounce: Duration,
    pub max_message_chars: usize,
    pub outbound_capacity: usize,
    pub allow_anonymous_chat: bool,
    pub max_frame_violations: u32,
    pub frame_violation_window: Duration,
    /// `None` keeps empty rooms (and their sequence counters) forever.
    pub room_reap_after: Option<Duration>,
    pub identity_url: Option<String>,
    pub identity_file: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_sweep: Duration::from_secs(5),
            presence_debounce: Duration::from_millis(500),
            max_message_chars: 200,
            outbound_capacity: 256,
            allow_anonymous_chat: false,
            max_frame_violations: 5,
            frame_violation_window: Duration::from_secs(60),
            room_reap_after: Some(Duration::from_secs(300)),
            identity_url: None,
            identity_file: None,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lookup = &lookup;

        Self {
            bind_addr: parse_or(lookup, "LIVEHUB_BIND_ADDR", defaults.bind_addr),
            heartbeat_timeout: Duration::from_secs(parse_or(
                lookup,
                "LIVEHUB_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )),
            heartbeat_sweep: Duration::from_secs(parse_or(
                lookup,
                "LIVEHUB_HEARTBEAT_SWEEP_SECS",
                defaults.heartbeat_sweep.as_secs(),
            )),
            presence_debounce: Duration::from_millis(parse_or(
                lookup,
                "LIVEHUB_PRESENCE_DEBOUNCE_MS",
                defaults.presence_debounce.as_millis() as u64,
            )),
            max_message_chars: parse_or(
                lookup,
                "LIVEHUB_MAX_MESSAGE_CHARS",
                defaults.max_message_chars,
            ),
            outbound_capacity: parse_or(
                lookup,
                "LIVEHUB_OUTBOUND_CAPACITY",
                defaults.outbound_capacity,
            ),
            allow_anonymous_chat: parse_or(
                lookup,
                "LIVEHUB_ALLOW_ANONYMOUS_CHAT",
                defaults.allow_anonymous_chat,
            ),
            max_frame_violations: parse_or(
                lookup,
                "LIVEHUB_MAX_FRAME_VIOLATIONS",
                defaults.max_frame_violations,
            ),
            frame_violation_window: Duration::from_secs(parse_or(
                lookup,
                "LIVEHUB_FRAME_VIOLATION_WINDOW_SECS",
                defaults.frame_violation_window.as_secs(),
            )),
            room_reap_after: match lookup("LIVEHUB_ROOM_REAP_SECS")
                .and_then(|raw| parse_value::<u64>("LIVEHUB_ROOM_REAP_SECS", &raw))
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.room_reap_after,
            },
            identity_url: lookup("LIVEHUB_IDENTITY_URL").filter(|v| !v.trim().is_empty()),
            identity_file: lookup("LIVEHUB_IDENTITY_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

fn parse_or<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|raw| parse_value(key, &raw))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> HubConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_message_chars, 200);
        assert!(!cfg.allow_anonymous_chat);
        assert_eq!(cfg.room_reap_after, Some(Duration::from_secs(300)));
        assert_eq!(cfg.frame_violation_window, Duration::from_secs(60));
        assert_eq!(cfg.identity_url, None);
    }

    #[test]
    fn zero_reap_delay_keeps_empty_rooms() {
        assert_eq!(config(&[("LIVEHUB_ROOM_REAP_SECS", "0")]).room_reap_after, None);
        assert_eq!(
            config(&[("LIVEHUB_ROOM_REAP_SECS", "soon")]).room_reap_after,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn values_are_read_and_bad_ones_ignored() {
        let cfg = config(&[
            ("LIVEHUB_BIND_ADDR", "127.0.0.1:9000"),
            ("LIVEHUB_PRESENCE_DEBOUNCE_MS", "250"),
            ("LIVEHUB_ALLOW_ANONYMOUS_CHAT", "true"),
            ("LIVEHUB_ROOM_REAP_SECS", "120"),
            ("LIVEHUB_OUTBOUND_CAPACITY", "lots"),
            ("LIVEHUB_FRAME_VIOLATION_WINDOW_SECS", "10"),
        ]);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.presence_debounce, Duration::from_millis(250));
        assert!(cfg.allow_anonymous_chat);
        assert_eq!(cfg.room_reap_after, Some(Duration::from_secs(120)));
        assert_eq!(cfg.outbound_capacity, 256);
        assert_eq!(cfg.frame_violation_window, Duration::from_secs(10));
    }
}
