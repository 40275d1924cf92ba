//! Bus configuration and environment helpers shared by the services

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::nats::NatsOptions;

/// URL scheme selecting the in-process broker
pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub client_name: String,
    /// Attempts per stream before provisioning is fatal
    pub stream_setup_attempts: u32,
    /// Base backoff, multiplied by the attempt number
    pub stream_setup_backoff: Duration,
    pub max_reconnects: usize,
    pub reconnect_delay: Duration,
    pub ack_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: "market-bus".to_string(),
            stream_setup_attempts: 5,
            stream_setup_backoff: Duration::from_secs(1),
            max_reconnects: 10,
            reconnect_delay: Duration::from_secs(2),
            ack_wait: Duration::from_secs(30),
        }
    }
}

impl BusConfig {
    pub fn from_env(client_name: &str) -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("NATS_URL").unwrap_or(defaults.url),
            client_name: client_name.to_string(),
            stream_setup_attempts: env_parse("STREAM_SETUP_ATTEMPTS", defaults.stream_setup_attempts),
            stream_setup_backoff: env_duration("STREAM_SETUP_BACKOFF", defaults.stream_setup_backoff),
            max_reconnects: env_parse("NATS_MAX_RECONNECTS", defaults.max_reconnects),
            reconnect_delay: env_duration("NATS_RECONNECT_DELAY", defaults.reconnect_delay),
            ack_wait: env_duration("NATS_ACK_WAIT", defaults.ack_wait),
        }
    }

    pub fn in_memory(client_name: &str) -> Self {
        Self {
            url: MEMORY_URL.to_string(),
            client_name: client_name.to_string(),
            stream_setup_backoff: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_URL)
    }

    pub fn nats_options(&self) -> NatsOptions {
        NatsOptions {
            url: self.url.clone(),
            client_name: self.client_name.clone(),
            max_reconnects: self.max_reconnects,
            reconnect_delay: self.reconnect_delay,
            ack_wait: self.ack_wait,
        }
    }
}

/// Parse `500ms`, `2s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// Duration from the environment, falling back on absence or bad input.
pub fn env_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(raw) => parse_duration(&raw).unwrap_or_else(|| {
            warn!(key, value = %raw, "Unparseable duration, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Optional duration; unset or empty means `None`.
pub fn env_duration_opt(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok().filter(|v| !v.trim().is_empty())?;
    let parsed = parse_duration(&raw);
    if parsed.is_none() {
        warn!(key, value = %raw, "Unparseable duration, ignoring");
    }
    parsed
}

pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, trimmed, empties removed.
pub fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => split_list(&raw),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
