//! Ambient settings consumed by the driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings that influence how a remote query is shipped and read back.
/// Timeouts are in milliseconds; connection timeouts are sampled at the
/// moment the connection factory runs, not at executor construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Treat a shard with no usable connections as an empty result.
    pub skip_unavailable_shards: bool,
    /// Prefer the hedged fan-out where the platform supports it.
    pub use_hedged_requests: bool,
    /// Send scalar subquery results after the query.
    pub enable_scalar_subquery_optimization: bool,
    /// Server-side execution budget, mirrored into external-table streams.
    pub max_execution_time_ms: Option<u64>,
    /// What to do when the execution budget runs out.
    pub timeout_overflow_mode: OverflowMode,
    pub connect_timeout_ms: u64,
    pub connect_timeout_with_failover_ms: u64,
    pub send_timeout_ms: u64,
    pub receive_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            skip_unavailable_shards: false,
            use_hedged_requests: true,
            enable_scalar_subquery_optimization: true,
            max_execution_time_ms: None,
            timeout_overflow_mode: OverflowMode::Throw,
            connect_timeout_ms: 10_000,
            connect_timeout_with_failover_ms: 1_000,
            send_timeout_ms: 300_000,
            receive_timeout_ms: 300_000,
        }
    }
}

/// Behavior when a limit is exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Fail the stream with a timeout error.
    #[default]
    Throw,
    /// Stop the stream and return what was produced so far.
    Break,
}

/// TCP timeouts handed to the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub connect: Duration,
    pub send: Duration,
    pub receive: Duration,
}

impl ConnectionTimeouts {
    pub fn from_settings(settings: &Settings) -> Self {
        ConnectionTimeouts {
            connect: Duration::from_millis(settings.connect_timeout_ms),
            send: Duration::from_millis(settings.send_timeout_ms),
            receive: Duration::from_millis(settings.receive_timeout_ms),
        }
    }

    /// Variant used when dialing through a failover pool: the per-replica
    /// connect timeout is much shorter so the pool can move on quickly.
    pub fn with_failover(settings: &Settings) -> Self {
        ConnectionTimeouts {
            connect: Duration::from_millis(settings.connect_timeout_with_failover_ms),
            send: Duration::from_millis(settings.send_timeout_ms),
            receive: Duration::from_millis(settings.receive_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failover_timeouts_use_short_connect() {
        let settings = Settings::default();
        let timeouts = ConnectionTimeouts::with_failover(&settings);
        assert_eq!(timeouts.connect, Duration::from_millis(1_000));
        assert_eq!(timeouts.receive, Duration::from_millis(300_000));

        let direct = ConnectionTimeouts::from_settings(&settings);
        assert_eq!(direct.connect, Duration::from_millis(10_000));
    }

    #[test]
    fn settings_roundtrip_with_defaults() {
        let parsed: Settings = serde_json::from_str(r#"{"skip_unavailable_shards": true}"#).unwrap();
        assert!(parsed.skip_unavailable_shards);
        assert_eq!(parsed.timeout_overflow_mode, OverflowMode::Throw);
    }
}
