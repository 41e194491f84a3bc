//! Configuration for relay connections and the relay pool.

use std::time::Duration;

/// Tunables for a single relay connection.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Time allowed for the WebSocket handshake plus the ping/pong
    /// liveness probe.
    pub connection_timeout: Duration,

    /// Time allowed for sends and for awaiting publish acknowledgements.
    pub operation_timeout: Duration,

    /// Whether to schedule reconnect attempts after a failure.
    pub auto_reconnect: bool,

    /// Maximum reconnect attempts before giving up. `0` means unlimited.
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt.
    pub initial_reconnect_delay: Duration,

    /// Ceiling for the backoff delay.
    pub max_reconnect_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    pub reconnect_backoff_multiplier: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            reconnect_backoff_multiplier: 2.0,
        }
    }
}

/// Tunables for the relay pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Configuration applied to relays added without an explicit one.
    pub default_relay_config: RelayConfig,

    /// Maximum number of event ids retained for deduplication.
    pub max_deduplication_cache_size: usize,

    /// How long a deduplication entry stays live.
    pub deduplication_cache_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_relay_config: RelayConfig::default(),
            max_deduplication_cache_size: 10_000,
            deduplication_cache_ttl: Duration::from_secs(300),
        }
    }
}
