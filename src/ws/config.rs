#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);

/// Configuration for WebSocket client behavior.
///
/// ```
/// use std::time::Duration;
///
/// use dashboard_realtime::ws::config::{Config, ReconnectConfig};
///
/// let config = Config::builder()
///     .heartbeat_interval(Duration::from_secs(10))
///     .reconnect(ReconnectConfig::builder().max_attempts(10).build())
///     .build();
///
/// assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between liveness probes (`"ping"`) while connected
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for the `pong` acknowledgment before forcing the connection closed
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    pub heartbeat_timeout: Duration,
    /// Maximum time a transport open may take before it counts as a failed open
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Maximum time to wait for the peer to acknowledge a client-initiated close
    #[builder(default = DEFAULT_CLOSE_TIMEOUT_DURATION)]
    pub close_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of scheduled reconnection attempts before giving up.
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_attempts: u32,
    /// Backoff duration for the first reconnection attempt; doubled for each further attempt
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
