//! Server configuration.
//!
//! A [`ServerConfig`] carries everything [`crate::server::SignalServer`]
//! needs: listener addresses, the polling event-log capacity, and the
//! optional idle-timeout policy. Construct with [`ServerConfig::new`] and
//! the `with_*` builders, or from `GREENROOM_*` environment variables via
//! [`ServerConfig::from_env`].

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use crate::polling::DEFAULT_EVENT_LOG_CAPACITY;

/// Default bind address for the raw-framed + polling listener.
const DEFAULT_RAW_ADDR: &str = "127.0.0.1:3580";
/// Default bind address for the tungstenite WebSocket listener.
const DEFAULT_WS_ADDR: &str = "127.0.0.1:3581";

/// Configuration for a signaling server instance.
///
/// # Example
///
/// ```
/// use greenroom_signal_server::config::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new()
///     .with_event_log_capacity(100)
///     .with_idle_timeout(Duration::from_secs(300));
/// assert_eq!(config.event_log_capacity, 100);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the hand-rolled listener (framed WebSocket
    /// upgrades and the stateless polling endpoints).
    pub raw_addr: SocketAddr,
    /// Bind address for the tungstenite WebSocket listener. Ignored when
    /// the `transport-websocket` feature is disabled.
    pub ws_addr: SocketAddr,
    /// Per-room polling event-log capacity. Values below 1 are clamped.
    pub event_log_capacity: usize,
    /// Close persistent connections with no inbound traffic for this
    /// long. `None` (the default) disables the policy — there is no
    /// built-in idle timeout unless a deployment opts in.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            raw_addr: default_addr(DEFAULT_RAW_ADDR),
            ws_addr: default_addr(DEFAULT_WS_ADDR),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            idle_timeout: None,
        }
    }
}

fn default_addr(addr: &str) -> SocketAddr {
    // Both defaults are compile-time literals; parse cannot fail.
    addr.parse().unwrap_or_else(|_| {
        SocketAddr::from(([127, 0, 0, 1], 0))
    })
}

impl ServerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw listener bind address.
    #[must_use]
    pub fn with_raw_addr(mut self, addr: SocketAddr) -> Self {
        self.raw_addr = addr;
        self
    }

    /// Set the WebSocket listener bind address.
    #[must_use]
    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = addr;
        self
    }

    /// Set the per-room polling event-log capacity (clamped to at least 1).
    #[must_use]
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity.max(1);
        self
    }

    /// Enable the idle-timeout policy for persistent connections.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable (with a warning):
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `GREENROOM_RAW_ADDR` | raw listener bind address |
    /// | `GREENROOM_WS_ADDR` | WebSocket listener bind address |
    /// | `GREENROOM_EVENT_LOG_CAPACITY` | per-room polling log capacity |
    /// | `GREENROOM_IDLE_TIMEOUT_SECS` | idle timeout in seconds, `0` = off |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parsed::<SocketAddr>("GREENROOM_RAW_ADDR") {
            config.raw_addr = addr;
        }
        if let Some(addr) = env_parsed::<SocketAddr>("GREENROOM_WS_ADDR") {
            config.ws_addr = addr;
        }
        if let Some(capacity) = env_parsed::<usize>("GREENROOM_EVENT_LOG_CAPACITY") {
            config.event_log_capacity = capacity.max(1);
        }
        if let Some(secs) = env_parsed::<u64>("GREENROOM_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(%name, %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::new();
        assert_eq!(config.event_log_capacity, DEFAULT_EVENT_LOG_CAPACITY);
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.raw_addr.port(), 3580);
        assert_eq!(config.ws_addr.port(), 3581);
    }

    #[test]
    fn builder_methods() {
        let config = ServerConfig::new()
            .with_raw_addr("0.0.0.0:9000".parse().unwrap())
            .with_event_log_capacity(0)
            .with_idle_timeout(Duration::from_secs(60));
        assert_eq!(config.raw_addr.port(), 9000);
        assert_eq!(config.event_log_capacity, 1, "capacity is clamped to 1");
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn from_env_overrides_and_tolerates_garbage() {
        std::env::set_var("GREENROOM_RAW_ADDR", "127.0.0.1:7777");
        std::env::set_var("GREENROOM_EVENT_LOG_CAPACITY", "not-a-number");
        std::env::set_var("GREENROOM_IDLE_TIMEOUT_SECS", "0");

        let config = ServerConfig::from_env();
        assert_eq!(config.raw_addr.port(), 7777);
        assert_eq!(
            config.event_log_capacity, DEFAULT_EVENT_LOG_CAPACITY,
            "garbage falls back to the default"
        );
        assert!(config.idle_timeout.is_none(), "0 disables the idle timeout");

        std::env::remove_var("GREENROOM_RAW_ADDR");
        std::env::remove_var("GREENROOM_EVENT_LOG_CAPACITY");
        std::env::remove_var("GREENROOM_IDLE_TIMEOUT_SECS");
    }
}
