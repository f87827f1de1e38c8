//! Timeouts for connecting, authenticating and waiting on responses.

use std::time::Duration;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Auth handshake timeout used when none is configured.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Response reassembly timeout used when none is configured.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunable knobs for a connection.
///
/// Timeouts are not precise, and may vary on the order of milliseconds,
/// because of the way the async event loop works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RconConfig {
    /// How long to wait for the TCP socket to open.
    pub connect_timeout: Duration,

    /// How long to wait for the server to answer the `AUTH` packet.
    pub auth_timeout: Duration,

    /// How long a command may take until its terminator arrives.
    /// Expiry fails the command but keeps the connection.
    pub response_timeout: Duration,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl RconConfig {
    /// Create a new config builder seeded with the defaults.
    pub fn builder() -> RconConfigBuilder {
        RconConfigBuilder::default()
    }
}

/// Builder for [`RconConfig`].
#[derive(Debug, Default)]
pub struct RconConfigBuilder {
    config: RconConfig,
}

impl RconConfigBuilder {
    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the authentication handshake timeout.
    #[must_use]
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set the per-command response timeout.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Finish building.
    pub fn build(self) -> RconConfig {
        self.config
    }
}
