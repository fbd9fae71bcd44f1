//! Session configuration.
//!
//! ```rust
//! use std::time::Duration;
//! use tether_proto::ssh::config::SessionConfig;
//!
//! let config = SessionConfig::default()
//!     .with_blocking(false)
//!     .with_timeout(Duration::from_secs(5))
//!     .with_window_size(512 * 1024);
//! assert!(config.validate().is_ok());
//! ```

use crate::ssh::connection::{MAX_PACKET_SIZE, MAX_WINDOW_SIZE};
use crate::ssh::version::Version;
use std::time::Duration;
use tether_platform::{TetherError, TetherResult};

/// Default local window (2 MiB).
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;

/// Default maximum packet accepted from the peer (32 KiB).
pub const DEFAULT_MAX_PACKET: u32 = 32 * 1024;

/// Default bound on queued outbound bytes (1 MiB).
pub const DEFAULT_MAX_OUTBOUND: usize = 1024 * 1024;

/// Tunables for a [`crate::ssh::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identification line announced to the peer.
    pub banner: String,
    /// Whether operations wait for readiness instead of returning `WouldBlock`.
    pub blocking: bool,
    /// Upper bound for a single blocking wait.
    pub timeout: Duration,
    /// Initial receive window advertised for every channel.
    pub window_size: u32,
    /// Largest data packet the peer may send on a channel.
    pub max_packet: u32,
    /// Bound on encoded frames waiting to be written to the stream.
    pub max_outbound: usize,
    /// Keep-alive interval.
    ///
    /// When set, [`crate::ssh::Session::poll`] sends SSH_MSG_IGNORE once the
    /// connection has been idle this long. Defaults to None (disabled).
    pub keepalive_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            banner: Version::default_tether().to_string(),
            blocking: true,
            timeout: Duration::from_secs(30),
            window_size: DEFAULT_WINDOW_SIZE,
            max_packet: DEFAULT_MAX_PACKET,
            max_outbound: DEFAULT_MAX_OUTBOUND,
            keepalive_interval: None,
        }
    }
}

impl SessionConfig {
    /// Sets the identification line.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Sets blocking mode.
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Sets the blocking wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the per-channel receive window.
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    /// Sets the maximum inbound packet size.
    pub fn with_max_packet(mut self, max_packet: u32) -> Self {
        self.max_packet = max_packet;
        self
    }

    /// Sets the outbound queue bound.
    pub fn with_max_outbound(mut self, max_outbound: usize) -> Self {
        self.max_outbound = max_outbound;
        self
    }

    /// Enables keep-alive messages.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Validates configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Config`] describing the first bad value.
    pub fn validate(&self) -> TetherResult<()> {
        Version::parse(&self.banner)
            .map_err(|e| TetherError::Config(format!("Invalid banner: {}", e)))?;
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(TetherError::Config(format!(
                "window_size must be in 1..={}, got {}",
                MAX_WINDOW_SIZE, self.window_size
            )));
        }
        if self.max_packet == 0 || self.max_packet > MAX_PACKET_SIZE {
            return Err(TetherError::Config(format!(
                "max_packet must be in 1..={}, got {}",
                MAX_PACKET_SIZE, self.max_packet
            )));
        }
        if self.max_packet > self.window_size {
            return Err(TetherError::Config(
                "max_packet cannot exceed window_size".into(),
            ));
        }
        if self.max_outbound < self.max_packet as usize {
            return Err(TetherError::Config(
                "max_outbound must hold at least one packet".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TetherError::Config("timeout cannot be zero".into()));
        }
        if matches!(self.keepalive_interval, Some(interval) if interval.is_zero()) {
            return Err(TetherError::Config(
                "keepalive_interval cannot be zero".into(),
            ));
        }
        Ok(())
    }
}
