//! X11 forwarding support.
//!
//! The session accepts `x11` channel opens once an `x11-req` was sent (or an
//! X11 handler is registered) and reports them as
//! [`SessionEvent::X11Open`](crate::ssh::session::SessionEvent::X11Open).
//! Pairing the channel with the local display is up to the caller; the
//! helpers here locate and connect to that display.

use super::mux::LocalEndpoint;
use rand::RngCore;
use std::io;
use std::net::TcpStream;
use tether_platform::{TetherError, TetherResult};
use tracing::debug;

/// Authentication protocol requested when the caller does not name one.
pub const MIT_MAGIC_COOKIE: &str = "MIT-MAGIC-COOKIE-1";

/// First TCP port used by X displays.
const X11_TCP_BASE: u16 = 6000;

/// Returns a random 128-bit cookie in lowercase hex.
pub fn random_cookie() -> String {
    let mut cookie = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut cookie);
    hex::encode(cookie)
}

/// A local X display as named by `$DISPLAY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11Display {
    /// Host part; `None` for the local socket
    pub host: Option<String>,
    /// Display number
    pub display: u16,
    /// Screen number
    pub screen: u32,
}

impl X11Display {
    /// Parses `[host]:display[.screen]`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tether_proto::ssh::forwarding::X11Display;
    ///
    /// let display = X11Display::parse(":0").unwrap();
    /// assert_eq!(display.display, 0);
    /// assert!(display.host.is_none());
    /// ```
    pub fn parse(value: &str) -> TetherResult<Self> {
        let (host, rest) = value.rsplit_once(':').ok_or_else(|| {
            TetherError::InvalidInput(format!("Invalid X display '{}'", value))
        })?;
        let (display, screen) = match rest.split_once('.') {
            Some((display, screen)) => (display, screen),
            None => (rest, "0"),
        };
        let display = display.parse::<u16>().map_err(|_| {
            TetherError::InvalidInput(format!("Invalid X display number in '{}'", value))
        })?;
        let screen = screen.parse::<u32>().map_err(|_| {
            TetherError::InvalidInput(format!("Invalid X screen number in '{}'", value))
        })?;
        if display > u16::MAX - X11_TCP_BASE {
            return Err(TetherError::InvalidInput(format!(
                "X display number {} out of range",
                display
            )));
        }

        let host = match host {
            "" | "unix" => None,
            other => Some(other.to_string()),
        };
        Ok(Self {
            host,
            display,
            screen,
        })
    }

    /// Reads `$DISPLAY`.
    pub fn from_env() -> TetherResult<Self> {
        let value = std::env::var("DISPLAY")
            .map_err(|_| TetherError::Config("DISPLAY is not set".to_string()))?;
        Self::parse(&value)
    }

    /// Path of the local display socket.
    pub fn socket_path(&self) -> String {
        format!("/tmp/.X11-unix/X{}", self.display)
    }

    /// TCP port of the display.
    pub fn tcp_port(&self) -> u16 {
        X11_TCP_BASE + self.display
    }

    /// Connects to the display and returns a non-blocking endpoint.
    pub fn connect(&self) -> io::Result<Box<dyn LocalEndpoint + Send>> {
        match &self.host {
            #[cfg(unix)]
            None => {
                let stream = std::os::unix::net::UnixStream::connect(self.socket_path())?;
                stream.set_nonblocking(true)?;
                debug!("Connected to X display {}", self.socket_path());
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            None => self.connect_tcp("localhost"),
            Some(host) => self.connect_tcp(host),
        }
    }

    fn connect_tcp(&self, host: &str) -> io::Result<Box<dyn LocalEndpoint + Send>> {
        let stream = TcpStream::connect((host, self.tcp_port()))?;
        stream.set_nonblocking(true)?;
        debug!("Connected to X display {}:{}", host, self.tcp_port());
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_cookie() {
        let a = random_cookie();
        let b = random_cookie();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_display() {
        let display = X11Display::parse("localhost:10.2").unwrap();
        assert_eq!(display.host.as_deref(), Some("localhost"));
        assert_eq!(display.display, 10);
        assert_eq!(display.screen, 2);
        assert_eq!(display.tcp_port(), 6010);

        let display = X11Display::parse("unix:1").unwrap();
        assert!(display.host.is_none());
        assert_eq!(display.socket_path(), "/tmp/.X11-unix/X1");
    }

    #[test]
    fn test_parse_display_invalid() {
        assert!(X11Display::parse("nodisplay").is_err());
        assert!(X11Display::parse(":x").is_err());
        assert!(X11Display::parse(":0.y").is_err());
        assert!(X11Display::parse(":65000").is_err());
    }
}
