//! Common types and utilities for port forwarding.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tether_platform::{TetherError, TetherResult};

/// Host and port of a forwarded endpoint.
///
/// Can be either a socket address (IP:port) or a host:port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardAddr {
    /// Host or IP address
    pub host: String,
    /// Port number
    pub port: u16,
}

impl ForwardAddr {
    /// Creates a new forward address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Converts to a socket address if the host is an IP address.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Returns true for addresses that listen on every interface.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "" | "0.0.0.0" | "::" | "*" | "localhost")
    }

    /// Returns true if a connection reported on `address:port` belongs here.
    pub(crate) fn matches(&self, address: &str, port: u32) -> bool {
        u32::from(self.port) == port && (self.host == address || self.is_wildcard())
    }
}

impl fmt::Display for ForwardAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses a forward address from a string.
///
/// Accepts formats:
/// - "host:port" - e.g., "localhost:8080"
/// - "[host]:port" - e.g., "[::1]:8080" for IPv6
///
/// # Example
///
/// ```rust
/// use tether_proto::ssh::forwarding::parse_forward_addr;
///
/// let addr = parse_forward_addr("localhost:8080").unwrap();
/// assert_eq!(addr.host, "localhost");
/// assert_eq!(addr.port, 8080);
/// ```
pub fn parse_forward_addr(addr: &str) -> TetherResult<ForwardAddr> {
    // [::1]:8080
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| {
            TetherError::InvalidInput(format!("Invalid IPv6 address: missing ']': {}", addr))
        })?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':').ok_or_else(|| {
            TetherError::InvalidInput(format!(
                "Invalid address format: missing ':' after ']': {}",
                addr
            ))
        })?;
        return Ok(ForwardAddr::new(host, parse_port(port)?));
    }

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        TetherError::InvalidInput(format!(
            "Invalid address format: expected 'host:port', got '{}'",
            addr
        ))
    })?;
    Ok(ForwardAddr::new(host, parse_port(port)?))
}

fn parse_port(port: &str) -> TetherResult<u16> {
    port.parse::<u16>()
        .map_err(|_| TetherError::InvalidInput(format!("Invalid port number: {}", port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_localhost() {
        let addr = parse_forward_addr("localhost:8080").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8080);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = parse_forward_addr("[2001:db8::1]:22").unwrap();
        assert_eq!(addr.host, "2001:db8::1");
        assert_eq!(addr.port, 22);
        assert_eq!(addr.to_string(), "[2001:db8::1]:22");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_forward_addr("localhost").is_err());
        assert!(parse_forward_addr("localhost:99999").is_err());
        assert!(parse_forward_addr("[::1]8080").is_err());
        assert!(matches!(
            parse_forward_addr("localhost:abc"),
            Err(TetherError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_to_socket_addr() {
        let addr = parse_forward_addr("127.0.0.1:8080").unwrap();
        assert_eq!(addr.to_socket_addr().unwrap().port(), 8080);

        let addr = parse_forward_addr("localhost:8080").unwrap();
        assert!(addr.to_socket_addr().is_none());
    }

    #[test]
    fn test_matches() {
        let addr = ForwardAddr::new("0.0.0.0", 2222);
        assert!(addr.matches("0.0.0.0", 2222));
        assert!(addr.matches("10.0.0.5", 2222));
        assert!(!addr.matches("0.0.0.0", 2223));

        let addr = ForwardAddr::new("10.0.0.5", 80);
        assert!(addr.matches("10.0.0.5", 80));
        assert!(!addr.matches("10.0.0.6", 80));
    }
}
