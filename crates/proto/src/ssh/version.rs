//! SSH identification strings (RFC 4253 Section 4.2).
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The local banner is handed to the transport provider; the remote banner it
//! returns is validated here before the session trusts the connection. A
//! malformed or incompatible remote banner is a handshake failure.
//!
//! # Example
//!
//! ```rust
//! use tether_proto::ssh::version::Version;
//!
//! let version = Version::new("tether_0.1.0", None);
//! assert_eq!(version.to_string(), "SSH-2.0-tether_0.1.0");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_9.6 Debian").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_9.6");
//! assert_eq!(parsed.comments(), Some("Debian"));
//! ```

use tether_platform::{TetherError, TetherResult};

/// Maximum length of an identification string, excluding CR LF.
pub const MAX_VERSION_LENGTH: usize = 253;

/// Parsed identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    proto_version: String,
    software_version: String,
    comments: Option<String>,
}

impl Version {
    /// Creates a protocol 2.0 identification.
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// The identification this crate announces by default.
    pub fn default_tether() -> Self {
        Self::new(&format!("tether_{}", env!("CARGO_PKG_VERSION")), None)
    }

    /// Parses and validates an identification string.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Handshake`] if the line is too long, contains a
    /// NUL byte, lacks the `SSH-` prefix or announces a protocol other than
    /// 2.0 or 1.99.
    pub fn parse(line: &str) -> TetherResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.len() > MAX_VERSION_LENGTH {
            return Err(TetherError::Handshake(format!(
                "Version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }
        if line.contains('\0') {
            return Err(TetherError::Handshake(
                "Version string contains null byte".to_string(),
            ));
        }

        let rest = line.strip_prefix("SSH-").ok_or_else(|| {
            TetherError::Handshake(format!("Invalid version string: '{}'", line))
        })?;
        let (proto_version, rest) = rest.split_once('-').ok_or_else(|| {
            TetherError::Handshake(format!("Invalid version string format: '{}'", line))
        })?;

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(TetherError::Handshake(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.trim().to_string())),
            None => (rest, None),
        };
        if software_version.is_empty() {
            return Err(TetherError::Handshake(format!(
                "Missing software version: '{}'",
                line
            )));
        }

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version: software_version.to_string(),
            comments,
        })
    }

    /// Returns the protocol version (e.g., "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_banner() {
        let version = Version::default_tether();
        assert!(version.to_string().starts_with("SSH-2.0-tether_"));
        assert_eq!(
            Version::parse(&version.to_string()).unwrap(),
            version
        );
    }

    #[test]
    fn test_parse_openssh() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n").unwrap();
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "OpenSSH_8.9p1");
        assert_eq!(version.comments(), Some("Ubuntu-3ubuntu0.1"));
    }

    #[test]
    fn test_parse_compat_protocol() {
        let version = Version::parse("SSH-1.99-Cisco-1.25").unwrap();
        assert_eq!(version.proto_version(), "1.99");
        assert_eq!(version.software(), "Cisco-1.25");
    }

    #[test]
    fn test_protocol_mismatch_is_handshake_error() {
        match Version::parse("SSH-1.5-OldServer") {
            Err(TetherError::Handshake(msg)) => {
                assert!(msg.contains("Unsupported protocol version"))
            }
            other => panic!("Expected handshake error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert!(Version::parse("HTTP/1.1 200 OK").is_err());
        assert!(Version::parse("SSH-2.0").is_err());
        assert!(Version::parse("SSH-2.0-").is_err());
        assert!(Version::parse("SSH-2.0-Test\0Bad").is_err());
        assert!(Version::parse(&format!("SSH-2.0-{}", "A".repeat(300))).is_err());
    }

    #[test]
    fn test_wire_format() {
        let version = Version::new("tether_0.1.0", Some("test"));
        assert_eq!(version.to_wire_format(), b"SSH-2.0-tether_0.1.0 test\r\n");
    }
}
