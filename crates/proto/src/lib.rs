//! Non-blocking SSH session and channel multiplexing for the tether
//! ecosystem.
//!
//! This crate implements the SSH connection layer on top of a secure stream
//! supplied by the caller:
//!
//! - **Sessions** - handshake driving, user authentication, keep-alive
//! - **Channels** - shell/exec, flow control, EOF and close
//! - **SCP and SFTP** - file transfer over session channels
//! - **Forwarding** - direct-tcpip, remote listeners and X11
//!
//! Nothing in the crate spawns threads or blocks unless asked to: every
//! operation reports what it is waiting for and is retried by the caller.
//!
//! # Features
//!
//! - `ssh` (default) - SSH connection layer
//!
//! # Example
//!
//! ```rust
//! use tether_proto::ssh::connection::{ChannelRequestType, ConnectionMessage};
//!
//! let request = ConnectionMessage::ChannelRequest {
//!     recipient_channel: 3,
//!     request: ChannelRequestType::Exec {
//!         command: "uptime".to_string(),
//!     },
//!     want_reply: true,
//! };
//! let wire_format = request.to_bytes();
//! assert_eq!(ConnectionMessage::from_bytes(&wire_format).unwrap(), request);
//! ```
//!
//! # References
//!
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;
