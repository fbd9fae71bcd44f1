//! SSH port and X11 forwarding.
//!
//! - **Direct TCP/IP**: [`Session::direct_tcpip`](crate::ssh::Session::direct_tcpip)
//!   asks the server to connect somewhere on our behalf
//! - **Remote listeners**: [`Session::forward_listen`](crate::ssh::Session::forward_listen)
//!   makes the server listen and hand connections back as channels
//! - **X11**: inbound `x11` channels after an `x11-req`
//!
//! Relaying between channels and local sockets is done by a
//! [`ForwardingMux`] driven from the caller's readiness loop.

pub mod listener;
pub mod mux;
pub mod types;
pub mod x11;

pub use listener::ListenerId;
pub use mux::{ForwardingMux, LocalEndpoint, MuxSource};
pub use types::{parse_forward_addr, ForwardAddr};
pub use x11::{random_cookie, X11Display, MIT_MAGIC_COOKIE};
