//! SSH connection layer (RFC 4252, RFC 4254) over a caller-supplied secure
//! transport.
//!
//! # Architecture
//!
//! The engine is layered:
//!
//! 1. **Framing** ([`frame`]) - length-prefixed payloads on the secure stream
//! 2. **Messages** ([`message`], [`auth`], [`connection`]) - wire codecs
//! 3. **Session** ([`session`]) - lifecycle, authentication, dispatch and the
//!    channel arena
//! 4. **Channels** ([`channel`]) - flow-controlled data streams
//! 5. **Applications** ([`scp`], [`sftp`], [`forwarding`]) - built on channels
//!
//! Key exchange and encryption are not part of this crate: a
//! [`SecurityProvider`](tether_platform::SecurityProvider) hands the session
//! an established [`SecureStream`](tether_platform::SecureStream).
//!
//! # Non-blocking contract
//!
//! Every operation either completes or fails with
//! [`TetherError::WouldBlock`](tether_platform::TetherError::WouldBlock)
//! carrying the direction to wait for. The caller waits (see [`net`]) and
//! repeats the identical call. In blocking mode the session does the waiting.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_platform::SecurityProvider;
//! use tether_proto::ssh::{Credentials, Session};
//!
//! # fn run(provider: impl SecurityProvider + 'static) -> tether_platform::TetherResult<()> {
//! let mut session = Session::new();
//! session.bind(provider)?;
//! session.startup()?;
//! session.authenticate(
//!     "deploy",
//!     &Credentials::public_key_file("/home/deploy/.ssh/id_ed25519", None, None),
//! )?;
//!
//! let id = session.open_session()?;
//! let mut channel = session.channel(id);
//! channel.exec("systemctl restart app")?;
//! channel.send_eof()?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
pub mod forwarding;
pub mod frame;
pub mod identity;
pub mod message;
pub mod net;
pub mod scp;
pub mod session;
pub mod sftp;
pub mod version;
pub mod window;
mod wire;

// Re-export main types
pub use auth::{AuthFailure, AuthMethod, AuthRequest, Credentials, KeyboardInteractive, Prompt};
pub use channel::{
    Channel, ChannelId, ChannelKind, ChannelState, ChannelStatus, ExitSignal, WindowStatus,
};
pub use config::SessionConfig;
pub use connection::{
    ChannelOpenFailureReason, ChannelRequestType, ChannelType, ConnectionMessage,
    GlobalRequestType, MAX_PACKET_SIZE, MAX_WINDOW_SIZE,
};
pub use forwarding::{ForwardAddr, ForwardingMux, ListenerId, LocalEndpoint, MuxSource};
pub use frame::FrameCodec;
pub use identity::Identity;
pub use message::{Disconnect, DisconnectReason, MessageType};
pub use net::{SourceId, TokioMultiplexer};
pub use scp::ScpStat;
pub use session::{Callback, EventKind, HashType, Session, SessionEvent, SessionState};
pub use sftp::{DirEntry, FileAttributes, OpenFlags, Sftp, SftpHandle};
pub use version::Version;
pub use window::{LocalWindow, Window};
