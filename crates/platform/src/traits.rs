//! Interfaces between the session engine and its collaborators.
//!
//! The engine never touches sockets or cryptography itself. It is handed a
//! [`SecurityProvider`] that turns a connected raw stream into an
//! authenticated, confidential [`SecureStream`], and it reports readiness
//! needs through [`Direction`] hints that a [`Multiplexer`] waits on.

use crate::{Direction, TetherResult};
use std::time::Duration;

/// Authenticated, confidential, ordered byte stream.
///
/// Both `send` and `recv` are non-blocking: when no progress is possible they
/// return [`crate::TetherError::WouldBlock`] with the direction to wait for.
pub trait SecureStream: Send {
    /// Sends bytes, returning how many were accepted (at least one on success).
    fn send(&mut self, data: &[u8]) -> TetherResult<usize>;

    /// Receives bytes into `buf`.
    ///
    /// `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> TetherResult<usize>;

    /// Blocks until the stream is ready in `direction` or the timeout elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait(&mut self, direction: Direction, timeout: Option<Duration>) -> TetherResult<bool>;
}

/// Everything the transport layer learned while securing the stream.
pub struct Established {
    /// The secured stream
    pub stream: Box<dyn SecureStream>,
    /// Identification line sent by the server
    pub remote_banner: String,
    /// Server host key blob in SSH wire format
    pub host_key: Vec<u8>,
    /// Exchange hash of the first key exchange
    pub session_id: Vec<u8>,
    /// Negotiated algorithms
    pub methods: NegotiatedMethods,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("remote_banner", &self.remote_banner)
            .field("host_key_len", &self.host_key.len())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Algorithms agreed on during key exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedMethods {
    /// Key exchange method
    pub kex: String,
    /// Host key algorithm
    pub host_key: String,
    /// Client to server cipher
    pub cipher_client_to_server: String,
    /// Server to client cipher
    pub cipher_server_to_client: String,
    /// Client to server MAC
    pub mac_client_to_server: String,
    /// Server to client MAC
    pub mac_server_to_client: String,
    /// Client to server compression
    pub compression_client_to_server: String,
    /// Server to client compression
    pub compression_server_to_client: String,
}

/// Transport security provider.
///
/// Given an already connected raw stream (owned by the implementation), it
/// performs version exchange, key exchange and host key verification.
pub trait SecurityProvider: Send {
    /// Advances the handshake.
    ///
    /// Returns `WouldBlock` while the handshake is in progress; the caller must
    /// retry with the same banner once the hinted direction is ready.
    fn connect(&mut self, local_banner: &str) -> TetherResult<Established>;

    /// Blocks until the underlying raw stream is ready or the timeout elapses.
    fn wait(&mut self, direction: Direction, timeout: Option<Duration>) -> TetherResult<bool>;
}

/// Caller-owned readiness wait over a set of handles.
pub trait Multiplexer {
    /// Handle type the caller registers sources under.
    type Token: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    /// Waits until at least one `(token, direction)` pair is ready or the
    /// timeout elapses, and returns the ready subset (empty on timeout).
    fn wait(
        &mut self,
        interests: &[(Self::Token, Direction)],
        timeout: Option<Duration>,
    ) -> TetherResult<Vec<(Self::Token, Direction)>>;
}

/// Async flavour of [`Multiplexer`] for callers already inside a runtime.
#[async_trait::async_trait]
pub trait AsyncMultiplexer: Send + Sync {
    /// Handle type the caller registers sources under.
    type Token: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync;

    /// Async counterpart of [`Multiplexer::wait`].
    async fn ready(
        &self,
        interests: &[(Self::Token, Direction)],
        timeout: Option<Duration>,
    ) -> TetherResult<Vec<(Self::Token, Direction)>>;
}
