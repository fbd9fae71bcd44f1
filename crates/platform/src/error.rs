//! Error types for tether

use std::fmt;
use std::io;

/// Readiness direction an operation is waiting for.
///
/// Carried by [`TetherError::WouldBlock`] so the caller knows which condition to
/// wait on before retrying the identical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The transport must become readable
    Readable,
    /// The transport must become writable
    Writable,
    /// Either condition lets the operation progress
    Both,
}

impl Direction {
    /// Returns true if this direction includes readability.
    pub fn wants_read(self) -> bool {
        matches!(self, Direction::Readable | Direction::Both)
    }

    /// Returns true if this direction includes writability.
    pub fn wants_write(self) -> bool {
        matches!(self, Direction::Writable | Direction::Both)
    }

    /// Combines two hints into the union of both conditions.
    pub fn union(self, other: Direction) -> Direction {
        match (self.wants_read() || other.wants_read(), self.wants_write() || other.wants_write()) {
            (true, true) => Direction::Both,
            (false, true) => Direction::Writable,
            _ => Direction::Readable,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Readable => write!(f, "readable"),
            Direction::Writable => write!(f, "writable"),
            Direction::Both => write!(f, "readable or writable"),
        }
    }
}

/// Coarse classification of a [`TetherError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not a failure: wait for readiness and retry the same call
    Transient,
    /// The peer explicitly declined the request
    Rejection,
    /// The call is illegal in the current lifecycle state
    State,
    /// A pending operation was aborted by a close
    Cancelled,
    /// The session is unusable
    Fatal,
}

/// Unified error type for all tether operations
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// The operation cannot progress until the transport is ready
    #[error("operation would block (waiting until {0})")]
    WouldBlock(Direction),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Handshake or transport provider failure
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// The server rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The peer refused to open a channel
    #[error("Channel open failed (reason {reason}): {description}")]
    ChannelOpen {
        /// RFC 4254 reason code
        reason: u32,
        /// Human readable description sent by the peer
        description: String,
    },

    /// The peer answered a request with a failure
    #[error("Request denied: {0}")]
    RequestDenied(String),

    /// SFTP status error
    #[error("SFTP error {code}: {message}")]
    Sftp {
        /// SSH_FX_* status code
        code: u32,
        /// Message sent by the server
        message: String,
    },

    /// Operation is illegal in the channel or session state
    #[error("Invalid state: {0}")]
    ChannelState(String),

    /// An SFTP handle was used after it was closed
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// Caller supplied inconsistent arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was aborted because its channel or session closed
    #[error("Operation cancelled")]
    Cancelled,

    /// A blocking wait ran past its deadline
    #[error("Operation timed out")]
    Timeout,

    /// The session is gone; every operation on it fails with this error
    #[error("Disconnected: {0}")]
    Disconnected(String),
}

impl TetherError {
    /// Returns the class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            TetherError::WouldBlock(_) => ErrorClass::Transient,
            TetherError::Authentication(_)
            | TetherError::ChannelOpen { .. }
            | TetherError::RequestDenied(_)
            | TetherError::Sftp { .. } => ErrorClass::Rejection,
            TetherError::ChannelState(_)
            | TetherError::StaleHandle(_)
            | TetherError::InvalidInput(_)
            | TetherError::Config(_)
            | TetherError::Timeout => ErrorClass::State,
            TetherError::Cancelled => ErrorClass::Cancelled,
            TetherError::Io(_)
            | TetherError::Protocol(_)
            | TetherError::Handshake(_)
            | TetherError::Disconnected(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true for the routine would-block signal.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TetherError::WouldBlock(_))
    }

    /// Returns the readiness hint carried by a would-block error.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TetherError::WouldBlock(direction) => Some(*direction),
            _ => None,
        }
    }

    /// Returns true if the error invalidates the whole session.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl From<TetherError> for io::Error {
    fn from(err: TetherError) -> Self {
        match err {
            TetherError::Io(e) => e,
            TetherError::WouldBlock(_) => io::Error::new(io::ErrorKind::WouldBlock, err),
            TetherError::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            TetherError::Disconnected(_) => io::Error::new(io::ErrorKind::NotConnected, err),
            TetherError::ChannelState(_) | TetherError::StaleHandle(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, err)
            }
            TetherError::InvalidInput(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Result type for tether operations
pub type TetherResult<T> = Result<T, TetherError>;
