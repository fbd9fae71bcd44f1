//! SSH message numbers and transport-level messages.
//!
//! Key exchange messages never reach the engine (the transport provider
//! consumes them), so only the generic transport, authentication and
//! connection ranges are listed.
//!
//! # Example
//!
//! ```rust
//! use tether_proto::ssh::message::MessageType;
//!
//! let msg_type = MessageType::ChannelData;
//! assert_eq!(msg_type as u8, 94);
//! assert_eq!(MessageType::from_u8(94), Some(MessageType::ChannelData));
//! ```

use crate::ssh::wire::{read_bool, read_string, read_u32, read_u8, write_bytes, write_string};
use bytes::{BufMut, BytesMut};
use tether_platform::{TetherError, TetherResult};

/// SSH message numbers handled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message.
    Debug = 4,
    /// Service request (e.g. "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept.
    ServiceAccept = 6,

    // User authentication (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// User authentication banner.
    UserauthBanner = 53,
    /// Method specific: PK_OK for "publickey", INFO_REQUEST for
    /// "keyboard-interactive".
    UserauthInfoRequest = 60,
    /// Keyboard-interactive responses.
    UserauthInfoResponse = 61,

    // Connection protocol (80-127)
    /// Global request.
    GlobalRequest = 80,
    /// Request success.
    RequestSuccess = 81,
    /// Request failure.
    RequestFailure = 82,
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel success.
    ChannelSuccess = 99,
    /// Channel failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// ```rust
    /// use tether_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(52), Some(MessageType::UserauthSuccess));
    /// assert_eq!(MessageType::from_u8(20), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            60 => Some(MessageType::UserauthInfoRequest),
            61 => Some(MessageType::UserauthInfoResponse),
            80 => Some(MessageType::GlobalRequest),
            81 => Some(MessageType::RequestSuccess),
            82 => Some(MessageType::RequestFailure),
            90 => Some(MessageType::ChannelOpen),
            91 => Some(MessageType::ChannelOpenConfirmation),
            92 => Some(MessageType::ChannelOpenFailure),
            93 => Some(MessageType::ChannelWindowAdjust),
            94 => Some(MessageType::ChannelData),
            95 => Some(MessageType::ChannelExtendedData),
            96 => Some(MessageType::ChannelEof),
            97 => Some(MessageType::ChannelClose),
            98 => Some(MessageType::ChannelRequest),
            99 => Some(MessageType::ChannelSuccess),
            100 => Some(MessageType::ChannelFailure),
            _ => None,
        }
    }

    /// Returns the message type name.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            MessageType::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            MessageType::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            MessageType::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
            MessageType::UserauthInfoRequest => "SSH_MSG_USERAUTH_INFO_REQUEST",
            MessageType::UserauthInfoResponse => "SSH_MSG_USERAUTH_INFO_RESPONSE",
            MessageType::GlobalRequest => "SSH_MSG_GLOBAL_REQUEST",
            MessageType::RequestSuccess => "SSH_MSG_REQUEST_SUCCESS",
            MessageType::RequestFailure => "SSH_MSG_REQUEST_FAILURE",
            MessageType::ChannelOpen => "SSH_MSG_CHANNEL_OPEN",
            MessageType::ChannelOpenConfirmation => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
            MessageType::ChannelOpenFailure => "SSH_MSG_CHANNEL_OPEN_FAILURE",
            MessageType::ChannelWindowAdjust => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            MessageType::ChannelData => "SSH_MSG_CHANNEL_DATA",
            MessageType::ChannelExtendedData => "SSH_MSG_CHANNEL_EXTENDED_DATA",
            MessageType::ChannelEof => "SSH_MSG_CHANNEL_EOF",
            MessageType::ChannelClose => "SSH_MSG_CHANNEL_CLOSE",
            MessageType::ChannelRequest => "SSH_MSG_CHANNEL_REQUEST",
            MessageType::ChannelSuccess => "SSH_MSG_CHANNEL_SUCCESS",
            MessageType::ChannelFailure => "SSH_MSG_CHANNEL_FAILURE",
        }
    }

    /// Returns true for messages that belong to the connection protocol.
    pub fn is_connection(&self) -> bool {
        (*self as u8) >= 80
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// Disconnect reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    /// Host not allowed to connect
    HostNotAllowedToConnect = 1,
    /// Protocol error
    ProtocolError = 2,
    /// Key exchange failed
    KeyExchangeFailed = 3,
    /// MAC error
    MacError = 5,
    /// Service not available
    ServiceNotAvailable = 7,
    /// Protocol version not supported
    ProtocolVersionNotSupported = 8,
    /// Host key not verifiable
    HostKeyNotVerifiable = 9,
    /// Connection lost
    ConnectionLost = 10,
    /// Disconnected by application
    ByApplication = 11,
    /// Too many connections
    TooManyConnections = 12,
    /// Authentication cancelled by user
    AuthCancelledByUser = 13,
    /// No more authentication methods available
    NoMoreAuthMethodsAvailable = 14,
    /// Illegal user name
    IllegalUserName = 15,
}

/// SSH_MSG_DISCONNECT (RFC 4253 Section 11.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason code
    pub reason_code: u32,
    /// Human readable description
    pub description: String,
}

impl Disconnect {
    /// Creates a disconnect message.
    pub fn new(reason: DisconnectReason, description: &str) -> Self {
        Self {
            reason_code: reason as u32,
            description: description.to_string(),
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Disconnect as u8);
        buf.put_u32(self.reason_code);
        write_string(&mut buf, &self.description);
        write_string(&mut buf, "");
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut offset = 0;
        expect_type(data, &mut offset, MessageType::Disconnect)?;
        let reason_code = read_u32(data, &mut offset)?;
        let description = read_string(data, &mut offset)?;
        Ok(Self {
            reason_code,
            description,
        })
    }
}

/// Builds SSH_MSG_SERVICE_REQUEST.
pub fn service_request(service: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::ServiceRequest as u8);
    write_string(&mut buf, service);
    buf.to_vec()
}

/// Parses SSH_MSG_SERVICE_ACCEPT and returns the service name.
pub fn parse_service_accept(data: &[u8]) -> TetherResult<String> {
    let mut offset = 0;
    expect_type(data, &mut offset, MessageType::ServiceAccept)?;
    read_string(data, &mut offset)
}

/// Builds SSH_MSG_IGNORE carrying `data`.
pub fn ignore(data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::Ignore as u8);
    write_bytes(&mut buf, data);
    buf.to_vec()
}

/// Parses SSH_MSG_DEBUG into (always_display, message).
pub fn parse_debug(data: &[u8]) -> TetherResult<(bool, String)> {
    let mut offset = 0;
    expect_type(data, &mut offset, MessageType::Debug)?;
    let always_display = read_bool(data, &mut offset)?;
    let message = read_string(data, &mut offset)?;
    Ok((always_display, message))
}

pub(crate) fn expect_type(
    data: &[u8],
    offset: &mut usize,
    expected: MessageType,
) -> TetherResult<()> {
    let actual = read_u8(data, offset)
        .map_err(|_| TetherError::Protocol(format!("{} message is empty", expected.name())))?;
    if actual != expected as u8 {
        return Err(TetherError::Protocol(format!(
            "Invalid message type: expected {}, got {}",
            expected, actual
        )));
    }
    Ok(())
}
