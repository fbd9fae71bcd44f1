//! SSH connection protocol messages (RFC 4254).
//!
//! Every message of the connection layer is one variant of
//! [`ConnectionMessage`], with a single encoder and decoder:
//! - Channel lifecycle: open, confirmation, failure, EOF, close
//! - Flow control: window adjust
//! - Data: data and extended data (stderr)
//! - Channel requests: pty-req, x11-req, env, exec, shell, subsystem,
//!   window-change, signal, exit-status, exit-signal
//! - Global requests: tcpip-forward, cancel-tcpip-forward
//!
//! Unknown channel types and request names decode into `Other` variants so
//! the session can answer them with a failure instead of dropping the
//! connection.
//!
//! # Example
//!
//! ```rust
//! use tether_proto::ssh::connection::{ChannelType, ConnectionMessage};
//!
//! let open = ConnectionMessage::ChannelOpen {
//!     channel_type: ChannelType::Session,
//!     sender_channel: 0,
//!     initial_window_size: 2 * 1024 * 1024,
//!     maximum_packet_size: 32768,
//! };
//! let parsed = ConnectionMessage::from_bytes(&open.to_bytes()).unwrap();
//! assert_eq!(parsed, open);
//! ```

use crate::ssh::message::MessageType;
use crate::ssh::wire::{
    read_bool, read_bytes, read_string, read_u32, read_u8, write_bool, write_bytes, write_string,
};
use bytes::{BufMut, BytesMut};
use tether_platform::{TetherError, TetherResult};

/// Maximum window size (16 MB).
pub const MAX_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum packet size (256 KB).
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Channel type carried by SSH_MSG_CHANNEL_OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelType {
    /// Session channel (interactive shell, exec, subsystem).
    Session,
    /// Direct TCP/IP channel (local port forwarding).
    DirectTcpip {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Forwarded TCP/IP channel (remote port forwarding).
    ForwardedTcpip {
        /// Address that was connected
        connected_address: String,
        /// Port that was connected
        connected_port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// X11 channel opened by the server for a forwarded display connection.
    X11 {
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Any channel type the engine does not implement.
    Other(String),
}

impl ChannelType {
    /// Returns the channel type name.
    pub fn name(&self) -> &str {
        match self {
            ChannelType::Session => "session",
            ChannelType::DirectTcpip { .. } => "direct-tcpip",
            ChannelType::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelType::X11 { .. } => "x11",
            ChannelType::Other(name) => name,
        }
    }
}

/// Channel open failure reason codes (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelOpenFailureReason {
    /// Administratively prohibited
    AdministrativelyProhibited = 1,
    /// Connect failed
    ConnectFailed = 2,
    /// Unknown channel type
    UnknownChannelType = 3,
    /// Resource shortage
    ResourceShortage = 4,
}

impl ChannelOpenFailureReason {
    /// Converts from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    /// Returns the reason as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "Administratively prohibited",
            Self::ConnectFailed => "Connect failed",
            Self::UnknownChannelType => "Unknown channel type",
            Self::ResourceShortage => "Resource shortage",
        }
    }
}

/// Extended data type code (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExtendedDataType {
    /// Stderr data
    Stderr = 1,
}

/// Channel request carried by SSH_MSG_CHANNEL_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// Pseudo-terminal request
    PtyReq {
        /// TERM environment variable value (e.g. "vt100")
        term: String,
        /// Terminal width in characters
        width_chars: u32,
        /// Terminal height in rows
        height_rows: u32,
        /// Terminal width in pixels
        width_pixels: u32,
        /// Terminal height in pixels
        height_pixels: u32,
        /// Encoded terminal modes
        modes: Vec<u8>,
    },
    /// X11 forwarding request
    X11Req {
        /// Only forward a single connection
        single_connection: bool,
        /// Authentication protocol (e.g. "MIT-MAGIC-COOKIE-1")
        auth_protocol: String,
        /// Hex encoded authentication cookie
        auth_cookie: String,
        /// X11 screen number
        screen_number: u32,
    },
    /// Environment variable
    Env {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
    },
    /// Execute command
    Exec {
        /// Command to execute
        command: String,
    },
    /// Start interactive shell
    Shell,
    /// Start subsystem (e.g. "sftp")
    Subsystem {
        /// Subsystem name
        name: String,
    },
    /// Terminal dimensions changed
    WindowChange {
        /// Terminal width in characters
        width_chars: u32,
        /// Terminal height in rows
        height_rows: u32,
        /// Terminal width in pixels
        width_pixels: u32,
        /// Terminal height in pixels
        height_pixels: u32,
    },
    /// Deliver a signal to the remote process
    Signal {
        /// Signal name without the "SIG" prefix
        name: String,
    },
    /// Exit status
    ExitStatus {
        /// Exit status code
        exit_status: u32,
    },
    /// Exit signal
    ExitSignal {
        /// Signal name
        signal_name: String,
        /// Core dumped flag
        core_dumped: bool,
        /// Error message
        error_message: String,
        /// Language tag
        language_tag: String,
    },
    /// Request the engine does not interpret
    Other {
        /// Request name
        name: String,
        /// Raw request specific data
        data: Vec<u8>,
    },
}

impl ChannelRequestType {
    /// Returns the request type name.
    pub fn name(&self) -> &str {
        match self {
            ChannelRequestType::PtyReq { .. } => "pty-req",
            ChannelRequestType::X11Req { .. } => "x11-req",
            ChannelRequestType::Env { .. } => "env",
            ChannelRequestType::Exec { .. } => "exec",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::Subsystem { .. } => "subsystem",
            ChannelRequestType::WindowChange { .. } => "window-change",
            ChannelRequestType::Signal { .. } => "signal",
            ChannelRequestType::ExitStatus { .. } => "exit-status",
            ChannelRequestType::ExitSignal { .. } => "exit-signal",
            ChannelRequestType::Other { name, .. } => name,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            ChannelRequestType::PtyReq {
                term,
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
                modes,
            } => {
                write_string(buf, term);
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
                write_bytes(buf, modes);
            }
            ChannelRequestType::X11Req {
                single_connection,
                auth_protocol,
                auth_cookie,
                screen_number,
            } => {
                write_bool(buf, *single_connection);
                write_string(buf, auth_protocol);
                write_string(buf, auth_cookie);
                buf.put_u32(*screen_number);
            }
            ChannelRequestType::Env { name, value } => {
                write_string(buf, name);
                write_string(buf, value);
            }
            ChannelRequestType::Exec { command } => write_string(buf, command),
            ChannelRequestType::Shell => {}
            ChannelRequestType::Subsystem { name } => write_string(buf, name),
            ChannelRequestType::WindowChange {
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
            } => {
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
            }
            ChannelRequestType::Signal { name } => write_string(buf, name),
            ChannelRequestType::ExitStatus { exit_status } => buf.put_u32(*exit_status),
            ChannelRequestType::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                language_tag,
            } => {
                write_string(buf, signal_name);
                write_bool(buf, *core_dumped);
                write_string(buf, error_message);
                write_string(buf, language_tag);
            }
            ChannelRequestType::Other { data, .. } => buf.put_slice(data),
        }
    }

    fn decode(name: String, data: &[u8], offset: &mut usize) -> TetherResult<Self> {
        let request = match name.as_str() {
            "pty-req" => ChannelRequestType::PtyReq {
                term: read_string(data, offset)?,
                width_chars: read_u32(data, offset)?,
                height_rows: read_u32(data, offset)?,
                width_pixels: read_u32(data, offset)?,
                height_pixels: read_u32(data, offset)?,
                modes: read_bytes(data, offset)?,
            },
            "x11-req" => ChannelRequestType::X11Req {
                single_connection: read_bool(data, offset)?,
                auth_protocol: read_string(data, offset)?,
                auth_cookie: read_string(data, offset)?,
                screen_number: read_u32(data, offset)?,
            },
            "env" => ChannelRequestType::Env {
                name: read_string(data, offset)?,
                value: read_string(data, offset)?,
            },
            "exec" => ChannelRequestType::Exec {
                command: read_string(data, offset)?,
            },
            "shell" => ChannelRequestType::Shell,
            "subsystem" => ChannelRequestType::Subsystem {
                name: read_string(data, offset)?,
            },
            "window-change" => ChannelRequestType::WindowChange {
                width_chars: read_u32(data, offset)?,
                height_rows: read_u32(data, offset)?,
                width_pixels: read_u32(data, offset)?,
                height_pixels: read_u32(data, offset)?,
            },
            "signal" => ChannelRequestType::Signal {
                name: read_string(data, offset)?,
            },
            "exit-status" => ChannelRequestType::ExitStatus {
                exit_status: read_u32(data, offset)?,
            },
            "exit-signal" => ChannelRequestType::ExitSignal {
                signal_name: read_string(data, offset)?,
                core_dumped: read_bool(data, offset)?,
                error_message: read_string(data, offset)?,
                language_tag: read_string(data, offset)?,
            },
            _ => {
                let rest = data[*offset..].to_vec();
                *offset = data.len();
                ChannelRequestType::Other { name, data: rest }
            }
        };
        Ok(request)
    }
}

/// Global request carried by SSH_MSG_GLOBAL_REQUEST (RFC 4254 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalRequestType {
    /// Ask the server to listen on `address:port` and forward connections
    TcpipForward {
        /// Address to bind on the server
        address: String,
        /// Port to bind (0 lets the server choose)
        port: u32,
    },
    /// Stop a previous tcpip-forward
    CancelTcpipForward {
        /// Bound address
        address: String,
        /// Bound port
        port: u32,
    },
    /// Request the engine does not interpret (keepalive@openssh.com etc.)
    Other {
        /// Request name
        name: String,
        /// Raw request specific data
        data: Vec<u8>,
    },
}

impl GlobalRequestType {
    /// Returns the request name.
    pub fn name(&self) -> &str {
        match self {
            GlobalRequestType::TcpipForward { .. } => "tcpip-forward",
            GlobalRequestType::CancelTcpipForward { .. } => "cancel-tcpip-forward",
            GlobalRequestType::Other { name, .. } => name,
        }
    }
}

/// A connection protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMessage {
    /// SSH_MSG_GLOBAL_REQUEST (80)
    GlobalRequest {
        /// The request
        request: GlobalRequestType,
        /// Whether the sender expects a reply
        want_reply: bool,
    },
    /// SSH_MSG_REQUEST_SUCCESS (81); `data` holds request specific fields
    RequestSuccess {
        /// Response specific data (bound port for tcpip-forward with port 0)
        data: Vec<u8>,
    },
    /// SSH_MSG_REQUEST_FAILURE (82)
    RequestFailure,
    /// SSH_MSG_CHANNEL_OPEN (90)
    ChannelOpen {
        /// Channel type and type specific data
        channel_type: ChannelType,
        /// Sender channel number
        sender_channel: u32,
        /// Initial window size
        initial_window_size: u32,
        /// Maximum packet size
        maximum_packet_size: u32,
    },
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION (91)
    ChannelOpenConfirmation {
        /// Recipient channel number
        recipient_channel: u32,
        /// Sender channel number
        sender_channel: u32,
        /// Initial window size
        initial_window_size: u32,
        /// Maximum packet size
        maximum_packet_size: u32,
    },
    /// SSH_MSG_CHANNEL_OPEN_FAILURE (92)
    ChannelOpenFailure {
        /// Recipient channel number
        recipient_channel: u32,
        /// Reason code (see [`ChannelOpenFailureReason`])
        reason_code: u32,
        /// Description
        description: String,
    },
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST (93)
    ChannelWindowAdjust {
        /// Recipient channel number
        recipient_channel: u32,
        /// Bytes to add to the window
        bytes_to_add: u32,
    },
    /// SSH_MSG_CHANNEL_DATA (94)
    ChannelData {
        /// Recipient channel number
        recipient_channel: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// SSH_MSG_CHANNEL_EXTENDED_DATA (95)
    ChannelExtendedData {
        /// Recipient channel number
        recipient_channel: u32,
        /// Data type code (1 = stderr)
        data_type: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// SSH_MSG_CHANNEL_EOF (96)
    ChannelEof {
        /// Recipient channel number
        recipient_channel: u32,
    },
    /// SSH_MSG_CHANNEL_CLOSE (97)
    ChannelClose {
        /// Recipient channel number
        recipient_channel: u32,
    },
    /// SSH_MSG_CHANNEL_REQUEST (98)
    ChannelRequest {
        /// Recipient channel number
        recipient_channel: u32,
        /// The request
        request: ChannelRequestType,
        /// Whether the sender expects a reply
        want_reply: bool,
    },
    /// SSH_MSG_CHANNEL_SUCCESS (99)
    ChannelSuccess {
        /// Recipient channel number
        recipient_channel: u32,
    },
    /// SSH_MSG_CHANNEL_FAILURE (100)
    ChannelFailure {
        /// Recipient channel number
        recipient_channel: u32,
    },
}

impl ConnectionMessage {
    /// Returns the SSH message number of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ConnectionMessage::GlobalRequest { .. } => MessageType::GlobalRequest,
            ConnectionMessage::RequestSuccess { .. } => MessageType::RequestSuccess,
            ConnectionMessage::RequestFailure => MessageType::RequestFailure,
            ConnectionMessage::ChannelOpen { .. } => MessageType::ChannelOpen,
            ConnectionMessage::ChannelOpenConfirmation { .. } => {
                MessageType::ChannelOpenConfirmation
            }
            ConnectionMessage::ChannelOpenFailure { .. } => MessageType::ChannelOpenFailure,
            ConnectionMessage::ChannelWindowAdjust { .. } => MessageType::ChannelWindowAdjust,
            ConnectionMessage::ChannelData { .. } => MessageType::ChannelData,
            ConnectionMessage::ChannelExtendedData { .. } => MessageType::ChannelExtendedData,
            ConnectionMessage::ChannelEof { .. } => MessageType::ChannelEof,
            ConnectionMessage::ChannelClose { .. } => MessageType::ChannelClose,
            ConnectionMessage::ChannelRequest { .. } => MessageType::ChannelRequest,
            ConnectionMessage::ChannelSuccess { .. } => MessageType::ChannelSuccess,
            ConnectionMessage::ChannelFailure { .. } => MessageType::ChannelFailure,
        }
    }

    /// Returns the recipient channel for channel-scoped messages.
    pub fn recipient_channel(&self) -> Option<u32> {
        match self {
            ConnectionMessage::ChannelOpenConfirmation {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelOpenFailure {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelWindowAdjust {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelData {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelExtendedData {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelEof { recipient_channel }
            | ConnectionMessage::ChannelClose { recipient_channel }
            | ConnectionMessage::ChannelRequest {
                recipient_channel, ..
            }
            | ConnectionMessage::ChannelSuccess { recipient_channel }
            | ConnectionMessage::ChannelFailure { recipient_channel } => Some(*recipient_channel),
            _ => None,
        }
    }

    /// Serializes to bytes (message number first).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type() as u8);

        match self {
            ConnectionMessage::GlobalRequest {
                request,
                want_reply,
            } => {
                write_string(&mut buf, request.name());
                write_bool(&mut buf, *want_reply);
                match request {
                    GlobalRequestType::TcpipForward { address, port }
                    | GlobalRequestType::CancelTcpipForward { address, port } => {
                        write_string(&mut buf, address);
                        buf.put_u32(*port);
                    }
                    GlobalRequestType::Other { data, .. } => buf.put_slice(data),
                }
            }
            ConnectionMessage::RequestSuccess { data } => buf.put_slice(data),
            ConnectionMessage::RequestFailure => {}
            ConnectionMessage::ChannelOpen {
                channel_type,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => {
                write_string(&mut buf, channel_type.name());
                buf.put_u32(*sender_channel);
                buf.put_u32(*initial_window_size);
                buf.put_u32(*maximum_packet_size);
                match channel_type {
                    ChannelType::Session | ChannelType::Other(_) => {}
                    ChannelType::DirectTcpip {
                        host,
                        port,
                        originator_address,
                        originator_port,
                    } => {
                        write_string(&mut buf, host);
                        buf.put_u32(*port);
                        write_string(&mut buf, originator_address);
                        buf.put_u32(*originator_port);
                    }
                    ChannelType::ForwardedTcpip {
                        connected_address,
                        connected_port,
                        originator_address,
                        originator_port,
                    } => {
                        write_string(&mut buf, connected_address);
                        buf.put_u32(*connected_port);
                        write_string(&mut buf, originator_address);
                        buf.put_u32(*originator_port);
                    }
                    ChannelType::X11 {
                        originator_address,
                        originator_port,
                    } => {
                        write_string(&mut buf, originator_address);
                        buf.put_u32(*originator_port);
                    }
                }
            }
            ConnectionMessage::ChannelOpenConfirmation {
                recipient_channel,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => {
                buf.put_u32(*recipient_channel);
                buf.put_u32(*sender_channel);
                buf.put_u32(*initial_window_size);
                buf.put_u32(*maximum_packet_size);
            }
            ConnectionMessage::ChannelOpenFailure {
                recipient_channel,
                reason_code,
                description,
            } => {
                buf.put_u32(*recipient_channel);
                buf.put_u32(*reason_code);
                write_string(&mut buf, description);
                write_string(&mut buf, "");
            }
            ConnectionMessage::ChannelWindowAdjust {
                recipient_channel,
                bytes_to_add,
            } => {
                buf.put_u32(*recipient_channel);
                buf.put_u32(*bytes_to_add);
            }
            ConnectionMessage::ChannelData {
                recipient_channel,
                data,
            } => {
                buf.put_u32(*recipient_channel);
                write_bytes(&mut buf, data);
            }
            ConnectionMessage::ChannelExtendedData {
                recipient_channel,
                data_type,
                data,
            } => {
                buf.put_u32(*recipient_channel);
                buf.put_u32(*data_type);
                write_bytes(&mut buf, data);
            }
            ConnectionMessage::ChannelEof { recipient_channel }
            | ConnectionMessage::ChannelClose { recipient_channel }
            | ConnectionMessage::ChannelSuccess { recipient_channel }
            | ConnectionMessage::ChannelFailure { recipient_channel } => {
                buf.put_u32(*recipient_channel);
            }
            ConnectionMessage::ChannelRequest {
                recipient_channel,
                request,
                want_reply,
            } => {
                buf.put_u32(*recipient_channel);
                write_string(&mut buf, request.name());
                write_bool(&mut buf, *want_reply);
                request.encode(&mut buf);
            }
        }

        buf.to_vec()
    }

    /// Parses a connection protocol message.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Protocol`] if the message number is not a
    /// connection message or the body is truncated.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut offset = 0;
        let number = read_u8(data, &mut offset)
            .map_err(|_| TetherError::Protocol("Connection message is empty".to_string()))?;
        let msg_type = MessageType::from_u8(number)
            .filter(MessageType::is_connection)
            .ok_or_else(|| {
                TetherError::Protocol(format!("Not a connection message: {}", number))
            })?;

        let message = match msg_type {
            MessageType::GlobalRequest => {
                let name = read_string(data, &mut offset)?;
                let want_reply = read_bool(data, &mut offset)?;
                let request = match name.as_str() {
                    "tcpip-forward" => GlobalRequestType::TcpipForward {
                        address: read_string(data, &mut offset)?,
                        port: read_u32(data, &mut offset)?,
                    },
                    "cancel-tcpip-forward" => GlobalRequestType::CancelTcpipForward {
                        address: read_string(data, &mut offset)?,
                        port: read_u32(data, &mut offset)?,
                    },
                    _ => GlobalRequestType::Other {
                        name,
                        data: data[offset..].to_vec(),
                    },
                };
                ConnectionMessage::GlobalRequest {
                    request,
                    want_reply,
                }
            }
            MessageType::RequestSuccess => ConnectionMessage::RequestSuccess {
                data: data[offset..].to_vec(),
            },
            MessageType::RequestFailure => ConnectionMessage::RequestFailure,
            MessageType::ChannelOpen => {
                let type_name = read_string(data, &mut offset)?;
                let sender_channel = read_u32(data, &mut offset)?;
                let initial_window_size = read_u32(data, &mut offset)?;
                let maximum_packet_size = read_u32(data, &mut offset)?;
                let channel_type = match type_name.as_str() {
                    "session" => ChannelType::Session,
                    "direct-tcpip" => ChannelType::DirectTcpip {
                        host: read_string(data, &mut offset)?,
                        port: read_u32(data, &mut offset)?,
                        originator_address: read_string(data, &mut offset)?,
                        originator_port: read_u32(data, &mut offset)?,
                    },
                    "forwarded-tcpip" => ChannelType::ForwardedTcpip {
                        connected_address: read_string(data, &mut offset)?,
                        connected_port: read_u32(data, &mut offset)?,
                        originator_address: read_string(data, &mut offset)?,
                        originator_port: read_u32(data, &mut offset)?,
                    },
                    "x11" => ChannelType::X11 {
                        originator_address: read_string(data, &mut offset)?,
                        originator_port: read_u32(data, &mut offset)?,
                    },
                    _ => ChannelType::Other(type_name),
                };
                ConnectionMessage::ChannelOpen {
                    channel_type,
                    sender_channel,
                    initial_window_size,
                    maximum_packet_size,
                }
            }
            MessageType::ChannelOpenConfirmation => ConnectionMessage::ChannelOpenConfirmation {
                recipient_channel: read_u32(data, &mut offset)?,
                sender_channel: read_u32(data, &mut offset)?,
                initial_window_size: read_u32(data, &mut offset)?,
                maximum_packet_size: read_u32(data, &mut offset)?,
            },
            MessageType::ChannelOpenFailure => {
                let recipient_channel = read_u32(data, &mut offset)?;
                let reason_code = read_u32(data, &mut offset)?;
                let description = read_string(data, &mut offset)?;
                ConnectionMessage::ChannelOpenFailure {
                    recipient_channel,
                    reason_code,
                    description,
                }
            }
            MessageType::ChannelWindowAdjust => ConnectionMessage::ChannelWindowAdjust {
                recipient_channel: read_u32(data, &mut offset)?,
                bytes_to_add: read_u32(data, &mut offset)?,
            },
            MessageType::ChannelData => ConnectionMessage::ChannelData {
                recipient_channel: read_u32(data, &mut offset)?,
                data: read_bytes(data, &mut offset)?,
            },
            MessageType::ChannelExtendedData => ConnectionMessage::ChannelExtendedData {
                recipient_channel: read_u32(data, &mut offset)?,
                data_type: read_u32(data, &mut offset)?,
                data: read_bytes(data, &mut offset)?,
            },
            MessageType::ChannelEof => ConnectionMessage::ChannelEof {
                recipient_channel: read_u32(data, &mut offset)?,
            },
            MessageType::ChannelClose => ConnectionMessage::ChannelClose {
                recipient_channel: read_u32(data, &mut offset)?,
            },
            MessageType::ChannelRequest => {
                let recipient_channel = read_u32(data, &mut offset)?;
                let name = read_string(data, &mut offset)?;
                let want_reply = read_bool(data, &mut offset)?;
                let request = ChannelRequestType::decode(name, data, &mut offset)?;
                ConnectionMessage::ChannelRequest {
                    recipient_channel,
                    request,
                    want_reply,
                }
            }
            MessageType::ChannelSuccess => ConnectionMessage::ChannelSuccess {
                recipient_channel: read_u32(data, &mut offset)?,
            },
            MessageType::ChannelFailure => ConnectionMessage::ChannelFailure {
                recipient_channel: read_u32(data, &mut offset)?,
            },
            other => {
                return Err(TetherError::Protocol(format!(
                    "Unexpected connection message {}",
                    other
                )))
            }
        };

        Ok(message)
    }
}

/// Encodes a CHANNEL_DATA or CHANNEL_EXTENDED_DATA payload without building
/// an intermediate message.
pub(crate) fn encode_data(recipient_channel: u32, stream: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(data.len() + 13);
    if stream == 0 {
        buf.put_u8(MessageType::ChannelData as u8);
        buf.put_u32(recipient_channel);
    } else {
        buf.put_u8(MessageType::ChannelExtendedData as u8);
        buf.put_u32(recipient_channel);
        buf.put_u32(stream);
    }
    write_bytes(&mut buf, data);
    buf.to_vec()
}
