//! SFTP protocol messages.
//!
//! Every SFTP packet travels inside channel data as
//!
//! ```text
//! uint32    length
//! byte      type
//! byte[n]   payload
//! ```
//!
//! Requests other than INIT start their payload with a request id that the
//! matching response echoes.

use super::types::{DirEntry, FileAttributes, SftpErrorCode};
use crate::ssh::wire::{read_bytes, read_string, read_u32, read_u64, write_bytes, write_string};
use bytes::{Buf, BufMut, BytesMut};
use tether_platform::{TetherError, TetherResult};

/// SFTP protocol version (v3).
pub const SFTP_VERSION: u32 = 3;

/// Largest SFTP packet accepted from the server.
pub const MAX_SFTP_PACKET: usize = 256 * 1024;

/// SFTP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SftpMessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_LSTAT - Get file attributes (no follow symlinks)
    LStat = 7,
    /// SSH_FXP_FSTAT - Get file attributes by handle
    FStat = 8,
    /// SSH_FXP_SETSTAT - Set file attributes
    SetStat = 9,
    /// SSH_FXP_FSETSTAT - Set file attributes by handle
    FSetStat = 10,
    /// SSH_FXP_OPENDIR - Open directory
    OpenDir = 11,
    /// SSH_FXP_READDIR - Read directory
    ReadDir = 12,
    /// SSH_FXP_REMOVE - Remove file
    Remove = 13,
    /// SSH_FXP_MKDIR - Create directory
    MkDir = 14,
    /// SSH_FXP_RMDIR - Remove directory
    RmDir = 15,
    /// SSH_FXP_REALPATH - Canonicalize path
    RealPath = 16,
    /// SSH_FXP_STAT - Get file attributes
    Stat = 17,
    /// SSH_FXP_RENAME - Rename file/directory
    Rename = 18,
    /// SSH_FXP_READLINK - Read symbolic link
    ReadLink = 19,
    /// SSH_FXP_SYMLINK - Create symbolic link
    Symlink = 20,

    // Response messages
    /// SSH_FXP_STATUS - Status response
    Status = 101,
    /// SSH_FXP_HANDLE - File handle response
    Handle = 102,
    /// SSH_FXP_DATA - Data response
    Data = 103,
    /// SSH_FXP_NAME - Name response
    Name = 104,
    /// SSH_FXP_ATTRS - Attributes response
    Attrs = 105,

    // Extended messages
    /// SSH_FXP_EXTENDED - Extended request
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY - Extended response
    ExtendedReply = 201,
}

impl SftpMessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::LStat),
            8 => Some(Self::FStat),
            9 => Some(Self::SetStat),
            10 => Some(Self::FSetStat),
            11 => Some(Self::OpenDir),
            12 => Some(Self::ReadDir),
            13 => Some(Self::Remove),
            14 => Some(Self::MkDir),
            15 => Some(Self::RmDir),
            16 => Some(Self::RealPath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::ReadLink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }
}

/// One SFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpMessage {
    /// Message type
    pub msg_type: SftpMessageType,
    /// Message payload
    pub payload: Vec<u8>,
}

impl SftpMessage {
    /// Creates a new SFTP message.
    pub fn new(msg_type: SftpMessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Serializes to bytes, length prefix included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        buf.extend_from_slice(&((self.payload.len() + 1) as u32).to_be_bytes());
        buf.push(self.msg_type as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses one complete packet.
    pub fn from_bytes(data: &[u8]) -> TetherResult<Self> {
        let mut buf = BytesMut::from(data);
        Self::decode(&mut buf)?
            .ok_or_else(|| TetherError::Protocol("SFTP message incomplete".to_string()))
    }

    /// Removes one packet from the front of `buf` once it is complete.
    pub fn decode(buf: &mut BytesMut) -> TetherResult<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length == 0 || length > MAX_SFTP_PACKET {
            return Err(TetherError::Protocol(format!(
                "Invalid SFTP packet length {}",
                length
            )));
        }
        if buf.len() < 4 + length {
            return Ok(None);
        }
        buf.advance(4);
        let body = buf.split_to(length);
        let msg_type = SftpMessageType::from_u8(body[0]).ok_or_else(|| {
            TetherError::Protocol(format!("Unknown SFTP message type: {}", body[0]))
        })?;
        Ok(Some(Self {
            msg_type,
            payload: body[1..].to_vec(),
        }))
    }
}

/// Client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpRequest {
    /// SSH_FXP_INIT
    Init {
        /// Highest version the client speaks
        version: u32,
    },
    /// SSH_FXP_OPEN
    Open {
        /// File path
        path: String,
        /// SSH_FXF_* flags
        flags: u32,
        /// Attributes for a created file
        attrs: FileAttributes,
    },
    /// SSH_FXP_CLOSE
    Close {
        /// Server handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_READ
    Read {
        /// Server handle
        handle: Vec<u8>,
        /// File offset
        offset: u64,
        /// Bytes wanted
        len: u32,
    },
    /// SSH_FXP_WRITE
    Write {
        /// Server handle
        handle: Vec<u8>,
        /// File offset
        offset: u64,
        /// Bytes to write
        data: Vec<u8>,
    },
    /// SSH_FXP_LSTAT
    LStat {
        /// Path, symlinks not followed
        path: String,
    },
    /// SSH_FXP_FSTAT
    FStat {
        /// Server handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_SETSTAT
    SetStat {
        /// Path
        path: String,
        /// Fields to change
        attrs: FileAttributes,
    },
    /// SSH_FXP_OPENDIR
    OpenDir {
        /// Directory path
        path: String,
    },
    /// SSH_FXP_READDIR
    ReadDir {
        /// Server handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_REMOVE
    Remove {
        /// File path
        path: String,
    },
    /// SSH_FXP_MKDIR
    MkDir {
        /// Directory path
        path: String,
        /// Attributes of the new directory
        attrs: FileAttributes,
    },
    /// SSH_FXP_RMDIR
    RmDir {
        /// Directory path
        path: String,
    },
    /// SSH_FXP_REALPATH
    RealPath {
        /// Path to canonicalize
        path: String,
    },
    /// SSH_FXP_STAT
    Stat {
        /// Path, symlinks followed
        path: String,
    },
    /// SSH_FXP_RENAME
    Rename {
        /// Existing path
        old_path: String,
        /// New path
        new_path: String,
    },
    /// SSH_FXP_READLINK
    ReadLink {
        /// Link path
        path: String,
    },
    /// SSH_FXP_SYMLINK
    ///
    /// Sent target first, the order OpenSSH servers read.
    Symlink {
        /// What the link points to
        target: String,
        /// Path of the link to create
        link_path: String,
    },
    /// SSH_FXP_EXTENDED
    Extended {
        /// Extension name, e.g. "posix-rename@openssh.com"
        name: String,
        /// Extension specific data
        data: Vec<u8>,
    },
}

impl SftpRequest {
    /// Message type of the request.
    pub fn msg_type(&self) -> SftpMessageType {
        match self {
            SftpRequest::Init { .. } => SftpMessageType::Init,
            SftpRequest::Open { .. } => SftpMessageType::Open,
            SftpRequest::Close { .. } => SftpMessageType::Close,
            SftpRequest::Read { .. } => SftpMessageType::Read,
            SftpRequest::Write { .. } => SftpMessageType::Write,
            SftpRequest::LStat { .. } => SftpMessageType::LStat,
            SftpRequest::FStat { .. } => SftpMessageType::FStat,
            SftpRequest::SetStat { .. } => SftpMessageType::SetStat,
            SftpRequest::OpenDir { .. } => SftpMessageType::OpenDir,
            SftpRequest::ReadDir { .. } => SftpMessageType::ReadDir,
            SftpRequest::Remove { .. } => SftpMessageType::Remove,
            SftpRequest::MkDir { .. } => SftpMessageType::MkDir,
            SftpRequest::RmDir { .. } => SftpMessageType::RmDir,
            SftpRequest::RealPath { .. } => SftpMessageType::RealPath,
            SftpRequest::Stat { .. } => SftpMessageType::Stat,
            SftpRequest::Rename { .. } => SftpMessageType::Rename,
            SftpRequest::ReadLink { .. } => SftpMessageType::ReadLink,
            SftpRequest::Symlink { .. } => SftpMessageType::Symlink,
            SftpRequest::Extended { .. } => SftpMessageType::Extended,
        }
    }

    /// Builds the packet for request id `id`. INIT carries no id.
    pub fn to_message(&self, id: u32) -> SftpMessage {
        let mut buf = BytesMut::new();
        match self {
            SftpRequest::Init { version } => buf.put_u32(*version),
            _ => buf.put_u32(id),
        }
        match self {
            SftpRequest::Init { .. } => {}
            SftpRequest::Open { path, flags, attrs } => {
                write_string(&mut buf, path);
                buf.put_u32(*flags);
                attrs.write(&mut buf);
            }
            SftpRequest::Close { handle }
            | SftpRequest::FStat { handle }
            | SftpRequest::ReadDir { handle } => write_bytes(&mut buf, handle),
            SftpRequest::Read {
                handle,
                offset,
                len,
            } => {
                write_bytes(&mut buf, handle);
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            SftpRequest::Write {
                handle,
                offset,
                data,
            } => {
                write_bytes(&mut buf, handle);
                buf.put_u64(*offset);
                write_bytes(&mut buf, data);
            }
            SftpRequest::LStat { path }
            | SftpRequest::OpenDir { path }
            | SftpRequest::Remove { path }
            | SftpRequest::RmDir { path }
            | SftpRequest::RealPath { path }
            | SftpRequest::Stat { path }
            | SftpRequest::ReadLink { path } => write_string(&mut buf, path),
            SftpRequest::SetStat { path, attrs } | SftpRequest::MkDir { path, attrs } => {
                write_string(&mut buf, path);
                attrs.write(&mut buf);
            }
            SftpRequest::Rename { old_path, new_path } => {
                write_string(&mut buf, old_path);
                write_string(&mut buf, new_path);
            }
            SftpRequest::Symlink { target, link_path } => {
                write_string(&mut buf, target);
                write_string(&mut buf, link_path);
            }
            SftpRequest::Extended { name, data } => {
                write_string(&mut buf, name);
                buf.put_slice(data);
            }
        }
        SftpMessage::new(self.msg_type(), buf.to_vec())
    }

    /// Parses a request packet, returning its id (0 for INIT).
    pub fn from_message(message: &SftpMessage) -> TetherResult<(u32, Self)> {
        let data = &message.payload;
        let mut offset = 0;
        let first = read_u32(data, &mut offset)?;
        let o = &mut offset;
        let request = match message.msg_type {
            SftpMessageType::Init => return Ok((0, SftpRequest::Init { version: first })),
            SftpMessageType::Open => SftpRequest::Open {
                path: read_string(data, o)?,
                flags: read_u32(data, o)?,
                attrs: FileAttributes::read(data, o)?,
            },
            SftpMessageType::Close => SftpRequest::Close {
                handle: read_bytes(data, o)?,
            },
            SftpMessageType::Read => SftpRequest::Read {
                handle: read_bytes(data, o)?,
                offset: read_u64(data, o)?,
                len: read_u32(data, o)?,
            },
            SftpMessageType::Write => SftpRequest::Write {
                handle: read_bytes(data, o)?,
                offset: read_u64(data, o)?,
                data: read_bytes(data, o)?,
            },
            SftpMessageType::LStat => SftpRequest::LStat {
                path: read_string(data, o)?,
            },
            SftpMessageType::FStat => SftpRequest::FStat {
                handle: read_bytes(data, o)?,
            },
            SftpMessageType::SetStat => SftpRequest::SetStat {
                path: read_string(data, o)?,
                attrs: FileAttributes::read(data, o)?,
            },
            SftpMessageType::OpenDir => SftpRequest::OpenDir {
                path: read_string(data, o)?,
            },
            SftpMessageType::ReadDir => SftpRequest::ReadDir {
                handle: read_bytes(data, o)?,
            },
            SftpMessageType::Remove => SftpRequest::Remove {
                path: read_string(data, o)?,
            },
            SftpMessageType::MkDir => SftpRequest::MkDir {
                path: read_string(data, o)?,
                attrs: FileAttributes::read(data, o)?,
            },
            SftpMessageType::RmDir => SftpRequest::RmDir {
                path: read_string(data, o)?,
            },
            SftpMessageType::RealPath => SftpRequest::RealPath {
                path: read_string(data, o)?,
            },
            SftpMessageType::Stat => SftpRequest::Stat {
                path: read_string(data, o)?,
            },
            SftpMessageType::Rename => SftpRequest::Rename {
                old_path: read_string(data, o)?,
                new_path: read_string(data, o)?,
            },
            SftpMessageType::ReadLink => SftpRequest::ReadLink {
                path: read_string(data, o)?,
            },
            SftpMessageType::Symlink => SftpRequest::Symlink {
                target: read_string(data, o)?,
                link_path: read_string(data, o)?,
            },
            SftpMessageType::Extended => SftpRequest::Extended {
                name: read_string(data, o)?,
                data: data[*o..].to_vec(),
            },
            other => {
                return Err(TetherError::Protocol(format!(
                    "{:?} is not an SFTP request",
                    other
                )))
            }
        };
        Ok((first, request))
    }
}

/// Server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpResponse {
    /// SSH_FXP_VERSION
    Version {
        /// Protocol version chosen by the server
        version: u32,
        /// Extensions as (name, data) pairs
        extensions: Vec<(String, String)>,
    },
    /// SSH_FXP_STATUS
    Status {
        /// Request id
        id: u32,
        /// SSH_FX_* code
        code: u32,
        /// Error message
        message: String,
    },
    /// SSH_FXP_HANDLE
    Handle {
        /// Request id
        id: u32,
        /// Opaque server handle
        handle: Vec<u8>,
    },
    /// SSH_FXP_DATA
    Data {
        /// Request id
        id: u32,
        /// Bytes read
        data: Vec<u8>,
    },
    /// SSH_FXP_NAME
    Name {
        /// Request id
        id: u32,
        /// Names returned
        entries: Vec<DirEntry>,
    },
    /// SSH_FXP_ATTRS
    Attrs {
        /// Request id
        id: u32,
        /// Attributes
        attrs: FileAttributes,
    },
    /// SSH_FXP_EXTENDED_REPLY
    ExtendedReply {
        /// Request id
        id: u32,
        /// Extension specific data
        data: Vec<u8>,
    },
}

impl SftpResponse {
    /// Request id the response answers; `None` for VERSION.
    pub fn id(&self) -> Option<u32> {
        match self {
            SftpResponse::Version { .. } => None,
            SftpResponse::Status { id, .. }
            | SftpResponse::Handle { id, .. }
            | SftpResponse::Data { id, .. }
            | SftpResponse::Name { id, .. }
            | SftpResponse::Attrs { id, .. }
            | SftpResponse::ExtendedReply { id, .. } => Some(*id),
        }
    }

    /// Status response for `id`.
    pub fn status(id: u32, code: SftpErrorCode, message: &str) -> Self {
        SftpResponse::Status {
            id,
            code: code as u32,
            message: message.to_string(),
        }
    }

    /// Succeeds on SSH_FX_OK and maps any other status to an error.
    pub fn into_status(self) -> TetherResult<()> {
        match self {
            SftpResponse::Status { code: 0, .. } => Ok(()),
            SftpResponse::Status { code, message, .. } => Err(status_error(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Builds the packet.
    pub fn to_message(&self) -> SftpMessage {
        let mut buf = BytesMut::new();
        let msg_type = match self {
            SftpResponse::Version {
                version,
                extensions,
            } => {
                buf.put_u32(*version);
                for (name, data) in extensions {
                    write_string(&mut buf, name);
                    write_string(&mut buf, data);
                }
                SftpMessageType::Version
            }
            SftpResponse::Status { id, code, message } => {
                buf.put_u32(*id);
                buf.put_u32(*code);
                write_string(&mut buf, message);
                write_string(&mut buf, "en");
                SftpMessageType::Status
            }
            SftpResponse::Handle { id, handle } => {
                buf.put_u32(*id);
                write_bytes(&mut buf, handle);
                SftpMessageType::Handle
            }
            SftpResponse::Data { id, data } => {
                buf.put_u32(*id);
                write_bytes(&mut buf, data);
                SftpMessageType::Data
            }
            SftpResponse::Name { id, entries } => {
                buf.put_u32(*id);
                buf.put_u32(entries.len() as u32);
                for entry in entries {
                    write_string(&mut buf, &entry.filename);
                    write_string(&mut buf, &entry.longname);
                    entry.attrs.write(&mut buf);
                }
                SftpMessageType::Name
            }
            SftpResponse::Attrs { id, attrs } => {
                buf.put_u32(*id);
                attrs.write(&mut buf);
                SftpMessageType::Attrs
            }
            SftpResponse::ExtendedReply { id, data } => {
                buf.put_u32(*id);
                buf.put_slice(data);
                SftpMessageType::ExtendedReply
            }
        };
        SftpMessage::new(msg_type, buf.to_vec())
    }

    /// Parses a response packet.
    pub fn from_message(message: &SftpMessage) -> TetherResult<Self> {
        let data = &message.payload;
        let mut offset = 0;
        let first = read_u32(data, &mut offset)?;
        let o = &mut offset;
        Ok(match message.msg_type {
            SftpMessageType::Version => {
                let mut extensions = Vec::new();
                while *o < data.len() {
                    let name = read_string(data, o)?;
                    let value = read_string(data, o)?;
                    extensions.push((name, value));
                }
                SftpResponse::Version {
                    version: first,
                    extensions,
                }
            }
            SftpMessageType::Status => {
                let code = read_u32(data, o)?;
                // Some v3 servers omit the message and language tag.
                let message = if *o < data.len() {
                    read_string(data, o)?
                } else {
                    String::new()
                };
                SftpResponse::Status {
                    id: first,
                    code,
                    message,
                }
            }
            SftpMessageType::Handle => SftpResponse::Handle {
                id: first,
                handle: read_bytes(data, o)?,
            },
            SftpMessageType::Data => SftpResponse::Data {
                id: first,
                data: read_bytes(data, o)?,
            },
            SftpMessageType::Name => {
                let count = read_u32(data, o)?;
                if count as usize > data.len() / 12 + 1 {
                    return Err(TetherError::Protocol(format!(
                        "SFTP NAME count {} exceeds packet",
                        count
                    )));
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(DirEntry {
                        filename: read_string(data, o)?,
                        longname: read_string(data, o)?,
                        attrs: FileAttributes::read(data, o)?,
                    });
                }
                SftpResponse::Name { id: first, entries }
            }
            SftpMessageType::Attrs => SftpResponse::Attrs {
                id: first,
                attrs: FileAttributes::read(data, o)?,
            },
            SftpMessageType::ExtendedReply => SftpResponse::ExtendedReply {
                id: first,
                data: data[*o..].to_vec(),
            },
            other => {
                return Err(TetherError::Protocol(format!(
                    "{:?} is not an SFTP response",
                    other
                )))
            }
        })
    }
}

/// Maps a non-OK status to an error.
pub(crate) fn status_error(code: u32, message: String) -> TetherError {
    match SftpErrorCode::from_u32(code) {
        Some(known) => known.to_error(message),
        None => TetherError::Sftp { code, message },
    }
}

pub(crate) fn unexpected(response: &SftpResponse) -> TetherError {
    TetherError::Protocol(format!(
        "Unexpected SFTP reply {:?}",
        response.to_message().msg_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(SftpMessageType::from_u8(1), Some(SftpMessageType::Init));
        assert_eq!(SftpMessageType::from_u8(101), Some(SftpMessageType::Status));
        assert_eq!(SftpMessageType::from_u8(255), None);
    }

    #[test]
    fn test_message_serialization() {
        let msg = SftpMessage::new(SftpMessageType::Init, vec![0, 0, 0, 3]);
        let bytes = msg.to_bytes();

        // length (4) + type (1) + payload (4)
        assert_eq!(bytes.len(), 9);
        assert_eq!(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 5);
        assert_eq!(bytes[4], SftpMessageType::Init as u8);
    }

    #[test]
    fn test_decode_waits_for_complete_packet() {
        let bytes = SftpResponse::status(7, SftpErrorCode::Eof, "done")
            .to_message()
            .to_bytes();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert!(SftpMessage::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        buf.extend_from_slice(&[0, 0]);
        let message = SftpMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(message.msg_type, SftpMessageType::Status);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_rejects_oversized_packet() {
        let mut buf = BytesMut::from(&[0x10u8, 0, 0, 0, 101][..]);
        assert!(SftpMessage::decode(&mut buf).is_err());
    }

    #[test]
    fn test_request_ids() {
        let request = SftpRequest::Read {
            handle: b"h1".to_vec(),
            offset: 4096,
            len: 512,
        };
        let (id, parsed) = SftpRequest::from_message(&request.to_message(42)).unwrap();
        assert_eq!(id, 42);
        assert_eq!(parsed, request);

        let init = SftpRequest::Init { version: 3 }.to_message(99);
        assert_eq!(init.payload, vec![0, 0, 0, 3]);
    }

    #[test]
    fn test_symlink_sends_target_first() {
        let message = SftpRequest::Symlink {
            target: "/data".to_string(),
            link_path: "/link".to_string(),
        }
        .to_message(1);
        let mut offset = 4;
        assert_eq!(read_string(&message.payload, &mut offset).unwrap(), "/data");
    }

    #[test]
    fn test_status_without_message() {
        let message = SftpMessage::new(SftpMessageType::Status, vec![0, 0, 0, 5, 0, 0, 0, 2]);
        let response = SftpResponse::from_message(&message).unwrap();
        assert_eq!(response.id(), Some(5));
        match response.into_status() {
            Err(TetherError::Sftp { code, .. }) => assert_eq!(code, 2),
            other => panic!("Expected Sftp error, got {:?}", other),
        }
    }

    #[test]
    fn test_version_extensions() {
        let response = SftpResponse::Version {
            version: 3,
            extensions: vec![("posix-rename@openssh.com".to_string(), "1".to_string())],
        };
        let parsed = SftpResponse::from_message(&response.to_message()).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.id(), None);
    }
}
