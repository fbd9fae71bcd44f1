//! SFTP data types and structures.

use crate::ssh::wire::{read_string, read_u32, read_u64, write_string};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::ops::BitOr;
use tether_platform::{TetherError, TetherResult};

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SftpErrorCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl SftpErrorCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns error message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file or directory",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }

    /// Builds the error reported for this status.
    pub fn to_error(self, message: impl Into<String>) -> TetherError {
        let message = message.into();
        TetherError::Sftp {
            code: self as u32,
            message: if message.is_empty() {
                self.message().to_string()
            } else {
                message
            },
        }
    }
}

/// File type derived from the permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Special file
    Special,
    /// Unknown type
    Unknown,
}

/// File open flags (SSH_FXF_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: OpenFlags = OpenFlags(0x0000_0001);
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: OpenFlags = OpenFlags(0x0000_0002);
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: OpenFlags = OpenFlags(0x0000_0004);
    /// SSH_FXF_CREAT - Create if doesn't exist
    pub const CREAT: OpenFlags = OpenFlags(0x0000_0008);
    /// SSH_FXF_TRUNC - Truncate to 0 length
    pub const TRUNC: OpenFlags = OpenFlags(0x0000_0010);
    /// SSH_FXF_EXCL - Fail if file exists
    pub const EXCL: OpenFlags = OpenFlags(0x0000_0020);

    /// Translates an `fopen`-style mode string.
    ///
    /// | mode | flags |
    /// |------|-------|
    /// | `r`  | READ |
    /// | `w`  | WRITE, CREAT, TRUNC |
    /// | `a`  | WRITE, CREAT, APPEND |
    /// | `x`  | WRITE, CREAT, EXCL |
    ///
    /// A trailing `+` adds the other direction; `b` is accepted and ignored.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tether_proto::ssh::sftp::OpenFlags;
    ///
    /// let flags = OpenFlags::from_mode("w+").unwrap();
    /// assert!(flags.contains(OpenFlags::READ | OpenFlags::TRUNC));
    /// ```
    pub fn from_mode(mode: &str) -> TetherResult<Self> {
        let mut chars = mode.chars().filter(|c| *c != 'b');
        let base = match chars.next() {
            Some('r') => Self::READ,
            Some('w') => Self::WRITE | Self::CREAT | Self::TRUNC,
            Some('a') => Self::WRITE | Self::CREAT | Self::APPEND,
            Some('x') => Self::WRITE | Self::CREAT | Self::EXCL,
            _ => {
                return Err(TetherError::InvalidInput(format!(
                    "Invalid open mode '{}'",
                    mode
                )))
            }
        };
        match (chars.next(), chars.next()) {
            (None, None) => Ok(base),
            (Some('+'), None) => Ok(base | Self::READ | Self::WRITE),
            _ => Err(TetherError::InvalidInput(format!(
                "Invalid open mode '{}'",
                mode
            ))),
        }
    }

    /// Returns true if every flag in `other` is set.
    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw SSH_FXF_* bits.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// File mode (permissions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    /// File type mask
    pub const TYPE_MASK: u32 = 0o170000;
    /// Directory
    pub const DIRECTORY: u32 = 0o040000;
    /// Regular file
    pub const REGULAR: u32 = 0o100000;
    /// Symbolic link
    pub const SYMLINK: u32 = 0o120000;

    /// Default file permissions (0644 = rw-r--r--)
    pub const DEFAULT_FILE: u32 = 0o644;
    /// Default directory permissions (0755 = rwxr-xr-x)
    pub const DEFAULT_DIR: u32 = 0o755;

    /// Returns the file type encoded in the mode.
    pub fn file_type(self) -> FileType {
        match self.0 & Self::TYPE_MASK {
            0 => FileType::Unknown,
            Self::DIRECTORY => FileType::Directory,
            Self::REGULAR => FileType::Regular,
            Self::SYMLINK => FileType::Symlink,
            _ => FileType::Special,
        }
    }
}

/// File attribute flags.
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File attributes.
///
/// Only the fields that are set are sent. `uid`/`gid` and `atime`/`mtime`
/// travel as pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// Permissions
    pub permissions: Option<FileMode>,
    /// Access time (Unix timestamp)
    pub atime: Option<u32>,
    /// Modification time (Unix timestamp)
    pub mtime: Option<u32>,
    /// Extended attributes
    pub extended: Vec<(String, String)>,
}

impl FileAttributes {
    /// Creates empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the permission bits.
    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(FileMode(mode));
        self
    }

    /// Sets owner and group.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Sets access and modification times.
    pub fn with_times(mut self, atime: u32, mtime: u32) -> Self {
        self.atime = Some(atime);
        self.mtime = Some(mtime);
        self
    }

    /// Returns the file type, if permissions are known.
    pub fn file_type(&self) -> FileType {
        self.permissions
            .map(FileMode::file_type)
            .unwrap_or(FileType::Unknown)
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Checks that paired fields are complete.
    pub fn validate(&self) -> TetherResult<()> {
        if self.uid.is_some() != self.gid.is_some() {
            return Err(TetherError::InvalidInput(
                "uid and gid must be set together".to_string(),
            ));
        }
        if self.atime.is_some() != self.mtime.is_some() {
            return Err(TetherError::InvalidInput(
                "atime and mtime must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write(&mut buf);
        buf.to_vec()
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= AttrFlags::EXTENDED;
        }
        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions.0);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if !self.extended.is_empty() {
            buf.put_u32(self.extended.len() as u32);
            for (name, value) in &self.extended {
                write_string(buf, name);
                write_string(buf, value);
            }
        }
    }

    /// Parses from bytes, returning the attributes and the bytes consumed.
    pub fn from_bytes(data: &[u8]) -> TetherResult<(Self, usize)> {
        let mut offset = 0;
        let attrs = Self::read(data, &mut offset)?;
        Ok((attrs, offset))
    }

    pub(crate) fn read(data: &[u8], offset: &mut usize) -> TetherResult<Self> {
        let flags = read_u32(data, offset)?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(read_u64(data, offset)?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(read_u32(data, offset)?);
            attrs.gid = Some(read_u32(data, offset)?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(FileMode(read_u32(data, offset)?));
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(read_u32(data, offset)?);
            attrs.mtime = Some(read_u32(data, offset)?);
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = read_u32(data, offset)?;
            if count > 1024 {
                return Err(TetherError::Protocol(format!(
                    "Too many extended attributes: {}",
                    count
                )));
            }
            for _ in 0..count {
                let name = read_string(data, offset)?;
                let value = read_string(data, offset)?;
                attrs.extended.push((name, value));
            }
        }
        Ok(attrs)
    }
}

/// One directory entry returned by READDIR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name relative to the directory
    pub filename: String,
    /// `ls -l` style line
    pub longname: String,
    /// Attributes
    pub attrs: FileAttributes,
}

/// Handle to a remote file or directory opened over SFTP.
///
/// Handles are local identifiers; once closed they are rejected with
/// [`TetherError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SftpHandle(pub(crate) u64);

impl fmt::Display for SftpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}
