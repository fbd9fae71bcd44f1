//! SFTP (SSH File Transfer Protocol) v3 client.
//!
//! # Architecture
//!
//! SFTP runs as an SSH subsystem over a session channel:
//! 1. Open a session channel
//! 2. Request the "sftp" subsystem
//! 3. Exchange SFTP packets inside channel data
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_MSG_CHANNEL_OPEN ------>|
//!   |<- SSH_MSG_CHANNEL_OPEN_CONF --|
//!   |                               |
//!   |-- SSH_MSG_CHANNEL_REQUEST --->|  (subsystem "sftp")
//!   |<- SSH_MSG_CHANNEL_SUCCESS ----|
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_proto::ssh::Session;
//!
//! # fn run(session: &mut Session) -> tether_platform::TetherResult<()> {
//! let id = session.sftp_init()?;
//! let mut sftp = session.sftp(id);
//! for entry in sftp.list_dir("/var/log")? {
//!     println!("{}", entry.filename);
//! }
//! sftp.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)

pub mod client;
pub mod message;
pub mod types;

pub use client::{Sftp, MAX_TRANSFER, POSIX_RENAME};
pub use message::{SftpMessage, SftpMessageType, SftpRequest, SftpResponse, SFTP_VERSION};
pub use types::{
    AttrFlags, DirEntry, FileAttributes, FileMode, FileType, OpenFlags, SftpErrorCode, SftpHandle,
};
