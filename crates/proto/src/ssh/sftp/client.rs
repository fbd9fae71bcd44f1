//! SFTP client running on a session channel.
//!
//! [`Session::sftp_init`] opens the subsystem channel and negotiates the
//! protocol version; [`Session::sftp`] then returns an [`Sftp`] handle for
//! file operations. Requests are strictly sequential: one request is in
//! flight per SFTP channel and a call interrupted by `WouldBlock` must be
//! repeated with the same arguments before anything else is issued.

use super::message::{
    status_error, unexpected, SftpMessage, SftpRequest, SftpResponse, SFTP_VERSION,
};
use super::types::{DirEntry, FileAttributes, OpenFlags, SftpErrorCode, SftpHandle};
use crate::ssh::channel::{ChannelEntry, ChannelId, ChannelKind, ChannelState};
use crate::ssh::connection::ChannelRequestType;
use crate::ssh::session::outbox::Outbox;
use crate::ssh::session::Session;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::{HashMap, HashSet};
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info, warn};

/// Largest READ or WRITE payload per request.
pub const MAX_TRANSFER: usize = 32 * 1024;

/// Extension required for overwriting renames.
pub const POSIX_RENAME: &str = "posix-rename@openssh.com";

const INIT_OP: &str = "sftp_init";

#[derive(Debug)]
enum HandleKind {
    File { offset: u64 },
    Dir { exhausted: bool },
}

#[derive(Debug)]
struct HandleEntry {
    remote: Vec<u8>,
    kind: HandleKind,
    path: String,
}

#[derive(Debug)]
struct PendingOp {
    key: String,
    request_id: Option<u32>,
    cancelled: bool,
}

#[derive(Debug)]
struct Listing {
    path: String,
    handle: SftpHandle,
    entries: Vec<DirEntry>,
}

/// Per-channel SFTP state, stored in the channel entry.
#[derive(Debug, Default)]
pub(crate) struct SftpState {
    version: u32,
    extensions: Vec<(String, String)>,
    next_request: u32,
    handles: HashMap<u64, HandleEntry>,
    next_handle: u64,
    stale: HashSet<u64>,
    pending: Option<PendingOp>,
    tx: BytesMut,
    rx: BytesMut,
    listing: Option<Listing>,
}

impl SftpState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails the in-flight request with `Cancelled` on its next attempt.
    pub(crate) fn cancel(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.cancelled = true;
        }
        self.tx.clear();
        self.rx.clear();
    }

    fn register(&mut self, remote: Vec<u8>, kind: HandleKind, path: &str) -> SftpHandle {
        let handle = SftpHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(
            handle.0,
            HandleEntry {
                remote,
                kind,
                path: path.to_string(),
            },
        );
        handle
    }

    fn lookup(&mut self, handle: SftpHandle) -> TetherResult<&mut HandleEntry> {
        if self.stale.contains(&handle.0) {
            return Err(TetherError::StaleHandle(format!(
                "SFTP handle {} was closed",
                handle
            )));
        }
        self.handles
            .get_mut(&handle.0)
            .ok_or_else(|| TetherError::InvalidInput(format!("Unknown SFTP handle {}", handle)))
    }

    fn retire_handle(&mut self, handle: SftpHandle) {
        if let Some(entry) = self.handles.remove(&handle.0) {
            debug!("SFTP handle {} ({}) closed", handle, entry.path);
        }
        self.stale.insert(handle.0);
    }

    /// Sends `request` once and collects its reply from the channel.
    ///
    /// `key` identifies the caller's operation; a different key while a
    /// request is outstanding is refused.
    fn exchange(
        &mut self,
        entry: &mut ChannelEntry,
        outbox: &mut Outbox,
        key: &str,
        request: &SftpRequest,
    ) -> TetherResult<SftpResponse> {
        match self.pending.as_ref() {
            Some(pending) if pending.cancelled => {
                self.pending = None;
                return Err(TetherError::Cancelled);
            }
            Some(pending) if pending.key != key => {
                return Err(TetherError::ChannelState(format!(
                    "SFTP request '{}' is still pending on channel {}",
                    pending.key, entry.id
                )));
            }
            Some(_) => {}
            None => {
                if entry.user_closed || !entry.is_live() || entry.eof_received {
                    return Err(TetherError::ChannelState(format!(
                        "SFTP channel {} is closed",
                        entry.id
                    )));
                }
                let request_id = match request {
                    SftpRequest::Init { .. } => None,
                    _ => {
                        let id = self.next_request;
                        self.next_request = self.next_request.wrapping_add(1);
                        Some(id)
                    }
                };
                let message = request.to_message(request_id.unwrap_or(0));
                debug!(
                    "SFTP {:?} request {:?} on channel {} ({} bytes)",
                    message.msg_type,
                    request_id,
                    entry.id,
                    message.payload.len()
                );
                self.tx.extend_from_slice(&message.to_bytes());
                self.pending = Some(PendingOp {
                    key: key.to_string(),
                    request_id,
                    cancelled: false,
                });
            }
        }

        if !self.tx.is_empty() {
            if !entry.is_live() {
                self.pending = None;
                self.tx.clear();
                return Err(TetherError::Cancelled);
            }
            while !self.tx.is_empty() {
                let n = entry.write_data(outbox, 0, &self.tx)?;
                self.tx.advance(n);
            }
        }

        let buffered = entry.stdout.len();
        if buffered > 0 {
            let data = entry.take_buffered(outbox, buffered)?;
            self.rx.extend_from_slice(&data);
        }
        let expected = self.pending.as_ref().and_then(|p| p.request_id);
        loop {
            let message = match SftpMessage::decode(&mut self.rx) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => return Err(self.bad_message(e)),
            };
            let response = match SftpResponse::from_message(&message) {
                Ok(response) => response,
                Err(e) => return Err(self.bad_message(e)),
            };
            if response.id() == expected {
                self.pending = None;
                return Ok(response);
            }
            warn!(
                "Channel {} dropping SFTP reply for request {:?}",
                entry.id,
                response.id()
            );
        }

        if entry.eof_received || entry.close_received {
            self.pending = None;
            return Err(TetherError::Cancelled);
        }
        Err(TetherError::WouldBlock(Direction::Readable))
    }

    fn bad_message(&mut self, err: TetherError) -> TetherError {
        self.pending = None;
        self.rx.clear();
        SftpErrorCode::BadMessage.to_error(err.to_string())
    }
}

impl Session {
    /// Opens an SFTP channel and negotiates protocol version 3.
    ///
    /// Resumable: after `WouldBlock`, call again to continue the same
    /// negotiation. On any other failure the channel is closed.
    ///
    /// # Errors
    ///
    /// - [`TetherError::RequestDenied`] if the server refuses the subsystem
    /// - [`TetherError::ChannelOpen`] if the channel cannot be opened
    pub fn sftp_init(&mut self) -> TetherResult<ChannelId> {
        let id = match self.pending_ops.get(INIT_OP) {
            Some(id) => *id,
            None => {
                let id = self.open_channel(ChannelKind::Sftp)?;
                self.pending_ops.insert(INIT_OP.to_string(), id);
                id
            }
        };

        match self.sftp_negotiate(id) {
            Ok(version) => {
                self.pending_ops.remove(INIT_OP);
                info!("SFTP v{} ready on channel {}", version, id);
                Ok(id)
            }
            Err(e) if e.is_would_block() => Err(e),
            Err(e) => {
                self.pending_ops.remove(INIT_OP);
                if let Err(close_err) = self.close_channel(id) {
                    debug!("Closing SFTP channel {} failed: {}", id, close_err);
                }
                Err(e)
            }
        }
    }

    fn sftp_negotiate(&mut self, id: ChannelId) -> TetherResult<u32> {
        let installed = self
            .channels
            .get(&id)
            .map_or(false, |entry| entry.sftp.is_some());
        if !installed {
            let subsystem = ChannelRequestType::Subsystem {
                name: "sftp".to_string(),
            };
            self.drive(|s| s.channel_request_step(id, &subsystem))?;
            if let Some(entry) = self.channels.get_mut(&id) {
                entry.sftp = Some(Box::new(SftpState::new()));
            }
        }

        let init = SftpRequest::Init {
            version: SFTP_VERSION,
        };
        match self.drive(|s| s.sftp_step(id, INIT_OP, &init))? {
            SftpResponse::Version {
                version,
                extensions,
            } => {
                if version > SFTP_VERSION || version == 0 {
                    return Err(TetherError::Protocol(format!(
                        "Server chose unsupported SFTP version {}",
                        version
                    )));
                }
                for (name, data) in &extensions {
                    debug!("SFTP extension {} ({})", name, data);
                }
                if let Some(state) = self.channels.get_mut(&id).and_then(|e| e.sftp.as_mut()) {
                    state.version = version;
                    state.extensions = extensions;
                }
                Ok(version)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Returns the SFTP handle for channel `id`.
    pub fn sftp(&mut self, id: ChannelId) -> Sftp<'_> {
        Sftp { session: self, id }
    }

    pub(crate) fn sftp_step(
        &mut self,
        id: ChannelId,
        key: &str,
        request: &SftpRequest,
    ) -> TetherResult<SftpResponse> {
        self.check_channel(id)?;
        let entry = self
            .channels
            .get_mut(&id)
            .ok_or_else(|| TetherError::ChannelState(format!("Unknown channel {}", id)))?;
        if entry.state == ChannelState::Opening {
            return Err(TetherError::WouldBlock(Direction::Readable));
        }
        let mut state = entry.sftp.take().ok_or_else(|| {
            TetherError::ChannelState(format!("Channel {} is not an SFTP channel", id))
        })?;
        let result = state.exchange(entry, &mut self.outbox, key, request);
        entry.sftp = Some(state);
        result
    }
}

/// Handle to the SFTP subsystem on one channel.
///
/// Obtained with [`Session::sftp`] after [`Session::sftp_init`].
pub struct Sftp<'s> {
    session: &'s mut Session,
    id: ChannelId,
}

impl<'s> Sftp<'s> {
    /// Returns the channel carrying the subsystem.
    pub fn channel_id(&self) -> ChannelId {
        self.id
    }

    /// Protocol version agreed with the server.
    pub fn version(&self) -> Option<u32> {
        self.state_ref().map(|state| state.version)
    }

    /// Extensions announced in the server's VERSION message.
    pub fn extensions(&self) -> Vec<(String, String)> {
        self.state_ref()
            .map(|state| state.extensions.clone())
            .unwrap_or_default()
    }

    /// Returns true if the server announced extension `name`.
    pub fn has_extension(&self, name: &str) -> bool {
        self.state_ref()
            .map_or(false, |state| state.extensions.iter().any(|(n, _)| n == name))
    }

    /// Opens a directory for [`Sftp::read_dir`].
    pub fn open_dir(&mut self, path: &str) -> TetherResult<SftpHandle> {
        let request = SftpRequest::OpenDir {
            path: path.to_string(),
        };
        match self.request(&format!("opendir:{}", path), request)? {
            SftpResponse::Handle { handle, .. } => {
                let handle = self.state()?.register(
                    handle,
                    HandleKind::Dir { exhausted: false },
                    path,
                );
                debug!("Opened directory {} as {}", path, handle);
                Ok(handle)
            }
            other => Err(fail(other)),
        }
    }

    /// Reads the next batch of directory entries.
    ///
    /// An empty batch marks the end of the listing; later calls return an
    /// empty batch without contacting the server.
    pub fn read_dir(&mut self, handle: SftpHandle) -> TetherResult<Vec<DirEntry>> {
        let remote = {
            let entry = self.state()?.lookup(handle)?;
            match entry.kind {
                HandleKind::Dir { exhausted: true } => return Ok(Vec::new()),
                HandleKind::Dir { exhausted: false } => entry.remote.clone(),
                HandleKind::File { .. } => {
                    return Err(TetherError::InvalidInput(format!(
                        "{} is not a directory handle",
                        handle
                    )))
                }
            }
        };

        let request = SftpRequest::ReadDir { handle: remote };
        let batch = match self.request(&format!("readdir:{}", handle), request)? {
            SftpResponse::Name { entries, .. } => entries,
            SftpResponse::Status { code, .. } if code == SftpErrorCode::Eof as u32 => Vec::new(),
            other => return Err(fail(other)),
        };
        if batch.is_empty() {
            if let HandleKind::Dir { exhausted } = &mut self.state()?.lookup(handle)?.kind {
                *exhausted = true;
            }
        }
        Ok(batch)
    }

    /// Lists a directory: opens it, drains every batch and closes it.
    pub fn list_dir(&mut self, path: &str) -> TetherResult<Vec<DirEntry>> {
        let current = self
            .state()?
            .listing
            .as_ref()
            .map(|listing| (listing.path.clone(), listing.handle));
        let handle = match current {
            Some((current, handle)) if current == path => handle,
            Some((current, _)) => {
                return Err(TetherError::ChannelState(format!(
                    "Listing of {} is in progress",
                    current
                )))
            }
            None => {
                let handle = self.open_dir(path)?;
                self.state()?.listing = Some(Listing {
                    path: path.to_string(),
                    handle,
                    entries: Vec::new(),
                });
                handle
            }
        };

        let result = self.drain_listing(handle);
        match result {
            Err(e) if e.is_would_block() => Err(e),
            Err(e) => {
                if let Ok(state) = self.state() {
                    state.listing = None;
                }
                Err(e)
            }
            Ok(()) => Ok(self
                .state()?
                .listing
                .take()
                .map(|listing| listing.entries)
                .unwrap_or_default()),
        }
    }

    fn drain_listing(&mut self, handle: SftpHandle) -> TetherResult<()> {
        loop {
            let batch = self.read_dir(handle)?;
            if batch.is_empty() {
                break;
            }
            if let Some(listing) = self.state()?.listing.as_mut() {
                listing.entries.extend(batch);
            }
        }
        self.close_handle(handle)
    }

    /// Opens a file. `mode` sets the permissions of a created file.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tether_proto::ssh::sftp::OpenFlags;
    /// use tether_proto::ssh::Session;
    ///
    /// # fn run(session: &mut Session) -> tether_platform::TetherResult<()> {
    /// let id = session.sftp_init()?;
    /// let mut sftp = session.sftp(id);
    /// let handle = sftp.open_file("/tmp/notes.txt", OpenFlags::from_mode("w")?, 0o600)?;
    /// sftp.write(handle, b"hello")?;
    /// sftp.close_handle(handle)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_file(
        &mut self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> TetherResult<SftpHandle> {
        let attrs = if flags.contains(OpenFlags::CREAT) {
            FileAttributes::new().with_permissions(mode)
        } else {
            FileAttributes::new()
        };
        let request = SftpRequest::Open {
            path: path.to_string(),
            flags: flags.bits(),
            attrs,
        };
        match self.request(&format!("open:{}:{}", path, flags.bits()), request)? {
            SftpResponse::Handle { handle, .. } => {
                let handle = self
                    .state()?
                    .register(handle, HandleKind::File { offset: 0 }, path);
                debug!("Opened file {} as {}", path, handle);
                Ok(handle)
            }
            other => Err(fail(other)),
        }
    }

    /// Reads up to `size` bytes at the current offset; an empty result
    /// means end of file.
    pub fn read(&mut self, handle: SftpHandle, size: usize) -> TetherResult<Vec<u8>> {
        let (remote, offset) = self.file(handle)?;
        let len = size.min(MAX_TRANSFER);
        if len == 0 {
            return Ok(Vec::new());
        }
        let request = SftpRequest::Read {
            handle: remote,
            offset,
            len: len as u32,
        };
        let data = match self.request(&format!("read:{}:{}:{}", handle, offset, len), request)? {
            SftpResponse::Data { data, .. } => data,
            SftpResponse::Status { code, .. } if code == SftpErrorCode::Eof as u32 => Vec::new(),
            other => return Err(fail(other)),
        };
        if data.len() > len {
            return Err(TetherError::Protocol(format!(
                "SFTP server returned {} bytes for a {} byte read",
                data.len(),
                len
            )));
        }
        self.advance(handle, data.len() as u64)?;
        Ok(data)
    }

    /// Writes up to 32 KiB of `data` at the current offset and returns the
    /// number of bytes written.
    pub fn write(&mut self, handle: SftpHandle, data: &[u8]) -> TetherResult<usize> {
        let (remote, offset) = self.file(handle)?;
        let n = data.len().min(MAX_TRANSFER);
        if n == 0 {
            return Ok(0);
        }
        let request = SftpRequest::Write {
            handle: remote,
            offset,
            data: data[..n].to_vec(),
        };
        self.request(&format!("write:{}:{}:{}", handle, offset, n), request)?
            .into_status()?;
        self.advance(handle, n as u64)?;
        Ok(n)
    }

    /// Moves the offset used by the next read or write.
    pub fn seek(&mut self, handle: SftpHandle, offset: u64) -> TetherResult<()> {
        match &mut self.state()?.lookup(handle)?.kind {
            HandleKind::File { offset: current } => {
                *current = offset;
                Ok(())
            }
            HandleKind::Dir { .. } => Err(TetherError::InvalidInput(format!(
                "{} is a directory handle",
                handle
            ))),
        }
    }

    /// Returns the offset used by the next read or write.
    pub fn tell(&mut self, handle: SftpHandle) -> TetherResult<u64> {
        self.file(handle).map(|(_, offset)| offset)
    }

    /// Attributes of an open file.
    pub fn fstat(&mut self, handle: SftpHandle) -> TetherResult<FileAttributes> {
        let remote = self.state()?.lookup(handle)?.remote.clone();
        let request = SftpRequest::FStat { handle: remote };
        attrs(self.request(&format!("fstat:{}", handle), request)?)
    }

    /// Closes a file or directory handle.
    ///
    /// The handle becomes stale even when the server reports an error;
    /// further use fails with [`TetherError::StaleHandle`].
    pub fn close_handle(&mut self, handle: SftpHandle) -> TetherResult<()> {
        let remote = self.state()?.lookup(handle)?.remote.clone();
        let result = self
            .request(&format!("close:{}", handle), SftpRequest::Close { handle: remote })
            .and_then(SftpResponse::into_status);
        match result {
            Err(e) if e.is_would_block() => Err(e),
            result => {
                if let Ok(state) = self.state() {
                    state.retire_handle(handle);
                }
                result
            }
        }
    }

    /// Removes a file.
    pub fn unlink(&mut self, path: &str) -> TetherResult<()> {
        let request = SftpRequest::Remove {
            path: path.to_string(),
        };
        self.request(&format!("remove:{}", path), request)?.into_status()
    }

    /// Renames `src` to `dst`.
    ///
    /// Without `overwrite` the plain v3 RENAME is used, which fails when
    /// `dst` exists. With `overwrite` the server must support
    /// `posix-rename@openssh.com`.
    pub fn rename(&mut self, src: &str, dst: &str, overwrite: bool) -> TetherResult<()> {
        let request = if overwrite {
            if !self.has_extension(POSIX_RENAME) {
                return Err(SftpErrorCode::OpUnsupported.to_error(format!(
                    "Server does not support {}",
                    POSIX_RENAME
                )));
            }
            let mut data = BytesMut::new();
            for path in [src, dst] {
                data.put_u32(path.len() as u32);
                data.put_slice(path.as_bytes());
            }
            SftpRequest::Extended {
                name: POSIX_RENAME.to_string(),
                data: data.to_vec(),
            }
        } else {
            SftpRequest::Rename {
                old_path: src.to_string(),
                new_path: dst.to_string(),
            }
        };
        self.request(&format!("rename:{}:{}:{}", src, dst, overwrite), request)?
            .into_status()
    }

    /// Creates a directory with permissions `mode`.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> TetherResult<()> {
        let request = SftpRequest::MkDir {
            path: path.to_string(),
            attrs: FileAttributes::new().with_permissions(mode),
        };
        self.request(&format!("mkdir:{}", path), request)?.into_status()
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> TetherResult<()> {
        let request = SftpRequest::RmDir {
            path: path.to_string(),
        };
        self.request(&format!("rmdir:{}", path), request)?.into_status()
    }

    /// Canonical absolute form of `path`.
    pub fn realpath(&mut self, path: &str) -> TetherResult<String> {
        let request = SftpRequest::RealPath {
            path: path.to_string(),
        };
        first_name(self.request(&format!("realpath:{}", path), request)?)
    }

    /// Target of the symbolic link at `path`.
    pub fn readlink(&mut self, path: &str) -> TetherResult<String> {
        let request = SftpRequest::ReadLink {
            path: path.to_string(),
        };
        first_name(self.request(&format!("readlink:{}", path), request)?)
    }

    /// Creates `link_path` pointing at `target`.
    pub fn symlink(&mut self, target: &str, link_path: &str) -> TetherResult<()> {
        let request = SftpRequest::Symlink {
            target: target.to_string(),
            link_path: link_path.to_string(),
        };
        self.request(&format!("symlink:{}:{}", target, link_path), request)?
            .into_status()
    }

    /// Attributes of `path`, following symbolic links.
    pub fn stat(&mut self, path: &str) -> TetherResult<FileAttributes> {
        let request = SftpRequest::Stat {
            path: path.to_string(),
        };
        attrs(self.request(&format!("stat:{}", path), request)?)
    }

    /// Attributes of `path` itself.
    pub fn lstat(&mut self, path: &str) -> TetherResult<FileAttributes> {
        let request = SftpRequest::LStat {
            path: path.to_string(),
        };
        attrs(self.request(&format!("lstat:{}", path), request)?)
    }

    /// Changes the attributes present in `attrs`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidInput`] if only one of uid/gid or of
    /// atime/mtime is set.
    pub fn set_stat(&mut self, path: &str, attrs: &FileAttributes) -> TetherResult<()> {
        attrs.validate()?;
        let request = SftpRequest::SetStat {
            path: path.to_string(),
            attrs: attrs.clone(),
        };
        self.request(&format!("setstat:{}", path), request)?.into_status()
    }

    /// Closes the subsystem channel and waits for the server to close it.
    pub fn shutdown(&mut self) -> TetherResult<()> {
        let id = self.id;
        self.session.close_channel(id)?;
        self.session.drive(|s| s.wait_closed_step(id))
    }

    fn request(&mut self, key: &str, request: SftpRequest) -> TetherResult<SftpResponse> {
        let id = self.id;
        self.session.drive(|s| s.sftp_step(id, key, &request))
    }

    fn state(&mut self) -> TetherResult<&mut SftpState> {
        let id = self.id;
        self.session.check_channel(id)?;
        self.session
            .channels
            .get_mut(&id)
            .and_then(|entry| entry.sftp.as_deref_mut())
            .ok_or_else(|| TetherError::ChannelState(format!("Channel {} has no SFTP session", id)))
    }

    fn state_ref(&self) -> Option<&SftpState> {
        self.session
            .channels
            .get(&self.id)
            .and_then(|entry| entry.sftp.as_deref())
    }

    fn file(&mut self, handle: SftpHandle) -> TetherResult<(Vec<u8>, u64)> {
        let entry = self.state()?.lookup(handle)?;
        match entry.kind {
            HandleKind::File { offset } => Ok((entry.remote.clone(), offset)),
            HandleKind::Dir { .. } => Err(TetherError::InvalidInput(format!(
                "{} is a directory handle",
                handle
            ))),
        }
    }

    fn advance(&mut self, handle: SftpHandle, by: u64) -> TetherResult<()> {
        if let HandleKind::File { offset } = &mut self.state()?.lookup(handle)?.kind {
            *offset += by;
        }
        Ok(())
    }
}

fn fail(response: SftpResponse) -> TetherError {
    match response {
        SftpResponse::Status { code, message, .. } => status_error(code, message),
        other => unexpected(&other),
    }
}

fn attrs(response: SftpResponse) -> TetherResult<FileAttributes> {
    match response {
        SftpResponse::Attrs { attrs, .. } => Ok(attrs),
        other => Err(fail(other)),
    }
}

fn first_name(response: SftpResponse) -> TetherResult<String> {
    match response {
        SftpResponse::Name { mut entries, .. } if !entries.is_empty() => {
            Ok(entries.swap_remove(0).filename)
        }
        SftpResponse::Name { .. } => Err(TetherError::Protocol(
            "SFTP NAME reply without entries".to_string(),
        )),
        other => Err(fail(other)),
    }
}
