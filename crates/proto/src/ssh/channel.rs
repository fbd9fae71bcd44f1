//! Channels multiplexed over a session (RFC 4254 Section 5).
//!
//! The [`Session`] owns every channel's state in an arena keyed by
//! [`ChannelId`]. A [`Channel`] is a short-lived handle borrowing the session
//! for the duration of the calls made through it:
//!
//! ```rust,no_run
//! use tether_proto::ssh::Session;
//!
//! # fn run(session: &mut Session) -> tether_platform::TetherResult<()> {
//! let id = session.open_session()?;
//! let mut channel = session.channel(id);
//! channel.exec("uname -a")?;
//!
//! let mut output = Vec::new();
//! let mut buf = [0u8; 4096];
//! loop {
//!     match channel.read(&mut buf)? {
//!         0 => break,
//!         n => output.extend_from_slice(&buf[..n]),
//!     }
//! }
//! channel.close()?;
//! channel.wait_closed()?;
//! # Ok(())
//! # }
//! ```
//!
//! In non-blocking mode every operation may fail with
//! [`TetherError::WouldBlock`]; the caller waits for the hinted direction and
//! repeats the identical call.

use crate::ssh::connection::{encode_data, ChannelRequestType, ConnectionMessage};
use crate::ssh::scp::{ScpStat, ScpState};
use crate::ssh::session::outbox::{Outbox, DATA_OVERHEAD};
use crate::ssh::session::Session;
use crate::ssh::sftp::client::SftpState;
use crate::ssh::window::{LocalWindow, Window};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::io;
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info, trace, warn};

/// Session-scoped channel identifier.
///
/// Identifiers are allocated in increasing order and never reused within a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u32);

impl ChannelId {
    /// Returns the numeric value (the local channel number on the wire).
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a channel is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Interactive shell, usually with a pty
    Shell,
    /// Remote command
    Exec,
    /// SCP upload
    ScpSend,
    /// SCP download
    ScpRecv,
    /// Caller-initiated TCP forwarding
    DirectTcpIp,
    /// Peer-initiated TCP forwarding
    ForwardedTcpIp,
    /// Peer-initiated X11 connection
    X11,
    /// SFTP subsystem
    Sftp,
}

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// CHANNEL_OPEN sent, no answer yet
    Opening,
    /// Confirmed and usable
    Open,
    /// Local close requested, waiting for the peer
    Closing,
    /// Both sides sent CHANNEL_CLOSE
    Closed,
}

/// Snapshot returned by [`Channel::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatus {
    /// Buffered bytes on stream 0
    pub data: usize,
    /// Buffered bytes on stream 1 (stderr)
    pub extended: usize,
    /// The peer sent EOF
    pub eof: bool,
    /// The peer closed the channel
    pub closed: bool,
    /// Bytes that may be written right now
    pub remote_credit: u32,
}

/// Receive window snapshot returned by [`Channel::window_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Credit currently granted to the peer
    pub available: u32,
    /// Credit released by reads but not yet advertised
    pub pending: u32,
    /// Initial window size
    pub initial: u32,
}

/// Signal that terminated the remote process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    /// Signal name without the "SIG" prefix
    pub signal_name: String,
    /// Whether a core was dumped
    pub core_dumped: bool,
    /// Error message
    pub error_message: String,
    /// Language tag of the message
    pub language_tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestOutcome {
    Success,
    Failure,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) request: ChannelRequestType,
    pub(crate) outcome: Option<RequestOutcome>,
}

/// Per-channel state stored in the session arena.
#[derive(Debug)]
pub(crate) struct ChannelEntry {
    pub(crate) id: ChannelId,
    pub(crate) kind: ChannelKind,
    pub(crate) state: ChannelState,
    pub(crate) remote_id: u32,
    pub(crate) local: LocalWindow,
    pub(crate) remote: Window,
    pub(crate) remote_max_packet: u32,
    pub(crate) stdout: BytesMut,
    pub(crate) stderr: BytesMut,
    pub(crate) eof_sent: bool,
    pub(crate) eof_received: bool,
    pub(crate) close_sent: bool,
    pub(crate) close_received: bool,
    pub(crate) user_closed: bool,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) open_failure: Option<(u32, String)>,
    pub(crate) exit_status: Option<u32>,
    pub(crate) exit_signal: Option<ExitSignal>,
    pub(crate) has_pty: bool,
    pub(crate) x11_cookie: Option<String>,
    pub(crate) scp: Option<ScpState>,
    pub(crate) sftp: Option<Box<SftpState>>,
}

impl ChannelEntry {
    /// A channel we asked the peer to open.
    pub(crate) fn outbound(id: ChannelId, kind: ChannelKind, window: u32) -> Self {
        Self {
            id,
            kind,
            state: ChannelState::Opening,
            remote_id: 0,
            local: LocalWindow::new(window),
            remote: Window::new(0),
            remote_max_packet: 0,
            stdout: BytesMut::new(),
            stderr: BytesMut::new(),
            eof_sent: false,
            eof_received: false,
            close_sent: false,
            close_received: false,
            user_closed: false,
            pending: None,
            open_failure: None,
            exit_status: None,
            exit_signal: None,
            has_pty: false,
            x11_cookie: None,
            scp: None,
            sftp: None,
        }
    }

    /// A channel the peer opened and we accepted.
    pub(crate) fn inbound(
        id: ChannelId,
        kind: ChannelKind,
        window: u32,
        remote_id: u32,
        remote_window: u32,
        remote_max_packet: u32,
    ) -> Self {
        let mut entry = Self::outbound(id, kind, window);
        entry.confirm(remote_id, remote_window, remote_max_packet);
        entry
    }

    pub(crate) fn confirm(&mut self, remote_id: u32, window: u32, max_packet: u32) {
        self.remote_id = remote_id;
        self.remote = Window::new(window);
        self.remote_max_packet =
            max_packet.clamp(1, crate::ssh::connection::MAX_PACKET_SIZE);
        self.state = ChannelState::Open;
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state == ChannelState::Open && !self.close_sent && !self.close_received
    }

    /// Buffers inbound data for `stream`.
    ///
    /// Returns credit to advertise for bytes that were discarded.
    pub(crate) fn accept_data(&mut self, stream: u32, data: &[u8]) -> Option<u32> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let allowed = len.min(self.local.window().available());
        if allowed < len {
            warn!(
                "Channel {} peer exceeded window, dropping {} bytes",
                self.id,
                len - allowed
            );
        }
        if self.local.receive(allowed).is_err() {
            return None;
        }
        let data = &data[..allowed as usize];

        if self.eof_received || self.user_closed {
            warn!("Channel {} dropping {} bytes received after EOF", self.id, data.len());
            return self.local.release(allowed);
        }
        match stream {
            0 => self.stdout.extend_from_slice(data),
            1 => self.stderr.extend_from_slice(data),
            other => {
                warn!("Channel {} dropping data for stream {}", self.id, other);
                return self.local.release(allowed);
            }
        }
        trace!("Channel {} buffered {} bytes on stream {}", self.id, data.len(), stream);
        None
    }

    pub(crate) fn buffer(&self, stream: u32) -> TetherResult<&BytesMut> {
        match stream {
            0 => Ok(&self.stdout),
            1 => Ok(&self.stderr),
            other => Err(TetherError::InvalidInput(format!("Unknown stream {}", other))),
        }
    }

    fn buffer_mut(&mut self, stream: u32) -> TetherResult<&mut BytesMut> {
        match stream {
            0 => Ok(&mut self.stdout),
            1 => Ok(&mut self.stderr),
            other => Err(TetherError::InvalidInput(format!("Unknown stream {}", other))),
        }
    }

    /// Copies buffered bytes into `buf` and credits the receive window.
    pub(crate) fn read_buffered(
        &mut self,
        outbox: &mut Outbox,
        stream: u32,
        buf: &mut [u8],
    ) -> TetherResult<usize> {
        let buffer = self.buffer_mut(stream)?;
        let n = buf.len().min(buffer.len());
        buf[..n].copy_from_slice(&buffer[..n]);
        buffer.advance(n);
        if n > 0 {
            if let Some(bytes) = self.local.release(n as u32) {
                self.send_adjust(outbox, bytes)?;
            }
        }
        Ok(n)
    }

    /// Takes up to `limit` buffered bytes of stream 0.
    pub(crate) fn take_buffered(
        &mut self,
        outbox: &mut Outbox,
        limit: usize,
    ) -> TetherResult<BytesMut> {
        let n = limit.min(self.stdout.len());
        let taken = self.stdout.split_to(n);
        if n > 0 {
            if let Some(bytes) = self.local.release(n as u32) {
                self.send_adjust(outbox, bytes)?;
            }
        }
        Ok(taken)
    }

    pub(crate) fn send_adjust(&self, outbox: &mut Outbox, bytes: u32) -> TetherResult<()> {
        if self.close_sent || self.state == ChannelState::Opening {
            return Ok(());
        }
        debug!("Channel {} window adjust +{}", self.id, bytes);
        outbox.send(&ConnectionMessage::ChannelWindowAdjust {
            recipient_channel: self.remote_id,
            bytes_to_add: bytes,
        })
    }

    /// Queues as much of `data` as the remote window and the outbox allow.
    pub(crate) fn write_data(
        &mut self,
        outbox: &mut Outbox,
        stream: u32,
        data: &[u8],
    ) -> TetherResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let credit = self.remote.available() as usize;
        if credit == 0 {
            return Err(TetherError::WouldBlock(Direction::Readable));
        }

        let max_packet = (self.remote_max_packet as usize).max(1);
        let frames = |len: usize| len / max_packet + 1;
        let room = outbox.room();
        let mut n = data.len().min(credit);
        if n + DATA_OVERHEAD * frames(n) > room {
            n = n.min(room.saturating_sub(DATA_OVERHEAD * frames(room)));
        }
        if n == 0 {
            return Err(TetherError::WouldBlock(Direction::Writable));
        }

        for chunk in data[..n].chunks(max_packet) {
            outbox.push(&encode_data(self.remote_id, stream, chunk))?;
        }
        self.remote.consume(n as u32)?;
        trace!(
            "Channel {} queued {} bytes on stream {}, credit {}",
            self.id,
            n,
            stream,
            self.remote.available()
        );
        Ok(n)
    }

    /// Sends a message addressed to the peer's end of this channel.
    pub(crate) fn send(&self, outbox: &mut Outbox, message: ConnectionMessage) -> TetherResult<()> {
        if self.close_sent {
            return Err(TetherError::ChannelState(format!(
                "Channel {} is closing",
                self.id
            )));
        }
        outbox.send(&message)
    }

    pub(crate) fn send_close(&mut self, outbox: &mut Outbox) -> TetherResult<()> {
        if self.close_sent || self.state == ChannelState::Opening {
            return Ok(());
        }
        outbox.send(&ConnectionMessage::ChannelClose {
            recipient_channel: self.remote_id,
        })?;
        self.close_sent = true;
        Ok(())
    }

    pub(crate) fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.outcome.is_none() {
                pending.outcome = Some(RequestOutcome::Cancelled);
            }
        }
        if let Some(sftp) = self.sftp.as_mut() {
            sftp.cancel();
        }
    }

    pub(crate) fn status(&self) -> ChannelStatus {
        ChannelStatus {
            data: self.stdout.len(),
            extended: self.stderr.len(),
            eof: self.eof_received,
            closed: self.close_received || self.state == ChannelState::Closed,
            remote_credit: if self.is_live() && !self.eof_sent {
                self.remote.available()
            } else {
                0
            },
        }
    }
}

impl Session {
    /// Reports open failures and retired or unknown ids.
    pub(crate) fn check_channel(&mut self, id: ChannelId) -> TetherResult<()> {
        if self.is_retired(id) {
            return Err(TetherError::ChannelState(format!("Channel {} is closed", id)));
        }
        let entry = self
            .channels
            .get_mut(&id)
            .ok_or_else(|| TetherError::ChannelState(format!("Unknown channel {}", id)))?;
        if let Some((reason, description)) = entry.open_failure.take() {
            self.retire(id);
            return Err(TetherError::ChannelOpen {
                reason,
                description,
            });
        }
        Ok(())
    }

    /// Returns the entry of a confirmed channel that has not been closed
    /// locally, together with the outbox.
    pub(crate) fn open_channel_parts(
        &mut self,
        id: ChannelId,
    ) -> TetherResult<(&mut ChannelEntry, &mut Outbox)> {
        self.check_channel(id)?;
        let entry = self
            .channels
            .get_mut(&id)
            .ok_or_else(|| TetherError::ChannelState(format!("Unknown channel {}", id)))?;
        if entry.user_closed {
            return Err(TetherError::ChannelState(format!("Channel {} is closing", id)));
        }
        if entry.state == ChannelState::Opening {
            return Err(TetherError::WouldBlock(Direction::Readable));
        }
        Ok((entry, &mut self.outbox))
    }

    pub(crate) fn retire(&mut self, id: ChannelId) {
        if self.channels.remove(&id).is_some() {
            debug!("Channel {} released", id);
        }
    }

    pub(crate) fn channel_request_step(
        &mut self,
        id: ChannelId,
        request: &ChannelRequestType,
    ) -> TetherResult<()> {
        let (entry, outbox) = self.open_channel_parts(id)?;

        match entry.pending.as_ref() {
            Some(pending) if pending.request != *request => {
                return Err(TetherError::ChannelState(format!(
                    "Channel {} has a pending '{}' request",
                    id,
                    pending.request.name()
                )));
            }
            Some(pending) => {
                let outcome = match pending.outcome {
                    Some(outcome) => outcome,
                    None => return Err(TetherError::WouldBlock(Direction::Readable)),
                };
                entry.pending = None;
                return match outcome {
                    RequestOutcome::Success => {
                        debug!("Channel {} '{}' accepted", id, request.name());
                        match request {
                            ChannelRequestType::Exec { .. } if entry.kind == ChannelKind::Shell => {
                                entry.kind = ChannelKind::Exec
                            }
                            ChannelRequestType::Subsystem { name } if name == "sftp" => {
                                entry.kind = ChannelKind::Sftp
                            }
                            ChannelRequestType::PtyReq { .. } => entry.has_pty = true,
                            _ => {}
                        }
                        Ok(())
                    }
                    RequestOutcome::Failure => Err(TetherError::RequestDenied(format!(
                        "'{}' request rejected on channel {}",
                        request.name(),
                        id
                    ))),
                    RequestOutcome::Cancelled => Err(TetherError::Cancelled),
                };
            }
            None => {}
        }

        if !entry.is_live() {
            return Err(TetherError::ChannelState(format!("Channel {} is closed", id)));
        }
        entry.send(
            outbox,
            ConnectionMessage::ChannelRequest {
                recipient_channel: entry.remote_id,
                request: request.clone(),
                want_reply: true,
            },
        )?;
        entry.pending = Some(PendingRequest {
            request: request.clone(),
            outcome: None,
        });
        if matches!(request, ChannelRequestType::X11Req { .. }) {
            self.x11_requested = true;
        }
        Err(TetherError::WouldBlock(Direction::Readable))
    }

    pub(crate) fn channel_read_step(
        &mut self,
        id: ChannelId,
        stream: u32,
        buf: &mut [u8],
    ) -> TetherResult<usize> {
        let (entry, outbox) = self.open_channel_parts(id)?;
        if entry.buffer(stream)?.is_empty() || buf.is_empty() {
            if entry.eof_received || entry.close_received {
                return Ok(0);
            }
            if buf.is_empty() {
                return Ok(0);
            }
            return Err(TetherError::WouldBlock(Direction::Readable));
        }
        entry.read_buffered(outbox, stream, buf)
    }

    pub(crate) fn channel_write_step(
        &mut self,
        id: ChannelId,
        stream: u32,
        data: &[u8],
    ) -> TetherResult<usize> {
        let (entry, outbox) = self.open_channel_parts(id)?;
        if entry.eof_sent {
            return Err(TetherError::ChannelState(format!(
                "Channel {} already sent EOF",
                id
            )));
        }
        if !entry.is_live() {
            return Err(TetherError::ChannelState(format!(
                "Channel {} closed by peer",
                id
            )));
        }
        if stream > 1 {
            return Err(TetherError::InvalidInput(format!("Unknown stream {}", stream)));
        }
        entry.write_data(outbox, stream, data)
    }

    pub(crate) fn channel_eof_step(&mut self, id: ChannelId) -> TetherResult<()> {
        let (entry, outbox) = self.open_channel_parts(id)?;
        if entry.eof_sent {
            return Ok(());
        }
        if !entry.is_live() {
            return Err(TetherError::ChannelState(format!(
                "Channel {} closed by peer",
                id
            )));
        }
        entry.send(
            outbox,
            ConnectionMessage::ChannelEof {
                recipient_channel: entry.remote_id,
            },
        )?;
        entry.eof_sent = true;
        debug!("Channel {} sent EOF", id);
        Ok(())
    }

    /// Starts closing a channel. Unknown and retired ids are a no-op.
    pub(crate) fn close_channel(&mut self, id: ChannelId) -> TetherResult<()> {
        let Some(entry) = self.channels.get_mut(&id) else {
            return Ok(());
        };
        if entry.open_failure.is_some() {
            self.retire(id);
            return Ok(());
        }
        if !entry.user_closed {
            info!("Closing channel {}", id);
            entry.user_closed = true;
            entry.cancel_pending();
            if entry.state == ChannelState::Open {
                entry.state = ChannelState::Closing;
            }
        }
        entry.send_close(&mut self.outbox)?;
        if entry.close_received && (entry.close_sent || entry.state == ChannelState::Opening) {
            self.retire(id);
        }
        Ok(())
    }

    pub(crate) fn wait_closed_step(&mut self, id: ChannelId) -> TetherResult<()> {
        if self.is_retired(id) {
            return Ok(());
        }
        match self.channels.get(&id) {
            None => Err(TetherError::ChannelState(format!("Unknown channel {}", id))),
            Some(entry) if !entry.user_closed => Err(TetherError::ChannelState(format!(
                "Channel {} was not closed",
                id
            ))),
            Some(entry) if entry.close_received => {
                self.retire(id);
                Ok(())
            }
            Some(_) => Err(TetherError::WouldBlock(Direction::Readable)),
        }
    }

    fn channel_entry(&self, id: ChannelId) -> TetherResult<&ChannelEntry> {
        if self.is_retired(id) {
            return Err(TetherError::ChannelState(format!("Channel {} is closed", id)));
        }
        self.channels
            .get(&id)
            .ok_or_else(|| TetherError::ChannelState(format!("Unknown channel {}", id)))
    }
}

/// Handle to one channel of a [`Session`].
///
/// Obtained with [`Session::channel`]. All state lives in the session; the
/// handle can be dropped and recreated at any time.
pub struct Channel<'s> {
    session: &'s mut Session,
    id: ChannelId,
}

impl<'s> Channel<'s> {
    pub(crate) fn new(session: &'s mut Session, id: ChannelId) -> Self {
        Self { session, id }
    }

    /// Returns the channel id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns the channel kind.
    pub fn kind(&self) -> TetherResult<ChannelKind> {
        Ok(self.session.channel_entry(self.id)?.kind)
    }

    /// Returns the lifecycle state. Retired and unknown ids report `Closed`.
    pub fn state(&self) -> ChannelState {
        self.session
            .channel_entry(self.id)
            .map(|entry| entry.state)
            .unwrap_or(ChannelState::Closed)
    }

    fn request(&mut self, request: ChannelRequestType) -> TetherResult<()> {
        let id = self.id;
        self.session
            .drive(|s| s.channel_request_step(id, &request))
    }

    /// Runs `command` on the remote host.
    pub fn exec(&mut self, command: &str) -> TetherResult<()> {
        self.request(ChannelRequestType::Exec {
            command: command.to_string(),
        })
    }

    /// Starts the user's login shell.
    pub fn shell(&mut self) -> TetherResult<()> {
        self.request(ChannelRequestType::Shell)
    }

    /// Starts a subsystem such as "sftp".
    pub fn subsystem(&mut self, name: &str) -> TetherResult<()> {
        self.request(ChannelRequestType::Subsystem {
            name: name.to_string(),
        })
    }

    /// Sets an environment variable for the remote process.
    ///
    /// Most servers only accept variables allowed by their configuration.
    pub fn setenv(&mut self, name: &str, value: &str) -> TetherResult<()> {
        self.request(ChannelRequestType::Env {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Requests a pseudo-terminal.
    pub fn request_pty(
        &mut self,
        term: &str,
        cols: u32,
        rows: u32,
        width_px: u32,
        height_px: u32,
    ) -> TetherResult<()> {
        self.request(ChannelRequestType::PtyReq {
            term: term.to_string(),
            width_chars: cols,
            height_rows: rows,
            width_pixels: width_px,
            height_pixels: height_px,
            modes: vec![0],
        })
    }

    /// Requests X11 forwarding.
    ///
    /// `auth_protocol` defaults to MIT-MAGIC-COOKIE-1; when `auth_cookie` is
    /// None a random cookie is generated once per channel.
    pub fn x11_request(
        &mut self,
        screen: u32,
        single_connection: bool,
        auth_protocol: Option<&str>,
        auth_cookie: Option<&str>,
    ) -> TetherResult<()> {
        let auth_cookie = match auth_cookie {
            Some(cookie) => cookie.to_string(),
            None => {
                self.session.check_channel(self.id)?;
                let entry = self
                    .session
                    .channels
                    .get_mut(&self.id)
                    .ok_or_else(|| TetherError::ChannelState("Unknown channel".into()))?;
                entry
                    .x11_cookie
                    .get_or_insert_with(crate::ssh::forwarding::x11::random_cookie)
                    .clone()
            }
        };
        self.request(ChannelRequestType::X11Req {
            single_connection,
            auth_protocol: auth_protocol
                .unwrap_or(crate::ssh::forwarding::x11::MIT_MAGIC_COOKIE)
                .to_string(),
            auth_cookie,
            screen_number: screen,
        })
    }

    /// Reports a terminal size change. Only valid on a channel with a pty.
    pub fn resize_pty(
        &mut self,
        cols: u32,
        rows: u32,
        width_px: u32,
        height_px: u32,
    ) -> TetherResult<()> {
        let id = self.id;
        self.session.drive(|s| {
            let (entry, outbox) = s.open_channel_parts(id)?;
            if !entry.has_pty || !entry.is_live() {
                return Err(TetherError::ChannelState(format!(
                    "Channel {} has no pty",
                    id
                )));
            }
            entry.send(
                outbox,
                ConnectionMessage::ChannelRequest {
                    recipient_channel: entry.remote_id,
                    request: ChannelRequestType::WindowChange {
                        width_chars: cols,
                        height_rows: rows,
                        width_pixels: width_px,
                        height_pixels: height_px,
                    },
                    want_reply: false,
                },
            )
        })
    }

    /// Reads from stream 0.
    ///
    /// Returns `Ok(0)` once the peer sent EOF and nothing is buffered.
    pub fn read(&mut self, buf: &mut [u8]) -> TetherResult<usize> {
        self.read_stream(0, buf)
    }

    /// Reads from stream 0 (data) or 1 (stderr).
    pub fn read_stream(&mut self, stream: u32, buf: &mut [u8]) -> TetherResult<usize> {
        let id = self.id;
        let scp_recv = stream == 0
            && self
                .session
                .channel_entry(id)
                .map(|e| e.kind == ChannelKind::ScpRecv)
                .unwrap_or(false);
        if scp_recv {
            self.session.drive(|s| s.scp_read_step(id, buf))
        } else {
            self.session.drive(|s| s.channel_read_step(id, stream, buf))
        }
    }

    /// Writes to stream 0 and returns how many bytes were accepted.
    pub fn write(&mut self, data: &[u8]) -> TetherResult<usize> {
        self.write_stream(0, data)
    }

    /// Writes to stream 0 or 1.
    ///
    /// Accepts at most the peer's current window. With no credit left the
    /// call fails with `WouldBlock(Readable)` until a WINDOW_ADJUST arrives.
    pub fn write_stream(&mut self, stream: u32, data: &[u8]) -> TetherResult<usize> {
        let id = self.id;
        let scp_send = stream == 0
            && self
                .session
                .channel_entry(id)
                .map(|e| e.kind == ChannelKind::ScpSend)
                .unwrap_or(false);
        if scp_send {
            self.session.drive(|s| s.scp_write_step(id, data))
        } else {
            self.session
                .drive(|s| s.channel_write_step(id, stream, data))
        }
    }

    /// Half-closes the channel. Later writes fail.
    pub fn send_eof(&mut self) -> TetherResult<()> {
        let id = self.id;
        let scp_send = self
            .session
            .channel_entry(id)
            .map(|e| e.kind == ChannelKind::ScpSend)
            .unwrap_or(false);
        if scp_send {
            self.session.drive(|s| s.scp_finish_step(id))
        } else {
            self.session.drive(|s| s.channel_eof_step(id))
        }
    }

    /// Returns true once the peer sent EOF and stream 0 is drained.
    pub fn eof(&self) -> bool {
        self.session
            .channel_entry(self.id)
            .map(|e| (e.eof_received || e.close_received) && e.stdout.is_empty())
            .unwrap_or(true)
    }

    /// Reports buffered data and flags without doing I/O.
    pub fn poll(&self) -> TetherResult<ChannelStatus> {
        Ok(self.session.channel_entry(self.id)?.status())
    }

    /// Returns true if stream `stream` has buffered data.
    pub fn poll_extended(&self, stream: u32) -> TetherResult<bool> {
        Ok(!self.session.channel_entry(self.id)?.buffer(stream)?.is_empty())
    }

    /// Returns the receive window state.
    pub fn window_read(&self) -> TetherResult<WindowStatus> {
        let entry = self.session.channel_entry(self.id)?;
        Ok(WindowStatus {
            available: entry.local.window().available(),
            pending: entry.local.pending(),
            initial: entry.local.window().initial(),
        })
    }

    /// Grants the peer `bytes` more credit.
    ///
    /// Small adjustments are accumulated until they reach 1 KiB unless
    /// `force` is set. Returns the credit now granted to the peer.
    pub fn window_adjust(&mut self, bytes: u32, force: bool) -> TetherResult<u32> {
        let id = self.id;
        self.session.drive(|s| {
            let (entry, outbox) = s.open_channel_parts(id)?;
            if let Some(amount) = entry.local.request(bytes, force) {
                entry.send_adjust(outbox, amount)?;
            }
            Ok(entry.local.window().available())
        })
    }

    /// Returns the credit available for writing.
    pub fn window_write(&self) -> TetherResult<u32> {
        Ok(self.session.channel_entry(self.id)?.status().remote_credit)
    }

    /// Discards buffered data on `stream` and returns how many bytes were
    /// dropped. The receive window is credited as if they had been read.
    pub fn flush_stream(&mut self, stream: u32) -> TetherResult<usize> {
        let id = self.id;
        self.session.drive(|s| {
            let (entry, outbox) = s.open_channel_parts(id)?;
            let len = entry.buffer(stream)?.len();
            let mut sink = vec![0u8; len];
            entry.read_buffered(outbox, stream, &mut sink)
        })
    }

    /// Exit status reported by the remote process, if any.
    pub fn exit_status(&self) -> Option<u32> {
        self.session
            .channel_entry(self.id)
            .ok()
            .and_then(|e| e.exit_status)
    }

    /// Signal that killed the remote process, if any.
    pub fn exit_signal(&self) -> Option<ExitSignal> {
        self.session
            .channel_entry(self.id)
            .ok()
            .and_then(|e| e.exit_signal.clone())
    }

    /// Header of the file being transferred on an SCP channel.
    pub fn scp_stat(&self) -> Option<ScpStat> {
        self.session
            .channel_entry(self.id)
            .ok()
            .and_then(|e| e.scp.as_ref())
            .and_then(ScpState::stat)
    }

    /// Sends CHANNEL_CLOSE and cancels pending requests.
    ///
    /// Idempotent; closing a retired id is a no-op.
    pub fn close(&mut self) -> TetherResult<()> {
        let id = self.id;
        self.session.drive(|s| s.close_channel(id))
    }

    /// Waits until the peer acknowledged the close and the id is retired.
    pub fn wait_closed(&mut self) -> TetherResult<()> {
        let id = self.id;
        self.session.drive(|s| s.wait_closed_step(id))
    }
}

impl io::Read for Channel<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(0, buf).map_err(io::Error::from)
    }
}

impl io::Write for Channel<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_stream(0, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.session.flush_outbound().map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_entry(window: u32, remote_window: u32, max_packet: u32) -> ChannelEntry {
        ChannelEntry::inbound(ChannelId(1), ChannelKind::Exec, window, 7, remote_window, max_packet)
    }

    #[test]
    fn test_write_never_exceeds_credit() {
        let mut entry = open_entry(1024, 100, 32);
        let mut outbox = Outbox::new(1 << 20);

        assert_eq!(entry.write_data(&mut outbox, 0, &[1u8; 250]).unwrap(), 100);
        assert_eq!(entry.remote.available(), 0);
        assert!(matches!(
            entry.write_data(&mut outbox, 0, b"more"),
            Err(TetherError::WouldBlock(Direction::Readable))
        ));

        // 100 bytes split into 32-byte packets
        let mut frames = 0;
        let mut buf = BytesMut::from(&outbox_bytes(&mut outbox)[..]);
        let codec = crate::ssh::frame::FrameCodec::default();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            let msg = ConnectionMessage::from_bytes(&frame).unwrap();
            match msg {
                ConnectionMessage::ChannelData {
                    recipient_channel,
                    data,
                } => {
                    assert_eq!(recipient_channel, 7);
                    assert!(data.len() <= 32);
                }
                other => panic!("unexpected {:?}", other),
            }
            frames += 1;
        }
        assert_eq!(frames, 4);
    }

    #[test]
    fn test_write_blocks_on_full_outbox() {
        let mut entry = open_entry(1024, 1 << 20, 1024);
        let mut outbox = Outbox::new(64);
        outbox.push(&[0u8; 60]).unwrap();
        assert!(matches!(
            entry.write_data(&mut outbox, 0, &[0u8; 10]),
            Err(TetherError::WouldBlock(Direction::Writable))
        ));
        assert_eq!(entry.remote.available(), 1 << 20);
    }

    #[test]
    fn test_data_after_eof_dropped() {
        let mut entry = open_entry(1024, 0, 32);
        entry.accept_data(0, b"before");
        entry.eof_received = true;
        entry.accept_data(0, b"after");
        assert_eq!(&entry.stdout[..], b"before");
    }

    #[test]
    fn test_read_credits_window() {
        let mut entry = open_entry(100, 0, 32);
        let mut outbox = Outbox::new(1024);
        entry.accept_data(0, &[9u8; 60]);
        entry.accept_data(1, &[8u8; 10]);
        assert_eq!(entry.local.window().available(), 30);

        let mut buf = [0u8; 40];
        assert_eq!(entry.read_buffered(&mut outbox, 0, &mut buf).unwrap(), 40);
        assert!(outbox.is_empty());
        assert_eq!(entry.read_buffered(&mut outbox, 1, &mut buf).unwrap(), 10);
        assert!(!outbox.is_empty());
        assert_eq!(entry.local.window().available(), 80);
        assert_eq!(entry.local.pending(), 0);
    }

    #[test]
    fn test_window_overrun_truncated() {
        let mut entry = open_entry(10, 0, 32);
        entry.accept_data(0, &[1u8; 25]);
        assert_eq!(entry.stdout.len(), 10);
        assert_eq!(entry.local.window().available(), 0);
    }

    fn outbox_bytes(outbox: &mut Outbox) -> Vec<u8> {
        struct Sink(Vec<u8>);
        impl tether_platform::SecureStream for Sink {
            fn send(&mut self, data: &[u8]) -> TetherResult<usize> {
                self.0.extend_from_slice(data);
                Ok(data.len())
            }
            fn recv(&mut self, _: &mut [u8]) -> TetherResult<usize> {
                Ok(0)
            }
            fn wait(
                &mut self,
                _: Direction,
                _: Option<std::time::Duration>,
            ) -> TetherResult<bool> {
                Ok(true)
            }
        }
        let mut sink = Sink(Vec::new());
        outbox.flush(&mut sink).unwrap();
        sink.0
    }
}
