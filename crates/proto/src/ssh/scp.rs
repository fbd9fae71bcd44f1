//! Single-file SCP transfers over an exec channel.
//!
//! The remote side runs `scp -t` (upload) or `scp -f` (download) and the two
//! ends exchange a short control protocol:
//!
//! ```text
//! upload                               download
//!   <- \0                                -> \0
//!   -> C0644 <size> <name>\n             <- C0644 <size> <name>\n
//!   <- \0                                -> \0
//!   -> <size bytes> \0                   <- <size bytes> \0
//!   <- \0                                -> \0
//! ```
//!
//! A `\x01` (warning) or `\x02` (error) byte followed by a message line
//! replaces any acknowledgement.
//!
//! After [`Session::scp_send`] returns, the channel accepts exactly `size`
//! bytes through [`Channel::write`](crate::ssh::Channel::write) and
//! [`Channel::send_eof`](crate::ssh::Channel::send_eof) completes the
//! transfer. After [`Session::scp_recv`] returns, reads on the channel yield
//! the file contents and then `Ok(0)`.

use crate::ssh::channel::{ChannelEntry, ChannelId, ChannelKind};
use crate::ssh::connection::{ChannelRequestType, ConnectionMessage};
use crate::ssh::session::outbox::Outbox;
use crate::ssh::session::Session;
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info};

/// Mode and size of the file being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScpStat {
    /// Permission bits (e.g. `0o644`)
    pub mode: u32,
    /// File size in bytes
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScpPhase {
    SendReady,
    SendHeaderAck,
    SendData { remaining: u64 },
    SendFinalAck,
    RecvStart,
    RecvHeader,
    RecvData { remaining: u64 },
    Done,
}

/// Per-channel SCP state, stored in the channel entry.
#[derive(Debug)]
pub(crate) struct ScpState {
    phase: ScpPhase,
    stat: Option<ScpStat>,
    name: String,
    tx: Vec<u8>,
}

impl ScpState {
    fn sender(mode: u32, size: u64, name: &str) -> Self {
        Self {
            phase: ScpPhase::SendReady,
            stat: Some(ScpStat { mode, size }),
            name: name.to_string(),
            tx: Vec::new(),
        }
    }

    fn receiver() -> Self {
        Self {
            phase: ScpPhase::RecvStart,
            stat: None,
            name: String::new(),
            tx: Vec::new(),
        }
    }

    pub(crate) fn stat(&self) -> Option<ScpStat> {
        self.stat
    }

    /// Writes queued control bytes.
    fn flush(&mut self, entry: &mut ChannelEntry, outbox: &mut Outbox) -> TetherResult<()> {
        if self.tx.is_empty() {
            return Ok(());
        }
        if !entry.is_live() || entry.eof_sent {
            return Err(TetherError::ChannelState(format!(
                "SCP channel {} is closed",
                entry.id
            )));
        }
        while !self.tx.is_empty() {
            let n = entry.write_data(outbox, 0, &self.tx)?;
            self.tx.drain(..n);
        }
        Ok(())
    }

    /// Runs the control exchange up to the point where file data flows.
    fn handshake(&mut self, entry: &mut ChannelEntry, outbox: &mut Outbox) -> TetherResult<()> {
        loop {
            self.flush(entry, outbox)?;
            match self.phase {
                ScpPhase::SendReady => {
                    expect_ack(entry, outbox)?;
                    let stat = self.stat.unwrap_or(ScpStat { mode: 0o644, size: 0 });
                    let header = format!("C{:04o} {} {}\n", stat.mode, stat.size, self.name);
                    debug!("Channel {} SCP header {}", entry.id, header.trim_end());
                    self.tx.extend_from_slice(header.as_bytes());
                    self.phase = ScpPhase::SendHeaderAck;
                }
                ScpPhase::SendHeaderAck => {
                    expect_ack(entry, outbox)?;
                    let size = self.stat.map_or(0, |stat| stat.size);
                    self.phase = ScpPhase::SendData { remaining: size };
                }
                ScpPhase::RecvStart => {
                    self.tx.push(0);
                    self.phase = ScpPhase::RecvHeader;
                }
                ScpPhase::RecvHeader => {
                    let Some(&first) = entry.stdout.first() else {
                        return Err(no_reply(entry));
                    };
                    let line = take_line(entry, outbox)?;
                    match first {
                        b'C' => {
                            let (stat, name) = parse_header(&line)?;
                            debug!(
                                "Channel {} receiving {} ({} bytes, mode {:o})",
                                entry.id, name, stat.size, stat.mode
                            );
                            self.stat = Some(stat);
                            self.name = name;
                            self.tx.push(0);
                            self.phase = ScpPhase::RecvData {
                                remaining: stat.size,
                            };
                        }
                        b'T' => {
                            debug!("Channel {} skipping SCP time record", entry.id);
                            self.tx.push(0);
                        }
                        1 | 2 => return Err(remote_error(&line)),
                        b'D' | b'E' => {
                            return Err(TetherError::RequestDenied(
                                "SCP directory transfers are not supported".to_string(),
                            ))
                        }
                        other => {
                            return Err(TetherError::RequestDenied(format!(
                                "Unexpected SCP record type {:#04x}",
                                other
                            )))
                        }
                    }
                }
                ScpPhase::SendData { .. } | ScpPhase::RecvData { .. } => return Ok(()),
                ScpPhase::SendFinalAck | ScpPhase::Done => {
                    return Err(TetherError::ChannelState(format!(
                        "SCP transfer on channel {} already finished",
                        entry.id
                    )))
                }
            }
        }
    }

    fn write(
        &mut self,
        entry: &mut ChannelEntry,
        outbox: &mut Outbox,
        data: &[u8],
    ) -> TetherResult<usize> {
        self.flush(entry, outbox)?;
        let ScpPhase::SendData { remaining } = self.phase else {
            return Err(TetherError::ChannelState(format!(
                "Channel {} has no SCP upload in progress",
                entry.id
            )));
        };
        if data.is_empty() {
            return Ok(0);
        }
        if remaining == 0 {
            return Err(TetherError::InvalidInput(format!(
                "SCP upload on channel {} already sent its declared size",
                entry.id
            )));
        }
        if !entry.is_live() || entry.eof_sent {
            return Err(TetherError::ChannelState(format!(
                "SCP channel {} is closed",
                entry.id
            )));
        }
        let limit = data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = entry.write_data(outbox, 0, &data[..limit])?;
        self.phase = ScpPhase::SendData {
            remaining: remaining - n as u64,
        };
        Ok(n)
    }

    fn finish(&mut self, entry: &mut ChannelEntry, outbox: &mut Outbox) -> TetherResult<()> {
        loop {
            self.flush(entry, outbox)?;
            match self.phase {
                ScpPhase::SendData { remaining: 0 } => {
                    self.tx.push(0);
                    self.phase = ScpPhase::SendFinalAck;
                }
                ScpPhase::SendData { remaining } => {
                    return Err(TetherError::InvalidInput(format!(
                        "SCP upload on channel {} is {} bytes short",
                        entry.id, remaining
                    )))
                }
                ScpPhase::SendFinalAck => {
                    expect_ack(entry, outbox)?;
                    if !entry.eof_sent {
                        entry.send(
                            outbox,
                            ConnectionMessage::ChannelEof {
                                recipient_channel: entry.remote_id,
                            },
                        )?;
                        entry.eof_sent = true;
                    }
                    info!("SCP upload of {} complete on channel {}", self.name, entry.id);
                    self.phase = ScpPhase::Done;
                }
                ScpPhase::Done => return Ok(()),
                _ => {
                    return Err(TetherError::ChannelState(format!(
                        "Channel {} has no SCP upload in progress",
                        entry.id
                    )))
                }
            }
        }
    }

    fn read(
        &mut self,
        entry: &mut ChannelEntry,
        outbox: &mut Outbox,
        buf: &mut [u8],
    ) -> TetherResult<usize> {
        self.flush(entry, outbox)?;
        match self.phase {
            ScpPhase::RecvData { remaining } if remaining > 0 => {
                if buf.is_empty() {
                    return Ok(0);
                }
                if entry.stdout.is_empty() {
                    if entry.eof_received || entry.close_received {
                        return Err(TetherError::ChannelState(format!(
                            "SCP download on channel {} ended {} bytes early",
                            entry.id, remaining
                        )));
                    }
                    return Err(TetherError::WouldBlock(Direction::Readable));
                }
                let limit = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let n = entry.read_buffered(outbox, 0, &mut buf[..limit])?;
                self.phase = ScpPhase::RecvData {
                    remaining: remaining - n as u64,
                };
                Ok(n)
            }
            ScpPhase::RecvData { .. } => {
                expect_ack(entry, outbox)?;
                self.tx.push(0);
                self.phase = ScpPhase::Done;
                info!("SCP download of {} complete on channel {}", self.name, entry.id);
                self.flush(entry, outbox)?;
                Ok(0)
            }
            ScpPhase::Done => Ok(0),
            _ => Err(TetherError::ChannelState(format!(
                "Channel {} has no SCP download in progress",
                entry.id
            ))),
        }
    }
}

/// Consumes a `\0` acknowledgement.
fn expect_ack(entry: &mut ChannelEntry, outbox: &mut Outbox) -> TetherResult<()> {
    match entry.stdout.first().copied() {
        None => Err(no_reply(entry)),
        Some(0) => {
            entry.take_buffered(outbox, 1)?;
            Ok(())
        }
        Some(1) | Some(2) => {
            let line = take_line(entry, outbox)?;
            Err(remote_error(&line))
        }
        Some(other) => Err(TetherError::RequestDenied(format!(
            "Unexpected SCP response byte {:#04x}",
            other
        ))),
    }
}

fn no_reply(entry: &ChannelEntry) -> TetherError {
    if entry.eof_received || entry.close_received {
        TetherError::RequestDenied(format!(
            "SCP peer closed channel {} without a reply",
            entry.id
        ))
    } else {
        TetherError::WouldBlock(Direction::Readable)
    }
}

/// Takes one `\n`-terminated line from stream 0, without the newline.
fn take_line(entry: &mut ChannelEntry, outbox: &mut Outbox) -> TetherResult<Vec<u8>> {
    let end = match entry.stdout.iter().position(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None if entry.eof_received || entry.close_received => entry.stdout.len(),
        None => return Err(TetherError::WouldBlock(Direction::Readable)),
    };
    let mut line = entry.take_buffered(outbox, end)?;
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
    }
    Ok(line.to_vec())
}

fn remote_error(line: &[u8]) -> TetherError {
    let message = String::from_utf8_lossy(line.get(1..).unwrap_or_default());
    let message = message.trim();
    if message.starts_with("scp:") {
        TetherError::RequestDenied(message.to_string())
    } else {
        TetherError::RequestDenied(format!("scp: {}", message))
    }
}

/// Parses `C<mode> <size> <name>`.
fn parse_header(line: &[u8]) -> TetherResult<(ScpStat, String)> {
    let malformed = || {
        TetherError::RequestDenied(format!(
            "Malformed SCP header '{}'",
            String::from_utf8_lossy(line)
        ))
    };
    let text = std::str::from_utf8(line).map_err(|_| malformed())?;
    let rest = text.strip_prefix('C').ok_or_else(malformed)?;
    let mut parts = rest.splitn(3, ' ');
    let mode = parts
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(malformed)?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
    Ok((ScpStat { mode, size }, name.to_string()))
}

/// Quotes `value` for the remote shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn basename(path: &str) -> TetherResult<&str> {
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name.contains('\n') {
        return Err(TetherError::InvalidInput(format!(
            "Cannot derive an SCP file name from '{}'",
            path
        )));
    }
    Ok(name)
}

impl Session {
    /// Starts uploading a file of `size` bytes to `path`.
    ///
    /// Returns once the remote `scp` accepted the file header; write the
    /// contents through [`Session::channel`] and finish with `send_eof`.
    /// Resumable after `WouldBlock`.
    ///
    /// # Errors
    ///
    /// - [`TetherError::RequestDenied`] if the remote side reports an error
    /// - [`TetherError::InvalidInput`] if `path` has no file name
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tether_proto::ssh::Session;
    ///
    /// # fn run(session: &mut Session) -> tether_platform::TetherResult<()> {
    /// let data = b"hello world\n";
    /// let id = session.scp_send("/tmp/hello.txt", 0o644, data.len() as u64)?;
    /// let mut channel = session.channel(id);
    /// let mut sent = 0;
    /// while sent < data.len() {
    ///     sent += channel.write(&data[sent..])?;
    /// }
    /// channel.send_eof()?;
    /// channel.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn scp_send(&mut self, path: &str, mode: u32, size: u64) -> TetherResult<ChannelId> {
        let name = basename(path)?.to_string();
        let command = format!("scp -t {}", shell_quote(path));
        self.scp_start(
            ChannelKind::ScpSend,
            &format!("scp_send:{}", path),
            &command,
            || ScpState::sender(mode & 0o7777, size, &name),
        )
    }

    /// Starts downloading the file at `path`.
    ///
    /// Returns once the file header arrived; [`Channel::scp_stat`]
    /// (crate::ssh::Channel::scp_stat) then reports its mode and size.
    pub fn scp_recv(&mut self, path: &str) -> TetherResult<ChannelId> {
        let command = format!("scp -f {}", shell_quote(path));
        self.scp_start(
            ChannelKind::ScpRecv,
            &format!("scp_recv:{}", path),
            &command,
            ScpState::receiver,
        )
    }

    fn scp_start(
        &mut self,
        kind: ChannelKind,
        key: &str,
        command: &str,
        make: impl FnOnce() -> ScpState,
    ) -> TetherResult<ChannelId> {
        let id = match self.pending_ops.get(key) {
            Some(id) => *id,
            None => {
                let id = self.open_channel(kind)?;
                self.pending_ops.insert(key.to_string(), id);
                id
            }
        };

        match self.scp_negotiate(id, command, make) {
            Ok(()) => {
                self.pending_ops.remove(key);
                info!("SCP transfer ready on channel {}: {}", id, command);
                Ok(id)
            }
            Err(e) if e.is_would_block() => Err(e),
            Err(e) => {
                self.pending_ops.remove(key);
                if let Err(close_err) = self.close_channel(id) {
                    debug!("Closing SCP channel {} failed: {}", id, close_err);
                }
                Err(e)
            }
        }
    }

    fn scp_negotiate(
        &mut self,
        id: ChannelId,
        command: &str,
        make: impl FnOnce() -> ScpState,
    ) -> TetherResult<()> {
        let installed = self
            .channels
            .get(&id)
            .map_or(false, |entry| entry.scp.is_some());
        if !installed {
            let exec = ChannelRequestType::Exec {
                command: command.to_string(),
            };
            self.drive(|s| s.channel_request_step(id, &exec))?;
            if let Some(entry) = self.channels.get_mut(&id) {
                entry.scp = Some(make());
            }
        }
        self.drive(|s| s.scp_step(id, |state, entry, outbox| state.handshake(entry, outbox)))
    }

    fn scp_step<T>(
        &mut self,
        id: ChannelId,
        step: impl FnOnce(&mut ScpState, &mut ChannelEntry, &mut Outbox) -> TetherResult<T>,
    ) -> TetherResult<T> {
        let (entry, outbox) = self.open_channel_parts(id)?;
        let mut state = entry.scp.take().ok_or_else(|| {
            TetherError::ChannelState(format!("Channel {} has no SCP transfer", id))
        })?;
        let result = step(&mut state, entry, outbox);
        entry.scp = Some(state);
        result
    }

    pub(crate) fn scp_read_step(&mut self, id: ChannelId, buf: &mut [u8]) -> TetherResult<usize> {
        self.scp_step(id, |state, entry, outbox| state.read(entry, outbox, buf))
    }

    pub(crate) fn scp_write_step(&mut self, id: ChannelId, data: &[u8]) -> TetherResult<usize> {
        self.scp_step(id, |state, entry, outbox| state.write(entry, outbox, data))
    }

    pub(crate) fn scp_finish_step(&mut self, id: ChannelId) -> TetherResult<()> {
        self.scp_step(id, |state, entry, outbox| state.finish(entry, outbox))
    }
}
