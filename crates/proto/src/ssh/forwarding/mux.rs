//! Relays forwarded channels to local sockets.
//!
//! A [`ForwardingMux`] is driven from the caller's readiness loop, like the
//! session itself. Each [`pump`](ForwardingMux::pump) moves whatever bytes
//! can move without waiting between every forwarding channel and its local
//! endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use tether_proto::ssh::forwarding::ForwardingMux;
//! use tether_proto::ssh::Session;
//!
//! # fn run(session: &mut Session) -> tether_platform::TetherResult<()> {
//! let mut mux: ForwardingMux<TcpStream> = ForwardingMux::new(None);
//! let listener = session.forward_listen("0.0.0.0", 8080, 8)?;
//! session.set_blocking(false);
//! loop {
//!     if let Ok(channel) = session.forward_accept(listener) {
//!         let local = TcpStream::connect("127.0.0.1:3000")?;
//!         local.set_nonblocking(true)?;
//!         mux.add(channel, local);
//!     }
//!     mux.pump(session)?;
//!     session.poll(Some(std::time::Duration::from_millis(50)))?;
//! }
//! # }
//! ```

use crate::ssh::channel::ChannelId;
use crate::ssh::session::Session;
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info, warn};

/// Bytes moved per direction and pair in one pump.
const RELAY_CHUNK: usize = 16 * 1024;

/// A non-blocking local socket a forwarding channel is paired with.
pub trait LocalEndpoint {
    /// Reads available bytes; `Ok(0)` is end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes bytes and returns how many were accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Shuts down the write half.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl LocalEndpoint for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Write::write(self, data)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

#[cfg(unix)]
impl LocalEndpoint for std::os::unix::net::UnixStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Write::write(self, data)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl<E: LocalEndpoint + ?Sized> LocalEndpoint for Box<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        (**self).shutdown_write()
    }
}

/// A source the caller should wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuxSource {
    /// The session transport
    Session,
    /// The local endpoint paired with this channel
    Endpoint(ChannelId),
}

struct Pair<E> {
    channel: ChannelId,
    endpoint: E,
    /// Read from the channel, not yet written locally
    to_local: BytesMut,
    /// Read locally, not yet written to the channel
    to_remote: BytesMut,
    remote_eof: bool,
    local_eof: bool,
    eof_sent: bool,
    shut_down: bool,
}

impl<E: LocalEndpoint> Pair<E> {
    fn new(channel: ChannelId, endpoint: E) -> Self {
        Self {
            channel,
            endpoint,
            to_local: BytesMut::new(),
            to_remote: BytesMut::new(),
            remote_eof: false,
            local_eof: false,
            eof_sent: false,
            shut_down: false,
        }
    }

    /// Remote side finished and everything it sent reached the local side.
    fn is_done(&self) -> bool {
        self.remote_eof && self.to_local.is_empty() && self.shut_down
    }

    fn relay(&mut self, session: &mut Session, scratch: &mut [u8]) -> TetherResult<usize> {
        let mut moved = 0;
        let mut channel = session.channel(self.channel);

        // Remote to local.
        if self.to_local.is_empty() && !self.remote_eof {
            match channel.read(scratch) {
                Ok(0) => {
                    debug!("Channel {} reached EOF", self.channel);
                    self.remote_eof = true;
                }
                Ok(n) => self.to_local.extend_from_slice(&scratch[..n]),
                Err(TetherError::WouldBlock(_)) => {}
                Err(e) => return Err(e),
            }
        }
        while !self.to_local.is_empty() {
            match self.endpoint.write(&self.to_local) {
                Ok(0) => {
                    return Err(TetherError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "local endpoint closed",
                    )))
                }
                Ok(n) => {
                    self.to_local.advance(n);
                    moved += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TetherError::Io(e)),
            }
        }
        if self.remote_eof && self.to_local.is_empty() && !self.shut_down {
            // The peer may already have gone; a failed shutdown still ends the pair.
            if let Err(e) = self.endpoint.shutdown_write() {
                debug!("Channel {} local shutdown: {}", self.channel, e);
            }
            self.shut_down = true;
        }

        // Local to remote.
        if self.to_remote.is_empty() && !self.local_eof {
            match self.endpoint.read(scratch) {
                Ok(0) => {
                    debug!("Channel {} local side reached EOF", self.channel);
                    self.local_eof = true;
                }
                Ok(n) => self.to_remote.extend_from_slice(&scratch[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TetherError::Io(e)),
            }
        }
        if !self.to_remote.is_empty() && !self.remote_eof {
            match channel.write(&self.to_remote) {
                Ok(n) => {
                    self.to_remote.advance(n);
                    moved += n;
                }
                Err(TetherError::WouldBlock(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if self.remote_eof {
            // Nobody left to deliver to.
            self.to_remote.clear();
        }
        if self.local_eof && self.to_remote.is_empty() && !self.eof_sent && !self.remote_eof {
            match channel.send_eof() {
                Ok(()) => self.eof_sent = true,
                Err(TetherError::WouldBlock(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(moved)
    }

    fn interest(&self) -> Option<Direction> {
        let read = !self.local_eof && self.to_remote.is_empty();
        let write = !self.to_local.is_empty();
        match (read, write) {
            (true, true) => Some(Direction::Both),
            (true, false) => Some(Direction::Readable),
            (false, true) => Some(Direction::Writable),
            (false, false) => None,
        }
    }
}

/// Pairs forwarding channels with local endpoints and relays between them.
///
/// An optional primary channel (usually the shell or command the forwarding
/// belongs to) decides when the whole mux is finished.
pub struct ForwardingMux<E> {
    primary: Option<ChannelId>,
    primary_done: bool,
    pairs: Vec<Pair<E>>,
    scratch: Vec<u8>,
}

impl<E: LocalEndpoint> ForwardingMux<E> {
    /// Creates a mux. Without a primary channel the mux is finished as soon
    /// as no pairs remain.
    pub fn new(primary: Option<ChannelId>) -> Self {
        Self {
            primary_done: primary.is_none(),
            primary,
            pairs: Vec::new(),
            scratch: vec![0u8; RELAY_CHUNK],
        }
    }

    /// Pairs `channel` with `endpoint`. The endpoint must be non-blocking.
    pub fn add(&mut self, channel: ChannelId, endpoint: E) {
        info!("Forwarding channel {} to local endpoint", channel);
        self.pairs.push(Pair::new(channel, endpoint));
    }

    /// Number of active pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pairs are active.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Channels of the active pairs.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.pairs.iter().map(|pair| pair.channel).collect()
    }

    /// Moves bytes in both directions for every pair and returns how many
    /// were delivered.
    ///
    /// The session is driven in non-blocking mode for the duration of the
    /// call. A pair whose channel or endpoint fails is closed and removed
    /// without affecting the others; only session-wide failures are
    /// returned.
    pub fn pump(&mut self, session: &mut Session) -> TetherResult<usize> {
        let blocking = session.is_blocking();
        session.set_blocking(false);
        let result = self.pump_pairs(session);
        session.set_blocking(blocking);
        result
    }

    fn pump_pairs(&mut self, session: &mut Session) -> TetherResult<usize> {
        let mut moved = 0;
        let mut index = 0;
        while index < self.pairs.len() {
            let pair = &mut self.pairs[index];
            match pair.relay(session, &mut self.scratch) {
                Ok(n) => moved += n,
                Err(e) if e.is_fatal() && !matches!(e, TetherError::Io(_)) => return Err(e),
                Err(e) => {
                    warn!("Forwarding on channel {} failed: {}", pair.channel, e);
                    let channel = pair.channel;
                    let _ = pair.endpoint.shutdown_write();
                    self.pairs.swap_remove(index);
                    close_quietly(session, channel)?;
                    continue;
                }
            }
            if pair.is_done() {
                let channel = pair.channel;
                self.pairs.swap_remove(index);
                info!("Forwarding on channel {} finished", channel);
                close_quietly(session, channel)?;
                continue;
            }
            index += 1;
        }

        if let Some(primary) = self.primary {
            if !self.primary_done {
                self.primary_done = match session.channel(primary).poll() {
                    Ok(status) => status.closed || (status.eof && status.data == 0),
                    Err(_) => true,
                };
            }
        }
        Ok(moved)
    }

    /// What the caller should wait on before the next pump.
    pub fn interests(&self, session: &Session) -> Vec<(MuxSource, Direction)> {
        let mut interests = vec![(MuxSource::Session, session.wants())];
        for pair in &self.pairs {
            if let Some(direction) = pair.interest() {
                interests.push((MuxSource::Endpoint(pair.channel), direction));
            }
        }
        interests
    }

    /// Returns true once the primary channel ended and every pair is gone.
    pub fn is_finished(&self) -> bool {
        self.primary_done && self.pairs.is_empty()
    }
}

fn close_quietly(session: &mut Session, channel: ChannelId) -> TetherResult<()> {
    match session.channel(channel).close() {
        Ok(()) | Err(TetherError::WouldBlock(_)) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Closing channel {}: {}", channel, e);
            Ok(())
        }
    }
}
