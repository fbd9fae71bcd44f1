//! SSH session: one secured connection and every channel multiplexed on it.
//!
//! A [`Session`] is driven by its caller. It never spawns threads or tasks;
//! each public operation makes as much progress as the transport allows and
//! either completes or fails with [`TetherError::WouldBlock`] naming the
//! direction to wait for. In blocking mode (the default) the session performs
//! that wait itself, bounded by [`SessionConfig::timeout`].
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> SocketBound -> HandshakeInProgress -> Authenticating
//!              -> Ready -> Closing -> Closed
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_platform::SecurityProvider;
//! use tether_proto::ssh::{Credentials, Session};
//!
//! # fn run(provider: impl SecurityProvider + 'static) -> tether_platform::TetherResult<()> {
//! let mut session = Session::new();
//! session.bind(provider)?;
//! session.startup()?;
//! session.authenticate("alice", &Credentials::password("secret"))?;
//!
//! let id = session.open_session()?;
//! session.channel(id).exec("ls")?;
//! # session.close("bye")?;
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod events;
pub(crate) mod keepalive;
pub(crate) mod outbox;
mod pump;

pub use events::{Callback, EventKind, SessionEvent};
pub use keepalive::create_keepalive_message;

use crate::ssh::auth::USERAUTH_SERVICE;
use crate::ssh::channel::{Channel, ChannelEntry, ChannelId, ChannelKind, ChannelState};
use crate::ssh::config::SessionConfig;
use crate::ssh::connection::{ChannelType, ConnectionMessage};
use crate::ssh::forwarding::listener::{GlobalSlot, ListenerEntry, ListenerId};
use crate::ssh::frame::FrameCodec;
use crate::ssh::message::{service_request, Disconnect, DisconnectReason};
use crate::ssh::version::Version;
use auth::AuthAttempt;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use keepalive::Keepalive;
use outbox::Outbox;
use sha2::Digest;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tether_platform::{
    Direction, Established, NegotiatedMethods, SecureStream, SecurityProvider, TetherError,
    TetherResult,
};
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport bound
    Disconnected,
    /// Transport provider attached
    SocketBound,
    /// Handshake or service request under way
    HandshakeInProgress,
    /// Transport ready, user not authenticated yet
    Authenticating,
    /// Authenticated; channels may be opened
    Ready,
    /// Close requested, DISCONNECT not flushed yet
    Closing,
    /// Finished
    Closed,
}

/// Digest used for host key hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    /// MD5 (16 bytes)
    Md5,
    /// SHA-1 (20 bytes)
    Sha1,
    /// SHA-256 (32 bytes)
    Sha256,
}

/// One SSH connection.
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) state: SessionState,
    provider: Option<Box<dyn SecurityProvider>>,
    stream: Option<Box<dyn SecureStream>>,
    codec: FrameCodec,
    inbound: BytesMut,
    pub(crate) outbox: Outbox,
    remote_banner: Option<String>,
    host_key: Vec<u8>,
    pub(crate) session_id: Vec<u8>,
    methods: NegotiatedMethods,
    service_requested: bool,
    service_accepted: bool,
    authenticated: bool,
    pub(crate) auth: Option<AuthAttempt>,
    pub(crate) auth_inbox: VecDeque<Bytes>,
    userauth_banner: Option<String>,
    pub(crate) channels: HashMap<ChannelId, ChannelEntry>,
    next_channel: u32,
    pub(crate) listeners: HashMap<ListenerId, ListenerEntry>,
    pub(crate) next_listener: u32,
    pub(crate) global_requests: VecDeque<GlobalSlot>,
    pub(crate) pending_ops: HashMap<String, ChannelId>,
    pub(crate) events: VecDeque<SessionEvent>,
    pub(crate) callbacks: HashMap<EventKind, Callback>,
    pub(crate) x11_requested: bool,
    fatal: Option<String>,
    hangup: Option<String>,
    last_error: Option<String>,
    keepalive: Keepalive,
    handshake_hint: Direction,
}

impl Session {
    /// Creates a session with the default configuration.
    pub fn new() -> Self {
        Self::build(SessionConfig::default())
    }

    /// Creates a session with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Config`] if the configuration is invalid.
    pub fn with_config(config: SessionConfig) -> TetherResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SessionConfig) -> Self {
        Self {
            outbox: Outbox::new(config.max_outbound),
            keepalive: Keepalive::new(config.keepalive_interval),
            config,
            state: SessionState::Disconnected,
            provider: None,
            stream: None,
            codec: FrameCodec::default(),
            inbound: BytesMut::new(),
            remote_banner: None,
            host_key: Vec::new(),
            session_id: Vec::new(),
            methods: NegotiatedMethods::default(),
            service_requested: false,
            service_accepted: false,
            authenticated: false,
            auth: None,
            auth_inbox: VecDeque::new(),
            userauth_banner: None,
            channels: HashMap::new(),
            next_channel: 0,
            listeners: HashMap::new(),
            next_listener: 0,
            global_requests: VecDeque::new(),
            pending_ops: HashMap::new(),
            events: VecDeque::new(),
            callbacks: HashMap::new(),
            x11_requested: false,
            fatal: None,
            hangup: None,
            last_error: None,
            handshake_hint: Direction::Both,
        }
    }

    /// Attaches the transport security provider.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::ChannelState`] unless the session is
    /// `Disconnected`.
    pub fn bind<P: SecurityProvider + 'static>(&mut self, provider: P) -> TetherResult<()> {
        if self.state != SessionState::Disconnected {
            return Err(TetherError::ChannelState(format!(
                "Cannot bind a transport in state {:?}",
                self.state
            )));
        }
        self.provider = Some(Box::new(provider));
        self.state = SessionState::SocketBound;
        debug!("Transport provider bound");
        Ok(())
    }

    /// Performs the handshake and starts the user authentication service.
    ///
    /// On `WouldBlock` the state is `HandshakeInProgress`; repeat the call
    /// once the hinted direction is ready. Calling it again after success is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Handshake`] if the provider fails or the peer's
    ///   identification is not SSH 2.0; the session is unusable afterwards
    /// - [`TetherError::ChannelState`] if no provider is bound
    pub fn startup(&mut self) -> TetherResult<()> {
        match self.state {
            SessionState::SocketBound | SessionState::HandshakeInProgress => {}
            SessionState::Authenticating | SessionState::Ready => return Ok(()),
            SessionState::Disconnected => {
                return Err(TetherError::ChannelState(
                    "No transport bound; call bind() first".to_string(),
                ))
            }
            SessionState::Closing | SessionState::Closed => return Err(self.closed_error()),
        }
        self.drive(|s| s.startup_step())
    }

    fn startup_step(&mut self) -> TetherResult<()> {
        if self.stream.is_none() {
            let provider = self.provider.as_mut().ok_or_else(|| {
                TetherError::ChannelState("No transport bound".to_string())
            })?;
            match provider.connect(&self.config.banner) {
                Ok(established) => self.establish(established)?,
                Err(TetherError::WouldBlock(direction)) => {
                    self.state = SessionState::HandshakeInProgress;
                    self.handshake_hint = direction;
                    return Err(TetherError::WouldBlock(direction));
                }
                Err(e @ TetherError::Handshake(_)) => return Err(e),
                Err(e) => return Err(TetherError::Handshake(e.to_string())),
            }
        }

        if !self.service_requested {
            self.outbox.push(&service_request(USERAUTH_SERVICE))?;
            self.service_requested = true;
            // Picks up an accept that is already waiting.
            self.pump()?;
        }
        if !self.service_accepted {
            return Err(TetherError::WouldBlock(Direction::Readable));
        }

        self.state = SessionState::Authenticating;
        info!("Session state: Authenticating");
        Ok(())
    }

    fn establish(&mut self, established: Established) -> TetherResult<()> {
        let remote = Version::parse(&established.remote_banner)?;
        info!(
            "Transport established with {} (kex {}, host key {})",
            remote, established.methods.kex, established.methods.host_key
        );
        self.remote_banner = Some(remote.to_string());
        self.host_key = established.host_key;
        self.session_id = established.session_id;
        self.methods = established.methods;
        self.stream = Some(established.stream);
        self.state = SessionState::HandshakeInProgress;
        self.keepalive.touch();
        Ok(())
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the identification line announced to the peer.
    pub fn banner(&self) -> &str {
        &self.config.banner
    }

    /// Sets the identification line. Only allowed before the handshake.
    pub fn set_banner(&mut self, banner: &str) -> TetherResult<()> {
        if self.stream.is_some() {
            return Err(TetherError::ChannelState(
                "Banner cannot change after the handshake".to_string(),
            ));
        }
        Version::parse(banner).map_err(|e| TetherError::Config(e.to_string()))?;
        self.config.banner = banner.trim_end().to_string();
        Ok(())
    }

    /// Returns the peer's identification line once the handshake finished.
    pub fn remote_banner(&self) -> Option<&str> {
        self.remote_banner.as_deref()
    }

    /// Returns the message the server sent with SSH_MSG_USERAUTH_BANNER.
    pub fn userauth_banner(&self) -> Option<&str> {
        self.userauth_banner.as_deref()
    }

    /// Returns the algorithms negotiated by the transport.
    pub fn negotiated_methods(&self) -> &NegotiatedMethods {
        &self.methods
    }

    /// Returns the server host key blob.
    pub fn hostkey(&self) -> Option<&[u8]> {
        if self.host_key.is_empty() {
            None
        } else {
            Some(&self.host_key)
        }
    }

    /// Returns the digest of the server host key.
    pub fn hostkey_hash(&self, hash: HashType) -> Option<Vec<u8>> {
        let key = self.hostkey()?;
        Some(match hash {
            HashType::Md5 => md5::Md5::digest(key).to_vec(),
            HashType::Sha1 => sha1::Sha1::digest(key).to_vec(),
            HashType::Sha256 => sha2::Sha256::digest(key).to_vec(),
        })
    }

    /// Returns the host key fingerprint as OpenSSH prints it.
    ///
    /// MD5 uses colon separated hex; SHA digests use `SHA1:`/`SHA256:`
    /// followed by unpadded base64.
    pub fn hostkey_fingerprint(&self, hash: HashType) -> Option<String> {
        let digest = self.hostkey_hash(hash)?;
        Some(match hash {
            HashType::Md5 => digest
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":"),
            HashType::Sha1 => format!("SHA1:{}", STANDARD_NO_PAD.encode(&digest)),
            HashType::Sha256 => format!("SHA256:{}", STANDARD_NO_PAD.encode(&digest)),
        })
    }

    /// Returns the session identifier (exchange hash).
    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    /// Returns true once authentication succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Selects blocking or non-blocking mode.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.config.blocking = blocking;
    }

    /// Returns true in blocking mode.
    pub fn is_blocking(&self) -> bool {
        self.config.blocking
    }

    /// Sets the bound on a single blocking operation.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Returns the description of the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns a handle to channel `id`.
    ///
    /// The handle does not validate the id; operations on unknown or retired
    /// ids fail with [`TetherError::ChannelState`].
    pub fn channel(&mut self, id: ChannelId) -> Channel<'_> {
        Channel::new(self, id)
    }

    /// Ids of all channels currently held by the session, in open order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Opens a channel of `kind`.
    ///
    /// Queues CHANNEL_OPEN and returns at once; the first request on the
    /// channel waits for the confirmation. Peer-initiated kinds and
    /// `DirectTcpIp` (see [`Session::direct_tcpip`]) are rejected.
    pub fn open_channel(&mut self, kind: ChannelKind) -> TetherResult<ChannelId> {
        match kind {
            ChannelKind::Shell
            | ChannelKind::Exec
            | ChannelKind::ScpSend
            | ChannelKind::ScpRecv
            | ChannelKind::Sftp => self.open_typed(kind, ChannelType::Session),
            ChannelKind::DirectTcpIp => Err(TetherError::InvalidInput(
                "Use direct_tcpip() to open a direct-tcpip channel".to_string(),
            )),
            ChannelKind::ForwardedTcpIp | ChannelKind::X11 => Err(TetherError::InvalidInput(
                format!("{:?} channels are opened by the peer", kind),
            )),
        }
    }

    /// Opens a "session" channel for a shell, a command or a subsystem.
    pub fn open_session(&mut self) -> TetherResult<ChannelId> {
        self.open_channel(ChannelKind::Shell)
    }

    /// Asks the server to connect to `host:port` on our behalf.
    pub fn direct_tcpip(
        &mut self,
        host: &str,
        port: u16,
        originator_host: &str,
        originator_port: u16,
    ) -> TetherResult<ChannelId> {
        self.open_typed(
            ChannelKind::DirectTcpIp,
            ChannelType::DirectTcpip {
                host: host.to_string(),
                port: u32::from(port),
                originator_address: originator_host.to_string(),
                originator_port: u32::from(originator_port),
            },
        )
    }

    fn open_typed(
        &mut self,
        kind: ChannelKind,
        channel_type: ChannelType,
    ) -> TetherResult<ChannelId> {
        self.ensure_ready()?;
        let id = self.allocate_channel_id();
        self.outbox.send(&ConnectionMessage::ChannelOpen {
            channel_type,
            sender_channel: id.0,
            initial_window_size: self.config.window_size,
            maximum_packet_size: self.config.max_packet,
        })?;
        self.channels.insert(
            id,
            ChannelEntry::outbound(id, kind, self.config.window_size),
        );
        info!("Opening {:?} channel {}", kind, id);
        self.flush_quietly()?;
        Ok(id)
    }

    /// Ids are handed out in order, so an allocated id with no entry has
    /// been released.
    pub(crate) fn is_retired(&self, id: ChannelId) -> bool {
        id.0 < self.next_channel && !self.channels.contains_key(&id)
    }

    pub(crate) fn allocate_channel_id(&mut self) -> ChannelId {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        id
    }

    /// Sends an SSH_MSG_IGNORE so idle connections are not dropped.
    pub fn send_keepalive(&mut self) -> TetherResult<()> {
        self.ensure_alive()?;
        if self.stream.is_none() {
            return Err(TetherError::ChannelState(
                "Keep-alive needs an established transport".to_string(),
            ));
        }
        self.outbox.push(&create_keepalive_message(16))?;
        self.keepalive.touch();
        debug!("Keep-alive queued");
        self.flush_quietly()
    }

    /// Direction the caller should wait for before driving the session.
    pub fn wants(&self) -> Direction {
        if self.stream.is_none() {
            return self.handshake_hint;
        }
        if self.outbox.is_empty() {
            Direction::Readable
        } else {
            Direction::Both
        }
    }

    /// Waits once for transport readiness (at most `timeout`), processes
    /// whatever arrived and returns the channels with buffered data or a
    /// pending EOF/close.
    ///
    /// Sends a keep-alive when the configured interval has passed.
    pub fn poll(&mut self, timeout: Option<Duration>) -> TetherResult<Vec<ChannelId>> {
        self.ensure_alive()?;
        if self.stream.is_none() {
            return Err(TetherError::ChannelState(
                "Session is not connected".to_string(),
            ));
        }

        let result = self.poll_once(timeout);
        if let Some(reason) = self.hangup.take() {
            return Err(self.record(TetherError::Disconnected(reason)));
        }
        if let Err(e) = result {
            return Err(self.record(e));
        }

        let mut ready: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|entry| {
                let status = entry.status();
                status.data > 0 || status.extended > 0 || status.eof || status.closed
            })
            .map(|entry| entry.id)
            .collect();
        ready.sort();
        Ok(ready)
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> TetherResult<()> {
        self.flush()?;
        let now = Instant::now();
        let timeout = match (timeout, self.keepalive.remaining(now)) {
            (Some(t), Some(k)) => Some(t.min(k)),
            (t, k) => t.or(k),
        };
        let direction = self.wants();
        if let Some(stream) = self.stream.as_mut() {
            stream.wait(direction, timeout)?;
        }
        self.pump()?;
        if self.keepalive.due(Instant::now()) {
            self.outbox.push(&create_keepalive_message(16))?;
            self.keepalive.touch();
            debug!("Keep-alive queued");
        }
        self.flush()
    }

    /// Closes every channel, cancels pending operations and disconnects.
    ///
    /// Idempotent. In non-blocking mode the call may return `WouldBlock`
    /// until the DISCONNECT message has been written.
    pub fn close(&mut self, reason: &str) -> TetherResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.fatal.is_some() || self.stream.is_none() {
            self.teardown();
            return Ok(());
        }

        if self.state != SessionState::Closing {
            info!("Closing session: {}", reason);
            let ids: Vec<ChannelId> = self.channels.keys().copied().collect();
            for id in ids {
                self.close_channel(id)?;
            }
            self.cancel_global_requests();
            self.outbox
                .push(&Disconnect::new(DisconnectReason::ByApplication, reason).to_bytes())?;
            self.state = SessionState::Closing;
        }

        let flushed = self.drive(|s| {
            if s.outbox.is_empty() {
                Ok(())
            } else {
                Err(TetherError::WouldBlock(Direction::Writable))
            }
        });
        match flushed {
            Err(e @ TetherError::WouldBlock(_)) => return Err(e),
            Err(e) => warn!("Disconnect not delivered: {}", e),
            Ok(()) => {}
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        for entry in self.channels.values_mut() {
            entry.user_closed = true;
            entry.cancel_pending();
            entry.close_sent = true;
            entry.close_received = true;
            entry.state = ChannelState::Closed;
        }
        for listener in self.listeners.values_mut() {
            listener.queue.clear();
        }
        self.cancel_global_requests();
        self.pending_ops.clear();
        self.auth = None;
        self.outbox.clear();
        self.inbound.clear();
        self.stream = None;
        self.provider = None;
        if self.state != SessionState::Closed {
            info!("Session state: Closed");
        }
        self.state = SessionState::Closed;
    }

    /// Fails unless the session is authenticated and alive.
    pub(crate) fn ensure_ready(&self) -> TetherResult<()> {
        self.ensure_alive()?;
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closing | SessionState::Closed => Err(self.closed_error()),
            other => Err(TetherError::ChannelState(format!(
                "Session is not ready (state {:?})",
                other
            ))),
        }
    }

    /// Fails with `Disconnected` once a fatal error was latched.
    pub(crate) fn ensure_alive(&self) -> TetherResult<()> {
        match &self.fatal {
            Some(reason) => Err(TetherError::Disconnected(reason.clone())),
            None => Ok(()),
        }
    }

    fn closed_error(&self) -> TetherError {
        TetherError::Disconnected(
            self.fatal
                .clone()
                .unwrap_or_else(|| "Session closed".to_string()),
        )
    }

    /// Records a failure; fatal errors are latched.
    pub(crate) fn record(&mut self, err: TetherError) -> TetherError {
        if err.is_would_block() {
            return err;
        }
        self.last_error = Some(err.to_string());
        if err.is_fatal() && self.fatal.is_none() {
            warn!("Session failed: {}", err);
            self.fatal = Some(err.to_string());
            self.teardown();
        }
        err
    }

    /// Runs `step` until it stops returning `WouldBlock`.
    ///
    /// Each attempt first pumps the transport, then runs the step and
    /// flushes what it queued. In non-blocking mode the first `WouldBlock`
    /// is returned to the caller; in blocking mode the session waits for the
    /// hinted direction until the configured timeout expires.
    pub(crate) fn drive<T>(
        &mut self,
        mut step: impl FnMut(&mut Self) -> TetherResult<T>,
    ) -> TetherResult<T> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            self.ensure_alive()?;
            let result = match self.pump() {
                Ok(()) => step(self),
                Err(e) => Err(e),
            };
            if let Err(e) = self.flush() {
                return Err(self.record(e));
            }
            // The peer went away: finish this step with what was buffered,
            // then latch the disconnect.
            if let Some(reason) = self.hangup.take() {
                let err = self.record(TetherError::Disconnected(reason));
                return match result {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_would_block() => Err(err),
                    Err(e) => Err(e),
                };
            }
            match result {
                Err(TetherError::WouldBlock(direction)) if self.config.blocking => {
                    let direction = if self.outbox.is_empty() {
                        direction
                    } else {
                        direction.union(Direction::Writable)
                    };
                    if let Err(e) = self.wait_until(direction, deadline) {
                        return Err(self.record(e));
                    }
                }
                Err(e) => return Err(self.record(e)),
                Ok(value) => return Ok(value),
            }
        }
    }

    fn wait_until(&mut self, direction: Direction, deadline: Instant) -> TetherResult<()> {
        let now = Instant::now();
        if now >= deadline {
            return Err(TetherError::Timeout);
        }
        let remaining = deadline - now;
        let ready = if let Some(stream) = self.stream.as_mut() {
            stream.wait(direction, Some(remaining))?
        } else if let Some(provider) = self.provider.as_mut() {
            provider.wait(direction, Some(remaining))?
        } else {
            return Err(self.closed_error());
        };
        if !ready && Instant::now() >= deadline {
            return Err(TetherError::Timeout);
        }
        Ok(())
    }

    /// Writes queued frames without waiting.
    pub(crate) fn flush(&mut self) -> TetherResult<()> {
        if let Some(stream) = self.stream.as_mut() {
            self.outbox.flush(stream.as_mut())?;
        }
        Ok(())
    }

    fn flush_quietly(&mut self) -> TetherResult<()> {
        match self.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.record(e)),
        }
    }

    /// Writes every queued frame, waiting in blocking mode.
    pub fn flush_outbound(&mut self) -> TetherResult<()> {
        self.drive(|s| {
            if s.outbox.is_empty() {
                Ok(())
            } else {
                Err(TetherError::WouldBlock(Direction::Writable))
            }
        })
    }

    fn cancel_global_requests(&mut self) {
        for slot in self.global_requests.iter_mut() {
            slot.cancel();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("remote_banner", &self.remote_banner)
            .field("authenticated", &self.authenticated)
            .field("channels", &self.channels.len())
            .field("blocking", &self.config.blocking)
            .finish_non_exhaustive()
    }
}
