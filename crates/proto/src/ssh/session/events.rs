//! Peer-initiated events.
//!
//! Protocol processing never calls user code. Everything the peer starts on
//! its own (X11 and forwarded connections, IGNORE/DEBUG messages, a
//! DISCONNECT) is queued as a [`SessionEvent`]. The readiness loop either
//! pops events with [`Session::next_event`] or hands them to registered
//! callbacks with [`Session::dispatch_events`].

use super::Session;
use crate::ssh::channel::ChannelId;
use std::collections::VecDeque;
use tracing::debug;

/// Event kinds a callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// SSH_MSG_IGNORE received
    Ignore,
    /// SSH_MSG_DEBUG received
    Debug,
    /// The peer disconnected
    Disconnect,
    /// The peer opened an X11 channel
    X11,
    /// The peer opened a forwarded-tcpip channel no listener claimed
    ForwardedTcpIp,
}

/// Something the peer did on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// SSH_MSG_IGNORE payload
    Ignore(Vec<u8>),
    /// SSH_MSG_DEBUG message
    Debug {
        /// Whether the peer asked for the message to be shown
        always_display: bool,
        /// Message text
        message: String,
    },
    /// SSH_MSG_DISCONNECT
    Disconnect {
        /// Reason code
        reason_code: u32,
        /// Description
        description: String,
    },
    /// An accepted X11 channel
    X11Open {
        /// The new channel, already open
        channel: ChannelId,
        /// Address of the X client on the server side
        originator_address: String,
        /// Port of the X client
        originator_port: u32,
    },
    /// An accepted forwarded-tcpip channel with no matching listener
    ForwardedTcpIp {
        /// The new channel, already open
        channel: ChannelId,
        /// Address the connection arrived on
        connected_address: String,
        /// Port the connection arrived on
        connected_port: u32,
        /// Address of the connecting client
        originator_address: String,
        /// Port of the connecting client
        originator_port: u32,
    },
}

impl SessionEvent {
    /// Returns the kind used to look up a callback.
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Ignore(_) => EventKind::Ignore,
            SessionEvent::Debug { .. } => EventKind::Debug,
            SessionEvent::Disconnect { .. } => EventKind::Disconnect,
            SessionEvent::X11Open { .. } => EventKind::X11,
            SessionEvent::ForwardedTcpIp { .. } => EventKind::ForwardedTcpIp,
        }
    }
}

/// Event handler.
///
/// Handlers receive the session so they can act on the event, for example
/// by pairing an X11 channel with a local display socket.
pub type Callback = Box<dyn FnMut(&mut Session, &SessionEvent) + Send>;

impl Session {
    /// Registers `handler` for `kind`, replacing any previous handler.
    ///
    /// Registering an [`EventKind::X11`] handler also makes the session
    /// accept inbound X11 channels.
    pub fn register_callback<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&mut Session, &SessionEvent) + Send + 'static,
    {
        self.callbacks.insert(kind, Box::new(handler));
    }

    /// Removes the handler for `kind`.
    pub fn unregister_callback(&mut self, kind: EventKind) -> bool {
        self.callbacks.remove(&kind).is_some()
    }

    /// Pops the oldest queued event.
    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Number of queued events.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Invokes the registered handler for every queued event.
    ///
    /// Events without a handler stay queued for [`Session::next_event`].
    /// Returns the number of events handled.
    pub fn dispatch_events(&mut self) -> usize {
        let queued: VecDeque<SessionEvent> = std::mem::take(&mut self.events);
        let mut kept = VecDeque::new();
        let mut handled = 0;

        for event in queued {
            let kind = event.kind();
            match self.callbacks.remove(&kind) {
                Some(mut handler) => {
                    debug!("Dispatching {:?} event", kind);
                    handler(self, &event);
                    // A handler may have registered its own replacement.
                    self.callbacks.entry(kind).or_insert(handler);
                    handled += 1;
                }
                None => kept.push_back(event),
            }
        }

        // Events queued by handlers come after the ones left unhandled.
        kept.append(&mut self.events);
        self.events = kept;
        handled
    }

    pub(crate) fn push_event(&mut self, event: SessionEvent) {
        debug!("Queued {:?} event", event.kind());
        self.events.push_back(event);
    }
}
