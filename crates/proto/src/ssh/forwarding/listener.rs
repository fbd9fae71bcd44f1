//! Remote listeners (RFC 4254 Section 7.1).
//!
//! [`Session::forward_listen`] asks the server to listen on an address.
//! Connections the server accepts there arrive as `forwarded-tcpip`
//! channel opens; the session confirms them and parks the new channels in
//! the listener's accept queue until [`Session::forward_accept`] takes them.

use super::types::ForwardAddr;
use crate::ssh::channel::ChannelId;
use crate::ssh::connection::{ConnectionMessage, GlobalRequestType};
use crate::ssh::session::{Session, SessionState};
use crate::ssh::wire::read_u32;
use std::collections::VecDeque;
use std::fmt;
use tether_platform::{Direction, TetherError, TetherResult};
use tracing::{debug, info};

/// Identifier of a remote listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u32);

impl ListenerId {
    /// Returns the raw identifier.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A listener the server confirmed.
#[derive(Debug)]
pub(crate) struct ListenerEntry {
    /// Requested host with the port the server bound
    pub(crate) addr: ForwardAddr,
    pub(crate) queue_max: usize,
    pub(crate) queue: VecDeque<ChannelId>,
}

/// Answer to a global request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GlobalReply {
    Success(Vec<u8>),
    Failure,
    Cancelled,
}

/// A global request waiting for its reply.
///
/// The server answers global requests in order, so replies are matched to
/// the oldest unanswered slot.
#[derive(Debug)]
pub(crate) struct GlobalSlot {
    pub(crate) key: String,
    pub(crate) reply: Option<GlobalReply>,
}

impl GlobalSlot {
    pub(crate) fn new(key: String) -> Self {
        Self { key, reply: None }
    }

    pub(crate) fn cancel(&mut self) {
        if self.reply.is_none() {
            self.reply = Some(GlobalReply::Cancelled);
        }
    }
}

impl Session {
    /// Asks the server to listen on `host:port` and forward connections.
    ///
    /// Port 0 lets the server choose; [`Session::listener_addr`] reports
    /// the bound port. At most `queue_max` accepted connections wait in the
    /// queue; further ones are rejected with `ResourceShortage`.
    ///
    /// # Errors
    ///
    /// - [`TetherError::RequestDenied`] if the server refuses
    /// - [`TetherError::InvalidInput`] if `queue_max` is 0
    pub fn forward_listen(
        &mut self,
        host: &str,
        port: u16,
        queue_max: usize,
    ) -> TetherResult<ListenerId> {
        self.ensure_ready()?;
        if queue_max == 0 {
            return Err(TetherError::InvalidInput(
                "Listener queue must hold at least one connection".to_string(),
            ));
        }

        let request = GlobalRequestType::TcpipForward {
            address: host.to_string(),
            port: u32::from(port),
        };
        let key = format!("tcpip-forward {}", ForwardAddr::new(host, port));
        let reply = self.drive(|s| s.global_request_step(&key, &request))?;

        let data = match reply {
            GlobalReply::Success(data) => data,
            GlobalReply::Failure => {
                return Err(self.record(TetherError::RequestDenied(format!(
                    "Server refused to listen on {}:{}",
                    host, port
                ))))
            }
            GlobalReply::Cancelled => return Err(TetherError::Cancelled),
        };

        let bound = if port == 0 {
            let mut offset = 0;
            let bound = read_u32(&data, &mut offset)?;
            u16::try_from(bound).map_err(|_| {
                TetherError::Protocol(format!("Server bound an invalid port {}", bound))
            })?
        } else {
            port
        };

        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        let addr = ForwardAddr::new(host, bound);
        info!("Listener {} forwarding remote {}", id, addr);
        self.listeners.insert(
            id,
            ListenerEntry {
                addr,
                queue_max,
                queue: VecDeque::new(),
            },
        );
        Ok(id)
    }

    /// Takes the next connection the listener accepted.
    ///
    /// The returned channel is already open.
    pub fn forward_accept(&mut self, listener: ListenerId) -> TetherResult<ChannelId> {
        self.ensure_alive()?;
        self.drive(|s| {
            if s.state == SessionState::Closed {
                return Err(TetherError::Cancelled);
            }
            let entry = s.listeners.get_mut(&listener).ok_or_else(|| {
                TetherError::ChannelState(format!("Unknown listener {}", listener))
            })?;
            match entry.queue.pop_front() {
                Some(channel) => {
                    debug!("Listener {} handing out channel {}", listener, channel);
                    Ok(channel)
                }
                None => Err(TetherError::WouldBlock(Direction::Readable)),
            }
        })
    }

    /// Stops the listener and closes connections still waiting in its queue.
    pub fn forward_cancel(&mut self, listener: ListenerId) -> TetherResult<()> {
        self.ensure_ready()?;
        let addr = match self.listeners.get(&listener) {
            Some(entry) => entry.addr.clone(),
            None => {
                return Err(TetherError::ChannelState(format!(
                    "Unknown listener {}",
                    listener
                )))
            }
        };

        let request = GlobalRequestType::CancelTcpipForward {
            address: addr.host.clone(),
            port: u32::from(addr.port),
        };
        let key = format!("cancel-tcpip-forward {}", addr);
        match self.drive(|s| s.global_request_step(&key, &request))? {
            GlobalReply::Success(_) => {}
            GlobalReply::Failure => {
                return Err(self.record(TetherError::RequestDenied(format!(
                    "Server refused to cancel {}",
                    addr
                ))))
            }
            GlobalReply::Cancelled => return Err(TetherError::Cancelled),
        }

        if let Some(entry) = self.listeners.remove(&listener) {
            for channel in entry.queue {
                self.close_channel(channel)?;
            }
        }
        info!("Listener {} on {} cancelled", listener, addr);
        Ok(())
    }

    /// Returns the address a listener is bound to.
    pub fn listener_addr(&self, listener: ListenerId) -> Option<&ForwardAddr> {
        self.listeners.get(&listener).map(|entry| &entry.addr)
    }

    /// Number of accepted connections waiting on a listener.
    pub fn listener_backlog(&self, listener: ListenerId) -> usize {
        self.listeners
            .get(&listener)
            .map(|entry| entry.queue.len())
            .unwrap_or(0)
    }

    pub(crate) fn find_listener(&self, address: &str, port: u32) -> Option<ListenerId> {
        self.listeners
            .iter()
            .filter(|(_, entry)| entry.addr.matches(address, port))
            // An exact host match wins over a wildcard listener.
            .max_by_key(|(id, entry)| (entry.addr.host == address, std::cmp::Reverse(**id)))
            .map(|(id, _)| *id)
    }

    /// Sends the request on the first call and returns its reply once the
    /// server answered.
    fn global_request_step(
        &mut self,
        key: &str,
        request: &GlobalRequestType,
    ) -> TetherResult<GlobalReply> {
        let Some(index) = self.global_requests.iter().position(|slot| slot.key == key) else {
            if self.state != SessionState::Ready {
                return Err(TetherError::Cancelled);
            }
            self.outbox.send(&ConnectionMessage::GlobalRequest {
                request: request.clone(),
                want_reply: true,
            })?;
            self.global_requests.push_back(GlobalSlot::new(key.to_string()));
            return Err(TetherError::WouldBlock(Direction::Readable));
        };

        if self.global_requests[index].reply.is_none() {
            return Err(TetherError::WouldBlock(Direction::Readable));
        }
        let reply = self
            .global_requests
            .remove(index)
            .and_then(|slot| slot.reply)
            .unwrap_or(GlobalReply::Cancelled);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_keeps_existing_reply() {
        let mut slot = GlobalSlot::new("tcpip-forward a:1".to_string());
        slot.cancel();
        assert_eq!(slot.reply, Some(GlobalReply::Cancelled));

        let mut answered = GlobalSlot::new("tcpip-forward a:2".to_string());
        answered.reply = Some(GlobalReply::Failure);
        answered.cancel();
        assert_eq!(answered.reply, Some(GlobalReply::Failure));
    }

    #[test]
    fn test_listen_requires_ready_session() {
        let mut session = Session::new();
        assert!(matches!(
            session.forward_listen("0.0.0.0", 8080, 4),
            Err(TetherError::ChannelState(_))
        ));
        assert!(session.listener_addr(ListenerId(0)).is_none());
        assert_eq!(session.listener_backlog(ListenerId(0)), 0);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId(3).to_string(), "L3");
    }
}
