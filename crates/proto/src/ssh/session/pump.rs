//! Inbound processing.
//!
//! [`Session::pump`] moves bytes between the secure stream and the session
//! buffers and applies every complete inbound message to the session state.
//! It never calls user code: peer-initiated happenings become queued
//! [`SessionEvent`]s.

use super::{EventKind, Session, SessionEvent};
use crate::ssh::auth::{parse_banner, USERAUTH_SERVICE};
use crate::ssh::channel::{
    ChannelEntry, ChannelId, ChannelKind, ChannelState, ExitSignal, RequestOutcome,
};
use crate::ssh::connection::{
    ChannelOpenFailureReason, ChannelRequestType, ChannelType, ConnectionMessage,
};
use crate::ssh::forwarding::listener::GlobalReply;
use crate::ssh::message::{parse_debug, parse_service_accept, Disconnect, MessageType};
use crate::ssh::wire::read_bytes;
use bytes::Bytes;
use std::collections::HashMap;
use tether_platform::{TetherError, TetherResult};
use tracing::{debug, info, trace, warn};

/// Size of a single read from the stream.
const READ_CHUNK: usize = 16 * 1024;

/// Upper bound on bytes read by one pump.
const READ_BUDGET: usize = 256 * 1024;

impl Session {
    /// Flushes queued frames, reads what the stream has and processes every
    /// complete message. Does nothing before the transport is established.
    pub(crate) fn pump(&mut self) -> TetherResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        self.outbox.flush(stream.as_mut())?;

        let mut buf = [0u8; READ_CHUNK];
        let mut received = 0usize;
        let mut closed = false;
        while received < READ_BUDGET {
            match stream.recv(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&buf[..n]);
                    received += n;
                }
                Err(TetherError::WouldBlock(_)) => break,
                Err(e) => return Err(e),
            }
        }
        if received > 0 {
            trace!("Received {} bytes, {} buffered", received, self.inbound.len());
            self.keepalive.touch();
        }

        while self.hangup.is_none() {
            let Some(frame) = self.codec.decode(&mut self.inbound)? else {
                break;
            };
            self.handle_message(frame)?;
        }

        if closed && self.hangup.is_none() {
            info!("Connection closed by peer");
            self.hangup = Some("Connection closed by peer".to_string());
        }
        Ok(())
    }

    fn handle_message(&mut self, payload: Bytes) -> TetherResult<()> {
        let Some(&first) = payload.first() else {
            return Err(TetherError::Protocol("Empty message".to_string()));
        };
        let Some(kind) = MessageType::from_u8(first) else {
            warn!("Ignoring unknown message type {}", first);
            return Ok(());
        };
        debug!("Received {} ({} bytes)", kind, payload.len());

        match kind {
            MessageType::Disconnect => {
                let disconnect = Disconnect::from_bytes(&payload)?;
                info!(
                    "Peer disconnected (reason {}): {}",
                    disconnect.reason_code, disconnect.description
                );
                self.hangup = Some(format!("Peer disconnected: {}", disconnect.description));
                self.push_event(SessionEvent::Disconnect {
                    reason_code: disconnect.reason_code,
                    description: disconnect.description,
                });
            }
            MessageType::Ignore => {
                let mut offset = 1;
                let data = read_bytes(&payload, &mut offset).unwrap_or_default();
                self.push_event(SessionEvent::Ignore(data));
            }
            MessageType::Debug => {
                let (always_display, message) = parse_debug(&payload)?;
                debug!("Peer debug message: {}", message);
                self.push_event(SessionEvent::Debug {
                    always_display,
                    message,
                });
            }
            MessageType::Unimplemented => {
                warn!("Peer reported an unimplemented message");
            }
            MessageType::ServiceAccept => {
                let service = parse_service_accept(&payload)?;
                if service != USERAUTH_SERVICE {
                    return Err(TetherError::Protocol(format!(
                        "Unexpected service accepted: {}",
                        service
                    )));
                }
                self.service_accepted = true;
            }
            MessageType::UserauthBanner => {
                let banner = parse_banner(&payload)?;
                info!("Server banner: {}", banner.trim_end());
                self.userauth_banner = Some(banner);
            }
            MessageType::UserauthFailure
            | MessageType::UserauthSuccess
            | MessageType::UserauthInfoRequest => {
                self.auth_inbox.push_back(payload);
            }
            MessageType::ServiceRequest
            | MessageType::UserauthRequest
            | MessageType::UserauthInfoResponse => {
                return Err(TetherError::Protocol(format!(
                    "Unexpected {} from server",
                    kind
                )));
            }
            _ => {
                let message = ConnectionMessage::from_bytes(&payload)?;
                self.handle_connection(message)?;
            }
        }
        Ok(())
    }

    fn handle_connection(&mut self, message: ConnectionMessage) -> TetherResult<()> {
        match message {
            ConnectionMessage::GlobalRequest {
                request,
                want_reply,
            } => {
                debug!("Declining peer global request '{}'", request.name());
                if want_reply {
                    self.outbox.send(&ConnectionMessage::RequestFailure)?;
                }
            }
            ConnectionMessage::RequestSuccess { data } => {
                self.resolve_global(GlobalReply::Success(data))
            }
            ConnectionMessage::RequestFailure => self.resolve_global(GlobalReply::Failure),
            ConnectionMessage::ChannelOpen {
                channel_type,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => self.handle_channel_open(
                channel_type,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            )?,
            ConnectionMessage::ChannelOpenConfirmation {
                recipient_channel,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => {
                let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                else {
                    return Ok(());
                };
                if entry.state != ChannelState::Opening {
                    warn!("Duplicate open confirmation for channel {}", entry.id);
                    return Ok(());
                }
                entry.confirm(sender_channel, initial_window_size, maximum_packet_size);
                info!(
                    "Channel {} open (remote {}, window {}, packet {})",
                    entry.id, sender_channel, initial_window_size, maximum_packet_size
                );
                if entry.user_closed {
                    entry.state = ChannelState::Closing;
                    entry.send_close(&mut self.outbox)?;
                }
            }
            ConnectionMessage::ChannelOpenFailure {
                recipient_channel,
                reason_code,
                description,
            } => {
                let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                else {
                    return Ok(());
                };
                info!(
                    "Channel {} open rejected (reason {}): {}",
                    entry.id, reason_code, description
                );
                let id = entry.id;
                if entry.user_closed {
                    self.retire(id);
                } else {
                    entry.state = ChannelState::Closed;
                    entry.open_failure = Some((reason_code, description));
                }
            }
            ConnectionMessage::ChannelWindowAdjust {
                recipient_channel,
                bytes_to_add,
            } => {
                if let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                {
                    match entry.remote.adjust(bytes_to_add) {
                        Ok(()) => trace!(
                            "Channel {} credit +{} = {}",
                            entry.id,
                            bytes_to_add,
                            entry.remote.available()
                        ),
                        Err(e) => warn!("Channel {} ignoring adjust: {}", entry.id, e),
                    }
                }
            }
            ConnectionMessage::ChannelData {
                recipient_channel,
                data,
            } => self.channel_data(recipient_channel, 0, &data)?,
            ConnectionMessage::ChannelExtendedData {
                recipient_channel,
                data_type,
                data,
            } => self.channel_data(recipient_channel, data_type, &data)?,
            ConnectionMessage::ChannelEof { recipient_channel } => {
                if let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                {
                    debug!("Channel {} received EOF", entry.id);
                    entry.eof_received = true;
                }
            }
            ConnectionMessage::ChannelClose { recipient_channel } => {
                let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                else {
                    return Ok(());
                };
                let id = entry.id;
                entry.close_received = true;
                entry.cancel_pending();
                entry.send_close(&mut self.outbox)?;
                if entry.user_closed {
                    self.retire(id);
                } else {
                    entry.state = ChannelState::Closed;
                }
                info!("Channel {} closed by peer", id);
            }
            ConnectionMessage::ChannelRequest {
                recipient_channel,
                request,
                want_reply,
            } => {
                let Some(entry) =
                    lookup(&mut self.channels, self.next_channel, recipient_channel)
                else {
                    return Ok(());
                };
                match request {
                    ChannelRequestType::ExitStatus { exit_status } => {
                        debug!("Channel {} exit status {}", entry.id, exit_status);
                        entry.exit_status = Some(exit_status);
                    }
                    ChannelRequestType::ExitSignal {
                        signal_name,
                        core_dumped,
                        error_message,
                        language_tag,
                    } => {
                        debug!("Channel {} exit signal {}", entry.id, signal_name);
                        entry.exit_signal = Some(ExitSignal {
                            signal_name,
                            core_dumped,
                            error_message,
                            language_tag,
                        });
                    }
                    other => debug!("Channel {} ignoring '{}' request", entry.id, other.name()),
                }
                if want_reply && !entry.close_sent {
                    self.outbox.send(&ConnectionMessage::ChannelFailure {
                        recipient_channel: entry.remote_id,
                    })?;
                }
            }
            ConnectionMessage::ChannelSuccess { recipient_channel } => {
                self.resolve_request(recipient_channel, RequestOutcome::Success)
            }
            ConnectionMessage::ChannelFailure { recipient_channel } => {
                self.resolve_request(recipient_channel, RequestOutcome::Failure)
            }
        }
        Ok(())
    }

    fn channel_data(&mut self, recipient: u32, stream: u32, data: &[u8]) -> TetherResult<()> {
        let Some(entry) = lookup(&mut self.channels, self.next_channel, recipient) else {
            return Ok(());
        };
        if let Some(bytes) = entry.accept_data(stream, data) {
            entry.send_adjust(&mut self.outbox, bytes)?;
        }
        Ok(())
    }

    fn resolve_request(&mut self, recipient: u32, outcome: RequestOutcome) {
        let Some(entry) = lookup(&mut self.channels, self.next_channel, recipient) else {
            return;
        };
        match entry.pending.as_mut() {
            Some(pending) if pending.outcome.is_none() => pending.outcome = Some(outcome),
            _ => warn!("Channel {} unexpected request reply", entry.id),
        }
    }

    fn resolve_global(&mut self, reply: GlobalReply) {
        match self.global_requests.iter_mut().find(|slot| slot.reply.is_none()) {
            Some(slot) => {
                debug!("Global request '{}' answered", slot.key);
                slot.reply = Some(reply);
            }
            None => warn!("Unexpected global request reply"),
        }
    }

    fn handle_channel_open(
        &mut self,
        channel_type: ChannelType,
        sender: u32,
        window: u32,
        max_packet: u32,
    ) -> TetherResult<()> {
        if !self.authenticated {
            return self.reject_open(
                sender,
                ChannelOpenFailureReason::AdministrativelyProhibited,
                "Not authenticated",
            );
        }

        match channel_type {
            ChannelType::X11 {
                originator_address,
                originator_port,
            } => {
                if !self.x11_requested && !self.callbacks.contains_key(&EventKind::X11) {
                    return self.reject_open(
                        sender,
                        ChannelOpenFailureReason::AdministrativelyProhibited,
                        "X11 forwarding not requested",
                    );
                }
                let channel = self.accept_open(ChannelKind::X11, sender, window, max_packet)?;
                self.push_event(SessionEvent::X11Open {
                    channel,
                    originator_address,
                    originator_port,
                });
            }
            ChannelType::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                if let Some(listener) = self.find_listener(&connected_address, connected_port) {
                    let full = self
                        .listeners
                        .get(&listener)
                        .map(|l| l.queue.len() >= l.queue_max)
                        .unwrap_or(true);
                    if full {
                        return self.reject_open(
                            sender,
                            ChannelOpenFailureReason::ResourceShortage,
                            "Listener backlog full",
                        );
                    }
                    let channel =
                        self.accept_open(ChannelKind::ForwardedTcpIp, sender, window, max_packet)?;
                    if let Some(entry) = self.listeners.get_mut(&listener) {
                        entry.queue.push_back(channel);
                    }
                } else if self.callbacks.contains_key(&EventKind::ForwardedTcpIp) {
                    let channel =
                        self.accept_open(ChannelKind::ForwardedTcpIp, sender, window, max_packet)?;
                    self.push_event(SessionEvent::ForwardedTcpIp {
                        channel,
                        connected_address,
                        connected_port,
                        originator_address,
                        originator_port,
                    });
                } else {
                    return self.reject_open(
                        sender,
                        ChannelOpenFailureReason::AdministrativelyProhibited,
                        &format!("No listener for {}:{}", connected_address, connected_port),
                    );
                }
            }
            ChannelType::Other(name) => {
                return self.reject_open(
                    sender,
                    ChannelOpenFailureReason::UnknownChannelType,
                    &format!("Unsupported channel type '{}'", name),
                );
            }
            other => {
                return self.reject_open(
                    sender,
                    ChannelOpenFailureReason::AdministrativelyProhibited,
                    &format!("Refusing '{}' channel from server", other.name()),
                );
            }
        }
        Ok(())
    }

    fn accept_open(
        &mut self,
        kind: ChannelKind,
        sender: u32,
        window: u32,
        max_packet: u32,
    ) -> TetherResult<ChannelId> {
        let id = self.allocate_channel_id();
        self.outbox.send(&ConnectionMessage::ChannelOpenConfirmation {
            recipient_channel: sender,
            sender_channel: id.0,
            initial_window_size: self.config.window_size,
            maximum_packet_size: self.config.max_packet,
        })?;
        self.channels.insert(
            id,
            ChannelEntry::inbound(id, kind, self.config.window_size, sender, window, max_packet),
        );
        info!("Accepted {:?} channel {} from peer", kind, id);
        Ok(id)
    }

    fn reject_open(
        &mut self,
        sender: u32,
        reason: ChannelOpenFailureReason,
        description: &str,
    ) -> TetherResult<()> {
        info!("Rejecting channel open: {} ({})", description, reason.as_str());
        self.outbox.send(&ConnectionMessage::ChannelOpenFailure {
            recipient_channel: sender,
            reason_code: reason as u32,
            description: description.to_string(),
        })
    }
}

/// Finds the entry a message is addressed to. Messages for released or
/// never-allocated channels are logged and dropped.
fn lookup(
    channels: &mut HashMap<ChannelId, ChannelEntry>,
    next_channel: u32,
    recipient: u32,
) -> Option<&mut ChannelEntry> {
    let id = ChannelId(recipient);
    let entry = channels.get_mut(&id);
    if entry.is_none() {
        if recipient < next_channel {
            debug!("Message for retired channel {}", id);
        } else {
            warn!("Message for unknown channel {}", id);
        }
    }
    entry
}
