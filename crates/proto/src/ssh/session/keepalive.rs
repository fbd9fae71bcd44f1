//! Keep-alive bookkeeping.
//!
//! There is no background task: the session records when it last talked to
//! the peer and [`Session::poll`](super::Session::poll) sends an
//! SSH_MSG_IGNORE once the configured interval has passed.

use crate::ssh::message::ignore;
use rand::Rng;
use std::time::{Duration, Instant};

/// Tracks idle time against an optional interval.
#[derive(Debug, Clone)]
pub(crate) struct Keepalive {
    interval: Option<Duration>,
    last_activity: Instant,
}

impl Keepalive {
    pub(crate) fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Returns true once the connection has been idle for the interval.
    pub(crate) fn due(&self, now: Instant) -> bool {
        match self.interval {
            Some(interval) => now.duration_since(self.last_activity) >= interval,
            None => false,
        }
    }

    /// Time left until the next keep-alive, if enabled.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.interval
            .map(|interval| interval.saturating_sub(now.duration_since(self.last_activity)))
    }
}

/// Creates an SSH_MSG_IGNORE message carrying `data_len` random bytes.
///
/// ```text
/// byte    SSH_MSG_IGNORE (2)
/// string  data
/// ```
pub fn create_keepalive_message(data_len: usize) -> Vec<u8> {
    let mut data = vec![0u8; data_len];
    rand::thread_rng().fill(&mut data[..]);
    ignore(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::message::MessageType;

    #[test]
    fn test_create_keepalive_message() {
        let msg = create_keepalive_message(32);
        assert_eq!(msg[0], MessageType::Ignore as u8);
        assert_eq!(msg.len(), 1 + 4 + 32);
        assert_eq!(u32::from_be_bytes([msg[1], msg[2], msg[3], msg[4]]), 32);
    }

    #[test]
    fn test_disabled_never_due() {
        let keepalive = Keepalive::new(None);
        assert!(!keepalive.due(Instant::now() + Duration::from_secs(3600)));
        assert!(keepalive.remaining(Instant::now()).is_none());
    }

    #[test]
    fn test_due_after_interval() {
        let mut keepalive = Keepalive::new(Some(Duration::from_secs(10)));
        let start = Instant::now();
        keepalive.touch();
        assert!(!keepalive.due(start));
        assert!(keepalive.due(start + Duration::from_secs(11)));
        assert_eq!(
            keepalive.remaining(start + Duration::from_secs(60)),
            Some(Duration::ZERO)
        );
    }
}
