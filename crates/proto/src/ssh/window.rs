//! Channel flow-control windows (RFC 4254 Section 5.2).
//!
//! Every channel carries two windows. The remote window is the credit the
//! peer granted us: writes consume it and WINDOW_ADJUST from the peer
//! replenishes it. The local window is the credit we granted the peer:
//! inbound data consumes it, and bytes the application has read are handed
//! back through WINDOW_ADJUST once enough of them accumulate.

use tether_platform::{TetherError, TetherResult};

/// Adjustments smaller than this are held back unless forced.
pub const MIN_ADJUST: u32 = 1024;

/// A single direction of flow-control credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    available: u32,
    initial: u32,
    adjusted: u64,
}

impl Window {
    /// Creates a window holding `initial` bytes of credit.
    pub fn new(initial: u32) -> Self {
        Self {
            available: initial,
            initial,
            adjusted: 0,
        }
    }

    /// Returns the credit left.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Returns the size the window was created with.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Returns the total credit added by adjustments.
    pub fn adjusted(&self) -> u64 {
        self.adjusted
    }

    /// Consumes `bytes` of credit.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Protocol`] if `bytes` exceeds the credit left.
    /// The window is unchanged in that case.
    pub fn consume(&mut self, bytes: u32) -> TetherResult<()> {
        if bytes > self.available {
            return Err(TetherError::Protocol(format!(
                "Window exceeded: {} bytes with {} available",
                bytes, self.available
            )));
        }
        self.available -= bytes;
        Ok(())
    }

    /// Adds `bytes` of credit.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Protocol`] if the window would exceed 2^32 - 1
    /// bytes. The window is unchanged in that case.
    pub fn adjust(&mut self, bytes: u32) -> TetherResult<()> {
        let available = self.available.checked_add(bytes).ok_or_else(|| {
            TetherError::Protocol(format!(
                "Window adjust of {} overflows available {}",
                bytes, self.available
            ))
        })?;
        self.available = available;
        self.adjusted += u64::from(bytes);
        Ok(())
    }
}

/// Receive side of a channel: the window granted to the peer plus the
/// credit released by reads that has not been advertised yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    window: Window,
    pending: u32,
}

impl LocalWindow {
    /// Creates a receive window of `initial` bytes.
    pub fn new(initial: u32) -> Self {
        Self {
            window: Window::new(initial),
            pending: 0,
        }
    }

    /// Returns the underlying window.
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Returns credit released but not yet advertised.
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Accounts for `bytes` of inbound data.
    pub fn receive(&mut self, bytes: u32) -> TetherResult<()> {
        self.window.consume(bytes)
    }

    /// Releases `bytes` consumed by the application.
    ///
    /// Returns the amount to advertise once released credit reaches half the
    /// initial window.
    pub fn release(&mut self, bytes: u32) -> Option<u32> {
        self.pending = self.pending.saturating_add(bytes);
        if self.pending >= (self.window.initial / 2).max(1) {
            self.flush()
        } else {
            None
        }
    }

    /// Queues an explicit adjustment.
    ///
    /// Unless `force` is set, accumulated credit below [`MIN_ADJUST`] is held
    /// back. Returns the amount to advertise, if any.
    pub fn request(&mut self, bytes: u32, force: bool) -> Option<u32> {
        self.pending = self.pending.saturating_add(bytes);
        if force || self.pending >= MIN_ADJUST {
            self.flush()
        } else {
            None
        }
    }

    fn flush(&mut self) -> Option<u32> {
        let room = u32::MAX - self.window.available;
        let bytes = self.pending.min(room);
        if bytes == 0 {
            return None;
        }
        self.pending -= bytes;
        // Cannot fail: bounded by the remaining room.
        self.window.adjust(bytes).ok()?;
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_consume_and_adjust() {
        let mut window = Window::new(1000);
        window.consume(400).unwrap();
        assert_eq!(window.available(), 600);

        assert!(window.consume(601).is_err());
        assert_eq!(window.available(), 600);

        window.adjust(500).unwrap();
        assert_eq!(window.available(), 1100);
        assert_eq!(window.adjusted(), 500);
    }

    #[test]
    fn test_adjust_overflow_rejected() {
        let mut window = Window::new(u32::MAX - 10);
        assert!(window.adjust(11).is_err());
        assert_eq!(window.available(), u32::MAX - 10);
        window.adjust(10).unwrap();
    }

    #[test]
    fn test_release_waits_for_half_window() {
        let mut local = LocalWindow::new(1000);
        local.receive(800).unwrap();

        assert_eq!(local.release(300), None);
        assert_eq!(local.pending(), 300);
        assert_eq!(local.release(200), Some(500));
        assert_eq!(local.pending(), 0);
        assert_eq!(local.window().available(), 700);
    }

    #[test]
    fn test_small_request_held_unless_forced() {
        let mut local = LocalWindow::new(1 << 20);
        assert_eq!(local.request(100, false), None);
        assert_eq!(local.request(100, true), Some(200));
        assert_eq!(local.request(2048, false), Some(2048));
    }

    proptest! {
        #[test]
        fn prop_window_never_negative(
            initial in 0u32..1_000_000,
            ops in prop::collection::vec((any::<bool>(), 0u32..200_000), 0..64)
        ) {
            let mut window = Window::new(initial);
            let mut consumed: u64 = 0;
            for (is_consume, amount) in ops {
                let before = window;
                if is_consume {
                    match window.consume(amount) {
                        Ok(()) => consumed += u64::from(amount),
                        Err(_) => prop_assert_eq!(window, before),
                    }
                } else if window.adjust(amount).is_err() {
                    prop_assert_eq!(window, before);
                }
                prop_assert!(
                    u64::from(window.available()) <= u64::from(initial) + window.adjusted()
                );
                prop_assert_eq!(
                    u64::from(window.available()),
                    u64::from(initial) + window.adjusted() - consumed
                );
            }
        }

        #[test]
        fn prop_local_window_conserves_credit(
            initial in 1u32..100_000,
            reads in prop::collection::vec(1u32..5_000, 0..64)
        ) {
            let mut local = LocalWindow::new(initial);
            for chunk in reads {
                let chunk = chunk.min(local.window().available());
                if chunk == 0 {
                    break;
                }
                local.receive(chunk).unwrap();
                local.release(chunk);
                prop_assert_eq!(
                    u64::from(local.window().available()) + u64::from(local.pending()),
                    u64::from(initial)
                );
            }
        }
    }
}
