//! Fuzz target for connection-layer message parsing.
//!
//! Every inbound payload after authentication goes through
//! `ConnectionMessage::from_bytes`, so it must reject garbage without
//! panicking and re-parse whatever it accepts.
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run connection_message -- -max_total_time=300
//! ```

#![no_main]
use libfuzzer_sys::fuzz_target;
use tether_proto::ssh::connection::ConnectionMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = ConnectionMessage::from_bytes(data) {
        let serialized = message.to_bytes();
        let reparsed = ConnectionMessage::from_bytes(&serialized)
            .expect("Round-trip parsing should never fail");
        assert_eq!(message, reparsed);
    }
});
