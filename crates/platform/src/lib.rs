//! # Tether Platform
//!
//! Core types shared by the tether crates.
//!
//! This crate provides:
//! - Unified error types (`TetherError`, `TetherResult`) and the `Direction`
//!   hint carried by would-block errors
//! - The interfaces the session engine consumes (`SecurityProvider`,
//!   `SecureStream`, `Multiplexer`)
//!
//! # Examples
//!
//! ```
//! use tether_platform::{Direction, TetherError, TetherResult};
//!
//! fn try_read() -> TetherResult<usize> {
//!     Err(TetherError::WouldBlock(Direction::Readable))
//! }
//!
//! let err = try_read().unwrap_err();
//! assert!(err.is_would_block());
//! assert_eq!(err.direction(), Some(Direction::Readable));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{Direction, ErrorClass, TetherError, TetherResult};
pub use traits::{
    AsyncMultiplexer, Established, Multiplexer, NegotiatedMethods, SecureStream, SecurityProvider,
};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
