//! # shadowlink-transport
//!
//! TLS transport layer for shadowlink device sessions.
//!
//! This crate provides:
//! - Gated session establishment: TCP connect (DNS and connect failures
//!   reported apart), trust-material loading, optional SNI / max-fragment /
//!   ALPN configuration, handshake and peer verification
//! - Byte-level send/receive with fixed-at-connect deadlines, where an
//!   elapsed receive deadline means "nothing yet" rather than failure
//! - Deliberate teardown: TLS shutdown with a single bounded wait for the
//!   peer's echo, channel release, then socket close
//!
//! The transport never retries anything; reconnection policy belongs to
//! callers.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod channel;
pub mod credentials;
pub mod error;
pub mod session;
mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use credentials::{IoTimeouts, ServerInfo, TlsCapabilities, TransportCredentials};
pub use error::{ConnectError, TransportError};
pub use session::TransportSession;
