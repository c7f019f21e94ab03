//! Transport status taxonomy.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::net::TcpStream;

/// Failures surfaced by the secure transport.
///
/// Every variant is terminal for the attempt that produced it; the
/// transport performs no internal retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A caller-supplied argument is unusable, or the session is gone.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// A bounded buffer cannot hold the bytes in flight.
    #[error("insufficient buffer capacity: need {needed} bytes, have {capacity}")]
    InsufficientMemory {
        /// Bytes the operation required.
        needed: usize,
        /// Bytes the buffer can hold.
        capacity: usize,
    },

    /// Trust material could not be read or parsed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// TLS handshake with the peer failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// Unexpected TLS library failure.
    #[error("TLS library error: {0}")]
    ApiError(String),

    /// Host name did not resolve.
    #[error("DNS resolution failed: {0}")]
    DnsFailure(String),

    /// TCP connection could not be established.
    #[error("TCP connect failed: {0}")]
    ConnectFailure(String),

    /// Read or write on an established session failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An I/O deadline elapsed.
    #[error("timed out during {0}")]
    Timeout(&'static str),
}

/// A failed [`connect`](crate::TransportSession::connect) attempt.
///
/// When the failure happened after the TCP socket was already open, the
/// socket rides along here instead of being closed inside `connect`:
/// socket teardown belongs to the caller, symmetric with
/// [`disconnect`](crate::TransportSession::disconnect). Dropping this
/// error closes the socket.
#[derive(Debug)]
pub struct ConnectError {
    /// Why the attempt failed.
    pub error: TransportError,
    /// The socket that was open at the point of failure, if any.
    pub socket: Option<TcpStream>,
}

impl ConnectError {
    pub(crate) fn with_socket(error: TransportError, socket: TcpStream) -> Self {
        Self {
            error,
            socket: Some(socket),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<TransportError> for ConnectError {
    fn from(error: TransportError) -> Self {
        Self {
            error,
            socket: None,
        }
    }
}
