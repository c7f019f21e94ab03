//! Connection parameters and trust material.

use std::path::PathBuf;
use std::time::Duration;

/// Remote endpoint a session is established with.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
}

impl ServerInfo {
    /// Endpoint at `host`:`port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Trust material for a single connection attempt.
///
/// The transport treats this as immutable. Build a fresh value per attempt
/// so rotated certificate paths are picked up rather than cached.
#[derive(Debug, Clone)]
pub struct TransportCredentials {
    /// Root-of-trust certificate bundle (PEM file). Mandatory.
    pub root_ca_path: PathBuf,
    /// Client certificate chain (PEM file) for mutual authentication.
    pub client_cert_path: Option<PathBuf>,
    /// Client private key (PEM file) for mutual authentication.
    ///
    /// An identity is loaded only when certificate and key are both
    /// present; one-sided material is left for the TLS library to reject
    /// at handshake time.
    pub client_key_path: Option<PathBuf>,
    /// Explicit SNI host name. The server host is used when unset.
    pub sni_host_name: Option<String>,
    /// RFC 6066 max-fragment-length selector (`1..=4`). Zero keeps the
    /// default record size; unknown selectors are ignored with a warning,
    /// never rejected.
    pub max_fragment_length: u8,
    /// ALPN protocol names, most preferred first.
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl TransportCredentials {
    /// Credentials trusting `root_ca_path`, presenting no client identity.
    #[must_use]
    pub fn new(root_ca_path: impl Into<PathBuf>) -> Self {
        Self {
            root_ca_path: root_ca_path.into(),
            client_cert_path: None,
            client_key_path: None,
            sni_host_name: None,
            max_fragment_length: 0,
            alpn_protocols: Vec::new(),
        }
    }
}

/// Which optional TLS facilities this build of the platform provides.
///
/// Stands in for compile-time platform gates: a build without a peer
/// verification primitive says so here, and the transport skips the
/// verification step while logging the trust reduction instead of hiding
/// it.
#[derive(Debug, Clone, Copy)]
pub struct TlsCapabilities {
    /// Peer certificate chain verification is available.
    pub verify_peer: bool,
    /// Max-fragment-length negotiation is available.
    pub max_fragment_length: bool,
}

impl Default for TlsCapabilities {
    fn default() -> Self {
        Self {
            verify_peer: true,
            max_fragment_length: true,
        }
    }
}

/// I/O deadlines fixed at connect time.
///
/// `None` blocks indefinitely. The receive deadline also bounds handshake
/// completion and the wait for the peer's shutdown echo.
#[derive(Debug, Clone, Copy, Default)]
pub struct IoTimeouts {
    /// Deadline for one send call.
    pub send: Option<Duration>,
    /// Deadline for one receive call; expiry means "nothing yet", not
    /// failure.
    pub recv: Option<Duration>,
}

impl IoTimeouts {
    /// Build from millisecond values, where zero means block indefinitely.
    #[must_use]
    pub fn from_millis(send_ms: u64, recv_ms: u64) -> Self {
        fn nonzero(ms: u64) -> Option<Duration> {
            (ms > 0).then(|| Duration::from_millis(ms))
        }
        Self {
            send: nonzero(send_ms),
            recv: nonzero(recv_ms),
        }
    }
}
