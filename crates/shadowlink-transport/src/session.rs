//! TLS session lifecycle over TCP.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::channel::build_client_config;
use crate::credentials::{IoTimeouts, ServerInfo, TlsCapabilities, TransportCredentials};
use crate::error::{ConnectError, TransportError};

/// How long the disconnect path waits for the peer's close acknowledgement
/// when no receive deadline is configured.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// An established TLS session.
///
/// Sessions are created by [`TransportSession::connect`] and torn down by
/// [`TransportSession::disconnect`]. Every operation is a single attempt;
/// callers own the retry policy.
pub struct TransportSession {
    stream: Option<TlsStream<TcpStream>>,
    peer: ServerInfo,
    timeouts: IoTimeouts,
}

impl TransportSession {
    /// Opens a TCP connection to `server` and runs the TLS handshake over it.
    ///
    /// Fails before any network activity when `server` is incomplete. After
    /// the TCP stage has succeeded, later failures hand the still-open socket
    /// back through [`ConnectError`] so the caller can reuse or close it.
    ///
    /// # Errors
    ///
    /// * [`TransportError::InvalidParameter`] for an empty host or zero port.
    /// * [`TransportError::DnsFailure`] when the host does not resolve.
    /// * [`TransportError::ConnectFailure`] when every resolved address
    ///   refuses the TCP connection.
    /// * [`TransportError::InvalidCredentials`] when the trust material
    ///   cannot be loaded.
    /// * [`TransportError::HandshakeFailed`] when the peer rejects the
    ///   handshake or presents an untrusted certificate.
    /// * [`TransportError::Timeout`] when the handshake outlives the receive
    ///   deadline.
    pub async fn connect(
        server: ServerInfo,
        credentials: &TransportCredentials,
        capabilities: TlsCapabilities,
        timeouts: IoTimeouts,
    ) -> Result<Self, ConnectError> {
        if server.host.is_empty() {
            return Err(TransportError::InvalidParameter("server host is empty").into());
        }
        if server.port == 0 {
            return Err(TransportError::InvalidParameter("server port is zero").into());
        }

        let socket = tcp_connect(&server).await?;
        debug!(host = %server.host, port = server.port, "TCP connection established");

        let config = match build_client_config(credentials, capabilities) {
            Ok(config) => config,
            Err(error) => return Err(ConnectError::with_socket(error, socket)),
        };

        let sni_host = credentials.sni_host_name.as_deref().unwrap_or(&server.host);
        let server_name = match ServerName::try_from(sni_host.to_owned()) {
            Ok(name) => name,
            Err(error) => {
                return Err(ConnectError::with_socket(
                    TransportError::ApiError(format!("server name {sni_host}: {error}")),
                    socket,
                ))
            }
        };

        let connector = TlsConnector::from(Arc::new(config));
        // The handshake future owns the socket; timing out drops both.
        let handshake = connector.connect(server_name, socket).into_fallible();
        let outcome = match timeouts.recv {
            Some(window) => match tokio::time::timeout(window, handshake).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(TransportError::Timeout("TLS handshake").into()),
            },
            None => handshake.await,
        };
        let stream = match outcome {
            Ok(stream) => stream,
            Err((error, socket)) => {
                return Err(ConnectError::with_socket(
                    TransportError::HandshakeFailed(error.to_string()),
                    socket,
                ))
            }
        };

        info!(host = %server.host, port = server.port, "TLS session established");
        Ok(Self {
            stream: Some(stream),
            peer: server,
            timeouts,
        })
    }

    /// Writes `data` to the session in full.
    ///
    /// Returns the number of bytes written, which is always `data.len()` on
    /// success.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidParameter`] when the session is already
    /// closed, [`TransportError::Timeout`] when the send deadline elapses,
    /// and [`TransportError::Io`] for socket errors.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let window = self.timeouts.send;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::InvalidParameter("session is not connected"))?;
        let io = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match window {
            Some(window) => tokio::time::timeout(window, io)
                .await
                .map_err(|_| TransportError::Timeout("send"))??,
            None => io.await?,
        }
        Ok(data.len())
    }

    /// Reads at most `buf.len()` bytes from the session.
    ///
    /// Returns `Ok(0)` when nothing arrives within the receive deadline, so
    /// a poll loop can distinguish an idle link from a dead one.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidParameter`] for an empty buffer or a closed
    /// session, [`TransportError::ConnectionClosed`] when the peer has ended
    /// the stream, and [`TransportError::Io`] for socket errors.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Err(TransportError::InvalidParameter("receive buffer is empty"));
        }
        let window = self.timeouts.recv;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::InvalidParameter("session is not connected"))?;
        let read = match window {
            Some(window) => match tokio::time::timeout(window, stream.read(buf)).await {
                Ok(read) => read?,
                Err(_) => return Ok(0),
            },
            None => stream.read(buf).await?,
        };
        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(read)
    }

    /// Closes the session: notifies the peer, then releases the channel
    /// state before the socket.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidParameter`] when there is no session to
    /// close, such as after a previous disconnect.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            warn!("disconnect called without an established session");
            return Err(TransportError::InvalidParameter("session is not connected"));
        };
        if let Err(error) = stream.shutdown().await {
            debug!(%error, "close notification failed");
        }
        // One bounded read gives the peer a chance to acknowledge the close.
        let grace = self.timeouts.recv.unwrap_or(SHUTDOWN_GRACE);
        let mut scratch = [0_u8; 128];
        match tokio::time::timeout(grace, stream.read(&mut scratch)).await {
            Ok(Ok(0)) | Err(_) => {}
            Ok(Ok(n)) => debug!(bytes = n, "discarding data received during shutdown"),
            Ok(Err(error)) => debug!(%error, "read during shutdown failed"),
        }
        let (socket, connection) = stream.into_inner();
        drop(connection);
        drop(socket);
        info!(host = %self.peer.host, "TLS session closed");
        Ok(())
    }

    /// The server this session was opened against.
    #[must_use]
    pub fn peer(&self) -> &ServerInfo {
        &self.peer
    }

    /// Whether the session still holds an open stream.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Resolves `server` and connects to the first address that accepts.
async fn tcp_connect(server: &ServerInfo) -> Result<TcpStream, TransportError> {
    let addrs: Vec<_> = lookup_host((server.host.as_str(), server.port))
        .await
        .map_err(|error| TransportError::DnsFailure(format!("{}: {error}", server.host)))?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::DnsFailure(format!(
            "{} resolved to no addresses",
            server.host
        )));
    }
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(socket) => return Ok(socket),
            Err(error) => {
                debug!(%addr, %error, "TCP connect attempt failed");
                last = Some(error);
            }
        }
    }
    Err(TransportError::ConnectFailure(match last {
        Some(error) => format!("{}:{}: {error}", server.host, server.port),
        None => format!("{}:{}", server.host, server.port),
    }))
}
