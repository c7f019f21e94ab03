//! MQTT 3.1.1 session over an owned transport.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4, QoS};
use shadowlink_transport::{TransportError, TransportSession};
use tracing::{debug, info, warn};

/// Receives publishes delivered while the session processes traffic.
///
/// The handler is borrowed for the duration of one session call, so an
/// implementation cannot reach back into the session from inside
/// [`MessageHandler::on_message`].
pub trait MessageHandler {
    /// Called once per incoming publish.
    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

/// Tunables for one MQTT session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Client identifier presented in CONNECT.
    pub client_id: String,
    /// Keep-alive interval; zero disables pings.
    pub keep_alive: Duration,
    /// Upper bound on one encoded packet in either direction, in bytes.
    pub max_packet_size: usize,
    /// How long to wait for an acknowledgement before giving up.
    pub ack_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: "shadowlink".to_owned(),
            keep_alive: Duration::from_secs(60),
            max_packet_size: 1024,
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a session operation failed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport below the session failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// A packet could not be encoded or decoded.
    #[error("packet codec failure: {0}")]
    Codec(#[from] mqttbytes::Error),
    /// The broker answered CONNECT with a refusal code.
    #[error("broker refused the connection: {0:?}")]
    ConnectionRefused(v4::ConnectReturnCode),
    /// The broker acknowledged a subscription with a failure code.
    #[error("broker rejected subscription to {0:?}")]
    SubscriptionRejected(String),
    /// QoS 2 delivery has no exactly-once machinery in this session.
    #[error("QoS 2 delivery is not supported")]
    UnsupportedQos,
    /// No matching acknowledgement arrived inside the window.
    #[error("no {0} within the acknowledgement window")]
    AckTimeout(&'static str),
    /// The broker sent something other than CONNACK while connecting.
    #[error("unexpected packet during {0}")]
    UnexpectedPacket(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug)]
enum Ack {
    Publish(u16),
    Subscribe(u16, Vec<v4::SubscribeReasonCode>),
    Unsubscribe(u16),
}

impl Ack {
    fn matches(&self, kind: AckKind, pkid: u16) -> bool {
        match self {
            Self::Publish(p) => kind == AckKind::Publish && *p == pkid,
            Self::Subscribe(p, _) => kind == AckKind::Subscribe && *p == pkid,
            Self::Unsubscribe(p) => kind == AckKind::Unsubscribe && *p == pkid,
        }
    }
}

/// An established MQTT session.
///
/// All publishes and subscriptions use QoS 1; each operation writes its
/// packet and pumps incoming traffic until the matching acknowledgement
/// arrives. Publishes received while pumping are dispatched to the handler
/// before the operation returns.
pub struct MqttSession {
    transport: TransportSession,
    read_buf: BytesMut,
    chunk: Vec<u8>,
    max_packet_size: usize,
    keep_alive: Duration,
    ack_timeout: Duration,
    next_pkid: u16,
    last_comms: Instant,
    await_pingresp: bool,
}

impl MqttSession {
    /// Performs the MQTT connect handshake over `transport`.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionRefused`] when the broker answers with a
    /// non-success code, [`SessionError::AckTimeout`] when no CONNACK
    /// arrives, and transport or codec errors otherwise.
    pub async fn connect(
        transport: TransportSession,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            transport,
            read_buf: BytesMut::with_capacity(options.max_packet_size),
            chunk: vec![0; options.max_packet_size],
            max_packet_size: options.max_packet_size,
            keep_alive: options.keep_alive,
            ack_timeout: options.ack_timeout,
            next_pkid: 1,
            last_comms: Instant::now(),
            await_pingresp: false,
        };

        let mut connect = v4::Connect::new(options.client_id.as_str());
        connect.keep_alive = u16::try_from(options.keep_alive.as_secs()).unwrap_or(u16::MAX);
        connect.clean_session = true;
        session
            .write_packet("CONNECT", |buf| connect.write(buf))
            .await?;

        let deadline = Instant::now() + options.ack_timeout;
        match session.read_packet(deadline).await? {
            Some(v4::Packet::ConnAck(ack)) if ack.code == v4::ConnectReturnCode::Success => {
                info!(client_id = %options.client_id, "MQTT session established");
                Ok(session)
            }
            Some(v4::Packet::ConnAck(ack)) => Err(SessionError::ConnectionRefused(ack.code)),
            Some(_) => Err(SessionError::UnexpectedPacket("CONNECT handshake")),
            None => Err(SessionError::AckTimeout("CONNACK")),
        }
    }

    /// Publishes `payload` to `topic`.
    ///
    /// QoS 0 is fire-and-forget; QoS 1 assigns a packet id and pumps inbound
    /// traffic until the matching PUBACK arrives.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnsupportedQos`] for QoS 2,
    /// [`SessionError::AckTimeout`] when a PUBACK does not arrive, and
    /// transport or codec errors otherwise.
    pub async fn publish(
        &mut self,
        handler: &mut dyn MessageHandler,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<(), SessionError> {
        let mut publish = v4::Publish::new(topic, qos, payload.to_vec());
        match qos {
            QoS::AtMostOnce => {
                self.write_packet("PUBLISH", |buf| publish.write(buf))
                    .await?;
                debug!(topic, bytes = payload.len(), "publish sent without acknowledgement");
            }
            QoS::AtLeastOnce => {
                let pkid = self.take_pkid();
                publish.pkid = pkid;
                self.write_packet("PUBLISH", |buf| publish.write(buf))
                    .await?;
                self.wait_for_ack(handler, AckKind::Publish, pkid, "PUBACK")
                    .await?;
                debug!(topic, bytes = payload.len(), "publish acknowledged");
            }
            QoS::ExactlyOnce => return Err(SessionError::UnsupportedQos),
        }
        Ok(())
    }

    /// Subscribes to `topic` at QoS 1 and waits for the SUBACK.
    ///
    /// # Errors
    ///
    /// [`SessionError::SubscriptionRejected`] when the broker acknowledges
    /// with a failure code, [`SessionError::AckTimeout`] when no SUBACK
    /// arrives, and transport or codec errors otherwise.
    pub async fn subscribe(
        &mut self,
        handler: &mut dyn MessageHandler,
        topic: &str,
    ) -> Result<(), SessionError> {
        let pkid = self.take_pkid();
        let mut subscribe = v4::Subscribe::new(topic, QoS::AtLeastOnce);
        subscribe.pkid = pkid;
        self.write_packet("SUBSCRIBE", |buf| subscribe.write(buf))
            .await?;
        let codes = self
            .wait_for_ack(handler, AckKind::Subscribe, pkid, "SUBACK")
            .await?;
        if codes
            .iter()
            .any(|code| matches!(code, v4::SubscribeReasonCode::Failure))
        {
            return Err(SessionError::SubscriptionRejected(topic.to_owned()));
        }
        debug!(topic, "subscription acknowledged");
        Ok(())
    }

    /// Unsubscribes from `topic` and waits for the UNSUBACK.
    ///
    /// # Errors
    ///
    /// [`SessionError::AckTimeout`] when the UNSUBACK does not arrive, and
    /// transport or codec errors otherwise.
    pub async fn unsubscribe(
        &mut self,
        handler: &mut dyn MessageHandler,
        topic: &str,
    ) -> Result<(), SessionError> {
        let pkid = self.take_pkid();
        let mut unsubscribe = v4::Unsubscribe::new(topic);
        unsubscribe.pkid = pkid;
        self.write_packet("UNSUBSCRIBE", |buf| unsubscribe.write(buf))
            .await?;
        self.wait_for_ack(handler, AckKind::Unsubscribe, pkid, "UNSUBACK")
            .await?;
        debug!(topic, "unsubscribe acknowledged");
        Ok(())
    }

    /// Dispatches incoming traffic to `handler` until `window` elapses.
    ///
    /// Sends keep-alive pings when the session has been idle longer than the
    /// configured interval.
    ///
    /// # Errors
    ///
    /// Transport or codec errors; an empty window is not an error.
    pub async fn process_incoming(
        &mut self,
        handler: &mut dyn MessageHandler,
        window: Duration,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + window;
        loop {
            match self.read_packet(deadline).await? {
                Some(packet) => {
                    if let Some(ack) = self.dispatch(packet, handler).await? {
                        debug!(?ack, "unsolicited acknowledgement ignored");
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Sends DISCONNECT on a best-effort basis and tears the transport down.
    ///
    /// # Errors
    ///
    /// Propagates transport teardown failures; a refused DISCONNECT packet
    /// alone does not fail the call.
    pub async fn disconnect(mut self) -> Result<(), SessionError> {
        if let Err(error) = self
            .write_packet("DISCONNECT", |buf| v4::Disconnect.write(buf))
            .await
        {
            debug!(%error, "DISCONNECT packet not delivered");
        }
        self.transport.disconnect().await?;
        info!("MQTT session closed");
        Ok(())
    }

    async fn wait_for_ack(
        &mut self,
        handler: &mut dyn MessageHandler,
        kind: AckKind,
        pkid: u16,
        label: &'static str,
    ) -> Result<Vec<v4::SubscribeReasonCode>, SessionError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let Some(packet) = self.read_packet(deadline).await? else {
                return Err(SessionError::AckTimeout(label));
            };
            if let Some(ack) = self.dispatch(packet, handler).await? {
                if ack.matches(kind, pkid) {
                    return Ok(match ack {
                        Ack::Subscribe(_, codes) => codes,
                        Ack::Publish(_) | Ack::Unsubscribe(_) => Vec::new(),
                    });
                }
                debug!(?ack, expected = label, "unrelated acknowledgement ignored");
            }
        }
    }

    /// Decodes one packet, pulling more bytes from the transport as needed.
    ///
    /// Keep-alive pings go out between receive polls, so an idle window
    /// still keeps the connection alive. Returns `None` once `deadline`
    /// passes without a complete packet.
    async fn read_packet(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<v4::Packet>, SessionError> {
        loop {
            match v4::read(&mut self.read_buf, self.max_packet_size) {
                Ok(packet) => return Ok(Some(packet)),
                Err(mqttbytes::Error::InsufficientBytes(_)) => {}
                Err(mqttbytes::Error::PayloadSizeLimitExceeded(needed)) => {
                    return Err(TransportError::InsufficientMemory {
                        needed,
                        capacity: self.max_packet_size,
                    }
                    .into())
                }
                Err(error) => return Err(error.into()),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.keep_alive_tick().await?;
            let read = self.transport.recv(&mut self.chunk).await?;
            if read > 0 {
                self.read_buf.extend_from_slice(&self.chunk[..read]);
            }
        }
    }

    async fn dispatch(
        &mut self,
        packet: v4::Packet,
        handler: &mut dyn MessageHandler,
    ) -> Result<Option<Ack>, SessionError> {
        match packet {
            v4::Packet::Publish(publish) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "publish received");
                match publish.qos {
                    QoS::AtMostOnce => handler.on_message(&publish.topic, &publish.payload),
                    QoS::AtLeastOnce => {
                        handler.on_message(&publish.topic, &publish.payload);
                        self.write_packet("PUBACK", |buf| {
                            v4::PubAck::new(publish.pkid).write(buf)
                        })
                        .await?;
                    }
                    QoS::ExactlyOnce => {
                        warn!(topic = %publish.topic, "QoS 2 delivery is unsupported; dropping");
                    }
                }
                Ok(None)
            }
            v4::Packet::PubAck(ack) => Ok(Some(Ack::Publish(ack.pkid))),
            v4::Packet::SubAck(ack) => Ok(Some(Ack::Subscribe(ack.pkid, ack.return_codes))),
            v4::Packet::UnsubAck(ack) => Ok(Some(Ack::Unsubscribe(ack.pkid))),
            v4::Packet::PingResp => {
                self.await_pingresp = false;
                Ok(None)
            }
            v4::Packet::PingReq => {
                self.write_packet("PINGRESP", |buf| v4::PingResp.write(buf))
                    .await?;
                Ok(None)
            }
            other => {
                debug!(?other, "ignoring packet with no role in this session");
                Ok(None)
            }
        }
    }

    async fn keep_alive_tick(&mut self) -> Result<(), SessionError> {
        if self.keep_alive.is_zero() || self.await_pingresp {
            return Ok(());
        }
        if self.last_comms.elapsed() >= self.keep_alive {
            self.write_packet("PINGREQ", |buf| v4::PingReq.write(buf))
                .await?;
            self.await_pingresp = true;
        }
        Ok(())
    }

    async fn write_packet<F>(&mut self, label: &'static str, encode: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut BytesMut) -> Result<usize, mqttbytes::Error>,
    {
        let mut buf = BytesMut::new();
        encode(&mut buf)?;
        if buf.len() > self.max_packet_size {
            return Err(TransportError::InsufficientMemory {
                needed: buf.len(),
                capacity: self.max_packet_size,
            }
            .into());
        }
        self.transport.send(&buf).await?;
        self.last_comms = Instant::now();
        debug!(packet = label, bytes = buf.len(), "packet written");
        Ok(())
    }

    fn take_pkid(&mut self) -> u16 {
        let pkid = self.next_pkid;
        self.next_pkid = next_packet_id(pkid);
        pkid
    }
}

/// Packet identifiers run 1..=65535 and wrap back to 1; zero is reserved.
fn next_packet_id(current: u16) -> u16 {
    if current == u16::MAX {
        1
    } else {
        current + 1
    }
}
