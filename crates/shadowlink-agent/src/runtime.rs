//! Agent runtime orchestration.

use crate::config::{AgentConfig, ShadowConfig};
use crate::identity::IdentityProvider;
use anyhow::{bail, Context, Result};
use shadowlink_proto::document::{
    desired_document, reported_document, CLIENT_TOKEN_FIELD, DELTA_POWER_FIELD, VERSION_FIELD,
};
use shadowlink_proto::{
    CorrelationToken, DocumentError, ShadowDocument, ShadowMessage, ShadowTopicSet,
};
use shadowlink_session::{MessageHandler, MqttSession, QoS, SessionOptions};
use shadowlink_transport::{
    IoTimeouts, ServerInfo, TlsCapabilities, TransportCredentials, TransportSession,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reconciliation state carried across one synchronization pass.
///
/// Doubles as the session message handler, so every field the shadow
/// responses touch lives here rather than in statics.
struct SyncState {
    topics: ShadowTopicSet,
    power_on: bool,
    version: u32,
    state_changed: bool,
    pending_token: Option<CorrelationToken>,
    converged: bool,
    callback_error: bool,
}

impl SyncState {
    fn new(topics: ShadowTopicSet) -> Self {
        Self {
            topics,
            power_on: false,
            version: 0,
            state_changed: false,
            pending_token: None,
            converged: false,
            callback_error: false,
        }
    }

    fn on_delta(&mut self, payload: &[u8]) {
        let document = match ShadowDocument::parse(payload) {
            Ok(document) => document,
            Err(error) => {
                tracing::error!(%error, "delta payload is not valid JSON");
                self.callback_error = true;
                return;
            }
        };

        let version = match document.unsigned_field(VERSION_FIELD) {
            Ok(version) => version,
            Err(error) => {
                tracing::error!(%error, "delta carries no usable version");
                self.callback_error = true;
                return;
            }
        };

        // Deltas can arrive out of order; only a strictly newer document
        // advances the device.
        if version <= u64::from(self.version) {
            tracing::warn!(version, current = self.version, "stale delta discarded");
            return;
        }
        let Ok(version) = u32::try_from(version) else {
            tracing::error!(version, "delta version does not fit the version counter");
            self.callback_error = true;
            return;
        };
        self.version = version;

        let power = match document.unsigned_field(DELTA_POWER_FIELD) {
            Ok(power) => power,
            Err(error) => {
                tracing::error!(%error, "delta carries no usable power state");
                self.callback_error = true;
                return;
            }
        };

        let power_on = power != 0;
        if power_on == self.power_on {
            tracing::debug!(power_on, version, "delta repeats the current power state");
            return;
        }
        self.power_on = power_on;
        self.state_changed = true;
        tracing::info!(power_on, version, "power state adopted from delta");
    }

    fn on_accepted(&mut self, payload: &[u8]) {
        let document = match ShadowDocument::parse(payload) {
            Ok(document) => document,
            Err(error) => {
                tracing::error!(%error, "accepted response is not valid JSON");
                self.callback_error = true;
                return;
            }
        };

        let token = match document.unsigned_field(CLIENT_TOKEN_FIELD) {
            Ok(token) => token,
            Err(DocumentError::MissingField(field)) => {
                tracing::error!(field, "accepted response carries no client token");
                self.callback_error = true;
                return;
            }
            Err(error) => {
                tracing::warn!(%error, "accepted response token is unreadable");
                return;
            }
        };

        match self.pending_token {
            Some(pending) if u64::from(pending.value()) == token => {
                tracing::info!(token, "update acknowledged by the shadow service");
                self.converged = true;
            }
            Some(pending) => {
                tracing::warn!(
                    token,
                    expected = pending.value(),
                    "acknowledgement for a token this pass did not send"
                );
            }
            None => {
                tracing::warn!(token, "acknowledgement with no update outstanding");
            }
        }
    }

    fn on_rejected(&mut self, payload: &[u8]) {
        let code = ShadowDocument::parse(payload)
            .and_then(|document| document.unsigned_field("code"));
        match code {
            Ok(code) => tracing::warn!(code, "shadow service rejected the update"),
            Err(_) => tracing::warn!(
                payload = %String::from_utf8_lossy(payload),
                "shadow service rejected the update"
            ),
        }
    }
}

impl MessageHandler for SyncState {
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        match self.topics.classify(topic) {
            Some(ShadowMessage::UpdateDelta) => self.on_delta(payload),
            Some(ShadowMessage::UpdateAccepted) => self.on_accepted(payload),
            Some(ShadowMessage::UpdateRejected) => self.on_rejected(payload),
            None => {
                tracing::error!(topic, "publish on a topic this pass never subscribed to");
                self.callback_error = true;
            }
        }
    }
}

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    identity: Box<dyn IdentityProvider>,
}

impl Agent {
    /// Create a new agent.
    pub fn new(config: AgentConfig, identity: Box<dyn IdentityProvider>) -> Self {
        Self { config, identity }
    }

    /// Run one shadow reconciliation pass against the broker.
    ///
    /// The pass clears the shadow, publishes the desired state, folds any
    /// deltas the service answers with into the local state, and reports the
    /// result back. The session is torn down whatever happens after the MQTT
    /// connect; teardown failures and malformed service traffic both fail
    /// the pass.
    ///
    /// # Errors
    ///
    /// Returns error when the identity or topics cannot be resolved, a
    /// connect stage fails, a required publish or subscription goes
    /// unacknowledged, teardown fails, or a response payload was malformed.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting shadow reconciliation");

        let device_id = self
            .identity
            .device_id()
            .context("Device identity unavailable")?;
        let topics = ShadowTopicSet::for_device(&device_id)
            .context("Cannot derive shadow topics for this device")?;
        tracing::info!(device_id, "shadow topics derived");

        let paths = self.identity.credential_paths();
        let mut credentials = TransportCredentials::new(&self.config.tls.root_ca_path);
        credentials.client_cert_path = paths.certificate;
        credentials.client_key_path = paths.private_key;
        credentials.sni_host_name = self.config.tls.sni_host_name.clone();
        credentials.max_fragment_length = self.config.tls.max_fragment_length;
        credentials.alpn_protocols = self.config.tls.alpn_protocols.clone();

        let server = ServerInfo::new(self.config.broker.host.clone(), self.config.broker.port);
        let capabilities = TlsCapabilities {
            verify_peer: self.config.tls.verify_peer,
            ..TlsCapabilities::default()
        };
        let timeouts = IoTimeouts::from_millis(
            self.config.session.send_timeout_ms,
            self.config.session.recv_timeout_ms,
        );
        let transport = TransportSession::connect(server, &credentials, capabilities, timeouts)
            .await
            .context("Secure transport connect failed")?;

        let options = SessionOptions {
            client_id: device_id,
            keep_alive: self.config.session.keep_alive,
            max_packet_size: self.config.session.buffer_size,
            ack_timeout: self.config.session.ack_timeout,
        };
        let mut session = MqttSession::connect(transport, options)
            .await
            .context("MQTT connect failed")?;

        let mut state = SyncState::new(topics.clone());
        let forward = run_pass(&mut session, &mut state, &topics, &self.config.shadow).await;

        // Teardown runs whatever the pass did; its failure is only reported
        // once the pass outcome is settled.
        let teardown = session.disconnect().await;
        if let Err(error) = &teardown {
            tracing::error!(%error, "session teardown failed");
        }

        forward?;
        teardown.context("Session teardown failed")?;
        if state.callback_error {
            bail!("shadow reconciliation observed malformed service traffic");
        }
        tracing::info!(
            power_on = state.power_on,
            version = state.version,
            converged = state.converged,
            "shadow reconciliation complete"
        );
        Ok(())
    }
}

/// The forward half of a pass; teardown stays with the caller.
async fn run_pass(
    session: &mut MqttSession,
    state: &mut SyncState,
    topics: &ShadowTopicSet,
    shadow: &ShadowConfig,
) -> Result<()> {
    // Start from a clean shadow so stale desired state cannot replay.
    session
        .publish(state, topics.delete(), b"", QoS::AtLeastOnce)
        .await
        .context("Shadow delete publish failed")?;

    for topic in topics.subscription_topics() {
        session
            .subscribe(state, topic)
            .await
            .with_context(|| format!("Subscription to {topic} failed"))?;
    }

    let token = CorrelationToken::from_millis(now_ms());
    state.pending_token = Some(token);
    let document = desired_document(shadow.desired_power_on, token)?;
    session
        .publish(state, topics.update(), &document, QoS::AtLeastOnce)
        .await
        .context("Desired state publish failed")?;
    tracing::info!(token = %token, power_on = shadow.desired_power_on, "desired state published");

    session
        .process_incoming(state, shadow.response_window)
        .await
        .context("Processing after the desired update failed")?;

    if state.state_changed {
        let token = CorrelationToken::from_millis(now_ms());
        state.pending_token = Some(token);
        state.converged = false;
        let document = reported_document(state.power_on, token)?;
        session
            .publish(state, topics.update(), &document, QoS::AtLeastOnce)
            .await
            .context("Reported state publish failed")?;
        state.state_changed = false;
        tracing::info!(token = %token, power_on = state.power_on, "reported state published");

        session
            .process_incoming(state, shadow.response_window)
            .await
            .context("Processing after the reported update failed")?;
    } else {
        tracing::info!("no delta adopted; reported state already current");
    }

    for topic in topics.subscription_topics() {
        if let Err(error) = session.unsubscribe(state, topic).await {
            tracing::warn!(topic, %error, "unsubscribe failed");
        }
    }

    Ok(())
}

/// Milliseconds since the Unix epoch, feeding correlation token derivation.
fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| {
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    })
}
