use shadowlink_proto::document::{desired_document, CLIENT_TOKEN_FIELD};
use shadowlink_proto::{CorrelationToken, ShadowDocument, ShadowTopicSet};
use shadowlink_session::{MessageHandler, MqttSession, QoS, SessionOptions};
use shadowlink_transport::{
    IoTimeouts, ServerInfo, TlsCapabilities, TransportCredentials, TransportSession,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Default)]
struct Recording {
    messages: Vec<(String, Vec<u8>)>,
}

impl MessageHandler for Recording {
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self.messages.push((topic.to_owned(), payload.to_vec()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shadow_update_roundtrip() {
    if std::env::var("SHADOWLINK_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set SHADOWLINK_INTEGRATION=1 to run");
        return;
    }

    let host = std::env::var("SHADOWLINK_BROKER_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("SHADOWLINK_BROKER_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8883);
    let root_ca = std::env::var("SHADOWLINK_ROOT_CA_PATH")
        .unwrap_or_else(|_| "certificates/root-ca.pem".to_string());

    let mut credentials = TransportCredentials::new(root_ca);
    if let Ok(cert) = std::env::var("SHADOWLINK_CLIENT_CERT_PATH") {
        credentials.client_cert_path = Some(cert.into());
    }
    if let Ok(key) = std::env::var("SHADOWLINK_CLIENT_KEY_PATH") {
        credentials.client_key_path = Some(key.into());
    }
    if let Ok(sni) = std::env::var("SHADOWLINK_SNI_HOST") {
        credentials.sni_host_name = Some(sni);
    }

    let transport = TransportSession::connect(
        ServerInfo::new(host, port),
        &credentials,
        TlsCapabilities::default(),
        IoTimeouts::from_millis(5_000, 200),
    )
    .await
    .unwrap_or_else(|error| panic!("transport connect failed: {error}"));

    let millis = u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_millis(),
    )
    .expect("epoch millis fit");
    let device_id = std::env::var("SHADOWLINK_DEVICE_ID")
        .unwrap_or_else(|_| format!("shadowlink-it-{millis}"));

    let options = SessionOptions {
        client_id: device_id.clone(),
        keep_alive: Duration::from_secs(30),
        ..SessionOptions::default()
    };
    let mut session = MqttSession::connect(transport, options)
        .await
        .unwrap_or_else(|error| panic!("mqtt connect failed: {error}"));

    let topics = ShadowTopicSet::for_device(&device_id).expect("topics");
    let mut handler = Recording::default();

    // Subscribing to the update topic itself makes the broker echo our own
    // publish back, which closes the loop without any shadow service.
    session
        .subscribe(&mut handler, topics.update())
        .await
        .expect("subscribe to the update topic");

    let token = CorrelationToken::from_millis(millis);
    let document = desired_document(true, token).expect("document");
    session
        .publish(&mut handler, topics.update(), &document, QoS::AtLeastOnce)
        .await
        .expect("publish the desired update");

    session
        .process_incoming(&mut handler, Duration::from_secs(5))
        .await
        .expect("response window");

    let echoed = handler
        .messages
        .iter()
        .find(|(topic, _)| topic.as_str() == topics.update())
        .expect("broker echoed the update publish");
    let parsed = ShadowDocument::parse(&echoed.1).expect("echo parses");
    assert_eq!(
        parsed.unsigned_field(CLIENT_TOKEN_FIELD).expect("token"),
        u64::from(token.value())
    );

    session
        .unsubscribe(&mut handler, topics.update())
        .await
        .expect("unsubscribe");
    session.disconnect().await.expect("disconnect");
}
