//! Agent configuration.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker endpoint
    pub broker: BrokerConfig,

    /// TLS material and negotiation knobs
    pub tls: TlsConfig,

    /// Shadow reconciliation configuration
    pub shadow: ShadowConfig,

    /// MQTT session tuning
    pub session: SessionTuning,
}

/// Broker endpoint configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host name or address
    pub host: String,

    /// Broker TLS port
    pub port: u16,
}

/// TLS configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Root CA bundle path (PEM)
    pub root_ca_path: PathBuf,

    /// Client certificate path (PEM)
    pub client_cert_path: Option<PathBuf>,

    /// Client private key path (PEM)
    pub client_key_path: Option<PathBuf>,

    /// Host name for SNI when it differs from the broker host
    pub sni_host_name: Option<String>,

    /// RFC 6066 maximum fragment length selector; zero disables negotiation
    pub max_fragment_length: u8,

    /// ALPN protocol names, most preferred first
    pub alpn_protocols: Vec<Vec<u8>>,

    /// Verify the broker certificate chain; disabling is a trust reduction
    /// for closed test setups only
    pub verify_peer: bool,
}

/// Shadow reconciliation configuration.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Thing name the shadow topics are derived from
    pub device_id: String,

    /// Power state to request in the desired document
    pub desired_power_on: bool,

    /// How long to listen for broker responses after each update
    pub response_window: Duration,
}

/// MQTT session tuning.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Keep-alive interval; zero disables pings
    pub keep_alive: Duration,

    /// Network buffer size, bounding one packet in either direction
    pub buffer_size: usize,

    /// Acknowledgement wait per QoS 1 operation
    pub ack_timeout: Duration,

    /// Transport send window in milliseconds; zero blocks indefinitely
    pub send_timeout_ms: u64,

    /// Transport receive poll in milliseconds; also bounds how often the
    /// session checks its deadlines
    pub recv_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                host: "localhost".to_string(),
                port: 8883,
            },
            tls: TlsConfig {
                root_ca_path: PathBuf::from("certificates/root-ca.pem"),
                client_cert_path: None,
                client_key_path: None,
                sni_host_name: None,
                max_fragment_length: 0,
                alpn_protocols: Vec::new(),
                verify_peer: true,
            },
            shadow: ShadowConfig {
                device_id: "shadowlink-device".to_string(),
                desired_power_on: true,
                response_window: Duration::from_millis(500),
            },
            session: SessionTuning {
                keep_alive: Duration::from_secs(60),
                buffer_size: 1024,
                ack_timeout: Duration::from_secs(5),
                send_timeout_ms: 1500,
                recv_timeout_ms: 200,
            },
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SHADOWLINK_BROKER_URL`: Broker URL, e.g. `mqtts://host:8883`
    /// - `SHADOWLINK_DEVICE_ID`: Thing name for the shadow topics
    /// - `SHADOWLINK_ROOT_CA_PATH`: Root CA bundle path
    /// - `SHADOWLINK_CLIENT_CERT_PATH`: Client certificate path
    /// - `SHADOWLINK_CLIENT_KEY_PATH`: Client private key path
    /// - `SHADOWLINK_SNI_HOST`: SNI host name override
    /// - `SHADOWLINK_VERIFY_PEER`: Peer chain verification, `true` or `false`
    /// - `SHADOWLINK_DESIRED_POWER`: Desired power state, `true` or `false`
    /// - `SHADOWLINK_RESPONSE_WINDOW_MS`: Response listen window
    /// - `SHADOWLINK_KEEP_ALIVE_SECS`: MQTT keep-alive interval
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds a value that does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SHADOWLINK_BROKER_URL") {
            let (host, port) = parse_broker_url(&url).context("Invalid SHADOWLINK_BROKER_URL")?;
            config.broker.host = host;
            config.broker.port = port;
        }

        if let Ok(device_id) = std::env::var("SHADOWLINK_DEVICE_ID") {
            config.shadow.device_id = device_id;
        }

        if let Ok(path) = std::env::var("SHADOWLINK_ROOT_CA_PATH") {
            config.tls.root_ca_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("SHADOWLINK_CLIENT_CERT_PATH") {
            config.tls.client_cert_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SHADOWLINK_CLIENT_KEY_PATH") {
            config.tls.client_key_path = Some(PathBuf::from(path));
        }

        if let Ok(host) = std::env::var("SHADOWLINK_SNI_HOST") {
            config.tls.sni_host_name = Some(host);
        }

        if let Ok(verify) = std::env::var("SHADOWLINK_VERIFY_PEER") {
            config.tls.verify_peer = verify.parse().context("Invalid SHADOWLINK_VERIFY_PEER")?;
        }

        if let Ok(power) = std::env::var("SHADOWLINK_DESIRED_POWER") {
            config.shadow.desired_power_on =
                power.parse().context("Invalid SHADOWLINK_DESIRED_POWER")?;
        }

        if let Ok(window) = std::env::var("SHADOWLINK_RESPONSE_WINDOW_MS") {
            let millis: u64 = window
                .parse()
                .context("Invalid SHADOWLINK_RESPONSE_WINDOW_MS")?;
            config.shadow.response_window = Duration::from_millis(millis);
        }

        if let Ok(secs) = std::env::var("SHADOWLINK_KEEP_ALIVE_SECS") {
            let secs: u64 = secs.parse().context("Invalid SHADOWLINK_KEEP_ALIVE_SECS")?;
            config.session.keep_alive = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Parse a broker URL into host and port.
fn parse_broker_url(input: &str) -> Result<(String, u16)> {
    if input.contains("://") {
        let url = Url::parse(input).with_context(|| format!("unparseable URL '{input}'"))?;

        match url.scheme() {
            "mqtts" | "ssl" => {}
            scheme => bail!("unsupported scheme '{scheme}' in '{input}'"),
        }

        let host = url
            .host_str()
            .with_context(|| format!("missing host in '{input}'"))?;
        let port = url.port().unwrap_or(8883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .with_context(|| format!("missing host in '{input}'"))?;
    let port = match parts.next() {
        None => 8883,
        Some(port) => port
            .parse()
            .with_context(|| format!("invalid port '{port}' in '{input}'"))?,
    };
    if parts.next().is_some() {
        bail!("too many ':' separators in '{input}'");
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_scheme_and_port() {
        let (host, port) = parse_broker_url("mqtts://iot.example.com:8884").unwrap();
        assert_eq!(host, "iot.example.com");
        assert_eq!(port, 8884);
    }

    #[test]
    fn url_without_port_uses_tls_default() {
        let (host, port) = parse_broker_url("ssl://broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 8883);
    }

    #[test]
    fn bare_host_with_and_without_port() {
        let (host, port) = parse_broker_url("broker.local:1884").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1884);

        let (host, port) = parse_broker_url("broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 8883);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(parse_broker_url("tcp://broker.local:1883").is_err());
        assert!(parse_broker_url("a:b:c").is_err());
        assert!(parse_broker_url(":8883").is_err());
        assert!(parse_broker_url("broker.local:notaport").is_err());
    }
}
