//! Secure-channel context assembly.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::credentials::{TlsCapabilities, TransportCredentials};
use crate::error::TransportError;
use crate::verify::NoVerification;

/// RFC 6066 fragment sizes by selector code.
fn fragment_size(selector: u8) -> Option<usize> {
    match selector {
        1 => Some(512),
        2 => Some(1024),
        3 => Some(2048),
        4 => Some(4096),
        _ => None,
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|error| {
        TransportError::InvalidCredentials(format!("{what} {}: {error}", path.display()))
    })
}

fn parse_certs(pem: &[u8], path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| {
            TransportError::InvalidCredentials(format!("{what} {}: {error}", path.display()))
        })
}

/// Builds the rustls client configuration for one connection attempt.
///
/// The root of trust is mandatory. A client identity is imported only when
/// certificate and key are both present. When peer verification is not
/// available, chain checks are replaced with an accept-all verifier and the
/// trust reduction is logged.
pub(crate) fn build_client_config(
    credentials: &TransportCredentials,
    capabilities: TlsCapabilities,
) -> Result<ClientConfig, TransportError> {
    let ca_pem = read_pem(&credentials.root_ca_path, "root CA")?;
    let ca_certs = parse_certs(&ca_pem, &credentials.root_ca_path, "root CA")?;
    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots.add(cert).map_err(|error| {
            TransportError::InvalidCredentials(format!(
                "root CA {}: {error}",
                credentials.root_ca_path.display()
            ))
        })?;
    }
    if roots.is_empty() {
        return Err(TransportError::InvalidCredentials(format!(
            "root CA {} holds no certificates",
            credentials.root_ca_path.display()
        )));
    }

    let builder = if capabilities.verify_peer {
        ClientConfig::builder().with_root_certificates(roots)
    } else {
        warn!("peer certificate verification unavailable on this build; chain checks skipped");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
    };

    let mut config = match (&credentials.client_cert_path, &credentials.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = read_pem(cert_path, "client certificate")?;
            let certs = parse_certs(&cert_pem, cert_path, "client certificate")?;
            let key_pem = Zeroizing::new(read_pem(key_path, "client key")?);
            let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|error| {
                TransportError::InvalidCredentials(format!(
                    "client key {}: {error}",
                    key_path.display()
                ))
            })?;
            builder.with_client_auth_cert(certs, key).map_err(|error| {
                TransportError::InvalidCredentials(format!("client identity rejected: {error}"))
            })?
        }
        _ => builder.with_no_client_auth(),
    };

    if !credentials.alpn_protocols.is_empty() {
        config.alpn_protocols.clone_from(&credentials.alpn_protocols);
    }

    if credentials.max_fragment_length != 0 {
        if !capabilities.max_fragment_length {
            warn!(
                selector = credentials.max_fragment_length,
                "max-fragment-length negotiation unavailable; selector ignored"
            );
        } else if let Some(size) = fragment_size(credentials.max_fragment_length) {
            config.max_fragment_size = Some(size);
            debug!(selector = credentials.max_fragment_length, size, "max fragment length set");
        } else {
            warn!(
                selector = credentials.max_fragment_length,
                "unknown max-fragment-length selector ignored"
            );
        }
    }

    debug!("secure channel context ready");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn write_pem(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).expect("PEM fixture should be writable");
        path
    }

    #[test]
    fn missing_root_ca_is_invalid_credentials() {
        test_support::init_crypto();
        let credentials = TransportCredentials::new("/nonexistent/root-ca.pem");
        let result = build_client_config(&credentials, TlsCapabilities::default());
        assert!(matches!(result, Err(TransportError::InvalidCredentials(_))));
    }

    #[test]
    fn garbage_root_ca_is_invalid_credentials() {
        test_support::init_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_pem(&dir, "root.pem", b"not a certificate");
        let credentials = TransportCredentials::new(path);
        let result = build_client_config(&credentials, TlsCapabilities::default());
        assert!(matches!(result, Err(TransportError::InvalidCredentials(_))));
    }

    #[test]
    fn client_identity_requires_both_halves() {
        test_support::init_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, ca_key) = test_support::generate_ca();
        let (leaf_cert, leaf_key) = test_support::generate_leaf(&ca_cert, &ca_key, "device-under-test");
        let ca_path = write_pem(&dir, "root.pem", &ca_cert);
        let cert_path = write_pem(&dir, "client.pem", &leaf_cert);
        let key_path = write_pem(&dir, "client.key", &leaf_key);

        let mut credentials = TransportCredentials::new(&ca_path);
        credentials.client_cert_path = Some(cert_path);
        let config = build_client_config(&credentials, TlsCapabilities::default())
            .expect("one-sided identity still builds");
        assert!(!config.client_auth_cert_resolver.has_certs());

        credentials.client_key_path = Some(key_path);
        let config = build_client_config(&credentials, TlsCapabilities::default())
            .expect("full identity should build");
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn fragment_selector_maps_per_rfc_6066() {
        assert_eq!(fragment_size(1), Some(512));
        assert_eq!(fragment_size(4), Some(4096));
        assert_eq!(fragment_size(0), None);
        assert_eq!(fragment_size(9), None);
    }

    #[test]
    fn unknown_fragment_selector_is_ignored_not_rejected() {
        test_support::init_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, _ca_key) = test_support::generate_ca();
        let ca_path = write_pem(&dir, "root.pem", &ca_cert);
        let mut credentials = TransportCredentials::new(ca_path);
        credentials.max_fragment_length = 9;
        let config = build_client_config(&credentials, TlsCapabilities::default())
            .expect("bad selector must not fail the build");
        assert_eq!(config.max_fragment_size, None);
    }

    #[test]
    fn fragment_selector_skipped_when_capability_absent() {
        test_support::init_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, _ca_key) = test_support::generate_ca();
        let ca_path = write_pem(&dir, "root.pem", &ca_cert);
        let mut credentials = TransportCredentials::new(ca_path);
        credentials.max_fragment_length = 2;
        let capabilities = TlsCapabilities {
            max_fragment_length: false,
            ..TlsCapabilities::default()
        };
        let config = build_client_config(&credentials, capabilities)
            .expect("config should build");
        assert_eq!(config.max_fragment_size, None);
    }

    #[test]
    fn alpn_protocols_are_applied() {
        test_support::init_crypto();
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, _ca_key) = test_support::generate_ca();
        let ca_path = write_pem(&dir, "root.pem", &ca_cert);
        let mut credentials = TransportCredentials::new(ca_path);
        credentials.alpn_protocols = vec![b"mqtt".to_vec()];
        let config = build_client_config(&credentials, TlsCapabilities::default())
            .expect("config should build");
        assert_eq!(config.alpn_protocols, vec![b"mqtt".to_vec()]);
    }
}
