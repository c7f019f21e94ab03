//! Certificate and server fixtures for exercising the transport.
//!
//! Everything here trades error handling for brevity; it is compiled only for
//! tests and for downstream crates that opt into the `test-support` feature.

use std::sync::{Arc, Once};

use rcgen::{CertificateParams, KeyPair, SanType};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

static INIT: Once = Once::new();

/// Installs the ring crypto provider once per process.
///
/// Safe to call from every test; only the first call has any effect.
pub fn init_crypto() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Generates a self-signed CA, returned as `(certificate_pem, key_pem)`.
///
/// # Panics
///
/// Panics if certificate generation fails, which only happens when the
/// crypto backend is unusable.
#[must_use]
pub fn generate_ca() -> (Vec<u8>, Vec<u8>) {
    let mut params = CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let key = KeyPair::generate().expect("CA key generation");
    let cert = params.self_signed(&key).expect("CA self-signing");
    (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
}

/// Generates a leaf certificate for `name` signed by the given CA.
///
/// The name is set as a DNS subject alternative name, so connecting with
/// `name` as the server name passes hostname verification.
///
/// # Panics
///
/// Panics if the CA material cannot be parsed or signing fails.
#[must_use]
pub fn generate_leaf(ca_cert_pem: &[u8], ca_key_pem: &[u8], name: &str) -> (Vec<u8>, Vec<u8>) {
    let ca_key = KeyPair::from_pem(&String::from_utf8_lossy(ca_key_pem)).expect("CA key PEM");
    let ca_params = CertificateParams::from_ca_cert_pem(&String::from_utf8_lossy(ca_cert_pem))
        .expect("CA certificate PEM");
    let ca_cert = ca_params.self_signed(&ca_key).expect("CA re-signing");

    let mut params = CertificateParams::default();
    params.subject_alt_names = vec![SanType::DnsName(
        name.try_into().expect("valid DNS name"),
    )];
    let key = KeyPair::generate().expect("leaf key generation");
    let cert = params.signed_by(&key, &ca_cert, &ca_key).expect("leaf signing");
    (cert.pem().into_bytes(), key.serialize_pem().into_bytes())
}

fn pem_certs(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .expect("certificate PEM")
}

/// Builds a server configuration that presents the given identity and does
/// not request a client certificate.
///
/// # Panics
///
/// Panics if the PEM material is malformed.
#[must_use]
pub fn server_config(cert_pem: &[u8], key_pem: &[u8]) -> Arc<ServerConfig> {
    let key = PrivateKeyDer::from_pem_slice(key_pem).expect("server key PEM");
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(pem_certs(cert_pem), key)
        .expect("server identity");
    Arc::new(config)
}

/// Builds a server configuration that requires a client certificate chained
/// to `client_ca_pem`.
///
/// # Panics
///
/// Panics if the PEM material is malformed.
#[must_use]
pub fn mutual_server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: &[u8],
) -> Arc<ServerConfig> {
    let mut roots = RootCertStore::empty();
    for cert in pem_certs(client_ca_pem) {
        roots.add(cert).expect("client CA");
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .expect("client verifier");
    let key = PrivateKeyDer::from_pem_slice(key_pem).expect("server key PEM");
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(pem_certs(cert_pem), key)
        .expect("server identity");
    Arc::new(config)
}
