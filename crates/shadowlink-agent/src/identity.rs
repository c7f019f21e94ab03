//! Device identity and credential resolution.

use std::path::PathBuf;

/// Filesystem locations of the client credential pair.
#[derive(Debug, Clone, Default)]
pub struct DeviceCredentialPaths {
    /// Client certificate chain (PEM)
    pub certificate: Option<PathBuf>,

    /// Private key matching the certificate (PEM)
    pub private_key: Option<PathBuf>,
}

/// Source of the device identity used for shadow topics and TLS client auth.
///
/// The runtime consults the provider once per connection attempt, so an
/// implementation backed by a platform credential store can hand out rotated
/// paths between attempts.
pub trait IdentityProvider {
    /// The thing name shadow topics are derived from.
    ///
    /// # Errors
    ///
    /// Returns error if no identity is configured.
    fn device_id(&self) -> Result<String, IdentityError>;

    /// Current locations of the client credential pair, if the device has one.
    fn credential_paths(&self) -> DeviceCredentialPaths;
}

/// Identity taken verbatim from static configuration.
pub struct StaticIdentity {
    device_id: String,
    credentials: DeviceCredentialPaths,
}

impl StaticIdentity {
    /// Create an identity from a fixed thing name and credential paths.
    pub fn new(device_id: impl Into<String>, credentials: DeviceCredentialPaths) -> Self {
        Self {
            device_id: device_id.into(),
            credentials,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn device_id(&self) -> Result<String, IdentityError> {
        if self.device_id.is_empty() {
            return Err(IdentityError::MissingDeviceId);
        }
        Ok(self.device_id.clone())
    }

    fn credential_paths(&self) -> DeviceCredentialPaths {
        self.credentials.clone()
    }
}

/// Errors for identity resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    /// No device identifier configured
    #[error("no device identifier configured")]
    MissingDeviceId,
}
