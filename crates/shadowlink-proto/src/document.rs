//! Shadow document encoding and tolerant field extraction.
//!
//! Outgoing updates follow the service wire format:
//!
//! ```json
//! {"state":{"desired":{"powerOn":1}},"clientToken":"012345"}
//! ```
//!
//! Incoming payloads are parsed into a [`ShadowDocument`] and read through
//! dotted field paths, so a delta can be inspected without committing to the
//! full service schema.

use serde::Serialize;
use serde_json::Value;

use crate::token::CorrelationToken;

/// Field path for the shadow document version.
pub const VERSION_FIELD: &str = "version";

/// Field path for the power state carried by a delta document.
pub const DELTA_POWER_FIELD: &str = "state.powerOn";

/// Field path for the correlation token echoed by the service.
pub const CLIENT_TOKEN_FIELD: &str = "clientToken";

/// Why a payload could not be read as a shadow document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The payload was not valid JSON.
    #[error("document is not valid JSON: {0}")]
    Invalid(#[from] serde_json::Error),
    /// A required field was absent.
    #[error("document has no {0:?} field")]
    MissingField(String),
    /// A field was present but not an unsigned integer.
    #[error("field {path:?} is not an unsigned integer")]
    NotUnsigned {
        /// Dotted path of the offending field.
        path: String,
    },
}

#[derive(Serialize)]
struct StateDocument {
    state: Section,
    #[serde(rename = "clientToken")]
    client_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Section {
    Desired(PowerState),
    Reported(PowerState),
}

#[derive(Serialize)]
struct PowerState {
    #[serde(rename = "powerOn")]
    power_on: u8,
}

impl From<bool> for PowerState {
    fn from(power_on: bool) -> Self {
        Self {
            power_on: u8::from(power_on),
        }
    }
}

/// Encodes a desired-state update for the `update` topic.
///
/// # Errors
///
/// Returns [`DocumentError::Invalid`] if serialization fails.
pub fn desired_document(
    power_on: bool,
    token: CorrelationToken,
) -> Result<Vec<u8>, DocumentError> {
    encode(Section::Desired(power_on.into()), token)
}

/// Encodes a reported-state update for the `update` topic.
///
/// # Errors
///
/// Returns [`DocumentError::Invalid`] if serialization fails.
pub fn reported_document(
    power_on: bool,
    token: CorrelationToken,
) -> Result<Vec<u8>, DocumentError> {
    encode(Section::Reported(power_on.into()), token)
}

fn encode(state: Section, token: CorrelationToken) -> Result<Vec<u8>, DocumentError> {
    let document = StateDocument {
        state,
        client_token: token.to_string(),
    };
    Ok(serde_json::to_vec(&document)?)
}

/// A parsed incoming shadow payload.
#[derive(Debug, Clone)]
pub struct ShadowDocument {
    root: Value,
}

impl ShadowDocument {
    /// Parses `payload` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Invalid`] for malformed payloads.
    pub fn parse(payload: &[u8]) -> Result<Self, DocumentError> {
        Ok(Self {
            root: serde_json::from_slice(payload)?,
        })
    }

    /// Reads the unsigned integer at a dotted `path`.
    ///
    /// The service writes some counters as numbers and echoes tokens as
    /// decimal strings; both representations are accepted.
    ///
    /// # Errors
    ///
    /// [`DocumentError::MissingField`] when the path does not resolve and
    /// [`DocumentError::NotUnsigned`] when it resolves to anything other
    /// than a non-negative integer.
    pub fn unsigned_field(&self, path: &str) -> Result<u64, DocumentError> {
        let value = self
            .lookup(path)
            .ok_or_else(|| DocumentError::MissingField(path.to_owned()))?;
        match value {
            Value::Number(number) => number.as_u64().ok_or_else(|| not_unsigned(path)),
            Value::String(text) => text.parse::<u64>().map_err(|_| not_unsigned(path)),
            _ => Err(not_unsigned(path)),
        }
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

fn not_unsigned(path: &str) -> DocumentError {
    DocumentError::NotUnsigned {
        path: path.to_owned(),
    }
}
