//! # Shadowlink Protocol
//!
//! Topic derivation and document encoding for the AWS IoT Device Shadow
//! service.
//!
//! ## Topics
//!
//! Topic scheme: `$aws/things/{device_id}/shadow/{operation}`, with the full
//! set derived up front and bounded at [`topics::MAX_TOPIC_LENGTH`] bytes.
//!
//! ## Documents
//!
//! - Desired/reported state updates: `{"state":{...},"clientToken":"NNNNNN"}`
//! - Delta and response payloads: tolerant dotted-path field extraction
//! - Correlation tokens: six decimal digits derived from a millisecond clock

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod token;
pub mod topics;

pub use document::{DocumentError, ShadowDocument};
pub use token::CorrelationToken;
pub use topics::{ShadowMessage, ShadowTopicSet, TopicError};
