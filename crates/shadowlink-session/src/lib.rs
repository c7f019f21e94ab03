//! # Shadowlink Session
//!
//! A small MQTT 3.1.1 client session that rides an established TLS
//! transport.
//!
//! - QoS 0 and QoS 1 publish, subscribe and unsubscribe with synchronous
//!   acknowledgement
//! - Incoming publishes dispatched to a caller-supplied handler
//! - Keep-alive pings while the session waits inside a response window
//!
//! The handler is passed into each call instead of being stored on the
//! session, so a dispatched message can never re-enter the session that
//! delivered it.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod session;

pub use rumqttc::mqttbytes::QoS;
pub use session::{MessageHandler, MqttSession, SessionError, SessionOptions};
