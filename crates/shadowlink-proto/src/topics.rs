//! MQTT topic scheme for the device shadow service.
//!
//! Topic structure: `$aws/things/{device_id}/shadow/{operation}`
//!
//! The full topic set is derived once per device:
//! - `delete`: clear the shadow document
//! - `update`: publish desired or reported state
//! - `update/delta`, `update/accepted`, `update/rejected`: service responses

/// Reserved prefix for shadow topics.
pub const TOPIC_PREFIX: &str = "$aws/things";

/// Upper bound on a derived topic, in bytes.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Characters that the broker reserves and a device identifier may not carry.
const RESERVED: [char; 3] = ['+', '#', '/'];

/// Why a device identifier could not be turned into a topic set.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    /// The device identifier was empty.
    #[error("device identifier is empty")]
    EmptyDeviceId,
    /// The device identifier contains a topic-level separator or wildcard.
    #[error("device identifier contains reserved character {0:?}")]
    ReservedCharacter(char),
    /// A derived topic would exceed [`MAX_TOPIC_LENGTH`].
    #[error("topic for {device_id:?} needs {needed} bytes, limit is {limit}")]
    TooLong {
        /// The offending device identifier.
        device_id: String,
        /// Length of the longest derived topic.
        needed: usize,
        /// The configured ceiling.
        limit: usize,
    },
}

/// Shadow service messages a device can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMessage {
    /// Desired state diverged from reported state.
    UpdateDelta,
    /// An update publish was accepted.
    UpdateAccepted,
    /// An update publish was rejected.
    UpdateRejected,
}

/// The five shadow topics for one device, derived and bounded up front.
#[derive(Debug, Clone)]
pub struct ShadowTopicSet {
    delete: String,
    update: String,
    update_delta: String,
    update_accepted: String,
    update_rejected: String,
}

impl ShadowTopicSet {
    /// Derives every shadow topic for `device_id`.
    ///
    /// # Errors
    ///
    /// Rejects empty identifiers, identifiers carrying `+`, `#` or `/`, and
    /// identifiers whose derived topics would exceed [`MAX_TOPIC_LENGTH`].
    pub fn for_device(device_id: &str) -> Result<Self, TopicError> {
        if device_id.is_empty() {
            return Err(TopicError::EmptyDeviceId);
        }
        if let Some(reserved) = device_id.chars().find(|c| RESERVED.contains(c)) {
            return Err(TopicError::ReservedCharacter(reserved));
        }
        Ok(Self {
            delete: build(device_id, "/delete")?,
            update: build(device_id, "/update")?,
            update_delta: build(device_id, "/update/delta")?,
            update_accepted: build(device_id, "/update/accepted")?,
            update_rejected: build(device_id, "/update/rejected")?,
        })
    }

    /// Topic that clears the shadow document.
    #[must_use]
    pub fn delete(&self) -> &str {
        &self.delete
    }

    /// Topic that carries desired and reported state updates.
    #[must_use]
    pub fn update(&self) -> &str {
        &self.update
    }

    /// Topic on which the service reports desired/reported divergence.
    #[must_use]
    pub fn update_delta(&self) -> &str {
        &self.update_delta
    }

    /// Topic on which the service acknowledges updates.
    #[must_use]
    pub fn update_accepted(&self) -> &str {
        &self.update_accepted
    }

    /// Topic on which the service refuses updates.
    #[must_use]
    pub fn update_rejected(&self) -> &str {
        &self.update_rejected
    }

    /// The three response topics, in subscription order.
    #[must_use]
    pub fn subscription_topics(&self) -> [&str; 3] {
        [
            &self.update_delta,
            &self.update_accepted,
            &self.update_rejected,
        ]
    }

    /// Classifies an incoming topic against this device's response topics.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Option<ShadowMessage> {
        if topic == self.update_delta {
            Some(ShadowMessage::UpdateDelta)
        } else if topic == self.update_accepted {
            Some(ShadowMessage::UpdateAccepted)
        } else if topic == self.update_rejected {
            Some(ShadowMessage::UpdateRejected)
        } else {
            None
        }
    }
}

fn build(device_id: &str, suffix: &str) -> Result<String, TopicError> {
    let topic = format!("{TOPIC_PREFIX}/{device_id}/shadow{suffix}");
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(TopicError::TooLong {
            device_id: device_id.to_owned(),
            needed: topic.len(),
            limit: MAX_TOPIC_LENGTH,
        });
    }
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_derivation() {
        let topics = ShadowTopicSet::for_device("dev-1").unwrap();

        assert_eq!(topics.delete(), "$aws/things/dev-1/shadow/delete");
        assert_eq!(topics.update(), "$aws/things/dev-1/shadow/update");
        assert_eq!(topics.update_delta(), "$aws/things/dev-1/shadow/update/delta");
        assert_eq!(
            topics.update_accepted(),
            "$aws/things/dev-1/shadow/update/accepted"
        );
        assert_eq!(
            topics.update_rejected(),
            "$aws/things/dev-1/shadow/update/rejected"
        );
    }

    #[test]
    fn subscription_order_is_delta_accepted_rejected() {
        let topics = ShadowTopicSet::for_device("dev-1").unwrap();
        let [first, second, third] = topics.subscription_topics();
        assert!(first.ends_with("/delta"));
        assert!(second.ends_with("/accepted"));
        assert!(third.ends_with("/rejected"));
    }

    #[test]
    fn empty_device_id_is_rejected() {
        assert!(matches!(
            ShadowTopicSet::for_device(""),
            Err(TopicError::EmptyDeviceId)
        ));
    }

    #[test]
    fn reserved_characters_are_rejected() {
        for id in ["a/b", "a+b", "a#b"] {
            assert!(matches!(
                ShadowTopicSet::for_device(id),
                Err(TopicError::ReservedCharacter(_))
            ));
        }
    }

    #[test]
    fn oversized_device_id_is_rejected() {
        let id = "x".repeat(MAX_TOPIC_LENGTH);
        let error = ShadowTopicSet::for_device(&id).unwrap_err();
        match error {
            TopicError::TooLong { needed, limit, .. } => {
                assert!(needed > limit);
                assert_eq!(limit, MAX_TOPIC_LENGTH);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn longest_fitting_device_id_is_accepted() {
        // "$aws/things/" + id + "/shadow/update/rejected" is the longest form.
        let overhead = TOPIC_PREFIX.len() + 1 + "/shadow/update/rejected".len();
        let id = "x".repeat(MAX_TOPIC_LENGTH - overhead);
        assert!(ShadowTopicSet::for_device(&id).is_ok());
        let id = "x".repeat(MAX_TOPIC_LENGTH - overhead + 1);
        assert!(ShadowTopicSet::for_device(&id).is_err());
    }

    #[test]
    fn classification_matches_response_topics() {
        let topics = ShadowTopicSet::for_device("dev-1").unwrap();
        assert_eq!(
            topics.classify("$aws/things/dev-1/shadow/update/delta"),
            Some(ShadowMessage::UpdateDelta)
        );
        assert_eq!(
            topics.classify("$aws/things/dev-1/shadow/update/accepted"),
            Some(ShadowMessage::UpdateAccepted)
        );
        assert_eq!(
            topics.classify("$aws/things/dev-1/shadow/update/rejected"),
            Some(ShadowMessage::UpdateRejected)
        );
        assert_eq!(topics.classify("$aws/things/dev-2/shadow/update/delta"), None);
        assert_eq!(topics.classify("$aws/things/dev-1/shadow/update"), None);
    }
}
