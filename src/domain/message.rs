// Inbound broker message
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Prefix match against a topic filter, e.g. `/v2.C/droneinfo`.
    pub fn is_on(&self, topic_prefix: &str) -> bool {
        self.topic.starts_with(topic_prefix)
    }
}

/// Buffer line form: `<topic>: <payload>`.
impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.topic, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_line_format() {
        let msg = InboundMessage::new("/v2.C/droneinfo", "POS,1,drone1,base,34.0,135.0,100");
        assert_eq!(msg.to_string(), "/v2.C/droneinfo: POS,1,drone1,base,34.0,135.0,100");
    }

    #[test]
    fn test_topic_prefix_match() {
        let msg = InboundMessage::new("/v2.C/droneinfo", "");
        assert!(msg.is_on("/v2.C/droneinfo"));
        assert!(msg.is_on("/v2.C"));
        assert!(!msg.is_on("/v2.C/status"));
    }
}
