use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::fmt;

/// JSON object published as the body of an MQTT message.
pub type Payload = Map<String, Value>;

/// A topic/payload pair ready to be handed to the broker connection.
///
/// Only parsers construct messages, and only from lines that carried every
/// required field. The timestamp is for log output and is never published.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Payload,
    created_at: DateTime<Local>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.created_at.format("%H:%M:%S%.3f"),
            self.topic,
            Value::Object(self.payload.clone())
        )
    }
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Message {
            topic: topic.into(),
            payload,
            created_at: Local::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Canonical wire encoding of the payload: compact UTF-8 JSON.
    pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(payload)
    }
}
