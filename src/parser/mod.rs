//! Line parsers: turn one raw line from a data source into zero or more
//! [`Message`]s.
//!
//! Rejected lines are part of normal operation (serial noise, half-written
//! lines after a reset, firmware debug output), so parsers never fail the
//! relay. [`LineParser::decode`] reports *why* a line was dropped and
//! [`LineParser::parse`] collapses every rejection into "no message" after
//! logging it.

pub mod envelope;
pub mod split;

pub use envelope::EnvelopeParser;
pub use split::SplitParser;

use crate::mqtt::Message;
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("invalid JSON: {0}")]
    Decode(String),

    #[error("missing or invalid field: {0}")]
    Schema(String),

    #[error("device reported: {0}")]
    DeviceReported(String),
}

pub trait LineParser: Send + Sync {
    fn decode(&self, line: &str) -> Result<Vec<Message>, ParseError>;

    fn parse(&self, line: &str) -> Vec<Message> {
        match self.decode(line) {
            Ok(messages) => messages,
            Err(e) => {
                report(&e, line);
                Vec::new()
            }
        }
    }
}

/// Logs a rejected line; decode and schema failures are kept apart.
pub fn report(error: &ParseError, line: &str) {
    match error {
        ParseError::Empty => debug!("Skipping empty line"),
        ParseError::Decode(reason) => warn!("Invalid JSON received ({}): {}", reason, line),
        ParseError::Schema(field) => {
            warn!("Invalid data format (missing {}): {}", field, line)
        }
        ParseError::DeviceReported(reason) => warn!("Error reported by device: {}", reason),
    }
}

/// Cheap structural check before running the full JSON decoder.
pub(crate) fn decode_object(line: &str) -> Result<Map<String, Value>, ParseError> {
    let text = line.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    if !text.starts_with('{') || !text.ends_with('}') {
        return Err(ParseError::Decode("not a JSON object".to_string()));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParseError::Decode("not a JSON object".to_string())),
        Err(e) => Err(ParseError::Decode(e.to_string())),
    }
}
