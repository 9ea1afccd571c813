use super::{decode_object, LineParser, ParseError};
use crate::mqtt::Message;
use serde_json::Value;

/// Parses device lines of the form `{"topic": "...", "payload": {...}}` and
/// republishes the payload unchanged on the given topic.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeParser;

impl EnvelopeParser {
    pub fn new() -> Self {
        Self
    }

    /// Single-message form of [`LineParser::parse`].
    pub fn parse_message(&self, line: &str) -> Option<Message> {
        self.parse(line).into_iter().next()
    }
}

impl LineParser for EnvelopeParser {
    fn decode(&self, line: &str) -> Result<Vec<Message>, ParseError> {
        let mut object = decode_object(line)?;

        let topic = match object.remove("topic") {
            Some(Value::String(topic)) if !topic.is_empty() => topic,
            _ => return Err(ParseError::Schema("topic".to_string())),
        };
        let payload = match object.remove("payload") {
            Some(Value::Object(payload)) if !payload.is_empty() => payload,
            _ => return Err(ParseError::Schema("payload".to_string())),
        };

        Ok(vec![Message::new(topic, payload)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_envelope_yields_topic_and_payload() {
        let msg = EnvelopeParser::new()
            .parse_message(r#"{"topic":"sensors/x","payload":{"a":1}}"#)
            .unwrap();
        assert_eq!(msg.topic(), "sensors/x");
        assert_eq!(Value::Object(msg.payload().clone()), json!({"a": 1}));
    }

    #[test]
    fn nested_payload_is_kept_verbatim() {
        let line = r#"{"payload":{"v":[1,2.5,"x"],"n":{"deep":true}},"topic":"a/b/c","extra":0}"#;
        let msg = EnvelopeParser::new().parse_message(line).unwrap();
        assert_eq!(msg.topic(), "a/b/c");
        assert_eq!(
            Value::Object(msg.payload().clone()),
            json!({"v": [1, 2.5, "x"], "n": {"deep": true}})
        );
    }

    #[test]
    fn missing_fields_are_schema_errors() {
        let parser = EnvelopeParser::new();
        assert_eq!(
            parser.decode(r#"{"topic":"t"}"#),
            Err(ParseError::Schema("payload".into()))
        );
        assert_eq!(
            parser.decode(r#"{"payload":{"a":1}}"#),
            Err(ParseError::Schema("topic".into()))
        );
        assert_eq!(
            parser.decode(r#"{"topic":"","payload":{"a":1}}"#),
            Err(ParseError::Schema("topic".into()))
        );
        assert_eq!(
            parser.decode(r#"{"topic":"t","payload":{}}"#),
            Err(ParseError::Schema("payload".into()))
        );
        assert_eq!(
            parser.decode(r#"{"topic":7,"payload":{"a":1}}"#),
            Err(ParseError::Schema("topic".into()))
        );
    }

    #[test]
    fn garbage_and_empty_lines_produce_nothing() {
        let parser = EnvelopeParser::new();
        assert!(parser.parse_message("not json").is_none());
        assert!(parser.parse_message("").is_none());
        assert!(parser.parse_message("{\"topic\":\"t\",").is_none());
        assert!(matches!(parser.decode("not json"), Err(ParseError::Decode(_))));
        assert_eq!(parser.decode(""), Err(ParseError::Empty));
    }
}
