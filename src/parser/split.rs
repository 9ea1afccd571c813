use super::{decode_object, LineParser, ParseError};
use crate::mqtt::{Message, Payload};
use crate::sensor::{classify, SensorKind};
use serde_json::{Map, Value};
use tracing::debug;

pub const DEFAULT_TEMPERATURE_TOPIC: &str = "sensors/temperature/main-room";
pub const DEFAULT_HUMIDITY_TOPIC: &str = "sensors/humidity/main-room";

/// Parses combined device readings such as
/// `{"temperature": 21.5, "humidity": 50}` and splits them into one
/// `{value, unit}` message per sensor.
#[derive(Debug, Clone)]
pub struct SplitParser {
    temperature_topic: String,
    humidity_topic: String,
}

impl Default for SplitParser {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE_TOPIC, DEFAULT_HUMIDITY_TOPIC)
    }
}

impl SplitParser {
    pub fn new(temperature_topic: impl Into<String>, humidity_topic: impl Into<String>) -> Self {
        Self {
            temperature_topic: temperature_topic.into(),
            humidity_topic: humidity_topic.into(),
        }
    }

    fn reading(&self, kind: SensorKind, value: Value) -> Payload {
        if let Some(v) = value.as_f64() {
            debug!("{} reading {} {} ({})", kind, v, kind.unit(), classify(kind, v));
        }
        let mut payload = Map::new();
        payload.insert("value".to_string(), value);
        payload.insert("unit".to_string(), Value::from(kind.unit()));
        payload
    }
}

impl LineParser for SplitParser {
    fn decode(&self, line: &str) -> Result<Vec<Message>, ParseError> {
        let mut object = decode_object(line)?;

        let temperature = object.remove("temperature");
        let humidity = object.remove("humidity");

        let (temperature, humidity) = match (temperature, humidity) {
            (Some(t @ Value::Number(_)), Some(h @ Value::Number(_))) => (t, h),
            (None, _) | (_, None) if object.contains_key("error") => {
                let reason = match object.remove("error") {
                    Some(Value::String(reason)) => reason,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                return Err(ParseError::DeviceReported(reason));
            }
            (Some(Value::Number(_)), _) => return Err(ParseError::Schema("humidity".into())),
            _ => return Err(ParseError::Schema("temperature".into())),
        };

        Ok(vec![
            Message::new(
                self.temperature_topic.clone(),
                self.reading(SensorKind::Temperature, temperature),
            ),
            Message::new(
                self.humidity_topic.clone(),
                self.reading(SensorKind::Humidity, humidity),
            ),
        ])
    }
}
