use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Broker connection settings, the `[mqtt]` table of the relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Falls back to `sensor-relay-<uuid>` so two relays never share a session.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request channel capacity between the client handle and the event loop.
    pub capacity: usize,
    /// 0, 1 or 2.
    pub qos: u8,
    pub retain: bool,
    /// Connection attempts before giving up. 1 means a rejection is fatal immediately.
    pub max_connect_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            client_id: None,
            username: None,
            password: None,
            capacity: 100,
            qos: 0,
            retain: false,
            max_connect_attempts: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl MqttConfig {
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn resolve_client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => format!("sensor-relay-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn qos_level(&self) -> QoS {
        match self.qos {
            2 => QoS::ExactlyOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_connect_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Bounded retry with exponential backoff for the initial connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Whether `failed_attempts` failures use up the budget.
    pub fn exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    /// Delay before the next attempt after `failed_attempts` failures (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}
