use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::mqtt::MqttConfig;
use crate::parser::split::{DEFAULT_HUMIDITY_TOPIC, DEFAULT_TEMPERATURE_TOPIC};
use crate::parser::{EnvelopeParser, LineParser, SplitParser};
use crate::relay::RelaySettings;
use crate::source::{DataSource, GeneratorConfig, SensorGenerator, SerialConfig, SerialSource};

const CONFIG_DIR: &str = "sensor-relay";
const CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How device lines are turned into messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// `{"topic": ..., "payload": {...}}`, published as is.
    #[default]
    Envelope,
    /// `{"temperature": n, "humidity": n}`, fanned out to two topics.
    Split,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Envelope => write!(f, "envelope"),
            RelayMode::Split => write!(f, "split"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Serial(SerialConfig),
    Generator(GeneratorConfig),
}

/// Source kinds selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    Serial,
    Generator,
}

impl SourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Serial(_) => SourceKind::Serial,
            SourceConfig::Generator(_) => SourceKind::Generator,
        }
    }

    /// Switches to `kind`, keeping the current settings when the kind already matches.
    pub fn with_kind(self, kind: SourceKind) -> Self {
        match (self.kind() == kind, kind) {
            (true, _) => self,
            (false, SourceKind::Serial) => SourceConfig::Serial(SerialConfig::default()),
            (false, SourceKind::Generator) => SourceConfig::Generator(GeneratorConfig::default()),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Serial(SerialConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub pace_ms: Option<u64>,
    pub temperature_topic: String,
    pub humidity_topic: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Envelope,
            pace_ms: None,
            temperature_topic: DEFAULT_TEMPERATURE_TOPIC.to_string(),
            humidity_topic: DEFAULT_HUMIDITY_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub source: SourceConfig,
    pub relay: RelayConfig,
}

impl Config {
    /// `<config dir>/sensor-relay/relay.toml`, or the working directory when
    /// the platform has no config dir.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes the default configuration to `path` unless a file already exists there.
    pub async fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            Config::default().save(path).await?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host is empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must not be 0".into()));
        }
        if self.mqtt.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "mqtt.keep_alive_secs must be at most {}, got {}",
                u16::MAX,
                self.mqtt.keep_alive_secs
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }

        match &self.source {
            SourceConfig::Serial(serial) => {
                if serial.port.trim().is_empty() {
                    return Err(ConfigError::Invalid("source.port is empty".into()));
                }
                if serial.baud_rate == 0 {
                    return Err(ConfigError::Invalid("source.baud_rate must not be 0".into()));
                }
            }
            SourceConfig::Generator(generator) => {
                if generator.topic.trim().is_empty() {
                    return Err(ConfigError::Invalid("source.topic is empty".into()));
                }
                for (name, p) in [
                    ("unsafe_probability", generator.unsafe_probability),
                    ("warning_probability", generator.warning_probability),
                ] {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(ConfigError::Invalid(format!(
                            "source.{} must be within [0, 1], got {}",
                            name, p
                        )));
                    }
                }
                if self.relay.mode == RelayMode::Split {
                    return Err(ConfigError::Invalid(
                        "the generator emits envelope lines, relay.mode must be \"envelope\"".into(),
                    ));
                }
            }
        }

        if self.relay.mode == RelayMode::Split
            && (self.relay.temperature_topic.trim().is_empty()
                || self.relay.humidity_topic.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "relay.temperature_topic and relay.humidity_topic must be set in split mode"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn build_source(&self) -> Box<dyn DataSource> {
        match &self.source {
            SourceConfig::Serial(serial) => Box::new(SerialSource::new(serial.clone())),
            SourceConfig::Generator(generator) => {
                Box::new(SensorGenerator::new(generator.clone()))
            }
        }
    }

    pub fn build_parser(&self) -> Box<dyn LineParser> {
        match self.relay.mode {
            RelayMode::Envelope => Box::new(EnvelopeParser::new()),
            RelayMode::Split => Box::new(SplitParser::new(
                self.relay.temperature_topic.clone(),
                self.relay.humidity_topic.clone(),
            )),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            pace: self.relay.pace_ms.map(Duration::from_millis),
        }
    }
}
