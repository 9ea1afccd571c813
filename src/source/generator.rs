use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{DataSource, SourceError};
use crate::sensor::{classify, SensorKind, SensorStatus};

pub const DEFAULT_GENERATOR_TOPIC: &str = "sensors/live/data";

/// Settings of the `generator` source kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub topic: String,
    pub interval_ms: u64,
    /// Chance per sample of an UNSAFE spike.
    pub unsafe_probability: f64,
    /// Chance per sample of a WARNING spike, drawn only when no UNSAFE spike happened.
    pub warning_probability: f64,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_GENERATOR_TOPIC.to_string(),
            interval_ms: 2000,
            unsafe_probability: 0.10,
            warning_probability: 0.05,
            seed: None,
        }
    }
}

/// One synthetic reading, in the wire format the dashboard expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSample {
    pub t_sensor: String,
    pub t_value: f64,
    pub g_sensor: String,
    pub g_value: u32,
    pub h_sensor: String,
    pub h_value: u32,
}

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    payload: &'a SensorSample,
}

pub struct SensorGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    ticker: Option<Interval>,
}

impl SensorGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            ticker: None,
        }
    }

    /// Draws the next sample together with its worst classified reading.
    pub fn next_sample(&mut self) -> (SensorSample, SensorStatus) {
        let mut temperature = round2(self.rng.gen_range(18.0..=24.0));
        let mut gas = self.rng.gen_range(15..=34);
        let humidity = self.rng.gen_range(45..=55);

        if self.rng.gen_bool(self.config.unsafe_probability) {
            temperature = round2(self.rng.gen_range(31.0..=35.0));
            gas = self.rng.gen_range(51..=70);
        } else if self.rng.gen_bool(self.config.warning_probability) {
            temperature = round2(self.rng.gen_range(26.0..=29.0));
            gas = self.rng.gen_range(35..=50);
        }

        let level = classify(SensorKind::Temperature, temperature)
            .worst(classify(SensorKind::Gas, f64::from(gas)))
            .worst(classify(SensorKind::Humidity, f64::from(humidity)));

        let sample = SensorSample {
            t_sensor: SensorKind::Temperature.to_string(),
            t_value: temperature,
            g_sensor: SensorKind::Gas.to_string(),
            g_value: gas,
            h_sensor: SensorKind::Humidity.to_string(),
            h_value: humidity,
        };
        (sample, level)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
impl DataSource for SensorGenerator {
    fn name(&self) -> String {
        format!("sensor generator ({})", self.config.topic)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        info!("Generating sensor data every {:?} on '{}'", period, self.config.topic);
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, SourceError> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Err(SourceError::NotOpen(self.name()));
        };
        ticker.tick().await;

        let (sample, level) = self.next_sample();
        match level {
            SensorStatus::Unsafe => info!("--- Generating UNSAFE event ---"),
            SensorStatus::Warning => info!("--- Generating WARNING event ---"),
            _ => {}
        }

        let envelope = Envelope {
            topic: &self.config.topic,
            payload: &sample,
        };
        match serde_json::to_string(&envelope) {
            Ok(line) => Ok(Some(line)),
            Err(e) => {
                warn!("Failed to encode generated sample: {}", e);
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        if self.ticker.take().is_some() {
            debug!("Sensor generator stopped");
        }
    }
}
