//! Sensor kinds and the SAFE / WARNING / UNSAFE classification used when
//! logging readings. Thresholds match the monitoring dashboard that consumes
//! the published topics.

pub mod status;

pub use status::{classify, SensorStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Humidity,
    /// Carbon monoxide concentration.
    Gas,
}

impl SensorKind {
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Gas => "ppm",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "Temperature"),
            SensorKind::Humidity => write!(f, "Humidity"),
            SensorKind::Gas => write!(f, "Gas"),
        }
    }
}
