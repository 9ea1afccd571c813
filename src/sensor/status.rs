use super::SensorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorStatus {
    Safe,
    Warning,
    Unsafe,
    Unknown,
}

impl SensorStatus {
    fn severity(&self) -> u8 {
        match self {
            SensorStatus::Safe | SensorStatus::Unknown => 0,
            SensorStatus::Warning => 1,
            SensorStatus::Unsafe => 2,
        }
    }

    /// The more severe of the two; `Unknown` never outranks a known status.
    pub fn worst(self, other: SensorStatus) -> SensorStatus {
        if other.severity() > self.severity() || self == SensorStatus::Unknown {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorStatus::Safe => write!(f, "SAFE"),
            SensorStatus::Warning => write!(f, "WARNING"),
            SensorStatus::Unsafe => write!(f, "UNSAFE"),
            SensorStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// Band limits: outside unsafe_* is UNSAFE, outside warning_* is WARNING.
struct Band {
    unsafe_low: f64,
    warning_low: f64,
    warning_high: f64,
    unsafe_high: f64,
}

const TEMPERATURE: Band = Band {
    unsafe_low: 10.0,
    warning_low: 15.0,
    warning_high: 25.0,
    unsafe_high: 30.0,
};

const HUMIDITY: Band = Band {
    unsafe_low: 30.0,
    warning_low: 40.0,
    warning_high: 60.0,
    unsafe_high: 70.0,
};

// CO concentration
const GAS_SAFE_MAX: f64 = 35.0;
const GAS_WARNING_MAX: f64 = 50.0;

impl Band {
    fn classify(&self, value: f64) -> SensorStatus {
        if value < self.unsafe_low || value > self.unsafe_high {
            SensorStatus::Unsafe
        } else if value < self.warning_low || value > self.warning_high {
            SensorStatus::Warning
        } else {
            SensorStatus::Safe
        }
    }
}

pub fn classify(kind: SensorKind, value: f64) -> SensorStatus {
    if value.is_nan() {
        return SensorStatus::Unknown;
    }
    match kind {
        SensorKind::Temperature => TEMPERATURE.classify(value),
        SensorKind::Humidity => HUMIDITY.classify(value),
        SensorKind::Gas => {
            if value > GAS_WARNING_MAX {
                SensorStatus::Unsafe
            } else if value >= GAS_SAFE_MAX {
                SensorStatus::Warning
            } else {
                SensorStatus::Safe
            }
        }
    }
}
