//! # Data Sources
//!
//! Everything that produces raw text lines for the relay implements
//! [`DataSource`]. Two implementations exist:
//!
//! - [`SerialSource`]: a microcontroller printing one JSON object per line on
//!   a serial port. Reads block on the device, bounded by the port timeout.
//! - [`SensorGenerator`]: synthetic readings on a fixed interval, for running
//!   the relay and its consumers without hardware.
//!
//! Whether `read_line` blocks on I/O or sleeps on a timer is the source's own
//! business; the relay loop treats both the same way.

pub mod generator;
pub mod serial;

pub use generator::{GeneratorConfig, SensorGenerator};
pub use serial::{SerialConfig, SerialSource};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Could not open {name}: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("{0} is not open")]
    NotOpen(String),

    #[error("{0} stopped delivering data")]
    Disconnected(String),
}

#[async_trait]
pub trait DataSource: Send {
    /// Human readable name for log output.
    fn name(&self) -> String;

    /// Acquires the channel and waits until it is ready to deliver lines.
    async fn open(&mut self) -> Result<(), SourceError>;

    /// `Ok(None)` is a transient miss (timeout, read error) and the caller
    /// should simply try again. `Err` means the source is gone.
    async fn read_line(&mut self) -> Result<Option<String>, SourceError>;

    /// Releases the channel. Idempotent, and fine to call after a failed `open`.
    async fn close(&mut self);
}
