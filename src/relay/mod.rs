//! # Relay Coordinator
//!
//! Ties a [`DataSource`], a [`LineParser`] and a [`Publisher`] together:
//! read a line, parse it, publish whatever came out, repeat.
//!
//! ## Error Handling Strategy
//!
//! Only two things end a run early: the data source going away and the
//! broker refusing the connection. Read misses, malformed lines and failed
//! enqueues are logged, counted in [`RelayStats`] and skipped.
//!
//! ## Shutdown
//!
//! Interrupts arrive through a `CancellationToken` and are raced against the
//! pending read, so a quiet serial line never holds up shutdown. Teardown is
//! the last state of the [`Pipeline`] machine and always runs.

pub mod error;
pub mod pipeline;
pub mod stats;

pub use error::RelayError;
pub use pipeline::{Idle, Pipeline, RelaySettings, RunReport};
pub use stats::RelayStats;

use crate::mqtt::Publisher;
use crate::parser::LineParser;
use crate::source::DataSource;
use tokio_util::sync::CancellationToken;

/// Runs one pipeline from start to teardown.
pub async fn run(
    source: Box<dyn DataSource>,
    parser: Box<dyn LineParser>,
    publisher: Box<dyn Publisher>,
    settings: RelaySettings,
    interrupt: CancellationToken,
) -> RunReport {
    Pipeline::<Idle>::create(source, parser, publisher, settings, interrupt)
        .start()
        .await
        .run_until_shutdown()
        .await
        .shutdown()
        .await
        .into_report()
}
