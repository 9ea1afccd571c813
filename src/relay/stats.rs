use chrono::{DateTime, Local};
use std::fmt;

use crate::parser::ParseError;

/// Counters for one relay run, logged at shutdown.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelayStats {
    pub lines_read: usize,
    pub empty_reads: usize,
    pub decode_errors: usize,
    pub schema_errors: usize,
    pub device_errors: usize,
    pub messages_published: usize,
    pub publish_failures: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl RelayStats {
    pub fn record_line(&mut self) {
        self.lines_read += 1;
        self.last_activity = Some(Local::now());
    }

    pub fn record_rejection(&mut self, error: &ParseError) {
        match error {
            ParseError::Empty => self.empty_reads += 1,
            ParseError::Decode(_) => self.decode_errors += 1,
            ParseError::Schema(_) => self.schema_errors += 1,
            ParseError::DeviceReported(_) => self.device_errors += 1,
        }
    }

    pub fn rejected_lines(&self) -> usize {
        self.decode_errors + self.schema_errors + self.device_errors
    }
}

impl fmt::Display for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines read, {} rejected, {} published, {} publish failures",
            self.lines_read,
            self.rejected_lines(),
            self.messages_published,
            self.publish_failures
        )?;
        if let Some(last) = self.last_activity {
            write!(f, ", last activity {}", last.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}
