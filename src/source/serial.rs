use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::ClearBuffer;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{DataSource, SourceError};

const LINE_BUFFER: usize = 64;
const IDLE_BACKOFF: Duration = Duration::from_millis(50);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Settings of the `serial` source kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound for a single read; also bounds how long shutdown can wait on the device.
    pub timeout_ms: u64,
    /// Time the board needs after the port opens (most Arduinos reset on open).
    pub warmup_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            timeout_ms: 2000,
            warmup_ms: 2000,
        }
    }
}

struct ReaderHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Line-oriented serial device.
///
/// Blocking reads happen on a dedicated thread that forwards complete lines
/// through a channel, so `read_line` never blocks the async runtime.
pub struct SerialSource {
    config: SerialConfig,
    lines: Option<mpsc::Receiver<io::Result<String>>>,
    reader: Option<ReaderHandle>,
}

impl SerialSource {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            lines: None,
            reader: None,
        }
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms.max(1))
    }
}

#[async_trait]
impl DataSource for SerialSource {
    fn name(&self) -> String {
        format!("serial port {}", self.config.port)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        if self.lines.is_some() {
            debug!("{} already open", self.name());
            return Ok(());
        }

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(self.read_timeout())
            .open()
            .map_err(|e| SourceError::Unavailable {
                name: self.name(),
                reason: e.to_string(),
            })?;
        info!(
            "Connected to device on {} at {} baud.",
            self.config.port, self.config.baud_rate
        );

        tokio::time::sleep(Duration::from_millis(self.config.warmup_ms)).await;
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("Could not clear input buffer of {}: {}", self.config.port, e);
        }

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_lines(port, tx, thread_stop))
            .map_err(|e| SourceError::Unavailable {
                name: self.name(),
                reason: e.to_string(),
            })?;

        self.lines = Some(rx);
        self.reader = Some(ReaderHandle { stop, thread });
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, SourceError> {
        let name = self.name();
        let timeout = self.read_timeout();
        let Some(lines) = self.lines.as_mut() else {
            return Err(SourceError::NotOpen(name));
        };

        match tokio::time::timeout(timeout, lines.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(line))) => Ok(Some(line)),
            Ok(Some(Err(e))) => {
                warn!("Serial read error: {}", e);
                Ok(None)
            }
            Ok(None) => Err(SourceError::Disconnected(name)),
        }
    }

    async fn close(&mut self) {
        // Dropping the receiver makes the reader's next send fail.
        self.lines = None;

        let Some(reader) = self.reader.take() else {
            return;
        };
        reader.stop.store(true, Ordering::Relaxed);

        let port = self.config.port.clone();
        match tokio::task::spawn_blocking(move || reader.thread.join()).await {
            Ok(Ok(())) => info!("Serial port {} closed.", port),
            Ok(Err(_)) => error!("Serial reader for {} panicked", port),
            Err(e) => error!("Failed to join serial reader for {}: {}", port, e),
        }
    }
}

/// Reader thread body: forwards complete, trimmed UTF-8 lines until stopped
/// or until nobody listens any more.
fn read_lines<R: Read>(port: R, tx: mpsc::Sender<io::Result<String>>, stop: Arc<AtomicBool>) {
    let mut reader = BufReader::new(port);
    let mut pending = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF),
            Ok(_) if !pending.ends_with(b"\n") => continue,
            Ok(_) => {
                let raw = std::mem::take(&mut pending);
                let line = String::from_utf8(raw)
                    .map(|text| text.trim().to_string())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            // Partial data stays in `pending` until the rest of the line arrives.
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                pending.clear();
                if tx.blocking_send(Err(e)).is_err() {
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!("Serial reader stopped");
}
