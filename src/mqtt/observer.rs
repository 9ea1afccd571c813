use tracing::{debug, error, info};

/// Receives broker events from the delivery loop.
///
/// Methods run on the delivery loop task, not on the relay loop, so
/// implementations must be cheap and must not block.
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self, _broker: &str) {}

    fn on_rejected(&self, _broker: &str, _reason: &str) {}

    fn on_published(&self, _packet_id: u16) {}
}

/// Observer that only writes log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_connected(&self, broker: &str) {
        info!("Connected to MQTT broker at {}", broker);
    }

    fn on_rejected(&self, broker: &str, reason: &str) {
        error!("Connection to MQTT broker at {} failed: {}", broker, reason);
    }

    fn on_published(&self, packet_id: u16) {
        debug!("Message {} published.", packet_id);
    }
}
