use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MqttConfig, RetryPolicy};
use super::message::{Message, Payload};
use super::observer::ConnectionObserver;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),

    #[error("Connection to {0} already started")]
    AlreadyStarted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Failed to serialize payload for '{topic}': {source}")]
    Serialize {
        topic: String,
        source: serde_json::Error,
    },

    #[error("Failed to enqueue message for '{topic}': {source}")]
    Enqueue {
        topic: String,
        source: rumqttc::ClientError,
    },
}

/// Outbound side of the relay: whatever the pipeline hands its messages to.
#[async_trait]
pub trait Publisher: Send {
    /// Where messages go, for log output.
    fn target(&self) -> String;

    /// Starts connecting in the background and returns immediately.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Local enqueue only; `Ok` says nothing about broker receipt.
    fn publish(&self, topic: &str, payload: &Payload) -> Result<(), PublishError>;

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Must be safe without a prior `connect` and when called twice.
    async fn disconnect(&mut self);

    fn publish_message(&self, message: &Message) -> Result<(), PublishError> {
        self.publish(message.topic(), message.payload())
    }
}

struct DeliveryHandle {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Connection to a single MQTT broker, backed by a `rumqttc` client whose
/// event loop runs as a separate tokio task.
pub struct BrokerConnection {
    config: MqttConfig,
    observer: Arc<dyn ConnectionObserver>,
    state: Arc<watch::Sender<ConnectionState>>,
    client: Option<AsyncClient>,
    delivery: Option<DeliveryHandle>,
}

impl BrokerConnection {
    pub fn new(config: MqttConfig, observer: Arc<dyn ConnectionObserver>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            observer,
            state: Arc::new(state),
            client: None,
            delivery: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn mqtt_options(&self) -> Result<MqttOptions, ConnectionError> {
        let host = self.config.host.trim();
        if host.is_empty() {
            return Err(ConnectionError::InvalidBroker("empty host".to_string()));
        }
        if self.config.port == 0 {
            return Err(ConnectionError::InvalidBroker(format!("{}:0", host)));
        }

        let client_id = self.config.resolve_client_id();
        debug!("Using MQTT client id {}", client_id);

        let mut options = MqttOptions::new(client_id, host, self.config.port);
        options.set_keep_alive(self.config.keep_alive());
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            );
        }
        Ok(options)
    }
}

#[async_trait]
impl Publisher for BrokerConnection {
    fn target(&self) -> String {
        self.config.broker_address()
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        let broker = self.config.broker_address();
        if self.client.is_some() {
            return Err(ConnectionError::AlreadyStarted(broker));
        }

        let options = self.mqtt_options()?;
        let (client, event_loop) = AsyncClient::new(options, self.config.capacity.max(1));

        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to MQTT broker at {}", broker);

        let shutdown = CancellationToken::new();
        let delivery = DeliveryLoop {
            event_loop,
            broker,
            state: self.state.clone(),
            observer: self.observer.clone(),
            policy: self.config.retry_policy(),
            confirm_on_send: self.config.qos_level() == QoS::AtMostOnce,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(delivery.run());

        self.client = Some(client);
        self.delivery = Some(DeliveryHandle { task, shutdown });
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &Payload) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::NotConnected)?;

        let bytes = Message::encode_payload(payload).map_err(|source| PublishError::Serialize {
            topic: topic.to_string(),
            source,
        })?;

        client
            .try_publish(topic, self.config.qos_level(), self.config.retain, bytes)
            .map_err(|source| PublishError::Enqueue {
                topic: topic.to_string(),
                source,
            })
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            debug!("Disconnect requested without an active connection");
            return;
        };

        if let Err(e) = client.try_disconnect() {
            debug!("Could not enqueue DISCONNECT: {}", e);
        }

        if let Some(delivery) = self.delivery.take() {
            delivery.shutdown.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, delivery.task).await {
                Ok(Ok(())) => debug!("Delivery loop stopped"),
                Ok(Err(e)) => error!("Delivery loop panicked: {}", e),
                Err(_) => warn!("Delivery loop did not stop within {:?}", SHUTDOWN_TIMEOUT),
            }
        }

        if self.state() != ConnectionState::Failed {
            self.state.send_replace(ConnectionState::Disconnected);
        }
        info!("Disconnected from broker.");
    }
}

/// Pumps network I/O for one client and reports broker events.
struct DeliveryLoop {
    event_loop: EventLoop,
    broker: String,
    state: Arc<watch::Sender<ConnectionState>>,
    observer: Arc<dyn ConnectionObserver>,
    policy: RetryPolicy,
    // QoS 0 publishes are never acknowledged, so they count once written.
    confirm_on_send: bool,
    shutdown: CancellationToken,
}

impl DeliveryLoop {
    async fn run(mut self) {
        let mut failed_attempts = 0u32;
        let mut connected_once = false;

        loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                event = self.event_loop.poll() => Some(event),
            };
            let Some(event) = polled else {
                self.drain().await;
                break;
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        failed_attempts = 0;
                        connected_once = true;
                        self.state.send_replace(ConnectionState::Connected);
                        self.observer.on_connected(&self.broker);
                    } else {
                        failed_attempts += 1;
                        if self.retry_or_fail(failed_attempts, &format!("{:?}", ack.code)).await {
                            break;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.observer.on_published(ack.pkid),
                Ok(Event::Incoming(Packet::PubComp(comp))) => self.observer.on_published(comp.pkid),
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) if self.confirm_on_send => {
                    self.observer.on_published(pkid)
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker {} closed the session", self.broker);
                    self.state.send_replace(ConnectionState::Connecting);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    break;
                }
                Ok(_) => {}
                Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                    failed_attempts += 1;
                    if self.retry_or_fail(failed_attempts, &format!("refused with {:?}", code)).await {
                        break;
                    }
                }
                Err(e) if !connected_once => {
                    failed_attempts += 1;
                    if self.retry_or_fail(failed_attempts, &e.to_string()).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Lost connection to {}: {}", self.broker, e);
                    self.state.send_replace(ConnectionState::Connecting);
                    if self.pause(RECONNECT_DELAY).await {
                        break;
                    }
                }
            }
        }
        debug!("Delivery loop for {} finished", self.broker);
    }

    /// Returns `true` when the loop has to stop.
    async fn retry_or_fail(&mut self, failed_attempts: u32, reason: &str) -> bool {
        if self.policy.exhausted(failed_attempts) {
            self.state.send_replace(ConnectionState::Failed);
            self.observer.on_rejected(&self.broker, reason);
            return true;
        }

        let delay = self.policy.delay(failed_attempts);
        warn!(
            "Connection attempt {}/{} to {} failed ({}), retrying in {:?}",
            failed_attempts, self.policy.max_attempts, self.broker, reason, delay
        );
        self.state.send_replace(ConnectionState::Connecting);
        self.pause(delay).await
    }

    /// Sleeps unless shutdown is requested first; returns `true` on shutdown.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    // Lets a queued DISCONNECT reach the broker before the socket is dropped.
    async fn drain(&mut self) {
        if *self.state.borrow() != ConnectionState::Connected {
            return;
        }

        let event_loop = &mut self.event_loop;
        let flush = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, flush).await.is_err() {
            warn!("Timed out flushing DISCONNECT to {}", self.broker);
        }
    }
}
