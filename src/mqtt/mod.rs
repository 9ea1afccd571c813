//! # MQTT Integration Module
//!
//! Broker side of the relay. Wraps a `rumqttc` client behind the [`Publisher`]
//! trait so the relay loop only deals with topics and JSON payloads.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs      - Broker settings and the connect retry policy
//! ├── connection.rs  - BrokerConnection, delivery loop and connection state
//! ├── message.rs     - Message representation and payload encoding
//! └── observer.rs    - Event hooks invoked from the delivery loop
//! ```
//!
//! ## Threading
//!
//! `connect` spawns the client's event loop as its own tokio task. That task
//! pumps network I/O, updates the [`ConnectionState`] watch channel and calls
//! the registered [`ConnectionObserver`]. Publishing never waits for the
//! network: a message is handed to the client's request queue and the call
//! returns with the outcome of that local enqueue.
//!
//! ## Failure Semantics
//!
//! A broker that refuses the connection (or cannot be reached before the
//! first successful CONNACK) moves the state to `Failed` once the retry budget
//! from [`MqttConfig::max_connect_attempts`] is spent. With the default budget
//! of one attempt this happens on the first refusal. A link that drops after a
//! successful connection goes back to `Connecting` and the event loop keeps
//! redialing.

pub mod config;
pub mod connection;
pub mod message;
pub mod observer;

pub use config::{MqttConfig, RetryPolicy};
pub use connection::{BrokerConnection, ConnectionError, ConnectionState, PublishError, Publisher};
pub use message::{Message, Payload};
pub use observer::{ConnectionObserver, LoggingObserver};
