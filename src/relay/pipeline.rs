//! Relay pipeline with statum state machine
//!
//! ```text
//! Idle ──start──► Running ──interrupt / fatal error──► ShuttingDown ──shutdown──► Terminated
//! ```
//!
//! `shutdown` consumes the machine, so teardown (broker disconnect, then
//! source close) runs exactly once per run no matter how Running ended. A
//! failure while starting still passes through Running (which exits at once)
//! so the same teardown path is taken.

use std::time::Duration;

use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::RelayError;
use super::stats::RelayStats;
use crate::mqtt::{ConnectionState, Message, Publisher};
use crate::parser::{self, LineParser};
use crate::source::{DataSource, SourceError};

/// Loop settings that do not belong to the source or the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelaySettings {
    /// Fixed delay after every iteration. Sources that pace themselves leave this unset.
    pub pace: Option<Duration>,
}

/// Outcome of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RelayStats,
    pub fatal: Option<RelayError>,
}

impl RunReport {
    pub fn into_result(self) -> Result<RelayStats, RelayError> {
        match self.fatal {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PipelineState {
    Idle,
    Running,
    ShuttingDown,
    Terminated,
}

#[machine]
pub struct Pipeline<S: PipelineState> {
    source: Box<dyn DataSource>,
    parser: Box<dyn LineParser>,
    publisher: Box<dyn Publisher>,
    settings: RelaySettings,
    interrupt: CancellationToken,
    stats: RelayStats,
    fatal: Option<RelayError>,
}

enum Step {
    Interrupted,
    StateChanged,
    StateClosed,
    Read(Result<Option<String>, SourceError>),
}

impl Pipeline<Idle> {
    pub fn create(
        source: Box<dyn DataSource>,
        parser: Box<dyn LineParser>,
        publisher: Box<dyn Publisher>,
        settings: RelaySettings,
        interrupt: CancellationToken,
    ) -> Self {
        Self::new(
            source,
            parser,
            publisher,
            settings,
            interrupt,
            RelayStats::default(), // stats
            None,                  // fatal
        )
    }

    /// Opens the source, then starts the broker connection.
    pub async fn start(mut self) -> Pipeline<Running> {
        info!(
            "Starting relay: {} -> {}",
            self.source.name(),
            self.publisher.target()
        );

        if let Err(e) = self.source.open().await {
            error!("Could not open data source: {}", e);
            self.fatal = Some(e.into());
        } else if let Err(e) = self.publisher.connect() {
            error!("Could not start broker connection: {}", e);
            self.fatal = Some(e.into());
        }

        self.transition()
    }
}

impl Pipeline<Running> {
    /// Main loop. Returns once the interrupt token fires or a fatal error occurs.
    pub async fn run_until_shutdown(mut self) -> Pipeline<ShuttingDown> {
        if self.fatal.is_some() {
            return self.transition();
        }

        let interrupt = self.interrupt.clone();
        let mut connection = self.publisher.subscribe_state();
        let mut watching = true;

        loop {
            if *connection.borrow_and_update() == ConnectionState::Failed {
                self.fatal = Some(RelayError::ConnectionRejected(self.publisher.target()));
                break;
            }

            // Reads are cancel safe, so dropping one on an interrupt loses nothing.
            let step = tokio::select! {
                biased;
                _ = interrupt.cancelled() => Step::Interrupted,
                changed = connection.changed(), if watching => match changed {
                    Ok(()) => Step::StateChanged,
                    Err(_) => Step::StateClosed,
                },
                read = self.source.read_line() => Step::Read(read),
            };

            match step {
                Step::Interrupted => {
                    info!("Relay stopped by user.");
                    break;
                }
                Step::StateChanged => continue,
                Step::StateClosed => {
                    debug!("Connection state channel closed");
                    watching = false;
                    continue;
                }
                Step::Read(Ok(Some(line))) => self.handle_line(&line),
                Step::Read(Ok(None)) => self.stats.empty_reads += 1,
                Step::Read(Err(e)) => {
                    error!("Data source failed: {}", e);
                    self.fatal = Some(e.into());
                    break;
                }
            }

            if let Some(pace) = self.settings.pace {
                tokio::select! {
                    _ = interrupt.cancelled() => {}
                    _ = tokio::time::sleep(pace) => {}
                }
            }
        }

        self.transition()
    }

    fn handle_line(&mut self, line: &str) {
        self.stats.record_line();
        if !line.is_empty() {
            debug!("Received from device: {}", line);
        }

        match self.parser.decode(line) {
            Ok(messages) => {
                for message in messages {
                    self.publish(message);
                }
            }
            Err(e) => {
                parser::report(&e, line);
                self.stats.record_rejection(&e);
            }
        }
    }

    fn publish(&mut self, message: Message) {
        match self.publisher.publish_message(&message) {
            Ok(()) => {
                self.stats.messages_published += 1;
                info!(
                    "Published to '{}': {}",
                    message.topic(),
                    serde_json::Value::Object(message.payload().clone())
                );
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!("Failed to publish to '{}': {}", message.topic(), e);
            }
        }
    }
}

impl Pipeline<ShuttingDown> {
    pub async fn shutdown(mut self) -> Pipeline<Terminated> {
        info!("Shutting down relay");
        self.publisher.disconnect().await;
        self.source.close().await;
        info!("Application shutdown complete: {}", self.stats);
        self.transition()
    }
}

impl Pipeline<Terminated> {
    pub fn into_report(mut self) -> RunReport {
        RunReport {
            stats: std::mem::take(&mut self.stats),
            fatal: self.fatal.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::{ConnectionError, Payload, PublishError};
    use crate::parser::{EnvelopeParser, SplitParser};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    #[derive(Default)]
    struct SourceProbe {
        opened: usize,
        closed: usize,
    }

    /// Replays scripted reads, then cancels the run like an operator would.
    struct ScriptedSource {
        reads: VecDeque<Result<Option<String>, SourceError>>,
        fail_open: bool,
        when_done: CancellationToken,
        probe: Arc<Mutex<SourceProbe>>,
    }

    impl ScriptedSource {
        fn lines(lines: &[&str], when_done: &CancellationToken) -> Self {
            Self {
                reads: lines.iter().map(|l| Ok(Some(l.to_string()))).collect(),
                fail_open: false,
                when_done: when_done.clone(),
                probe: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn name(&self) -> String {
            "scripted source".into()
        }

        async fn open(&mut self) -> Result<(), SourceError> {
            if self.fail_open {
                return Err(SourceError::Unavailable {
                    name: self.name(),
                    reason: "no such device".into(),
                });
            }
            self.probe.lock().unwrap().opened += 1;
            Ok(())
        }

        async fn read_line(&mut self) -> Result<Option<String>, SourceError> {
            match self.reads.pop_front() {
                Some(read) => read,
                None => {
                    self.when_done.cancel();
                    std::future::pending().await
                }
            }
        }

        async fn close(&mut self) {
            self.probe.lock().unwrap().closed += 1;
        }
    }

    #[derive(Default)]
    struct PublisherProbe {
        connects: usize,
        disconnects: usize,
        published: Vec<(String, Value)>,
    }

    struct RecordingPublisher {
        state: Arc<watch::Sender<ConnectionState>>,
        reject_on_connect: bool,
        fail_topic: Option<String>,
        probe: Arc<Mutex<PublisherProbe>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            let (state, _) = watch::channel(ConnectionState::Disconnected);
            Self {
                state: Arc::new(state),
                reject_on_connect: false,
                fail_topic: None,
                probe: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn target(&self) -> String {
            "test-broker:1883".into()
        }

        fn connect(&mut self) -> Result<(), ConnectionError> {
            self.probe.lock().unwrap().connects += 1;
            let state = if self.reject_on_connect {
                ConnectionState::Failed
            } else {
                ConnectionState::Connected
            };
            self.state.send_replace(state);
            Ok(())
        }

        fn publish(&self, topic: &str, payload: &Payload) -> Result<(), PublishError> {
            if self.fail_topic.as_deref() == Some(topic) {
                return Err(PublishError::NotConnected);
            }
            self.probe
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), Value::Object(payload.clone())));
            Ok(())
        }

        fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        async fn disconnect(&mut self) {
            self.probe.lock().unwrap().disconnects += 1;
        }
    }

    async fn run_pipeline(
        source: ScriptedSource,
        parser: Box<dyn LineParser>,
        publisher: RecordingPublisher,
        settings: RelaySettings,
        token: CancellationToken,
    ) -> RunReport {
        Pipeline::<Idle>::create(Box::new(source), parser, Box::new(publisher), settings, token)
            .start()
            .await
            .run_until_shutdown()
            .await
            .shutdown()
            .await
            .into_report()
    }

    #[tokio::test]
    async fn envelope_line_is_published_once() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"topic":"sensors/x","payload":{"a":1}}"#], &token);
        let source_probe = source.probe.clone();
        let publisher = RecordingPublisher::new();
        let publisher_probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(report.fatal.is_none());
        let probe = publisher_probe.lock().unwrap();
        assert_eq!(
            probe.published,
            vec![("sensors/x".to_string(), json!({"a": 1}))]
        );
        assert_eq!(probe.connects, 1);
        assert_eq!(probe.disconnects, 1);
        assert_eq!(source_probe.lock().unwrap().closed, 1);
        assert_eq!(report.stats.messages_published, 1);
    }

    #[tokio::test]
    async fn invalid_json_publishes_nothing() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(&["not json"], &token);
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(probe.lock().unwrap().published.is_empty());
        assert_eq!(report.stats.decode_errors, 1);
        assert_eq!(report.stats.schema_errors, 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn missing_payload_publishes_nothing() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"topic":"t"}"#], &token);
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(probe.lock().unwrap().published.is_empty());
        assert_eq!(report.stats.schema_errors, 1);
        assert_eq!(report.stats.decode_errors, 0);
    }

    #[tokio::test]
    async fn device_reading_fans_out_to_two_topics() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"temperature":21.5,"humidity":50}"#], &token);
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        run_pipeline(
            source,
            Box::new(SplitParser::default()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert_eq!(
            probe.lock().unwrap().published,
            vec![
                (
                    "sensors/temperature/main-room".to_string(),
                    json!({"value": 21.5, "unit": "°C"})
                ),
                (
                    "sensors/humidity/main-room".to_string(),
                    json!({"value": 50, "unit": "%"})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_stop_the_loop() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(
            &[
                r#"{"topic":"broken","payload":{"a":1}}"#,
                r#"{"topic":"fine","payload":{"b":2}}"#,
            ],
            &token,
        );
        let mut publisher = RecordingPublisher::new();
        publisher.fail_topic = Some("broken".into());
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert_eq!(report.stats.publish_failures, 1);
        assert_eq!(report.stats.messages_published, 1);
        assert_eq!(
            probe.lock().unwrap().published,
            vec![("fine".to_string(), json!({"b": 2}))]
        );
        assert!(report.fatal.is_none());
    }

    #[tokio::test]
    async fn transient_misses_are_skipped() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::lines(&[], &token);
        source.reads = VecDeque::from(vec![
            Ok(None),
            Ok(Some(String::new())),
            Ok(Some(r#"{"topic":"t","payload":{"ok":true}}"#.to_string())),
        ]);
        let publisher = RecordingPublisher::new();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert_eq!(report.stats.empty_reads, 2);
        assert_eq!(report.stats.messages_published, 1);
    }

    #[tokio::test]
    async fn rejected_connection_is_fatal_and_still_tears_down_once() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"topic":"t","payload":{"a":1}}"#], &token);
        let source_probe = source.probe.clone();
        let mut publisher = RecordingPublisher::new();
        publisher.reject_on_connect = true;
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(matches!(
            report.fatal,
            Some(RelayError::ConnectionRejected(_))
        ));
        let probe = probe.lock().unwrap();
        assert!(probe.published.is_empty());
        assert_eq!(probe.disconnects, 1);
        assert_eq!(source_probe.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn rejection_while_waiting_for_data_interrupts_the_read() {
        // The source never ends on its own, so only the rejection can stop the run.
        let token = CancellationToken::new();
        let never_cancelled = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"topic":"t","payload":{"a":1}}"#], &never_cancelled);
        let source_probe = source.probe.clone();
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let state = publisher.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            state.send_replace(ConnectionState::Failed);
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_pipeline(
                source,
                Box::new(EnvelopeParser::new()),
                publisher,
                RelaySettings::default(),
                token,
            ),
        )
        .await
        .unwrap();

        assert_eq!(report.stats.messages_published, 1);
        assert!(matches!(
            report.into_result(),
            Err(RelayError::ConnectionRejected(_))
        ));
        assert_eq!(probe.lock().unwrap().disconnects, 1);
        assert_eq!(source_probe.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn source_that_cannot_open_is_fatal_and_still_tears_down() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::lines(&[], &token);
        source.fail_open = true;
        let source_probe = source.probe.clone();
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(matches!(
            report.fatal,
            Some(RelayError::SourceUnavailable(SourceError::Unavailable { .. }))
        ));
        let probe = probe.lock().unwrap();
        assert_eq!(probe.connects, 0);
        assert_eq!(probe.disconnects, 1);
        let source_probe = source_probe.lock().unwrap();
        assert_eq!(source_probe.opened, 0);
        assert_eq!(source_probe.closed, 1);
    }

    #[tokio::test]
    async fn lost_source_is_fatal() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::lines(&[], &token);
        source.reads = VecDeque::from(vec![
            Ok(Some(r#"{"topic":"t","payload":{"a":1}}"#.to_string())),
            Err(SourceError::Disconnected("scripted source".into())),
        ]);
        let source_probe = source.probe.clone();
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(matches!(
            report.fatal,
            Some(RelayError::SourceUnavailable(SourceError::Disconnected(_)))
        ));
        assert_eq!(report.stats.messages_published, 1);
        assert_eq!(probe.lock().unwrap().disconnects, 1);
        assert_eq!(source_probe.lock().unwrap().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delays_each_iteration() {
        let token = CancellationToken::new();
        let source = ScriptedSource::lines(
            &[
                r#"{"topic":"t","payload":{"n":1}}"#,
                r#"{"topic":"t","payload":{"n":2}}"#,
                r#"{"topic":"t","payload":{"n":3}}"#,
            ],
            &token,
        );
        let publisher = RecordingPublisher::new();
        let settings = RelaySettings {
            pace: Some(Duration::from_secs(2)),
        };

        let start = tokio::time::Instant::now();
        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            settings,
            token,
        )
        .await;

        assert_eq!(report.stats.messages_published, 3);
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn interrupt_before_any_data_still_tears_down() {
        let token = CancellationToken::new();
        token.cancel();
        let never_cancelled = CancellationToken::new();
        let source = ScriptedSource::lines(&[r#"{"topic":"t","payload":{"a":1}}"#], &never_cancelled);
        let source_probe = source.probe.clone();
        let publisher = RecordingPublisher::new();
        let probe = publisher.probe.clone();

        let report = run_pipeline(
            source,
            Box::new(EnvelopeParser::new()),
            publisher,
            RelaySettings::default(),
            token,
        )
        .await;

        assert!(report.fatal.is_none());
        assert!(probe.lock().unwrap().published.is_empty());
        assert_eq!(probe.lock().unwrap().disconnects, 1);
        assert_eq!(source_probe.lock().unwrap().closed, 1);
    }
}
