//! Stream orchestrator
//!
//! Drives one streaming session at a time through the collector protocol:
//!
//! 1. connect to `address:port`
//! 2. send the greeting, then issue one receive for the collector's reply
//! 3. for each relay stage in order, start the producer, wait for its first
//!    reading, and send that reading's payload as one frame
//! 4. report the result through the `start` completion
//!
//! All session state is owned by a single dispatch task. Public methods post
//! commands to it; spawned I/O and producer callbacks post events back tagged
//! with the session generation, and events from an older generation are
//! dropped.

use crate::config::{AckPolicy, RelayConfig, TerminalPolicy};
use crate::error::{Stage, StreamError};
use crate::protocol::{relay_plan, GREETING};
use crate::session::{Completion, Session, SessionState};
use bytes::Bytes;
use sensorlink_connect::{ConnectError, Connection};
use sensorlink_core_interface::{
    Producer, ProducerError, Reading, ReadingBroadcaster, ReadingCallback, ReadingKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// The producers an orchestrator relays from
#[derive(Clone)]
pub struct ProducerSet {
    location: Arc<dyn Producer>,
    motion: Arc<dyn Producer>,
    ranging: Arc<dyn Producer>,
    imagery: Option<Arc<dyn Producer>>,
}

impl ProducerSet {
    pub fn new(
        location: Arc<dyn Producer>,
        motion: Arc<dyn Producer>,
        ranging: Arc<dyn Producer>,
    ) -> Self {
        Self {
            location,
            motion,
            ranging,
            imagery: None,
        }
    }

    pub fn with_imagery(mut self, imagery: Arc<dyn Producer>) -> Self {
        self.imagery = Some(imagery);
        self
    }

    pub fn get(&self, kind: ReadingKind) -> Option<&Arc<dyn Producer>> {
        match kind {
            ReadingKind::Location => Some(&self.location),
            ReadingKind::Motion => Some(&self.motion),
            ReadingKind::Ranging => Some(&self.ranging),
            ReadingKind::Imagery => self.imagery.as_ref(),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Producer>> {
        [&self.location, &self.motion, &self.ranging]
            .into_iter()
            .chain(self.imagery.as_ref())
    }
}

enum Command {
    Start {
        address: String,
        port: u16,
        completion: Completion,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
    Shutdown,
    Event {
        generation: u64,
        event: Event,
    },
}

enum Event {
    Connected(Result<Arc<Connection>, ConnectError>),
    GreetingSent(Result<(), ConnectError>),
    AckReceived(Result<Bytes, ConnectError>),
    ReadingReady(ReadingKind, Result<Reading, ProducerError>),
    FrameSent(ReadingKind, Result<(), ConnectError>),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Connected(_) => "connected",
            Event::GreetingSent(_) => "greeting_sent",
            Event::AckReceived(_) => "ack_received",
            Event::ReadingReady(..) => "reading_ready",
            Event::FrameSent(..) => "frame_sent",
        }
    }
}

/// Posts events for one session generation back to the dispatcher
#[derive(Clone)]
struct EventSink {
    tx: mpsc::UnboundedSender<Command>,
    generation: u64,
}

impl EventSink {
    fn post(&self, event: Event) {
        let _ = self.tx.send(Command::Event {
            generation: self.generation,
            event,
        });
    }
}

/// Coordinates the collector connection and the producers for streaming sessions
///
/// Must be created within a tokio runtime. Dropping the orchestrator stops any
/// session in progress.
///
/// # Example
///
/// ```rust,no_run
/// use sensorlink::{LatestReadings, ProducerSet, RelayConfig, SimulatedSensors, StreamOrchestrator};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let config = RelayConfig::default();
/// let sensors = SimulatedSensors::spawn(&config, (52.52, 13.40));
/// let orchestrator = StreamOrchestrator::new(
///     sensors.producer_set(),
///     Arc::new(LatestReadings::new()),
///     config,
/// );
///
/// orchestrator.start("10.0.0.5", 9000, |result| match result {
///     Ok(()) => println!("all frames relayed"),
///     Err(e) => eprintln!("streaming failed: {}", e),
/// });
/// # }
/// ```
pub struct StreamOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl StreamOrchestrator {
    pub fn new(
        producers: ProducerSet,
        broadcaster: Arc<dyn ReadingBroadcaster>,
        config: RelayConfig,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Idle);

        let dispatcher = Dispatcher {
            session: Session::new(state_tx),
            producers,
            broadcaster,
            config,
            commands: commands.clone(),
            awaiting: None,
        };
        tokio::spawn(dispatcher.run(rx));

        Self { commands, state }
    }

    /// Begin a streaming session to `address:port`
    ///
    /// Returns immediately. `on_complete` is invoked exactly once, never from
    /// within this call, with the session's terminal result, unless `stop`
    /// abandons the session first. While a session is in progress the call is
    /// rejected with `AlreadyStreaming` and the running session is untouched.
    pub fn start<F>(&self, address: &str, port: u16, on_complete: F)
    where
        F: FnOnce(Result<(), StreamError>) + Send + 'static,
    {
        let command = Command::Start {
            address: address.to_string(),
            port,
            completion: Box::new(on_complete),
        };
        if let Err(mpsc::error::SendError(Command::Start { completion, .. })) =
            self.commands.send(command)
        {
            warn!("Start requested after the orchestrator shut down");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { completion(Err(StreamError::OrchestratorClosed)) });
                }
                Err(_) => completion(Err(StreamError::OrchestratorClosed)),
            }
        }
    }

    /// Start a session and wait for its result
    ///
    /// A session abandoned by `stop` resolves to `Cancelled`.
    pub async fn start_and_wait(&self, address: &str, port: u16) -> Result<(), StreamError> {
        let (tx, rx) = oneshot::channel();
        self.start(address, port, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(StreamError::Cancelled))
    }

    /// Cancel the session in progress, if any
    ///
    /// Stops every producer, closes the connection, and returns to Idle. The
    /// pending completion is dropped without being invoked. Resolves once the
    /// teardown is done.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Stop { ack }).is_err() {
            return;
        }
        let _ = done.await;
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Drop for StreamOrchestrator {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Dispatcher {
    session: Session,
    producers: ProducerSet,
    broadcaster: Arc<dyn ReadingBroadcaster>,
    config: RelayConfig,
    commands: mpsc::UnboundedSender<Command>,
    /// Relay stage whose reading or frame is outstanding
    awaiting: Option<ReadingKind>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Start {
                    address,
                    port,
                    completion,
                } => self.handle_start(address, port, completion).await,
                Command::Stop { ack } => {
                    self.handle_stop().await;
                    let _ = ack.send(());
                }
                Command::Shutdown => {
                    self.handle_stop().await;
                    break;
                }
                Command::Event { generation, event } => {
                    if self.session.is_current(generation) && self.expects(&event) {
                        self.handle_event(event).await;
                    } else {
                        self.discard(generation, event);
                    }
                }
            }
        }
        debug!("Stream orchestrator dispatcher exited");
    }

    fn sink(&self) -> EventSink {
        EventSink {
            tx: self.commands.clone(),
            generation: self.session.generation(),
        }
    }

    fn expects(&self, event: &Event) -> bool {
        match (self.session.state(), event) {
            (SessionState::Connecting, Event::Connected(_)) => true,
            (SessionState::Handshaking, Event::GreetingSent(_) | Event::AckReceived(_)) => true,
            (SessionState::Streaming, Event::ReadingReady(kind, _) | Event::FrameSent(kind, _)) => {
                self.awaiting == Some(*kind)
            }
            _ => false,
        }
    }

    fn discard(&self, generation: u64, event: Event) {
        debug!(
            generation,
            current = self.session.generation(),
            event = event.name(),
            "Dropping stale event"
        );
        if let Event::Connected(Ok(connection)) = event {
            tokio::spawn(async move { connection.disconnect().await });
        }
    }

    async fn handle_start(&mut self, address: String, port: u16, completion: Completion) {
        if self.session.state() != SessionState::Idle {
            info!(
                state = %self.session.state(),
                "Start rejected: session already in progress"
            );
            completion(Err(StreamError::AlreadyStreaming));
            return;
        }

        // Leftovers from a lingering session
        if self.session.has_resources() {
            self.teardown().await;
        }

        let include_imagery = self.config.relay_imagery && self.producers.imagery.is_some();
        if self.config.relay_imagery && !include_imagery {
            warn!("Imagery relay enabled but no imagery producer configured; skipping it");
        }

        let generation = self.session.begin(completion, relay_plan(include_imagery));
        info!(generation, %address, port, "Streaming session starting");

        let sink = self.sink();
        let options = self.config.connect_options();
        tokio::spawn(async move {
            let result = Connection::connect(&address, port, &options)
                .await
                .map(Arc::new);
            sink.post(Event::Connected(result));
        });
    }

    async fn handle_stop(&mut self) {
        if self.session.state() == SessionState::Idle && !self.session.has_resources() {
            debug!("Stop requested while idle");
            return;
        }
        info!(state = %self.session.state(), "Stopping streaming session");

        self.session.transition(SessionState::Stopping);
        for producer in self.producers.all() {
            producer.stop().await;
        }
        let (connection, _) = self.session.take_resources();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
        self.awaiting = None;
        self.session.reset();
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected(Ok(connection)) => {
                self.session.attach_connection(Arc::clone(&connection));
                self.session.transition(SessionState::Handshaking);

                let sink = self.sink();
                tokio::spawn(async move {
                    let result = connection.send(GREETING).await;
                    sink.post(Event::GreetingSent(result));
                });
            }
            Event::Connected(Err(e)) => {
                self.finish(Err(StreamError::ConnectionFailed(e))).await;
            }
            Event::GreetingSent(Ok(())) => self.await_reply().await,
            Event::GreetingSent(Err(e)) => {
                self.finish(Err(StreamError::HandshakeFailed(e))).await;
            }
            Event::AckReceived(Ok(reply)) => {
                info!(
                    bytes = reply.len(),
                    reply = %String::from_utf8_lossy(&reply),
                    "Collector acknowledged greeting"
                );
                self.begin_streaming().await;
            }
            Event::AckReceived(Err(e)) => {
                self.finish(Err(StreamError::ReceiveFailed(e))).await;
            }
            Event::ReadingReady(kind, Ok(reading)) => self.send_frame(kind, reading),
            Event::ReadingReady(kind, Err(e)) => {
                self.finish(Err(StreamError::from_producer(kind, e))).await;
            }
            Event::FrameSent(kind, Ok(())) => {
                info!(stage = %kind, "Frame relayed");
                self.advance().await;
            }
            Event::FrameSent(kind, Err(e)) => {
                self.finish(Err(StreamError::SendFailed {
                    stage: Stage::from(kind),
                    source: e,
                }))
                .await;
            }
        }
    }

    /// Issue the one receive following the greeting
    async fn await_reply(&mut self) {
        let Some(connection) = self.session.connection().cloned() else {
            return;
        };

        match self.config.ack_policy {
            AckPolicy::LogOnly => {
                tokio::spawn(async move {
                    match connection.receive().await {
                        Ok(reply) => info!(
                            bytes = reply.len(),
                            reply = %String::from_utf8_lossy(&reply),
                            "Collector replied"
                        ),
                        Err(e) => debug!("No reply from collector: {}", e),
                    }
                });
                self.begin_streaming().await;
            }
            AckPolicy::Require => {
                let sink = self.sink();
                tokio::spawn(async move {
                    let result = connection.receive().await;
                    sink.post(Event::AckReceived(result));
                });
            }
        }
    }

    async fn begin_streaming(&mut self) {
        self.session.transition(SessionState::Streaming);
        self.advance().await;
    }

    async fn advance(&mut self) {
        match self.session.next_stage() {
            Some(kind) => self.start_producer(kind).await,
            None => {
                self.awaiting = None;
                self.finish(Ok(())).await;
            }
        }
    }

    async fn start_producer(&mut self, kind: ReadingKind) {
        let Some(producer) = self.producers.get(kind).cloned() else {
            self.finish(Err(StreamError::from_producer(
                kind,
                ProducerError::Unavailable(kind),
            )))
            .await;
            return;
        };

        self.awaiting = Some(kind);
        self.session.mark_started(kind);

        let first = Arc::new(AtomicBool::new(false));
        let callback: ReadingCallback = {
            let sink = self.sink();
            let first = Arc::clone(&first);
            let broadcaster = Arc::clone(&self.broadcaster);
            Arc::new(move |result| {
                if let Ok(reading) = &result {
                    broadcaster.publish(reading);
                }
                if !first.swap(true, Ordering::SeqCst) {
                    sink.post(Event::ReadingReady(kind, result));
                }
            })
        };

        debug!(stage = %kind, "Starting producer");
        if let Err(e) = producer.start(callback).await {
            if !first.swap(true, Ordering::SeqCst) {
                self.sink().post(Event::ReadingReady(kind, Err(e)));
            }
        }
    }

    fn send_frame(&self, kind: ReadingKind, reading: Reading) {
        let Some(connection) = self.session.connection().cloned() else {
            return;
        };
        debug!(stage = %kind, bytes = reading.len(), "Sending frame");

        let sink = self.sink();
        tokio::spawn(async move {
            let result = connection.send(reading.payload()).await;
            sink.post(Event::FrameSent(kind, result));
        });
    }

    /// Deliver the terminal result of the current session
    async fn finish(&mut self, result: Result<(), StreamError>) {
        let completion = self.session.take_completion();

        match self.config.terminal_policy {
            TerminalPolicy::Teardown => self.teardown().await,
            TerminalPolicy::Linger => {
                debug!("Keeping connection and producers until the next start or stop")
            }
        }
        self.awaiting = None;
        self.session.reset();

        match &result {
            Ok(()) => info!("Streaming session complete"),
            Err(e) => warn!(
                error = %e,
                category = %e.category(),
                stage = e.stage().map(|s| s.as_str()).unwrap_or("none"),
                "Streaming session failed"
            ),
        }
        if let Some(completion) = completion {
            completion(result);
        }
    }

    /// Stop the producers this session started and close its connection
    async fn teardown(&mut self) {
        let (connection, started) = self.session.take_resources();
        for kind in started {
            if let Some(producer) = self.producers.get(kind) {
                producer.stop().await;
            }
        }
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProducer;
    use sensorlink_core_interface::NullBroadcaster;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn scripted_set() -> ProducerSet {
        ProducerSet::new(
            Arc::new(ScriptedProducer::emitting(ReadingKind::Location, b"{}")),
            Arc::new(ScriptedProducer::emitting(ReadingKind::Motion, b"{}")),
            Arc::new(ScriptedProducer::emitting(ReadingKind::Ranging, &[0u8; 4])),
        )
    }

    /// A dispatcher driven by hand, with its event queue exposed
    fn manual_dispatcher(config: RelayConfig) -> (Dispatcher, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let dispatcher = Dispatcher {
            session: Session::new(state_tx),
            producers: scripted_set(),
            broadcaster: Arc::new(NullBroadcaster),
            config,
            commands,
            awaiting: None,
        };
        (dispatcher, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Command>) -> (u64, Event) {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Command::Event { generation, event })) => (generation, event),
            _ => panic!("no event posted"),
        }
    }

    #[test]
    fn test_producer_set_lookup() {
        let set = scripted_set();
        assert!(set.get(ReadingKind::Imagery).is_none());
        assert_eq!(set.all().count(), 3);

        let set = set.with_imagery(Arc::new(ScriptedProducer::emitting(
            ReadingKind::Imagery,
            b"\xff\xd8",
        )));
        assert_eq!(set.all().count(), 4);
        assert_eq!(
            set.get(ReadingKind::Motion).map(|p| p.kind()),
            Some(ReadingKind::Motion)
        );
    }

    #[tokio::test]
    async fn test_new_orchestrator_is_idle() {
        let orchestrator =
            StreamOrchestrator::new(scripted_set(), Arc::new(NullBroadcaster), RelayConfig::default());
        assert_eq!(orchestrator.state(), SessionState::Idle);

        // Stop while idle is a no-op
        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_address_completes_with_connection_failed() {
        let orchestrator =
            StreamOrchestrator::new(scripted_set(), Arc::new(NullBroadcaster), RelayConfig::default());

        let result = orchestrator.start_and_wait("", 9000).await;
        assert!(matches!(
            result,
            Err(StreamError::ConnectionFailed(ConnectError::InvalidAddress(_)))
        ));
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_greeting_send_failure_is_handshake_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut dispatcher, mut rx) = manual_dispatcher(RelayConfig::default());

        let (tx, mut results) = mpsc::unbounded_channel();
        dispatcher
            .handle_start(
                "127.0.0.1".to_string(),
                port,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await;
        let (_socket, _) = listener.accept().await.unwrap();

        let (generation, event) = next_event(&mut rx).await;
        assert!(dispatcher.session.is_current(generation));
        let Event::Connected(Ok(connection)) = event else {
            panic!("expected a connection");
        };

        // Socket gone before the greeting is written
        connection.disconnect().await;
        dispatcher.handle_event(Event::Connected(Ok(connection))).await;
        assert_eq!(dispatcher.session.state(), SessionState::Handshaking);

        let (generation, event) = next_event(&mut rx).await;
        assert!(dispatcher.session.is_current(generation));
        assert_eq!(event.name(), "greeting_sent");
        dispatcher.handle_event(event).await;

        let result = results.try_recv().unwrap();
        assert!(matches!(
            result,
            Err(StreamError::HandshakeFailed(ConnectError::Disconnected))
        ));
        assert_eq!(dispatcher.session.state(), SessionState::Idle);
        assert!(!dispatcher.session.has_resources());
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_connection_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (dispatcher, _rx) = manual_dispatcher(RelayConfig::default());

        let connection =
            Connection::connect("127.0.0.1", port, &RelayConfig::default().connect_options())
                .await
                .unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();

        let stale = dispatcher.session.generation() + 1;
        assert!(!dispatcher.session.is_current(stale));
        dispatcher.discard(stale, Event::Connected(Ok(Arc::new(connection))));

        let mut received = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut received))
            .await
            .expect("stale connection left open")
            .unwrap();
        assert_eq!(read, 0);
    }
}
