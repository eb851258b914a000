//! Async publisher handle
//!
//! One task owns the [`JanusSession`] and serializes everything that touches
//! it: host commands, transport events, media events and the timeout tick.
//! The handle only sends commands, so every call returns immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::event::PublisherEvent;
use super::session::JanusSession;
use super::state::{PublishState, SessionIds, SessionState};
use crate::config::{ConnectionSettings, PublishConfig};
use crate::media::{MediaDriver, MediaEvent, MediaFeeds};
use crate::network::{SignalingTransport, TransportEvent, WebSocketTransport};

/// How often pending requests are checked for expiry
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    Publish(PublishConfig),
    Unpublish,
    Shutdown,
}

pub struct Publisher {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PublisherEvent>,
    state: Arc<SessionState>,
    feeds: Arc<MediaFeeds>,
    last_error: Arc<Mutex<Option<String>>>,
    task: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Start a publisher that talks to the gateway over WebSocket.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// ```
    /// use janus_publish::media::{MediaEngineConfig, SdpFileDriver};
    /// use janus_publish::{ConnectionSettings, PublishState, Publisher};
    ///
    /// # tokio_test::block_on(async {
    /// let driver = SdpFileDriver::new("v=0\r\n".to_string(), MediaEngineConfig::default()).unwrap();
    /// let publisher = Publisher::spawn(ConnectionSettings::default(), Box::new(driver));
    /// assert_eq!(publisher.state(), PublishState::Disconnected);
    /// publisher.shutdown().await;
    /// # });
    /// ```
    pub fn spawn(settings: ConnectionSettings, media: Box<dyn MediaDriver>) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(WebSocketTransport::new(transport_tx));
        let socket = transport.clone();

        Self::launch(settings, transport, transport_rx, media, async move {
            socket.join().await;
        })
    }

    /// Start a publisher on a caller-provided transport that reports to
    /// `transport_events`
    pub fn with_transport(
        settings: ConnectionSettings,
        transport: Arc<dyn SignalingTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        media: Box<dyn MediaDriver>,
    ) -> Self {
        Self::launch(settings, transport, transport_events, media, async {})
    }

    fn launch(
        settings: ConnectionSettings,
        transport: Arc<dyn SignalingTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        media: Box<dyn MediaDriver>,
        on_exit: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let session = JanusSession::new(settings, transport, media, media_tx, events.clone());
        let state = session.state();
        let feeds = session.feeds();
        let last_error = session.last_error_handle();

        let task = tokio::spawn(async move {
            run(session, commands_rx, transport_events, media_rx).await;
            on_exit.await;
            debug!("Publisher task finished");
        });

        Self {
            commands,
            events,
            state,
            feeds,
            last_error,
            task: Some(task),
        }
    }

    /// Publish to the room in `config`. Progress and failure are reported as
    /// [`PublisherEvent`]s.
    pub fn publish(&self, config: PublishConfig) {
        self.command(Command::Publish(config));
    }

    pub fn unpublish(&self) {
        self.command(Command::Unpublish);
    }

    fn command(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            warn!("Publisher task is gone, dropping {:?}", e.0);
        }
    }

    /// Ingestion points for host frames
    pub fn feeds(&self) -> &Arc<MediaFeeds> {
        &self.feeds
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PublishState {
        self.state.phase()
    }

    pub fn session_ids(&self) -> SessionIds {
        self.state.ids()
    }

    /// Reason the last publish attempt failed
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Unpublish, close the connection and wait for background tasks
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Publisher task failed: {}", e);
            }
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

async fn run(
    mut session: JanusSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut media_events: mpsc::UnboundedReceiver<MediaEvent>,
) {
    let mut ticker = interval(TIMEOUT_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Publish(config)) => session.publish(config),
                Some(Command::Unpublish) => session.unpublish(),
                Some(Command::Shutdown) | None => break,
            },
            Some(event) = transport_events.recv() => session.handle_transport_event(event),
            Some(event) = media_events.recv() => session.handle_media_event(event),
            _ = ticker.tick() => session.check_timeouts(Instant::now()),
        }

        if let Some(events) = session.take_media_events() {
            media_events = events;
        }
    }

    session.shutdown().await;
}
