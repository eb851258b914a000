//! Janus VideoRoom publisher state machine
//!
//! Drives one publisher through the gateway handshake:
//!
//! ```text
//! connect -> create -> attach -> join -> offer -> configure -> answer
//! ```
//!
//! `JanusSession` is synchronous and owned by a single task; transport and
//! media events are fed to it in arrival order. Responses are matched by
//! their fixed transaction name, and each step only runs from the phase that
//! precedes it, so at most one request of each kind is outstanding.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::error::JanusError;
use super::event::PublisherEvent;
use super::keepalive::KeepaliveSupervisor;
use super::message::{JanusEvent, Request, Response, Transaction};
use super::state::{PublishState, SessionIds, SessionState};
use crate::config::{ConnectionSettings, PublishConfig};
use crate::media::{
    IceCandidate, MediaDriver, MediaEvent, MediaEventSink, MediaFeeds, SessionDescription,
};
use crate::network::{NetworkError, SignalingTransport, TransportEvent};

/// Step awaiting a reply, with its deadline
#[derive(Debug, Clone, Copy)]
struct Pending {
    step: &'static str,
    deadline: Instant,
}

/// Progress of the local offer for the current negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferState {
    Idle,
    /// Asked the driver, waiting for `OfferCreated`
    Requested,
    /// Offer sent in a configure, waiting for the answer
    Sent,
}

pub struct JanusSession {
    settings: ConnectionSettings,
    config: Option<PublishConfig>,
    state: Arc<SessionState>,
    transport: Arc<dyn SignalingTransport>,
    media: Box<dyn MediaDriver>,
    feeds: Arc<MediaFeeds>,
    keepalive: KeepaliveSupervisor,
    events: broadcast::Sender<PublisherEvent>,
    last_error: Arc<Mutex<Option<String>>>,
    pending: Option<Pending>,
    offer: OfferState,
    /// Receiver for the channel installed by the last teardown
    replaced_media_events: Option<mpsc::UnboundedReceiver<MediaEvent>>,
}

impl JanusSession {
    /// Media events must be routed back through [`Self::handle_media_event`].
    /// Every teardown moves the driver onto a new channel; pick it up with
    /// [`Self::take_media_events`].
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn SignalingTransport>,
        mut media: Box<dyn MediaDriver>,
        media_events: MediaEventSink,
        events: broadcast::Sender<PublisherEvent>,
    ) -> Self {
        media.set_observer(media_events);
        let keepalive = KeepaliveSupervisor::new(settings.keepalive_interval());

        Self {
            settings,
            config: None,
            state: Arc::new(SessionState::new()),
            transport,
            media,
            feeds: Arc::new(MediaFeeds::default()),
            keepalive,
            events,
            last_error: Arc::new(Mutex::new(None)),
            pending: None,
            offer: OfferState::Idle,
            replaced_media_events: None,
        }
    }

    /// Start or resume publishing
    ///
    /// Depending on how far the handshake got this connects, creates a
    /// session, joins the room or renegotiates media.
    pub fn publish(&mut self, config: PublishConfig) {
        if let Err(e) = config.validate() {
            self.fail(JanusError::from(e));
            return;
        }

        *self.last_error.lock() = None;
        self.config = Some(config);
        self.drive_publish();
    }

    fn drive_publish(&mut self) {
        let Some(config) = self.config.clone() else {
            return;
        };

        match self.state.phase() {
            PublishState::Disconnected => {
                self.state.set_phase(PublishState::Connecting);
                self.emit(PublisherEvent::Connecting {
                    url: config.url.clone(),
                });

                if self.transport.is_connected() {
                    // Previous session ended but the socket is still up
                    self.send_create();
                } else {
                    info!("Connecting to gateway {}", config.url);
                    self.set_pending("Connect");
                    if let Err(e) = self.transport.connect(&config.url) {
                        self.abort_publish(
                            JanusError::ConnectFailed {
                                url: config.url,
                                source: e,
                            },
                            false,
                        );
                    }
                }
            }
            PublishState::Connecting => debug!("Publish already in progress"),
            PublishState::SessionCreated => debug!("Waiting for plugin handle"),
            PublishState::HandleAttached => self.send_join(&config),
            PublishState::Joined | PublishState::Negotiating | PublishState::Published => {
                info!("Renegotiating media");
                self.start_negotiation();
            }
        }
    }

    /// Leave the room and close the gateway connection
    pub fn unpublish(&mut self) {
        let was_active = self.state.phase() != PublishState::Disconnected;
        let ids = self.state.ids();

        if ids.handle_id != 0 {
            if let Err(e) = self.send(Request::unpublish(ids.session_id, ids.handle_id)) {
                warn!("Failed to send unpublish: {}", e);
            }
        }

        self.teardown();
        self.config = None;
        self.transport.close();

        if was_active {
            info!("Unpublished");
            self.emit(PublisherEvent::Unpublished);
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Closed { reason } => self.on_connection_closed(reason),
            TransportEvent::Message(text) => self.on_message(&text),
        }
    }

    pub fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::IceCandidate(candidate) => self.on_ice_candidate(candidate),
            MediaEvent::IceGatheringComplete => self.on_ice_gathering_complete(),
            MediaEvent::OfferCreated(offer) => self.on_offer_created(offer),
            MediaEvent::OfferFailed(reason) => self.on_offer_failed(reason),
        }
    }

    fn on_connected(&mut self) {
        if self.state.phase() != PublishState::Connecting {
            debug!("Ignoring connect in phase {:?}", self.state.phase());
            return;
        }
        self.send_create();
    }

    fn on_connection_closed(&mut self, reason: String) {
        let phase = self.state.phase();
        self.teardown();

        if phase == PublishState::Disconnected {
            debug!("Gateway connection closed while idle: {}", reason);
            return;
        }
        self.fail(JanusError::ConnectionClosed(reason));
    }

    fn on_message(&mut self, text: &str) {
        trace!("<- {}", text);

        let response = match Response::parse(text) {
            Ok(response) => response,
            Err(e) => {
                debug!("Dropping malformed message: {}", e);
                return;
            }
        };

        if self.is_stale(&response) {
            debug!(
                "Dropping stale {} (transaction {:?})",
                response.janus, response.transaction
            );
            return;
        }

        match response.event() {
            JanusEvent::SessionCreated { session_id } => self.on_session_created(session_id),
            JanusEvent::HandleAttached { handle_id } => self.on_handle_attached(handle_id),
            JanusEvent::Joined => self.on_joined(),
            JanusEvent::Configured { answer } => self.on_configured(answer),
            JanusEvent::Hangup { reason } => self.on_hangup(reason),
            JanusEvent::SessionTimeout => self.abort_publish(JanusError::SessionExpired, false),
            JanusEvent::Ack => trace!("ack"),
            JanusEvent::Error {
                transaction,
                reason,
            } => self.on_error(transaction, reason),
            JanusEvent::Unhandled => debug!("Unhandled {} message", response.janus),
        }
    }

    /// Whether a message belongs to a session or handle that is gone
    fn is_stale(&self, response: &Response) -> bool {
        if self.state.phase() == PublishState::Disconnected {
            return true;
        }

        let ids = self.state.ids();
        if response.session_id.is_some_and(|id| id != ids.session_id) {
            return true;
        }
        response.sender.is_some_and(|id| id != ids.handle_id)
    }

    fn on_session_created(&mut self, session_id: u64) {
        if self.state.phase() != PublishState::Connecting {
            debug!("Unexpected session {}", session_id);
            return;
        }

        info!("Janus session {} created", session_id);
        self.state.set_session(session_id);
        self.state.set_phase(PublishState::SessionCreated);
        self.pending = None;
        self.emit(PublisherEvent::SessionCreated { session_id });

        self.send_step(Request::attach(session_id));
        if self.state.session_id() != 0 {
            self.keepalive
                .start(self.state.clone(), self.transport.clone());
        }
    }

    fn on_handle_attached(&mut self, handle_id: u64) {
        if self.state.phase() != PublishState::SessionCreated || !self.state.set_handle(handle_id) {
            debug!("Unexpected handle {}", handle_id);
            return;
        }

        info!("Attached to VideoRoom, handle {}", handle_id);
        self.state.set_phase(PublishState::HandleAttached);
        self.pending = None;
        self.emit(PublisherEvent::HandleAttached { handle_id });

        self.drive_publish();
    }

    fn on_joined(&mut self) {
        if self.state.phase() != PublishState::HandleAttached || !self.state.set_joined() {
            debug!("Unexpected join event");
            return;
        }

        let room = self.config.as_ref().map_or(0, |config| config.room);
        info!("Joined room {}", room);
        self.state.set_phase(PublishState::Joined);
        self.pending = None;
        self.emit(PublisherEvent::Joined { room });

        self.start_negotiation();
    }

    /// Create a media sender and ask the driver for an offer
    fn start_negotiation(&mut self) {
        if self.offer != OfferState::Idle {
            debug!("Offer already outstanding");
            return;
        }

        if let Some(config) = &self.config {
            self.feeds.video.set_frame_size(config.width, config.height);
        }
        if let Err(e) = self
            .media
            .create_media_sender(&self.feeds, self.settings.use_encoded_media)
        {
            warn!("Failed to create media sender: {}", e);
            return;
        }

        self.offer = OfferState::Requested;
        self.state.set_phase(PublishState::Negotiating);
        self.media.create_offer();
    }

    fn on_offer_created(&mut self, offer: SessionDescription) {
        if self.offer != OfferState::Requested || self.state.phase() != PublishState::Negotiating {
            debug!("Dropping offer that was not asked for");
            return;
        }

        if let Err(e) = self.media.set_local_description(&offer) {
            warn!("Failed to apply local offer: {}", e);
            self.abandon_negotiation();
            return;
        }

        let ids = self.state.ids();
        debug!("Sending offer ({} bytes)", offer.sdp.len());
        self.offer = OfferState::Sent;
        self.send_step(Request::configure(ids.session_id, ids.handle_id, offer));
    }

    fn on_offer_failed(&mut self, reason: String) {
        warn!("Offer creation failed: {}", reason);
        if self.offer == OfferState::Requested {
            self.abandon_negotiation();
        }
    }

    fn abandon_negotiation(&mut self) {
        self.offer = OfferState::Idle;
        self.pending = None;
        if self.state.phase() == PublishState::Negotiating {
            self.state.set_phase(PublishState::Joined);
        }
    }

    fn on_configured(&mut self, answer: Option<SessionDescription>) {
        if self.state.phase() != PublishState::Negotiating {
            debug!("Unexpected configure event");
            return;
        }
        let Some(answer) = answer else {
            debug!("Configure event without answer");
            return;
        };

        self.pending = None;
        self.offer = OfferState::Idle;

        if let Err(e) = self.media.set_remote_description(&answer) {
            warn!("Failed to apply remote answer: {}", e);
            self.state.set_phase(PublishState::Joined);
            return;
        }
        if let Err(e) = self.media.set_bitrate(self.settings.video_bitrate) {
            warn!("Failed to set video bitrate: {}", e);
        }

        info!("Publishing");
        self.state.set_phase(PublishState::Published);
        self.emit(PublisherEvent::Published);
    }

    /// The gateway dropped the PeerConnection; nothing is sent back
    fn on_hangup(&mut self, reason: String) {
        info!("Gateway hung up: {}", reason);
        self.teardown();
        self.emit(PublisherEvent::Hangup { reason });
    }

    fn on_error(&mut self, transaction: Transaction, reason: String) {
        match transaction {
            Transaction::Create
            | Transaction::Attach
            | Transaction::JoinRoom
            | Transaction::Configure => {
                self.abort_publish(JanusError::Gateway { transaction, reason }, false)
            }
            _ => warn!("{} request failed: {}", transaction, reason),
        }
    }

    fn on_ice_candidate(&mut self, candidate: IceCandidate) {
        let ids = self.state.ids();
        if ids.handle_id == 0 {
            debug!("Dropping ICE candidate, no handle");
            return;
        }
        if let Err(e) = self.send(Request::trickle(ids.session_id, ids.handle_id, candidate)) {
            warn!("Failed to trickle candidate: {}", e);
        }
    }

    fn on_ice_gathering_complete(&mut self) {
        let ids = self.state.ids();
        if ids.handle_id == 0 {
            return;
        }
        if let Err(e) = self.send(Request::trickle_completed(ids.session_id, ids.handle_id)) {
            warn!("Failed to send end of candidates: {}", e);
        }
    }

    /// Fail the attempt if a handshake step went unanswered
    pub fn check_timeouts(&mut self, now: Instant) {
        if let Some(pending) = self.pending {
            if now >= pending.deadline {
                self.abort_publish(JanusError::Timeout(pending.step), true);
            }
        }
    }

    /// Unpublish and wait for background tasks
    pub async fn shutdown(&mut self) {
        self.unpublish();
        self.keepalive.join().await;
    }

    fn send_create(&mut self) {
        self.send_step(Request::create());
    }

    fn send_join(&mut self, config: &PublishConfig) {
        let ids = self.state.ids();
        info!("Joining room {} as {}", config.room, config.display);
        self.send_step(Request::join(ids.session_id, ids.handle_id, config));
    }

    /// Send a handshake request and arm its timeout
    fn send_step(&mut self, request: Request) {
        let transaction = request.transaction();
        match self.send(request) {
            Ok(()) => self.set_pending(transaction.as_str()),
            Err(e) => self.abort_publish(
                JanusError::SendFailed {
                    transaction,
                    source: e,
                },
                true,
            ),
        }
    }

    fn send(&self, request: Request) -> Result<(), NetworkError> {
        let json = request
            .to_json()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        trace!("-> {}", json);
        self.transport.send(json)
    }

    fn set_pending(&mut self, step: &'static str) {
        self.pending = Some(Pending {
            step,
            deadline: Instant::now() + self.settings.request_timeout(),
        });
    }

    /// Clear local state. The media driver goes down before anything else
    /// touches the transport.
    fn teardown(&mut self) {
        self.keepalive.stop();
        let previous = self.state.reset();
        if previous.session_id != 0 {
            debug!(
                "Cleared session {} (handle {})",
                previous.session_id, previous.handle_id
            );
        }
        self.pending = None;
        self.offer = OfferState::Idle;
        self.media.close();
        self.feeds.clear();

        // Anything the driver queued so far belongs to the closed negotiation
        let (sink, events) = mpsc::unbounded_channel();
        self.media.set_observer(sink);
        self.replaced_media_events = Some(events);
    }

    fn abort_publish(&mut self, error: JanusError, close_transport: bool) {
        self.teardown();
        if close_transport {
            self.transport.close();
        }
        self.fail(error);
    }

    fn fail(&self, error: JanusError) {
        let reason = error.to_string();
        error!("Publish failed: {}", reason);
        *self.last_error.lock() = Some(reason.clone());
        self.emit(PublisherEvent::PublishFailed { reason });
    }

    fn emit(&self, event: PublisherEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn phase(&self) -> PublishState {
        self.state.phase()
    }

    pub fn ids(&self) -> SessionIds {
        self.state.ids()
    }

    pub fn joined_room(&self) -> bool {
        self.state.joined_room()
    }

    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    pub fn feeds(&self) -> Arc<MediaFeeds> {
        self.feeds.clone()
    }

    pub fn last_error_handle(&self) -> Arc<Mutex<Option<String>>> {
        self.last_error.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn config(&self) -> Option<&PublishConfig> {
        self.config.as_ref()
    }

    pub fn is_keepalive_active(&self) -> bool {
        self.keepalive.is_active()
    }

    /// The media event receiver to switch to, if a teardown replaced the
    /// previous one
    pub fn take_media_events(&mut self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        self.replaced_media_events.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::janus::test_support::{FakeMedia, RecordingTransport};
    use std::time::Duration;

    const CREATE_SUCCESS: &str = r#"{"janus":"success","transaction":"Create","data":{"id":42}}"#;
    const ATTACH_SUCCESS: &str =
        r#"{"janus":"success","session_id":42,"transaction":"Attach","data":{"id":7}}"#;
    const JOINED: &str = r#"{"janus":"event","session_id":42,"sender":7,"transaction":"JoinRoom",
        "plugindata":{"plugin":"janus.plugin.videoroom","data":{"videoroom":"joined","room":1234,"id":1}}}"#;
    const CONFIGURED: &str = r#"{"janus":"event","session_id":42,"sender":7,"transaction":"Configure",
        "plugindata":{"plugin":"janus.plugin.videoroom","data":{"configured":"ok"}},
        "jsep":{"type":"answer","sdp":"v=0 answer"}}"#;

    struct Harness {
        session: JanusSession,
        transport: Arc<RecordingTransport>,
        calls: Arc<Mutex<Vec<String>>>,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        events: broadcast::Receiver<PublisherEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_media(FakeMedia::new())
        }

        fn with_media((media, calls): (FakeMedia, Arc<Mutex<Vec<String>>>)) -> Self {
            let transport = Arc::new(RecordingTransport::new());
            let (media_tx, media_rx) = mpsc::unbounded_channel();
            let (events_tx, events) = broadcast::channel(64);
            let session = JanusSession::new(
                ConnectionSettings::default(),
                transport.clone(),
                Box::new(media),
                media_tx,
                events_tx,
            );
            Self {
                session,
                transport,
                calls,
                media_rx,
                events,
            }
        }

        fn connect(&mut self) {
            self.session.publish(config());
            self.transport.set_connected(true);
            self.session.handle_transport_event(TransportEvent::Connected);
        }

        fn message(&mut self, text: &str) {
            self.session
                .handle_transport_event(TransportEvent::Message(text.to_string()));
        }

        /// Feed queued media events back in, as the publisher task does
        fn pump_media(&mut self) {
            loop {
                if let Some(events) = self.session.take_media_events() {
                    self.media_rx = events;
                }
                let Ok(event) = self.media_rx.try_recv() else {
                    break;
                };
                self.session.handle_media_event(event);
            }
        }

        fn publish_fully(&mut self) {
            self.connect();
            self.message(CREATE_SUCCESS);
            self.message(ATTACH_SUCCESS);
            self.message(JOINED);
            self.pump_media();
            self.message(CONFIGURED);
        }

        fn events(&mut self) -> Vec<PublisherEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    fn config() -> PublishConfig {
        PublishConfig::new("ws://127.0.0.1:8188", 1234, "obs").with_id(1)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let h = Harness::new();
        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert_eq!(h.session.ids(), SessionIds::default());
        assert!(!h.session.joined_room());
        assert!(h.session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_publish_connects_then_creates() {
        let mut h = Harness::new();
        h.session.publish(config());

        assert_eq!(h.session.phase(), PublishState::Connecting);
        assert_eq!(h.transport.connect_urls(), vec!["ws://127.0.0.1:8188"]);
        assert!(h.transport.sent().is_empty());

        // Second publish while connecting does nothing
        h.session.publish(config());
        assert_eq!(h.transport.connect_urls().len(), 1);

        h.transport.set_connected(true);
        h.session.handle_transport_event(TransportEvent::Connected);
        assert_eq!(h.transport.transactions(), vec!["Create"]);
    }

    #[tokio::test]
    async fn test_create_success_attaches_and_starts_keepalive() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);

        assert_eq!(h.session.ids().session_id, 42);
        assert_eq!(h.session.phase(), PublishState::SessionCreated);
        assert!(h.session.is_keepalive_active());

        let sent = h.transport.sent_values();
        assert_eq!(sent[1]["janus"], "attach");
        assert_eq!(sent[1]["session_id"], 42);
        assert_eq!(sent[1]["plugin"], "janus.plugin.videoroom");
    }

    #[tokio::test]
    async fn test_attach_success_sends_join() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);

        assert_eq!(h.session.ids().handle_id, 7);
        let join = &h.transport.sent_values()[2];
        assert_eq!(join["transaction"], "JoinRoom");
        assert_eq!(join["handle_id"], 7);
        assert_eq!(join["body"]["ptype"], "publisher");
        assert_eq!(join["body"]["room"], 1234);
        assert_eq!(join["body"]["display"], "obs");
        assert_eq!(join["body"]["id"], 1);
    }

    #[tokio::test]
    async fn test_joined_creates_sender_and_offer() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);

        assert!(h.session.joined_room());
        assert_eq!(h.session.phase(), PublishState::Negotiating);
        assert_eq!(
            h.calls(),
            vec!["create_media_sender(encoded=false)", "create_offer"]
        );

        h.pump_media();
        let configure = h.transport.sent_values()[3].clone();
        assert_eq!(configure["transaction"], "Configure");
        assert_eq!(configure["jsep"]["type"], "offer");
        assert_eq!(configure["jsep"]["sdp"], "v=0 offer");
        assert_eq!(configure["body"]["audio"], true);
    }

    #[tokio::test]
    async fn test_full_flow_order_and_events() {
        let mut h = Harness::new();
        h.publish_fully();

        assert_eq!(
            h.transport.transactions(),
            vec!["Create", "Attach", "JoinRoom", "Configure"]
        );
        assert_eq!(h.session.phase(), PublishState::Published);
        assert_eq!(
            h.calls(),
            vec![
                "create_media_sender(encoded=false)",
                "create_offer",
                "set_local_description(offer)",
                "set_remote_description(v=0 answer)",
                "set_bitrate(2000000-4000000)",
            ]
        );
        assert_eq!(
            h.events(),
            vec![
                PublisherEvent::Connecting {
                    url: "ws://127.0.0.1:8188".to_string()
                },
                PublisherEvent::SessionCreated { session_id: 42 },
                PublisherEvent::HandleAttached { handle_id: 7 },
                PublisherEvent::Joined { room: 1234 },
                PublisherEvent::Published,
            ]
        );
    }

    #[tokio::test]
    async fn test_ice_candidates_are_trickled() {
        let mut h = Harness::new();
        h.publish_fully();
        h.transport.clear();

        h.session
            .handle_media_event(MediaEvent::IceCandidate(IceCandidate {
                candidate: "candidate:1 1 udp 1 10.0.0.2 5000 typ host".to_string(),
                sdp_mid: "0".to_string(),
                sdp_mline_index: 0,
            }));
        h.session.handle_media_event(MediaEvent::IceGatheringComplete);

        let sent = h.transport.sent_values();
        assert_eq!(sent[0]["janus"], "trickle");
        assert_eq!(sent[0]["candidate"]["sdpMid"], "0");
        assert_eq!(sent[0]["handle_id"], 7);
        assert_eq!(sent[1]["candidate"]["completed"], true);
    }

    #[tokio::test]
    async fn test_candidate_without_handle_dropped() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.transport.clear();

        h.session
            .handle_media_event(MediaEvent::IceCandidate(IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: "0".to_string(),
                sdp_mline_index: 0,
            }));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_twice_sends_once() {
        let mut h = Harness::new();
        h.publish_fully();
        h.transport.clear();

        h.session.unpublish();
        h.session.unpublish();

        assert_eq!(h.transport.transactions(), vec!["Unpublish"]);
        assert_eq!(h.transport.sent_values()[0]["handle_id"], 7);
        assert_eq!(h.session.ids(), SessionIds::default());
        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert!(!h.session.is_keepalive_active());
        assert!(h.calls().contains(&"close".to_string()));
        assert!(h.transport.close_count() >= 1);

        let unpublished = h
            .events()
            .into_iter()
            .filter(|e| *e == PublisherEvent::Unpublished)
            .count();
        assert_eq!(unpublished, 1);
    }

    #[tokio::test]
    async fn test_unpublish_without_handle_sends_nothing() {
        let mut h = Harness::new();
        h.session.unpublish();
        assert!(h.transport.sent().is_empty());

        h.connect();
        h.message(CREATE_SUCCESS);
        h.transport.clear();
        h.session.unpublish();
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.session.ids().session_id, 0);
    }

    #[tokio::test]
    async fn test_hangup_tears_down_without_sending() {
        let mut h = Harness::new();
        h.publish_fully();
        h.transport.clear();
        h.events();

        h.message(r#"{"janus":"hangup","session_id":42,"sender":7,"reason":"ICE failed"}"#);

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.session.ids(), SessionIds::default());
        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert!(!h.session.joined_room());
        assert!(h.calls().contains(&"close".to_string()));
        assert_eq!(
            h.events(),
            vec![PublisherEvent::Hangup {
                reason: "ICE failed".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_after_hangup_reuses_connection() {
        let mut h = Harness::new();
        h.publish_fully();
        h.message(r#"{"janus":"hangup","session_id":42,"sender":7,"reason":"x"}"#);
        h.transport.clear();

        h.session.publish(config());
        assert_eq!(h.transport.connect_urls().len(), 1);
        assert_eq!(h.transport.transactions(), vec!["Create"]);
    }

    #[tokio::test]
    async fn test_malformed_input_ignored() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        let before = h.session.ids();
        let sent = h.transport.sent().len();

        h.message("{not json");
        h.message(r#"{"janus":"success","transaction":"Bogus","data":{"id":9}}"#);
        h.message(r#"{"janus":"webrtcup","session_id":42}"#);

        assert_eq!(h.session.ids(), before);
        assert_eq!(h.session.phase(), PublishState::SessionCreated);
        assert_eq!(h.transport.sent().len(), sent);
    }

    #[tokio::test]
    async fn test_stale_session_messages_dropped() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);

        h.message(r#"{"janus":"success","session_id":99,"transaction":"Attach","data":{"id":7}}"#);
        assert_eq!(h.session.ids().handle_id, 0);

        h.session.unpublish();
        h.message(ATTACH_SUCCESS);
        assert_eq!(h.session.ids().handle_id, 0);
    }

    #[tokio::test]
    async fn test_join_error_fails_publish() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.events();

        h.message(
            r#"{"janus":"event","session_id":42,"sender":7,"transaction":"JoinRoom",
                "plugindata":{"plugin":"janus.plugin.videoroom","data":{"error_code":433,"error":"Unauthorized"}}}"#,
        );

        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert_eq!(h.session.ids(), SessionIds::default());
        let error = h.session.last_error().unwrap();
        assert!(error.contains("JoinRoom"), "{}", error);
        assert!(error.contains("433"), "{}", error);
        assert!(matches!(
            h.events().as_slice(),
            [PublisherEvent::PublishFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_gateway_timeout_expires_session() {
        let mut h = Harness::new();
        h.publish_fully();

        h.message(r#"{"janus":"timeout","session_id":42}"#);
        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert_eq!(h.session.last_error().as_deref(), Some("session timed out"));
    }

    #[tokio::test]
    async fn test_connection_loss_fails_publish() {
        let mut h = Harness::new();
        h.publish_fully();

        h.transport.set_connected(false);
        h.session.handle_transport_event(TransportEvent::Closed {
            reason: "connection reset".to_string(),
        });

        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert!(!h.session.is_keepalive_active());
        assert!(h
            .session
            .last_error()
            .unwrap()
            .contains("connection reset"));
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let mut h = Harness::new();
        h.session.publish(config());
        h.session.handle_transport_event(TransportEvent::Closed {
            reason: "connect failed: refused".to_string(),
        });

        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert!(matches!(
            h.events().last(),
            Some(PublisherEvent::PublishFailed { reason }) if reason.contains("refused")
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut h = Harness::new();
        h.session
            .publish(PublishConfig::new("http://127.0.0.1", 1, "obs"));

        assert!(h.transport.connect_urls().is_empty());
        assert!(h.session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);

        h.session.check_timeouts(Instant::now());
        assert_eq!(h.session.phase(), PublishState::SessionCreated);

        h.session
            .check_timeouts(Instant::now() + Duration::from_secs(11));
        assert_eq!(h.session.phase(), PublishState::Disconnected);
        assert_eq!(
            h.session.last_error().as_deref(),
            Some("Attach request timed out")
        );
        assert!(h.transport.close_count() >= 1);
    }

    #[tokio::test]
    async fn test_published_has_no_pending_timeout() {
        let mut h = Harness::new();
        h.publish_fully();

        h.session
            .check_timeouts(Instant::now() + Duration::from_secs(3600));
        assert_eq!(h.session.phase(), PublishState::Published);
    }

    #[tokio::test]
    async fn test_publish_when_joined_renegotiates() {
        let mut h = Harness::new();
        h.publish_fully();
        h.calls.lock().clear();
        h.transport.clear();

        h.session.publish(config());
        // Outstanding offer blocks a second one
        h.session.publish(config());
        assert_eq!(
            h.calls(),
            vec!["create_media_sender(encoded=false)", "create_offer"]
        );

        h.pump_media();
        assert_eq!(h.transport.transactions(), vec!["Configure"]);
        h.message(CONFIGURED);
        assert_eq!(h.session.phase(), PublishState::Published);
    }

    #[tokio::test]
    async fn test_rejected_answer_leaves_joined() {
        let mut h = Harness::with_media({
            let (media, calls) = FakeMedia::new();
            (media.failing_remote_description(), calls)
        });
        h.publish_fully();

        assert_eq!(h.session.phase(), PublishState::Joined);
        assert!(!h.calls().iter().any(|c| c.starts_with("set_bitrate")));
    }

    #[tokio::test]
    async fn test_offer_failure_abandons_configure() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);
        // Drop the fake's offer and report failure instead
        while h.media_rx.try_recv().is_ok() {}
        h.transport.clear();

        h.session
            .handle_media_event(MediaEvent::OfferFailed("no codec".to_string()));
        assert_eq!(h.session.phase(), PublishState::Joined);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_late_offer_after_teardown_dropped() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);
        h.session.unpublish();
        h.transport.set_connected(true);
        h.transport.clear();

        h.pump_media();
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_sender_sized_from_config() {
        let mut h = Harness::new();
        h.session.publish(config().with_video_size(1280, 720));
        h.transport.set_connected(true);
        h.session.handle_transport_event(TransportEvent::Connected);
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);

        let feeds = h.session.feeds();
        assert_eq!(feeds.video.frame_size(), Some((1280, 720)));
        assert_eq!(h.calls()[0], "create_media_sender(encoded=false)");
    }

    #[tokio::test]
    async fn test_offer_from_previous_session_not_sent() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);
        // The first offer is still queued when the gateway hangs up
        h.message(r#"{"janus":"hangup","session_id":42,"sender":7,"reason":"x"}"#);

        h.session.publish(config());
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);
        h.transport.clear();

        h.pump_media();
        assert_eq!(h.transport.transactions(), vec!["Configure"]);
        assert_eq!(h.session.phase(), PublishState::Negotiating);
    }

    #[tokio::test]
    async fn test_duplicate_offer_sends_one_configure() {
        let mut h = Harness::new();
        h.connect();
        h.message(CREATE_SUCCESS);
        h.message(ATTACH_SUCCESS);
        h.message(JOINED);
        h.pump_media();
        h.transport.clear();

        h.session
            .handle_media_event(MediaEvent::OfferCreated(SessionDescription::offer("v=0 again")));
        assert!(h.transport.sent().is_empty());

        h.message(CONFIGURED);
        assert_eq!(h.session.phase(), PublishState::Published);
    }

    #[tokio::test]
    async fn test_encoded_media_setting() {
        let (media, calls) = FakeMedia::new();
        let transport = Arc::new(RecordingTransport::connected());
        let (media_tx, _media_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(8);
        let settings = ConnectionSettings {
            use_encoded_media: true,
            ..Default::default()
        };
        let mut session =
            JanusSession::new(settings, transport.clone(), Box::new(media), media_tx, events_tx);

        session.publish(config());
        session.handle_transport_event(TransportEvent::Message(CREATE_SUCCESS.to_string()));
        session.handle_transport_event(TransportEvent::Message(ATTACH_SUCCESS.to_string()));
        session.handle_transport_event(TransportEvent::Message(JOINED.to_string()));

        assert_eq!(calls.lock()[0], "create_media_sender(encoded=true)");
    }

    #[tokio::test]
    async fn test_shutdown_unpublishes() {
        let mut h = Harness::new();
        h.publish_fully();
        h.transport.clear();

        h.session.shutdown().await;
        assert_eq!(h.transport.transactions(), vec!["Unpublish"]);
        assert!(!h.session.is_keepalive_active());
    }
}
