//! WebSocket transport to the Janus gateway
//!
//! One background task per connection owns the socket. Outgoing messages are
//! queued through an unbounded channel, so `send` never blocks the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::error::NetworkError;
use super::transport::{SignalingTransport, TransportEvent, TransportEventSender};

/// Subprotocol the Janus WebSocket transport expects
pub const JANUS_SUBPROTOCOL: &str = "janus-protocol";

/// WebSocket client speaking the Janus subprotocol
pub struct WebSocketTransport {
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
    /// Bumped on every connect/close so a retired connection task stays silent
    generation: Arc<AtomicU64>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Closed connections still flushing their queue
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create a transport that reports to `events`
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            events,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            outgoing: Mutex::new(None),
            task: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every connection task to finish
    pub async fn join(&self) {
        let tasks: Vec<_> = {
            let mut retired = self.retired.lock();
            retired.extend(self.task.lock().take());
            retired.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("WebSocket task failed: {}", e);
                }
            }
        }
    }
}

impl SignalingTransport for WebSocketTransport {
    fn connect(&self, url: &str) -> Result<(), NetworkError> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(NetworkError::InvalidUrl(url.to_string()));
        }

        // The receiver is dropped once the connection task ends
        let mut outgoing = self.outgoing.lock();
        if outgoing.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(NetworkError::AlreadyConnected);
        }

        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(JANUS_SUBPROTOCOL),
        );

        // A previous connection keeps draining what was queued before its
        // close, but must not report events for this one
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = self.task.lock().take() {
            let mut retired = self.retired.lock();
            retired.retain(|task| !task.is_finished());
            retired.push(old);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *outgoing = Some(tx);

        let handle = tokio::spawn(run_connection(
            request,
            rx,
            self.events.clone(),
            self.connected.clone(),
            self.generation.clone(),
            generation,
        ));
        *self.task.lock() = Some(handle);

        debug!("Connecting to {}", url);
        Ok(())
    }

    fn send(&self, text: String) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }

        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(NetworkError::NotConnected)?;
        tx.send(Message::Text(text))
            .map_err(|_| NetworkError::SendFailed("connection task stopped".to_string()))
    }

    fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        // Dropping the sender lets the task drain what is queued, then close
        if self.outgoing.lock().take().is_some() {
            debug!("Closing gateway connection");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
) {
    let is_current = || generation.load(Ordering::SeqCst) == my_generation;
    let url = request.uri().to_string();

    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", url, e);
            if is_current() {
                let _ = events.send(TransportEvent::Closed {
                    reason: format!("connect failed: {}", e),
                });
            }
            return;
        }
    };

    if !is_current() {
        debug!("Connection to {} superseded before it opened", url);
        return;
    }

    connected.store(true, Ordering::SeqCst);
    // close() bumps the generation before clearing the flag, so a close that
    // raced the store above is visible here
    if !is_current() {
        connected.store(false, Ordering::SeqCst);
        debug!("Connection to {} closed while opening", url);
        return;
    }
    info!("Connected to gateway {}", url);
    let _ = events.send(TransportEvent::Connected);

    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            msg = outgoing.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        break format!("send failed: {}", e);
                    }
                }
                None => {
                    let _ = write.close().await;
                    break "closed by client".to_string();
                }
            },

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if is_current() {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("close code: {}, close reason: {}", frame.code, frame.reason),
                        None => "closed by gateway".to_string(),
                    };
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("receive failed: {}", e),
                None => break "connection closed".to_string(),
            },
        }
    };

    debug!("Gateway connection ended: {}", reason);
    if is_current() {
        connected.store(false, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Closed { reason });
    }
}
