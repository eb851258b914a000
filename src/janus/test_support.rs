//! Fakes for unit tests of the signaling core

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::media::{
    BitrateRange, MediaDriver, MediaError, MediaEvent, MediaEventSink, MediaFeeds, SessionDescription,
};
use crate::network::{NetworkError, SignalingTransport};

/// Transport that records what is sent instead of talking to a gateway
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    connects: Mutex<Vec<String>>,
    closes: AtomicUsize,
    connected: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let transport = Self::default();
        transport.set_connected(true);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_values(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// `transaction` of every sent message, in order
    pub fn transactions(&self) -> Vec<String> {
        self.sent_values()
            .iter()
            .map(|value| value["transaction"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.connects.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SignalingTransport for RecordingTransport {
    fn connect(&self, url: &str) -> Result<(), NetworkError> {
        self.connects.lock().push(url.to_string());
        Ok(())
    }

    fn send(&self, text: String) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.set_connected(false);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Media driver that logs calls into a shared list
#[derive(Default)]
pub struct FakeMedia {
    calls: Arc<Mutex<Vec<String>>>,
    observer: Option<MediaEventSink>,
    fail_remote: bool,
}

impl FakeMedia {
    /// The driver and a handle on its call log
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let media = Self::default();
        let calls = media.calls.clone();
        (media, calls)
    }

    pub fn failing_remote_description(mut self) -> Self {
        self.fail_remote = true;
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl MediaDriver for FakeMedia {
    fn set_observer(&mut self, sink: MediaEventSink) {
        self.observer = Some(sink);
    }

    fn create_media_sender(&mut self, _feeds: &MediaFeeds, encoded: bool) -> Result<(), MediaError> {
        self.record(format!("create_media_sender(encoded={})", encoded));
        Ok(())
    }

    fn create_offer(&mut self) {
        self.record("create_offer");
        if let Some(sink) = &self.observer {
            let _ = sink.send(MediaEvent::OfferCreated(SessionDescription::offer("v=0 offer")));
        }
    }

    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError> {
        self.record(format!("set_local_description({})", desc.sdp_type));
        Ok(())
    }

    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError> {
        self.record(format!("set_remote_description({})", desc.sdp));
        if self.fail_remote {
            return Err(MediaError::NegotiationFailed("rejected answer".to_string()));
        }
        Ok(())
    }

    fn set_bitrate(&mut self, range: BitrateRange) -> Result<(), MediaError> {
        self.record(format!("set_bitrate({}-{})", range.min_bps, range.max_bps));
        Ok(())
    }

    fn close(&mut self) {
        self.record("close");
    }
}
