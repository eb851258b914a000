//! Media session driver interface
//!
//! The WebRTC engine is an external collaborator. The signaling driver only
//! needs offer/answer handling, ICE candidate reporting, a media sender fed by
//! [`MediaFeeds`] and a bitrate hint.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::MediaError;
use super::feed::MediaFeeds;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// An SDP offer or answer (the Janus `jsep` object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A local ICE candidate to trickle to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
}

/// Notifications from a media driver to the signaling driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    IceCandidate(IceCandidate),
    IceGatheringComplete,
    OfferCreated(SessionDescription),
    OfferFailed(String),
}

/// Where a driver reports its [`MediaEvent`]s
pub type MediaEventSink = mpsc::UnboundedSender<MediaEvent>;

/// Target bitrate window for the video sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateRange {
    pub min_bps: u32,
    pub max_bps: u32,
}

impl Default for BitrateRange {
    fn default() -> Self {
        Self {
            min_bps: 2_000_000,
            max_bps: 4_000_000,
        }
    }
}

/// A STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Log verbosity of the underlying WebRTC engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtcLogLevel {
    #[default]
    None,
    Error,
    Warning,
    Info,
    Verbose,
}

/// Engine-wide settings owned by the host and handed to a driver's
/// constructor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaEngineConfig {
    pub ice_servers: Vec<IceServer>,
    pub log_level: RtcLogLevel,
    pub hardware_acceleration: bool,
    /// Upper bound for local video bandwidth in kbps
    pub max_video_bandwidth_kbps: u32,
}

impl Default for MediaEngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            log_level: RtcLogLevel::None,
            hardware_acceleration: true,
            max_video_bandwidth_kbps: 8000,
        }
    }
}

/// Capability surface of the WebRTC engine used by the signaling driver
///
/// Every method is called from the signaling task and must return quickly.
/// Results of `create_offer` and discovered candidates are reported through
/// the sink passed to `set_observer`.
pub trait MediaDriver: Send {
    /// Register where events are reported
    fn set_observer(&mut self, sink: MediaEventSink);

    /// Create (or replace) the audio/video sender.
    ///
    /// The driver registers its ingestion points on `feeds`: the packet
    /// receiver when `encoded` is set, the raw frame receiver otherwise, and
    /// the audio receiver in both cases. Raw video is sized to
    /// `feeds.video.frame_size()` when one is set.
    fn create_media_sender(&mut self, feeds: &MediaFeeds, encoded: bool)
        -> Result<(), MediaError>;

    /// Start creating an offer; completes with `OfferCreated` or `OfferFailed`
    fn create_offer(&mut self);

    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError>;

    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError>;

    /// Apply a bitrate window to the video sender
    fn set_bitrate(&mut self, range: BitrateRange) -> Result<(), MediaError>;

    /// Tear down the peer connection. Must be safe to call repeatedly.
    fn close(&mut self);
}
