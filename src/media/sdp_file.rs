//! Media driver that replays a pre-generated SDP offer
//!
//! Lets the signaling path be exercised against a real gateway without a
//! WebRTC engine. Candidates are expected inside the offer itself, so the
//! driver reports gathering as complete right after the offer.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::driver::{
    BitrateRange, MediaDriver, MediaEngineConfig, MediaEvent, MediaEventSink, SdpType,
    SessionDescription,
};
use super::error::MediaError;
use super::feed::MediaFeeds;

pub struct SdpFileDriver {
    offer_sdp: String,
    config: MediaEngineConfig,
    answer_path: Option<PathBuf>,
    observer: Option<MediaEventSink>,
    sender_created: bool,
    remote: Option<SessionDescription>,
}

impl SdpFileDriver {
    /// Load the offer from `path`
    pub fn from_file(path: impl AsRef<Path>, config: MediaEngineConfig) -> Result<Self, MediaError> {
        let offer_sdp = fs::read_to_string(path.as_ref())?;
        Self::new(offer_sdp, config)
    }

    pub fn new(offer_sdp: String, config: MediaEngineConfig) -> Result<Self, MediaError> {
        if !offer_sdp.trim_start().starts_with("v=0") {
            return Err(MediaError::InvalidDescription(
                "offer does not start with v=0".to_string(),
            ));
        }

        debug!(
            "SDP replay driver: {} ICE servers, log level {:?}",
            config.ice_servers.len(),
            config.log_level
        );

        Ok(Self {
            offer_sdp,
            config,
            answer_path: None,
            observer: None,
            sender_created: false,
            remote: None,
        })
    }

    /// Write the gateway's answer to `path` once it arrives
    pub fn with_answer_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.answer_path = Some(path.into());
        self
    }

    /// The answer applied by the last successful negotiation
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote.as_ref()
    }

    fn emit(&self, event: MediaEvent) {
        match &self.observer {
            Some(sink) => {
                if sink.send(event).is_err() {
                    warn!("Media event dropped, signaling driver is gone");
                }
            }
            None => warn!("Media event dropped, no observer registered"),
        }
    }
}

impl MediaDriver for SdpFileDriver {
    fn set_observer(&mut self, sink: MediaEventSink) {
        self.observer = Some(sink);
    }

    fn create_media_sender(&mut self, feeds: &MediaFeeds, encoded: bool) -> Result<(), MediaError> {
        // Nothing is transmitted, so no receivers are registered
        let kind = if encoded { "encoded" } else { "raw" };
        match feeds.video.frame_size() {
            Some((width, height)) => info!("Media sender ready ({} video, {}x{})", kind, width, height),
            None => info!("Media sender ready ({} video)", kind),
        }
        self.sender_created = true;
        Ok(())
    }

    fn create_offer(&mut self) {
        if !self.sender_created {
            self.emit(MediaEvent::OfferFailed(MediaError::NoSender.to_string()));
            return;
        }
        self.emit(MediaEvent::OfferCreated(SessionDescription::offer(
            self.offer_sdp.clone(),
        )));
        self.emit(MediaEvent::IceGatheringComplete);
    }

    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError> {
        if desc.sdp_type != SdpType::Offer {
            return Err(MediaError::InvalidDescription(format!(
                "expected a local offer, got {}",
                desc.sdp_type
            )));
        }
        Ok(())
    }

    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<(), MediaError> {
        if desc.sdp_type != SdpType::Answer {
            return Err(MediaError::InvalidDescription(format!(
                "expected a remote answer, got {}",
                desc.sdp_type
            )));
        }

        if let Some(path) = &self.answer_path {
            fs::write(path, &desc.sdp)?;
            info!("Answer written to {}", path.display());
        }
        self.remote = Some(desc.clone());
        Ok(())
    }

    fn set_bitrate(&mut self, range: BitrateRange) -> Result<(), MediaError> {
        if range.min_bps > range.max_bps {
            return Err(MediaError::Bitrate(format!(
                "min {} exceeds max {}",
                range.min_bps, range.max_bps
            )));
        }
        let cap = self.config.max_video_bandwidth_kbps as u64 * 1000;
        if range.max_bps as u64 > cap {
            warn!(
                "Requested max bitrate {} exceeds engine bandwidth cap {}",
                range.max_bps, cap
            );
        }
        Ok(())
    }

    fn close(&mut self) {
        self.sender_created = false;
        self.remote = None;
    }
}
