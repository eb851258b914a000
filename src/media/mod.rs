//! Media module
//!
//! Interface to the external WebRTC engine and the adapters that carry host
//! frames to it.

mod driver;
mod error;
mod feed;
mod frame;
mod sdp_file;

pub use driver::{
    BitrateRange, IceCandidate, IceServer, MediaDriver, MediaEngineConfig, MediaEvent,
    MediaEventSink, RtcLogLevel, SdpType, SessionDescription,
};
pub use error::MediaError;
pub use feed::{
    AudioFrameFeeder, AudioFrameReceiver, MediaFeeds, VideoFrameFeeder, VideoFrameReceiver,
    VideoPacketFeeder, VideoPacketReceiver,
};
pub use frame::{AudioFrame, EncodedVideoPacket, I420Buffer, VideoFrame};
pub use sdp_file::SdpFileDriver;
