//! janus-publish - Janus VideoRoom publisher
//!
//! This library drives a publisher session against a Janus WebRTC gateway
//! over WebSocket and hands offer/answer and ICE work to a pluggable media
//! driver.

pub mod config;
pub mod janus;
pub mod media;
pub mod network;

pub use config::{ConnectionSettings, PublishConfig, Settings};
pub use janus::{PublishState, Publisher, PublisherEvent};
pub use media::{MediaDriver, MediaEngineConfig, MediaFeeds};
