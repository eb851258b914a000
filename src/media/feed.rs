//! Media feed adapters
//!
//! Bridge frames from the host capture pipeline to whatever receiver the
//! media driver registered during negotiation. Each adapter holds at most one
//! receiver; feeding without one is a no-op.
//!
//! # Thread Safety
//! Feed calls run on the host capture thread while signaling runs elsewhere.
//! The receiver slot is held for reading while a frame is delivered, so once
//! [`MediaFeeds::clear`] returns no further frame reaches the old receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::frame::{AudioFrame, EncodedVideoPacket, I420Buffer, VideoFrame};

/// Ingestion point for raw video
pub trait VideoFrameReceiver: Send + Sync {
    fn on_frame(&self, frame: &I420Buffer);
}

/// Ingestion point for encoded video
pub trait VideoPacketReceiver: Send + Sync {
    fn on_packet(&self, packet: &EncodedVideoPacket<'_>);
}

/// Ingestion point for audio
pub trait AudioFrameReceiver: Send + Sync {
    fn on_frame(&self, frame: &AudioFrame<'_>);
}

struct ReceiverSlot<R: ?Sized> {
    receiver: RwLock<Option<Arc<R>>>,
    delivered: AtomicU64,
}

impl<R: ?Sized> Default for ReceiverSlot<R> {
    fn default() -> Self {
        Self {
            receiver: RwLock::new(None),
            delivered: AtomicU64::new(0),
        }
    }
}

impl<R: ?Sized> ReceiverSlot<R> {
    fn set(&self, receiver: Arc<R>) {
        *self.receiver.write() = Some(receiver);
    }

    fn clear(&self) -> bool {
        self.receiver.write().take().is_some()
    }

    fn is_set(&self) -> bool {
        self.receiver.read().is_some()
    }

    /// Run `deliver` with the registered receiver, if any
    fn with_receiver(&self, deliver: impl FnOnce(&R) -> bool) {
        let guard = self.receiver.read();
        if let Some(receiver) = guard.as_deref() {
            if deliver(receiver) {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Raw video adapter: packs strided I420 planes into a contiguous buffer
#[derive(Default)]
pub struct VideoFrameFeeder {
    slot: ReceiverSlot<dyn VideoFrameReceiver>,
    /// Size the sender was negotiated for; other frames are dropped
    frame_size: RwLock<Option<(u32, u32)>>,
    mismatched: AtomicU64,
}

impl VideoFrameFeeder {
    /// Only accept frames of `width` x `height` from now on
    pub fn set_frame_size(&self, width: u32, height: u32) {
        *self.frame_size.write() = Some((width, height));
        self.mismatched.store(0, Ordering::Relaxed);
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        *self.frame_size.read()
    }

    /// Number of frames dropped for having the wrong size
    pub fn mismatched(&self) -> u64 {
        self.mismatched.load(Ordering::Relaxed)
    }

    pub fn set_receiver(&self, receiver: Arc<dyn VideoFrameReceiver>) {
        self.slot.set(receiver);
    }

    pub fn clear_receiver(&self) -> bool {
        self.slot.clear()
    }

    pub fn has_receiver(&self) -> bool {
        self.slot.is_set()
    }

    /// Feed one frame from the capture pipeline
    pub fn feed_video_frame(&self, frame: &VideoFrame<'_>) {
        self.slot.with_receiver(|receiver| {
            if let Some((width, height)) = self.frame_size() {
                if (frame.width, frame.height) != (width, height) {
                    // Warn once per negotiated size
                    if self.mismatched.fetch_add(1, Ordering::Relaxed) == 0 {
                        warn!(
                            "Dropping {}x{} video frames, sender expects {}x{}",
                            frame.width, frame.height, width, height
                        );
                    }
                    return false;
                }
            }
            Self::deliver(receiver, frame)
        });
    }

    fn deliver(receiver: &dyn VideoFrameReceiver, frame: &VideoFrame<'_>) -> bool {
        match I420Buffer::from_frame(frame) {
            Ok(buffer) => {
                receiver.on_frame(&buffer);
                true
            }
            Err(e) => {
                warn!("Dropping video frame: {}", e);
                false
            }
        }
    }

    /// Number of frames handed to a receiver
    pub fn delivered(&self) -> u64 {
        self.slot.delivered()
    }
}

/// Encoded video adapter: passes packets through untouched
#[derive(Default)]
pub struct VideoPacketFeeder {
    slot: ReceiverSlot<dyn VideoPacketReceiver>,
}

impl VideoPacketFeeder {
    pub fn set_receiver(&self, receiver: Arc<dyn VideoPacketReceiver>) {
        self.slot.set(receiver);
    }

    pub fn clear_receiver(&self) -> bool {
        self.slot.clear()
    }

    pub fn has_receiver(&self) -> bool {
        self.slot.is_set()
    }

    pub fn feed_video_packet(&self, packet: &EncodedVideoPacket<'_>) {
        self.slot.with_receiver(|receiver| {
            trace!("Feeding {} byte video packet", packet.data.len());
            receiver.on_packet(packet);
            true
        });
    }

    pub fn delivered(&self) -> u64 {
        self.slot.delivered()
    }
}

/// Audio adapter: passes PCM frames through untouched
#[derive(Default)]
pub struct AudioFrameFeeder {
    slot: ReceiverSlot<dyn AudioFrameReceiver>,
}

impl AudioFrameFeeder {
    pub fn set_receiver(&self, receiver: Arc<dyn AudioFrameReceiver>) {
        self.slot.set(receiver);
    }

    pub fn clear_receiver(&self) -> bool {
        self.slot.clear()
    }

    pub fn has_receiver(&self) -> bool {
        self.slot.is_set()
    }

    pub fn feed_audio_frame(&self, frame: &AudioFrame<'_>) {
        self.slot.with_receiver(|receiver| {
            receiver.on_frame(frame);
            true
        });
    }

    pub fn delivered(&self) -> u64 {
        self.slot.delivered()
    }
}

/// The adapters for one connection, shared between host and media driver
#[derive(Default)]
pub struct MediaFeeds {
    pub video: VideoFrameFeeder,
    pub packets: VideoPacketFeeder,
    pub audio: AudioFrameFeeder,
}

impl MediaFeeds {
    pub fn feed_video_frame(&self, frame: &VideoFrame<'_>) {
        self.video.feed_video_frame(frame);
    }

    pub fn feed_video_packet(&self, packet: &EncodedVideoPacket<'_>) {
        self.packets.feed_video_packet(packet);
    }

    pub fn feed_audio_frame(&self, frame: &AudioFrame<'_>) {
        self.audio.feed_audio_frame(frame);
    }

    /// Drop every registered receiver
    pub fn clear(&self) {
        let cleared = [
            self.video.clear_receiver(),
            self.packets.clear_receiver(),
            self.audio.clear_receiver(),
        ];
        if cleared.iter().any(|&c| c) {
            trace!("Media feed receivers cleared");
        }
    }
}
