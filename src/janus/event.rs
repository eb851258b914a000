/// Progress and failures of a publish attempt, in the order they happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    Connecting { url: String },
    SessionCreated { session_id: u64 },
    HandleAttached { handle_id: u64 },
    Joined { room: u64 },
    /// The gateway accepted the offer; media is flowing
    Published,
    Unpublished,
    /// The gateway closed the PeerConnection
    Hangup { reason: String },
    PublishFailed { reason: String },
}
