//! Session ids and publish phase shared between the signaling task and the
//! keepalive task

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

/// Publisher state
///
/// ```text
/// Disconnected --> Connecting: publish()
/// Connecting --> SessionCreated: create success
/// SessionCreated --> HandleAttached: attach success
/// HandleAttached --> Joined: join event
/// Joined --> Negotiating: offer requested
/// Negotiating --> Published: configure answer
/// * --> Disconnected: unpublish, hangup, failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PublishState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    SessionCreated = 2,
    HandleAttached = 3,
    Joined = 4,
    Negotiating = 5,
    Published = 6,
}

impl PublishState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::SessionCreated,
            3 => Self::HandleAttached,
            4 => Self::Joined,
            5 => Self::Negotiating,
            6 => Self::Published,
            _ => Self::Disconnected,
        }
    }

    /// Whether a gateway session exists in this state
    pub fn has_session(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }

    /// Whether the publisher is in the room
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined | Self::Negotiating | Self::Published)
    }
}

/// Gateway-assigned ids; 0 means unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub session_id: u64,
    pub handle_id: u64,
}

/// Mutable session state
///
/// Only the signaling task writes. The keepalive task holds a read guard
/// while it sends, so a writer that returns from [`SessionState::reset`] knows
/// no ping with the old id is in flight.
#[derive(Debug, Default)]
pub struct SessionState {
    ids: RwLock<SessionIds>,
    joined_room: AtomicBool,
    phase: AtomicU8,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> SessionIds {
        *self.ids.read()
    }

    pub fn read_ids(&self) -> RwLockReadGuard<'_, SessionIds> {
        self.ids.read()
    }

    pub fn session_id(&self) -> u64 {
        self.ids.read().session_id
    }

    pub fn handle_id(&self) -> u64 {
        self.ids.read().handle_id
    }

    /// Store a new session; any previous handle belongs to the old session
    pub fn set_session(&self, session_id: u64) {
        let mut ids = self.ids.write();
        ids.session_id = session_id;
        ids.handle_id = 0;
        self.joined_room.store(false, Ordering::SeqCst);
    }

    /// Returns false if there is no session to attach to
    pub fn set_handle(&self, handle_id: u64) -> bool {
        let mut ids = self.ids.write();
        if ids.session_id == 0 {
            return false;
        }
        ids.handle_id = handle_id;
        true
    }

    /// Returns false if no handle is attached
    pub fn set_joined(&self) -> bool {
        let ids = self.ids.read();
        if ids.handle_id == 0 {
            return false;
        }
        self.joined_room.store(true, Ordering::SeqCst);
        true
    }

    pub fn joined_room(&self) -> bool {
        self.joined_room.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> PublishState {
        PublishState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: PublishState) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Clear ids and membership, returning the ids that were set
    pub fn reset(&self) -> SessionIds {
        let mut ids = self.ids.write();
        let previous = *ids;
        *ids = SessionIds::default();
        self.joined_room.store(false, Ordering::SeqCst);
        self.set_phase(PublishState::Disconnected);
        previous
    }
}
