//! Session registry.
//!
//! Process-wide lookup from user identity to live state: where each player is,
//! which room they play in, and their resident puzzle session. The registry is
//! created empty at startup and passed explicitly into every engine call.
//!
//! Rooms and sessions are handed out as `Arc<Mutex<_>>` handles so each one is
//! mutated under its own lock. The registry's own lock only guards the
//! indexes and is never held while another lock is taken.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::player::{InvalidTransition, PlayerEvent, PlayerLocation, PlayerState, UserId};
use super::puzzle::PuzzleSession;
use super::room::{MatchRoom, RoomId};

/// Shared handle to a match room.
pub type RoomHandle = Arc<Mutex<MatchRoom>>;

/// Shared handle to a puzzle session.
pub type SessionHandle = Arc<Mutex<PuzzleSession>>;

#[derive(Debug)]
struct RoomEntry {
    handle: RoomHandle,
    participants: [UserId; 2],
}

#[derive(Debug, Default)]
struct RegistryInner {
    players: HashMap<UserId, PlayerState>,
    rooms: HashMap<RoomId, RoomEntry>,
    /// Participant to room ID
    room_index: HashMap<UserId, RoomId>,
    sessions: HashMap<UserId, SessionHandle>,
}

impl RegistryInner {
    fn apply(&mut self, user: &UserId, event: PlayerEvent) -> Result<(), InvalidTransition> {
        self.players
            .entry(user.clone())
            .or_insert_with(PlayerState::new)
            .apply_mut(event)
    }
}

/// Registry of players, rooms and puzzle sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as connected.
    pub fn connect(&self, user: &UserId) -> Result<(), InvalidTransition> {
        self.apply_player_event(user, PlayerEvent::Connect)
    }

    /// Apply a player event, creating the player state if needed.
    pub fn apply_player_event(
        &self,
        user: &UserId,
        event: PlayerEvent,
    ) -> Result<(), InvalidTransition> {
        self.inner.lock().apply(user, event)
    }

    /// Current location; unknown users are `Disconnected`.
    pub fn location(&self, user: &UserId) -> PlayerLocation {
        self.inner
            .lock()
            .players
            .get(user)
            .map(|state| state.location().clone())
            .unwrap_or_default()
    }

    /// Index a freshly paired room under both participants.
    pub fn register_room(&self, room: MatchRoom) -> RoomHandle {
        let room_id = room.id.clone();
        let participants = room.players().clone();
        let handle = Arc::new(Mutex::new(room));

        let mut inner = self.inner.lock();
        for user in &participants {
            inner.room_index.insert(user.clone(), room_id.clone());
            let event = PlayerEvent::StartMatch {
                room_id: room_id.clone(),
            };
            if let Err(err) = inner.apply(user, event) {
                debug!(%user, error = %err, "player location out of step with room");
            }
        }
        inner.rooms.insert(
            room_id,
            RoomEntry {
                handle: handle.clone(),
                participants,
            },
        );
        handle
    }

    /// Room the user currently plays in.
    pub fn room_for(&self, user: &UserId) -> Option<RoomHandle> {
        let inner = self.inner.lock();
        let room_id = inner.room_index.get(user)?;
        inner.rooms.get(room_id).map(|entry| entry.handle.clone())
    }

    /// Drop a room and its participant index entries. Idempotent.
    pub fn remove_room(&self, room_id: &RoomId) -> Option<RoomHandle> {
        let mut inner = self.inner.lock();
        let entry = inner.rooms.remove(room_id)?;

        for user in &entry.participants {
            if inner.room_index.get(user) == Some(room_id) {
                inner.room_index.remove(user);
            }
            let in_this_room = inner
                .players
                .get(user)
                .and_then(|state| state.room_id())
                .is_some_and(|id| id == room_id);
            if in_this_room {
                if let Err(err) = inner.apply(user, PlayerEvent::EndMatch) {
                    debug!(%user, error = %err, "could not end match for player");
                }
            }
        }

        Some(entry.handle)
    }

    /// Resident puzzle session for a user.
    pub fn session(&self, user: &UserId) -> Option<SessionHandle> {
        self.inner.lock().sessions.get(user).cloned()
    }

    /// Insert a session unless the user already has one.
    ///
    /// Returns the resident handle, plus the given session back when it was
    /// not inserted.
    pub fn insert_session(&self, session: PuzzleSession) -> (SessionHandle, Option<PuzzleSession>) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.sessions.get(&session.user_id) {
            return (existing.clone(), Some(session));
        }
        let user = session.user_id.clone();
        let handle = Arc::new(Mutex::new(session));
        inner.sessions.insert(user, handle.clone());
        (handle, None)
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .lock()
            .players
            .values()
            .filter(|state| state.is_connected())
            .count()
    }
}
