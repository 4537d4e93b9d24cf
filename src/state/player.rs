//! Player identity and location state machine.
//!
//! Tracks where a connected user is in the match flow and validates
//! transitions.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────────┐
//! │ Disconnected │◀───────────────────────────────┐
//! └──────┬───────┘                                │
//!        │ connect                                │ disconnect
//!        ▼                                        │
//! ┌──────────────┐   join_queue   ┌──────────┐    │
//! │  Connected   │───────────────▶│  Queued  │────┤
//! └──────────────┘                └────┬─────┘    │
//!        ▲                             │          │
//!        │                             │ start_match
//!        │ end_match                   ▼          │
//!        │                       ┌──────────┐     │
//!        └───────────────────────│  InRoom  │─────┘
//!                                └──────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::room::RoomId;

/// Opaque authenticated user identity, resolved by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Player's current location in the match flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlayerLocation {
    /// No live connection
    #[default]
    Disconnected,

    /// Connected, not matchmaking
    Connected,

    /// Waiting in the matchmaking queue
    Queued,

    /// Playing in a match room
    InRoom { room_id: RoomId },
}

impl PlayerLocation {
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Get the room ID if in a room.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::InRoom { room_id } => Some(room_id),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::Queued => write!(f, "Queued"),
            Self::InRoom { room_id } => write!(f, "InRoom({})", room_id),
        }
    }
}

/// State transition events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Connect,
    Disconnect,
    JoinQueue,
    StartMatch { room_id: RoomId },
    EndMatch,
}

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} via {event:?}: {reason}")]
pub struct InvalidTransition {
    pub from: PlayerLocation,
    pub event: PlayerEvent,
    pub reason: &'static str,
}

/// Player state machine.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    location: PlayerLocation,
}

impl PlayerState {
    /// Create a new disconnected player state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self) -> &PlayerLocation {
        &self.location
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: PlayerEvent) -> Result<(), InvalidTransition> {
        self.location = self.transition(&event)?;
        Ok(())
    }

    fn transition(&self, event: &PlayerEvent) -> Result<PlayerLocation, InvalidTransition> {
        use PlayerEvent::*;
        use PlayerLocation::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.location.clone(),
            event: event.clone(),
            reason,
        };

        match (&self.location, event) {
            (Disconnected, Connect) => Ok(Connected),
            (_, Connect) => Err(invalid("Already connected")),

            (Disconnected, Disconnect) => Err(invalid("Already disconnected")),
            (_, Disconnect) => Ok(Disconnected),

            (Connected, JoinQueue) => Ok(Queued),
            (Queued, JoinQueue) => Err(invalid("Already queued")),
            (InRoom { .. }, JoinQueue) => Err(invalid("Already in a room")),
            (Disconnected, JoinQueue) => Err(invalid("Must connect first")),

            (Queued, StartMatch { room_id }) => Ok(InRoom {
                room_id: room_id.clone(),
            }),
            (InRoom { .. }, StartMatch { .. }) => Err(invalid("Already in a room")),
            (_, StartMatch { .. }) => Err(invalid("Must be queued to start a match")),

            (InRoom { .. }, EndMatch) => Ok(Connected),
            (_, EndMatch) => Err(invalid("Not in a room")),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.location.is_connected()
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.location.room_id()
    }
}
