//! Game state for Caro matches and the Lines puzzle.
//!
//! This module provides the core state types and engines:
//!
//! - `grid` - Square boards, run detection and path finding
//! - `player` - Player location state machine (where is each player?)
//! - `registry` - Players, rooms and puzzle sessions by user
//! - `room` - Matchmaking queue and two-player Caro rooms
//! - `puzzle` - Single-player Lines sessions
//! - `store` - Durable persistence interface
//! - `events` - Inbound requests and outbound notifications
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             GameServer                               │
//! │                                                                      │
//! │  InboundEvent ──▶ handle(user, event) ──▶ Vec<Envelope { to, event }>│
//! │                                                                      │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐    │
//! │  │   MatchEngine   │   │  PuzzleEngine   │   │   StateStore    │    │
//! │  │                 │   │                 │   │                 │    │
//! │  │ waiting queue   │   │ move / finalize │   │ puzzle sessions │    │
//! │  │ rooms & turns   │   │ reset / hint    │   │ match results   │    │
//! │  └────────┬────────┘   └────────┬────────┘   └─────────────────┘    │
//! │           │                     │                                    │
//! │  ┌────────▼─────────────────────▼──────────────────────────────┐    │
//! │  │                      SessionRegistry                         │    │
//! │  │                                                              │    │
//! │  │  user_id → PlayerState     room_id → Arc<Mutex<MatchRoom>>   │    │
//! │  │  user_id → room_id         user_id → Arc<Mutex<PuzzleSession>>│   │
//! │  └──────────────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use gridplay_state::state::{EngineConfig, GameServer, InboundEvent, MemoryStore, UserId};
//!
//! let server = GameServer::new(EngineConfig::default(), Arc::new(MemoryStore::new())).unwrap();
//! let alice = UserId::from("alice");
//!
//! // Connecting replays the puzzle board
//! let events = server.handle(&alice, InboundEvent::Connect);
//! assert_eq!(events.len(), 2);
//!
//! // Alone in the queue, so only an acknowledgement
//! let events = server.handle(&alice, InboundEvent::QueueForMatch);
//! assert_eq!(events[0].event.name(), "queued");
//! ```

pub mod config;
pub mod events;
pub mod grid;
pub mod player;
pub mod puzzle;
pub mod random;
pub mod registry;
pub mod room;
pub mod store;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use events::{Envelope, EventError, InboundEvent, OutboundEvent};
pub use grid::{
    count_run, detect_lines, find_shortest_path, has_winning_run, Board, CellValue, Position,
};
pub use player::{InvalidTransition, PlayerEvent, PlayerLocation, PlayerState, UserId};
pub use puzzle::{
    path_frames, Color, Hint, MoveResolution, PlannedMove, PuzzleEngine, PuzzleRejection,
    PuzzleSession, PuzzleView, UpcomingPiece,
};
pub use random::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};
pub use registry::{RoomHandle, SessionHandle, SessionRegistry};
pub use room::{Mark, MatchEngine, MatchRejection, MatchRoom, RoomId, RoomStatus};
pub use store::{MatchResult, MemoryStore, PuzzleSnapshot, StateStore, StoreError};

/// Combined game state and dispatcher.
///
/// Owns the registry and both engines. Every method takes `&self`, so one
/// server can be shared across connection tasks behind an `Arc`.
pub struct GameServer {
    pub config: EngineConfig,
    pub registry: SessionRegistry,
    pub puzzles: PuzzleEngine,
    pub matches: MatchEngine,
    store: Arc<dyn StateStore>,
}

impl GameServer {
    /// Create a server drawing randomness from the thread generator.
    pub fn new(config: EngineConfig, store: Arc<dyn StateStore>) -> Result<Self, ConfigError> {
        Self::with_random(config, store, Box::new(ThreadRandom), Box::new(ThreadRandom))
    }

    /// Create a server with explicit random sources for the puzzle and match
    /// engines.
    pub fn with_random(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        puzzle_rng: Box<dyn RandomSource>,
        match_rng: Box<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            puzzles: PuzzleEngine::new(config.clone(), store.clone(), puzzle_rng),
            matches: MatchEngine::new(config.clone(), store.clone(), match_rng),
            registry: SessionRegistry::new(),
            config,
            store,
        })
    }

    /// Handle one event from an authenticated user.
    #[instrument(skip_all, fields(user = %user, event = event.name()))]
    pub fn handle(&self, user: &UserId, event: InboundEvent) -> Vec<Envelope> {
        if event != InboundEvent::Connect && !self.registry.location(user).is_connected() {
            debug!("ignoring event from unknown user");
            return Vec::new();
        }

        match event {
            InboundEvent::Connect => self.connect(user),
            InboundEvent::QueueForMatch => self.matches.join_queue(&self.registry, user),
            InboundEvent::SubmitMatchMove { row, col } => {
                self.matches
                    .make_move(&self.registry, user, Position::new(row, col))
            }
            InboundEvent::SubmitPuzzleMove { from, to } => self.puzzle_move(user, from, to),
            InboundEvent::RequestPuzzleReset => {
                let view = self.puzzles.reset(&self.registry, user);
                vec![Envelope::new(
                    user.clone(),
                    OutboundEvent::PuzzleBoardUpdated { view },
                )]
            }
            InboundEvent::RequestPuzzleHint => match self.puzzles.hint(&self.registry, user) {
                Ok(hint) => vec![Envelope::new(user.clone(), OutboundEvent::Hint { hint })],
                Err(rejection) => {
                    debug!(%rejection, "ignoring hint request");
                    Vec::new()
                }
            },
            InboundEvent::Disconnect => self.disconnect(user),
        }
    }

    /// Decode a JSON frame and handle it.
    pub fn handle_json(&self, user: &UserId, raw: &str) -> Result<Vec<Envelope>, EventError> {
        let event = InboundEvent::from_json(raw)?;
        Ok(self.handle(user, event))
    }

    fn connect(&self, user: &UserId) -> Vec<Envelope> {
        match self.registry.connect(user) {
            Ok(()) => info!("user connected"),
            Err(err) => debug!(error = %err, "replaying state for connected user"),
        }
        let puzzle = match self.puzzles.init(&self.registry, user) {
            Ok(view) => OutboundEvent::PuzzleBoardUpdated { view },
            Err(err) => OutboundEvent::Rejected {
                reason: err.to_string(),
            },
        };
        vec![
            Envelope::new(
                user.clone(),
                OutboundEvent::Connected {
                    user_id: user.clone(),
                },
            ),
            Envelope::new(user.clone(), puzzle),
        ]
    }

    fn puzzle_move(&self, user: &UserId, from: Position, to: Position) -> Vec<Envelope> {
        let reject = |rejection: PuzzleRejection| {
            vec![Envelope::new(
                user.clone(),
                OutboundEvent::Rejected {
                    reason: rejection.to_string(),
                },
            )]
        };

        let planned = match self.puzzles.move_ball(&self.registry, user, from, to) {
            Ok(planned) => planned,
            Err(PuzzleRejection::UnknownSession) => return Vec::new(),
            Err(rejection) => return reject(rejection),
        };

        let mut events: Vec<Envelope> = match self.puzzles.view(&self.registry, user) {
            Some(view) => path_frames(&view.board, &planned.path, planned.color)
                .into_iter()
                .map(|board| Envelope::new(user.clone(), OutboundEvent::PathStep { board }))
                .collect(),
            None => Vec::new(),
        };

        match self
            .puzzles
            .finalize(&self.registry, user, &planned.path, planned.color)
        {
            Ok(resolution) => events.push(Envelope::new(
                user.clone(),
                OutboundEvent::PuzzleBoardUpdated {
                    view: resolution.view,
                },
            )),
            Err(rejection) => events.extend(reject(rejection)),
        }
        events
    }

    fn disconnect(&self, user: &UserId) -> Vec<Envelope> {
        if self.puzzles.cancel_pending(&self.registry, user) {
            debug!("dropped in-flight puzzle move");
        }
        let events = self.matches.disconnect(&self.registry, user);
        info!("user disconnected");
        events
    }

    /// Latest finished matches, newest first. Empty if the store fails.
    pub fn recent_results(&self, limit: usize) -> Vec<MatchResult> {
        self.store
            .recent_match_results(limit)
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to list match results");
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uid(id: &str) -> UserId {
        UserId::from(id)
    }

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    fn server() -> GameServer {
        GameServer::with_random(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Box::new(ScriptedRandom::zeros()),
            Box::new(ScriptedRandom::zeros()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = EngineConfig {
            win_length: 1,
            ..EngineConfig::default()
        };
        assert!(GameServer::new(config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn test_connect_replays_puzzle() {
        let server = server();
        let events = server.handle(&uid("u1"), InboundEvent::Connect);

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].event,
            OutboundEvent::Connected { user_id: uid("u1") }
        );
        match &events[1].event {
            OutboundEvent::PuzzleBoardUpdated { view } => {
                assert_eq!(view.board.occupied_count(), 5);
                assert_eq!(view.upcoming.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(server.registry.connected_count(), 1);
    }

    #[test]
    fn test_connect_during_store_outage() {
        let store = Arc::new(crate::state::store::FlakyStore::default());
        let server = GameServer::with_random(
            EngineConfig::default(),
            store.clone(),
            Box::new(ScriptedRandom::zeros()),
            Box::new(ScriptedRandom::zeros()),
        )
        .unwrap();

        store.fail_next_loads(1);
        let events = server.handle(&uid("u1"), InboundEvent::Connect);
        assert_eq!(
            events[1].event,
            OutboundEvent::Rejected {
                reason: "store unavailable: connection refused".to_string()
            }
        );
        assert_eq!(server.registry.session_count(), 0);
        assert_eq!(store.inner.session_count(), 0);

        // reconnecting once the store is back creates the board
        let events = server.handle(&uid("u1"), InboundEvent::Connect);
        assert_eq!(events[1].event.name(), "board_updated");
        assert_eq!(store.inner.session_count(), 1);
    }

    #[test]
    fn test_unknown_user_is_ignored() {
        let server = server();
        assert!(server
            .handle(&uid("ghost"), InboundEvent::QueueForMatch)
            .is_empty());
        assert!(server
            .handle(&uid("ghost"), InboundEvent::RequestPuzzleHint)
            .is_empty());
        assert!(server
            .handle(&uid("ghost"), InboundEvent::Disconnect)
            .is_empty());
    }

    #[test]
    fn test_puzzle_move_streams_path_then_board() {
        let server = server();
        let user = uid("u1");
        // seeded row 0, columns 0..5 red; upcoming at (0, 5), (0, 6), (0, 7)
        server.handle(&user, InboundEvent::Connect);

        let events = server.handle(
            &user,
            InboundEvent::SubmitPuzzleMove {
                from: p(0, 0),
                to: p(2, 0),
            },
        );
        let names: Vec<&str> = events.iter().map(|e| e.event.name()).collect();
        assert_eq!(names, vec!["path_step", "path_step", "board_updated"]);

        match &events[0].event {
            OutboundEvent::PathStep { board } => {
                assert!(board.is_empty_at(p(0, 0)));
                assert_eq!(board.get(p(1, 0)), Some(Color::Red));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // the spawned pieces extend row 0 to seven in a row, which clears
        match &events[2].event {
            OutboundEvent::PuzzleBoardUpdated { view } => {
                assert_eq!(view.board.get(p(2, 0)), Some(Color::Red));
                assert_eq!(view.board.occupied_count(), 1);
                assert_eq!(view.upcoming.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_puzzle_rejection_event() {
        let server = server();
        let user = uid("u1");
        server.handle(&user, InboundEvent::Connect);

        let events = server.handle(
            &user,
            InboundEvent::SubmitPuzzleMove {
                from: p(4, 4),
                to: p(4, 5),
            },
        );
        assert_eq!(
            events,
            vec![Envelope::new(
                user,
                OutboundEvent::Rejected {
                    reason: "no ball at the origin".to_string()
                }
            )]
        );
    }

    #[test]
    fn test_reset_and_hint() {
        let server = server();
        let user = uid("u1");
        server.handle(&user, InboundEvent::Connect);

        let events = server.handle(&user, InboundEvent::RequestPuzzleReset);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name(), "board_updated");

        let events = server.handle(&user, InboundEvent::RequestPuzzleHint);
        match &events[0].event {
            OutboundEvent::Hint { hint: Some(hint) } => {
                let view = server.puzzles.view(&server.registry, &user).unwrap();
                assert!(view.board.get(hint.from).is_some());
                assert!(view.board.is_empty_at(hint.to));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_match_through_server() {
        let server = server();
        for id in ["u1", "u2", "u3"] {
            server.handle(&uid(id), InboundEvent::Connect);
        }

        server.handle(&uid("u1"), InboundEvent::QueueForMatch);
        let events = server.handle(&uid("u2"), InboundEvent::QueueForMatch);
        assert_eq!(events.len(), 3);
        let events = server.handle(&uid("u3"), InboundEvent::QueueForMatch);
        assert_eq!(events.len(), 1);
        assert_eq!(server.matches.queue_len(), 1);

        for col in 0..4 {
            server.handle(&uid("u1"), InboundEvent::SubmitMatchMove { row: 3, col });
            server.handle(&uid("u2"), InboundEvent::SubmitMatchMove { row: 4, col });
        }
        let events = server.handle(&uid("u1"), InboundEvent::SubmitMatchMove { row: 3, col: 4 });
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].event.name(), "match_finished");

        let results = server.recent_results(5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].winner, uid("u1"));
    }

    #[test]
    fn test_disconnect_mid_room() {
        let server = server();
        for id in ["u1", "u2"] {
            server.handle(&uid(id), InboundEvent::Connect);
            server.handle(&uid(id), InboundEvent::QueueForMatch);
        }

        let events = server.handle(&uid("u1"), InboundEvent::Disconnect);
        assert_eq!(
            events,
            vec![Envelope::new(uid("u2"), OutboundEvent::OpponentDeparted)]
        );
        assert_eq!(server.registry.room_count(), 0);
        assert!(server
            .handle(&uid("u2"), InboundEvent::SubmitMatchMove { row: 0, col: 0 })
            .is_empty());
        assert_eq!(server.registry.location(&uid("u1")), PlayerLocation::Disconnected);

        // puzzle session stays resident and is replayed on reconnect
        let events = server.handle(&uid("u1"), InboundEvent::Connect);
        assert_eq!(events.len(), 2);
        assert_eq!(server.registry.session_count(), 2);
    }

    #[test]
    fn test_handle_json() {
        let server = server();
        let events = server
            .handle_json(&uid("u1"), r#"{"type": "connect"}"#)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(server.handle_json(&uid("u1"), "not json").is_err());
    }
}
