//! Gridplay State Library
//!
//! This crate provides the game state behind a small realtime game server:
//! two-player Caro (five in a row) and the single-player Lines puzzle.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Player State Machine** - Tracks where each user is (disconnected, connected,
//!   queued, in a room) with validated transitions.
//!
//! - **Match Engine** - FIFO matchmaking, turn order, win and draw detection on a
//!   15x15 board.
//!
//! - **Puzzle Engine** - Per-user 9x9 boards with path-finding moves, line clears
//!   and upcoming pieces.
//!
//! - **Session Registry** - Players, rooms and puzzle sessions indexed by user.
//!
//! # Design Principles
//!
//! 1. **State machines validate transitions** - Invalid state changes are rejected
//!    with clear errors and never mutate state.
//!
//! 2. **Per-room locking** - Each room and puzzle session sits behind its own
//!    mutex, so unrelated users never wait on each other.
//!
//! 3. **No networking** - This crate is pure state. A transport decodes frames into
//!    `InboundEvent`s and delivers the returned `Envelope`s.
//!
//! 4. **Injectable randomness** - Seeding and room IDs draw from a `RandomSource`,
//!    so tests can assert exact boards.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gridplay_state::state::{
//!     EngineConfig, GameServer, InboundEvent, MemoryStore, OutboundEvent, UserId,
//! };
//!
//! let server = GameServer::new(EngineConfig::default(), Arc::new(MemoryStore::new())).unwrap();
//! let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
//!
//! for user in [&alice, &bob] {
//!     server.handle(user, InboundEvent::Connect);
//!     server.handle(user, InboundEvent::QueueForMatch);
//! }
//!
//! // The first user in the queue plays X and moves first
//! let events = server.handle(&alice, InboundEvent::SubmitMatchMove { row: 7, col: 7 });
//! assert_eq!(events.len(), 2);
//! assert!(matches!(events[0].event, OutboundEvent::MatchBoardUpdated { .. }));
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
