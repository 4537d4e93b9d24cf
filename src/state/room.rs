//! Caro match rooms and matchmaking.
//!
//! Users queue for a match, get paired first-come-first-served, then take
//! turns placing marks on a shared board until one completes a run, the
//! board fills, or a participant leaves. A room is destroyed the moment its
//! match ends; rooms are never reused.
//!
//! # Room lifecycle
//!
//! ```text
//! Queued ──pair──▶ InProgress ──winning move──▶ Finished { winner }
//!                      │      ──board full────▶ Finished { winner: None }
//!                      └──────participant left─▶ Abandoned { departed }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::config::EngineConfig;
use super::events::{Envelope, OutboundEvent};
use super::grid::{has_winning_run, Board, CellValue, Position};
use super::player::{PlayerEvent, PlayerLocation, UserId};
use super::random::{token, RandomSource};
use super::registry::SessionRegistry;
use super::store::{MatchResult, StateStore};

/// Opaque room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random token of `len` alphanumeric characters.
    pub fn generate<R: RandomSource + ?Sized>(rng: &mut R, len: usize) -> Self {
        Self(token(rng, len))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A participant's symbol. `X` belongs to the first-paired user and moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl CellValue for Mark {
    fn as_str(&self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
        }
    }
}

/// Room state machine states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoomStatus {
    #[default]
    InProgress,
    /// `winner` is `None` when the board filled without a run
    Finished { winner: Option<UserId> },
    Abandoned { departed: UserId },
}

impl RoomStatus {
    /// Check if the room accepts moves.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }
}

/// Why a match move was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchRejection {
    #[error("not in a room")]
    NotInRoom,
    #[error("match is over")]
    RoomClosed,
    #[error("not a participant in this room")]
    NotParticipant,
    #[error("it's not your turn")]
    NotYourTurn,
    #[error("cell is outside the board")]
    OutOfBounds,
    #[error("cell is already taken")]
    CellOccupied,
}

/// Live state of one two-player match.
#[derive(Debug, Clone)]
pub struct MatchRoom {
    pub id: RoomId,

    /// Index 0 plays `X`, index 1 plays `O`
    players: [UserId; 2],

    pub board: Board<Mark>,

    /// Index into `players`
    turn: usize,

    pub status: RoomStatus,

    pub move_count: usize,

    pub created_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchRoom {
    /// Create a room; `first` holds `X` and moves first.
    pub fn new(id: RoomId, first: UserId, second: UserId, board_size: usize) -> Self {
        Self {
            id,
            players: [first, second],
            board: Board::new(board_size),
            turn: 0,
            status: RoomStatus::InProgress,
            move_count: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn players(&self) -> &[UserId; 2] {
        &self.players
    }

    fn seat_of(&self, user: &UserId) -> Option<usize> {
        self.players.iter().position(|p| p == user)
    }

    pub fn mark_of(&self, user: &UserId) -> Option<Mark> {
        self.seat_of(user)
            .map(|seat| if seat == 0 { Mark::X } else { Mark::O })
    }

    pub fn opponent_of(&self, user: &UserId) -> Option<&UserId> {
        self.seat_of(user).map(|seat| &self.players[1 - seat])
    }

    /// The user whose move it is.
    pub fn turn(&self) -> &UserId {
        &self.players[self.turn]
    }

    pub fn is_turn(&self, user: &UserId) -> bool {
        self.turn() == user
    }

    /// Place the user's mark and pass the turn.
    pub fn place(&mut self, user: &UserId, pos: Position) -> Result<Mark, MatchRejection> {
        if !self.status.is_active() {
            return Err(MatchRejection::RoomClosed);
        }
        let mark = self.mark_of(user).ok_or(MatchRejection::NotParticipant)?;
        if !self.is_turn(user) {
            return Err(MatchRejection::NotYourTurn);
        }
        if !self.board.contains(pos) {
            return Err(MatchRejection::OutOfBounds);
        }
        if !self.board.is_empty_at(pos) {
            return Err(MatchRejection::CellOccupied);
        }

        self.board.set(pos, Some(mark));
        self.turn = 1 - self.turn;
        self.move_count += 1;
        Ok(mark)
    }

    pub fn finish(&mut self, winner: Option<UserId>) {
        self.status = RoomStatus::Finished { winner };
        self.finished_at = Some(Utc::now());
    }

    pub fn abandon(&mut self, departed: UserId) {
        self.status = RoomStatus::Abandoned { departed };
        self.finished_at = Some(Utc::now());
    }

    /// Address the same event to both participants.
    pub fn broadcast(&self, event: OutboundEvent) -> Vec<Envelope> {
        self.players
            .iter()
            .map(|p| Envelope::new(p.clone(), event.clone()))
            .collect()
    }
}

/// Users waiting to be paired, in arrival order.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    queue: VecDeque<UserId>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.queue.contains(user)
    }

    /// Append a user. Returns false if already waiting.
    pub fn push(&mut self, user: UserId) -> bool {
        if self.contains(&user) {
            return false;
        }
        self.queue.push_back(user);
        true
    }

    pub fn remove(&mut self, user: &UserId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|u| u != user);
        self.queue.len() != before
    }

    /// Dequeue the two longest-waiting users.
    pub fn pop_pair(&mut self) -> Option<(UserId, UserId)> {
        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some((first, second))
    }

    pub fn position(&self, user: &UserId) -> Option<usize> {
        self.queue.iter().position(|u| u == user)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Matchmaking and room transitions.
///
/// Lock order: waiting queue, then a room, then the registry. The random
/// source is only taken while nothing but the queue is held. A finished room
/// leaves the registry before its lock is released.
pub struct MatchEngine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    rng: Mutex<Box<dyn RandomSource>>,
    queue: Mutex<WaitingQueue>,
}

impl MatchEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            store,
            rng: Mutex::new(rng),
            queue: Mutex::new(WaitingQueue::new()),
        }
    }

    /// Queue a connected user and pair the two longest-waiting users.
    #[instrument(skip_all, fields(user = %user))]
    pub fn join_queue(&self, registry: &SessionRegistry, user: &UserId) -> Vec<Envelope> {
        let mut queue = self.queue.lock();

        let location = registry.location(user);
        if location != PlayerLocation::Connected {
            debug!(%location, "ignoring queue request");
            return Vec::new();
        }
        if let Err(err) = registry.apply_player_event(user, PlayerEvent::JoinQueue) {
            debug!(error = %err, "ignoring queue request");
            return Vec::new();
        }
        if !queue.push(user.clone()) {
            return Vec::new();
        }

        let mut events = vec![Envelope::new(user.clone(), OutboundEvent::Queued)];
        while let Some((first, second)) = queue.pop_pair() {
            events.extend(self.start_match(registry, first, second));
        }
        events
    }

    fn start_match(
        &self,
        registry: &SessionRegistry,
        first: UserId,
        second: UserId,
    ) -> Vec<Envelope> {
        let room_id = {
            let mut rng = self.rng.lock();
            RoomId::generate(&mut **rng, self.config.room_id_length)
        };
        let room = MatchRoom::new(
            room_id.clone(),
            first.clone(),
            second.clone(),
            self.config.match_board_size,
        );
        let turn = room.turn().clone();
        registry.register_room(room);

        info!(room = %room_id, x = %first, o = %second, "match started");

        vec![
            Envelope::new(
                first,
                OutboundEvent::MatchStarted {
                    room_id: room_id.clone(),
                    mark: Mark::X,
                    turn: turn.clone(),
                },
            ),
            Envelope::new(
                second,
                OutboundEvent::MatchStarted {
                    room_id,
                    mark: Mark::O,
                    turn,
                },
            ),
        ]
    }

    /// Apply a move from a user in a room. Illegal moves are ignored.
    #[instrument(skip_all, fields(user = %user, row = pos.row, col = pos.col))]
    pub fn make_move(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
        pos: Position,
    ) -> Vec<Envelope> {
        let Some(handle) = registry.room_for(user) else {
            debug!(rejection = %MatchRejection::NotInRoom, "ignoring move");
            return Vec::new();
        };
        let mut room = handle.lock();

        let mark = match room.place(user, pos) {
            Ok(mark) => mark,
            Err(rejection) => {
                debug!(room = %room.id, %rejection, "ignoring move");
                return Vec::new();
            }
        };

        let mut events = room.broadcast(OutboundEvent::MatchBoardUpdated {
            board: room.board.clone(),
            turn: room.turn().clone(),
        });

        let won = has_winning_run(&room.board, pos, mark, self.config.win_length);
        if !won && !room.board.is_full() {
            return events;
        }

        let winner = won.then(|| user.clone());
        room.finish(winner.clone());
        events.extend(room.broadcast(OutboundEvent::MatchFinished {
            winner: winner.clone(),
            board: room.board.clone(),
        }));

        let room_id = room.id.clone();
        let loser = room.opponent_of(user).cloned();
        registry.remove_room(&room_id);
        drop(room);

        match (winner, loser) {
            (Some(winner), Some(loser)) => {
                info!(room = %room_id, %winner, %loser, "match won");
                self.record_result(MatchResult::new(winner, loser));
            }
            _ => info!(room = %room_id, "match drawn on a full board"),
        }

        events
    }

    fn record_result(&self, result: MatchResult) {
        if let Err(err) = self.store.record_match_result(&result) {
            warn!(
                error = %err,
                winner = %result.winner,
                loser = %result.loser,
                "failed to record match result"
            );
        }
    }

    /// Drop a user from the queue and abandon any room they are in.
    #[instrument(skip_all, fields(user = %user))]
    pub fn disconnect(&self, registry: &SessionRegistry, user: &UserId) -> Vec<Envelope> {
        if self.queue.lock().remove(user) {
            debug!("left the waiting queue");
        }

        let mut events = Vec::new();
        if let Some(handle) = registry.room_for(user) {
            let mut room = handle.lock();
            if room.status.is_active() {
                room.abandon(user.clone());
                if let Some(opponent) = room.opponent_of(user) {
                    events.push(Envelope::new(
                        opponent.clone(),
                        OutboundEvent::OpponentDeparted,
                    ));
                }
                info!(room = %room.id, "room abandoned");
            }
            registry.remove_room(&room.id);
        }

        if let Err(err) = registry.apply_player_event(user, PlayerEvent::Disconnect) {
            debug!(error = %err, "disconnect for user that was not connected");
        }
        events
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Zero-based place in the waiting queue.
    pub fn queue_position(&self, user: &UserId) -> Option<usize> {
        self.queue.lock().position(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::random::{ScriptedRandom, SeededRandom};
    use crate::state::store::{FlakyStore, MemoryStore};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::thread;

    fn uid(id: &str) -> UserId {
        UserId::from(id)
    }

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    fn setup_with(store: Arc<dyn StateStore>) -> (MatchEngine, SessionRegistry) {
        let engine = MatchEngine::new(
            EngineConfig::default(),
            store,
            Box::new(ScriptedRandom::new(vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9])),
        );
        let registry = SessionRegistry::new();
        for id in ["u1", "u2", "u3", "u4"] {
            registry.connect(&uid(id)).unwrap();
        }
        (engine, registry)
    }

    fn setup() -> (MatchEngine, SessionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (engine, registry) = setup_with(store.clone());
        (engine, registry, store)
    }

    fn paired(engine: &MatchEngine, registry: &SessionRegistry) -> RoomId {
        engine.join_queue(registry, &uid("u1"));
        let events = engine.join_queue(registry, &uid("u2"));
        match &events.last().unwrap().event {
            OutboundEvent::MatchStarted { room_id, .. } => room_id.clone(),
            other => panic!("expected match start, got {:?}", other),
        }
    }

    /// Pair u1 and u2 and leave u1 one move from five at row 7.
    fn one_move_from_win(engine: &MatchEngine, registry: &SessionRegistry) {
        paired(engine, registry);
        for col in 7..11 {
            engine.make_move(registry, &uid("u1"), p(7, col));
            engine.make_move(registry, &uid("u2"), p(0, col));
        }
    }

    #[test]
    fn test_room_place_and_turns() {
        let mut room = MatchRoom::new(RoomId::new("room-1"), uid("a"), uid("b"), 15);
        assert!(room.is_turn(&uid("a")));
        assert_eq!(room.mark_of(&uid("b")), Some(Mark::O));

        assert_eq!(room.place(&uid("b"), p(0, 0)), Err(MatchRejection::NotYourTurn));
        assert_eq!(room.place(&uid("a"), p(0, 0)), Ok(Mark::X));
        assert!(room.is_turn(&uid("b")));
        assert_eq!(room.place(&uid("b"), p(0, 0)), Err(MatchRejection::CellOccupied));
        assert_eq!(room.place(&uid("b"), p(15, 0)), Err(MatchRejection::OutOfBounds));
        assert_eq!(room.place(&uid("c"), p(1, 1)), Err(MatchRejection::NotParticipant));

        room.abandon(uid("b"));
        assert_eq!(room.place(&uid("b"), p(1, 1)), Err(MatchRejection::RoomClosed));
    }

    #[test]
    fn test_waiting_queue_fifo() {
        let mut queue = WaitingQueue::new();
        assert!(queue.push(uid("a")));
        assert!(!queue.push(uid("a")));
        assert!(queue.push(uid("b")));
        assert!(queue.push(uid("c")));
        assert_eq!(queue.pop_pair(), Some((uid("a"), uid("b"))));
        assert_eq!(queue.pop_pair(), None);
        assert_eq!(queue.position(&uid("c")), Some(0));
    }

    #[test]
    fn test_matchmaking_is_fifo_pairs() {
        let (engine, registry, _) = setup();

        let first = engine.join_queue(&registry, &uid("u1"));
        assert_eq!(first, vec![Envelope::new(uid("u1"), OutboundEvent::Queued)]);

        let second = engine.join_queue(&registry, &uid("u2"));
        assert_eq!(second.len(), 3);
        let room_id = match &second[1].event {
            OutboundEvent::MatchStarted { room_id, mark, turn } => {
                assert_eq!(second[1].to, uid("u1"));
                assert_eq!(*mark, Mark::X);
                assert_eq!(*turn, uid("u1"));
                room_id.clone()
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(
            second[2],
            Envelope::new(
                uid("u2"),
                OutboundEvent::MatchStarted {
                    room_id: room_id.clone(),
                    mark: Mark::O,
                    turn: uid("u1"),
                }
            )
        );
        assert_eq!(room_id.as_str().len(), 10);

        let third = engine.join_queue(&registry, &uid("u3"));
        assert_eq!(third.len(), 1);
        assert_eq!(engine.queue_len(), 1);
        assert_eq!(engine.queue_position(&uid("u3")), Some(0));
        assert_eq!(registry.location(&uid("u3")), PlayerLocation::Queued);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_join_queue_noops() {
        let (engine, registry, _) = setup();

        engine.join_queue(&registry, &uid("u1"));
        assert!(engine.join_queue(&registry, &uid("u1")).is_empty());
        assert_eq!(engine.queue_len(), 1);

        engine.join_queue(&registry, &uid("u2"));
        assert!(engine.join_queue(&registry, &uid("u1")).is_empty());
        assert_eq!(engine.queue_len(), 0);

        // never connected
        assert!(engine.join_queue(&registry, &uid("ghost")).is_empty());
    }

    #[test]
    fn test_move_broadcasts_board_and_turn() {
        let (engine, registry, _) = setup();
        paired(&engine, &registry);

        let events = engine.make_move(&registry, &uid("u1"), p(7, 7));
        assert_eq!(events.len(), 2);
        for envelope in &events {
            match &envelope.event {
                OutboundEvent::MatchBoardUpdated { board, turn } => {
                    assert_eq!(board.get(p(7, 7)), Some(Mark::X));
                    assert_eq!(*turn, uid("u2"));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(events[0].to, uid("u1"));
        assert_eq!(events[1].to, uid("u2"));
    }

    #[test]
    fn test_illegal_moves_are_ignored() {
        let (engine, registry, _) = setup();
        paired(&engine, &registry);

        // wrong turn
        assert!(engine.make_move(&registry, &uid("u2"), p(0, 0)).is_empty());
        // out of bounds
        assert!(engine.make_move(&registry, &uid("u1"), p(15, 3)).is_empty());
        // not in a room
        assert!(engine.make_move(&registry, &uid("u3"), p(0, 0)).is_empty());

        engine.make_move(&registry, &uid("u1"), p(0, 0));
        // occupied
        assert!(engine.make_move(&registry, &uid("u2"), p(0, 0)).is_empty());

        let handle = registry.room_for(&uid("u1")).unwrap();
        let room = handle.lock();
        assert_eq!(room.move_count, 1);
        assert!(room.is_turn(&uid("u2")));
    }

    #[test]
    fn test_five_in_a_row_wins_and_destroys_room() {
        let (engine, registry, store) = setup();
        paired(&engine, &registry);

        for col in 7..11 {
            let events = engine.make_move(&registry, &uid("u1"), p(7, col));
            assert_eq!(events.len(), 2);
            engine.make_move(&registry, &uid("u2"), p(0, col));
        }

        let events = engine.make_move(&registry, &uid("u1"), p(7, 11));
        assert_eq!(events.len(), 4);
        for envelope in &events[2..] {
            match &envelope.event {
                OutboundEvent::MatchFinished { winner, board } => {
                    assert_eq!(*winner, Some(uid("u1")));
                    assert_eq!(board.get(p(7, 11)), Some(Mark::X));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(registry.room_count(), 0);
        assert!(registry.room_for(&uid("u1")).is_none());
        assert_eq!(registry.location(&uid("u1")), PlayerLocation::Connected);
        assert!(engine.make_move(&registry, &uid("u2"), p(1, 1)).is_empty());

        let results = store.recent_match_results(10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].winner, uid("u1"));
        assert_eq!(results[0].loser, uid("u2"));
    }

    #[test]
    fn test_result_store_failure_is_swallowed() {
        let store = Arc::new(FlakyStore::failing());
        let (engine, registry) = setup_with(store.clone());
        paired(&engine, &registry);

        for col in 0..4 {
            engine.make_move(&registry, &uid("u1"), p(0, col));
            engine.make_move(&registry, &uid("u2"), p(1, col));
        }
        let events = engine.make_move(&registry, &uid("u1"), p(0, 4));
        assert_eq!(events.len(), 4);
        assert_eq!(registry.room_count(), 0);
        assert_eq!(store.inner.result_count(), 0);

        // the players can queue again straight away
        engine.join_queue(&registry, &uid("u1"));
        let events = engine.join_queue(&registry, &uid("u2"));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_disconnect_mid_room_notifies_opponent_once() {
        let (engine, registry, _) = setup();
        paired(&engine, &registry);
        engine.make_move(&registry, &uid("u1"), p(7, 7));

        let events = engine.disconnect(&registry, &uid("u2"));
        assert_eq!(
            events,
            vec![Envelope::new(uid("u1"), OutboundEvent::OpponentDeparted)]
        );
        assert_eq!(registry.room_count(), 0);
        assert!(engine.make_move(&registry, &uid("u1"), p(0, 0)).is_empty());
        assert!(engine.make_move(&registry, &uid("u2"), p(0, 0)).is_empty());
        assert_eq!(registry.location(&uid("u2")), PlayerLocation::Disconnected);
        assert_eq!(registry.location(&uid("u1")), PlayerLocation::Connected);

        // a second disconnect has nothing left to notify
        assert!(engine.disconnect(&registry, &uid("u1")).is_empty());
    }

    #[test]
    fn test_disconnect_leaves_queue() {
        let (engine, registry, _) = setup();
        engine.join_queue(&registry, &uid("u1"));
        assert!(engine.disconnect(&registry, &uid("u1")).is_empty());
        assert_eq!(engine.queue_len(), 0);

        // u2 waits alone instead of pairing with the departed user
        let events = engine.join_queue(&registry, &uid("u2"));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_full_board_is_a_draw() {
        let config = EngineConfig {
            match_board_size: 5,
            ..EngineConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let engine = MatchEngine::new(config, store.clone(), Box::new(ScriptedRandom::zeros()));
        let registry = SessionRegistry::new();
        for id in ["u1", "u2"] {
            registry.connect(&uid(id)).unwrap();
            registry
                .apply_player_event(&uid(id), PlayerEvent::JoinQueue)
                .unwrap();
        }

        let mut room = MatchRoom::new(RoomId::new("draw-room1"), uid("u1"), uid("u2"), 5);
        let pattern = ["XXOOX", "OOXXO", "XXOOX", "OOXXO", "XXOO."];
        for (row, line) in pattern.iter().enumerate() {
            for (col, ch) in line.chars().enumerate() {
                let mark = match ch {
                    'X' => Some(Mark::X),
                    'O' => Some(Mark::O),
                    _ => None,
                };
                room.board.set(p(row, col), mark);
            }
        }
        registry.register_room(room);

        let events = engine.make_move(&registry, &uid("u1"), p(4, 4));
        assert_eq!(events.len(), 4);
        assert!(events[2..].iter().all(|e| matches!(
            &e.event,
            OutboundEvent::MatchFinished { winner: None, board } if board.is_full()
        )));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(store.result_count(), 0);
        assert_eq!(registry.location(&uid("u2")), PlayerLocation::Connected);
    }

    #[test]
    fn test_concurrent_joins_pair_everyone() {
        let engine = MatchEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Box::new(SeededRandom::new(11)),
        );
        let registry = SessionRegistry::new();
        let users: Vec<UserId> = (0..8).map(|i| uid(&format!("player-{i}"))).collect();
        for user in &users {
            registry.connect(user).unwrap();
        }

        let (engine, registry) = (&engine, &registry);
        let events: Vec<Envelope> = thread::scope(|scope| {
            let workers: Vec<_> = users
                .iter()
                .map(|user| scope.spawn(move || engine.join_queue(registry, user)))
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        assert_eq!(engine.queue_len(), 0);
        assert_eq!(registry.room_count(), 4);

        let mut seats: HashMap<RoomId, Vec<UserId>> = HashMap::new();
        for envelope in &events {
            if let OutboundEvent::MatchStarted { room_id, .. } = &envelope.event {
                seats
                    .entry(room_id.clone())
                    .or_default()
                    .push(envelope.to.clone());
            }
        }
        assert_eq!(seats.len(), 4);
        assert!(seats.values().all(|seated| seated.len() == 2));

        for user in &users {
            assert!(registry.room_for(user).is_some());
            assert!(matches!(
                registry.location(user),
                PlayerLocation::InRoom { .. }
            ));
        }
    }

    #[test]
    fn test_winning_move_races_departure() {
        for _ in 0..16 {
            let (engine, registry, store) = setup();
            one_move_from_win(&engine, &registry);

            let (moved, departed) = thread::scope(|scope| {
                let mover = scope.spawn(|| engine.make_move(&registry, &uid("u1"), p(7, 11)));
                let leaver = scope.spawn(|| engine.disconnect(&registry, &uid("u2")));
                (mover.join().unwrap(), leaver.join().unwrap())
            });

            let finished = moved
                .iter()
                .any(|e| matches!(e.event, OutboundEvent::MatchFinished { .. }));
            let abandoned = departed
                .iter()
                .any(|e| e.event == OutboundEvent::OpponentDeparted);
            assert!(finished != abandoned);

            assert_eq!(registry.room_count(), 0);
            assert_eq!(store.result_count(), usize::from(finished));
            assert_eq!(registry.location(&uid("u1")), PlayerLocation::Connected);
            assert_eq!(registry.location(&uid("u2")), PlayerLocation::Disconnected);
        }
    }

    #[test]
    fn test_finished_room_is_unindexed_before_unlock() {
        let (engine, registry, _) = setup();
        one_move_from_win(&engine, &registry);

        let seen = thread::scope(|scope| {
            let watcher = scope.spawn(|| {
                while let Some(handle) = registry.room_for(&uid("u1")) {
                    let room = handle.lock();
                    if !room.status.is_active() {
                        return Some(registry.location(&uid("u1")));
                    }
                    drop(room);
                    thread::yield_now();
                }
                None
            });
            engine.make_move(&registry, &uid("u1"), p(7, 11));
            watcher.join().unwrap()
        });

        // the watcher either missed the room or saw it already unindexed
        if let Some(location) = seen {
            assert_eq!(location, PlayerLocation::Connected);
        }
        assert_eq!(registry.room_count(), 0);
    }
}
