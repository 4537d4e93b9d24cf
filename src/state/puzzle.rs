//! Lines puzzle sessions.
//!
//! Each user owns one board of coloured balls plus a short list of upcoming
//! pieces. A move travels a ball along an empty path; completing a run of
//! `line_length` clears it, otherwise the upcoming pieces land and a new set
//! is predicted.
//!
//! A move is split in two so the caller can stream the ball's path before the
//! board commits:
//!
//! ```text
//! Idle ──move_ball──▶ AwaitingMove { path, color } ──finalize──▶ Idle
//!                              │
//!                              └──cancel_pending / reset──▶ Idle
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::config::EngineConfig;
use super::grid::{clear_cells, detect_lines, find_shortest_path, Board, CellValue, Position};
use super::player::UserId;
use super::random::{pick, shuffle, RandomSource};
use super::registry::{SessionHandle, SessionRegistry};
use super::store::{PuzzleSnapshot, StateStore, StoreError};

/// Ball colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
}

impl Color {
    pub const PALETTE: [Color; 5] = [
        Color::Red,
        Color::Blue,
        Color::Green,
        Color::Yellow,
        Color::Purple,
    ];

    /// Uniform over the palette.
    pub fn random<R: RandomSource + ?Sized>(rng: &mut R) -> Self {
        Self::PALETTE[rng.next_below(Self::PALETTE.len())]
    }
}

impl CellValue for Color {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Purple => "purple",
        }
    }
}

/// A piece that lands after the next move that clears nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingPiece {
    pub position: Position,
    pub color: Color,
}

impl UpcomingPiece {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "row": self.position.row,
            "col": self.position.col,
            "color": self.color.as_str()
        })
    }
}

/// Move state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PuzzleStatus {
    #[default]
    Idle,
    /// A path was handed out and the board waits for `finalize`
    AwaitingMove { path: Vec<Position>, color: Color },
}

/// Why a puzzle request was refused. The session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PuzzleRejection {
    #[error("no puzzle session")]
    UnknownSession,
    #[error("a move is already in progress")]
    Busy,
    #[error("cell is outside the board")]
    OutOfBounds,
    #[error("origin and target are the same cell")]
    SameCell,
    #[error("no ball at the origin")]
    EmptyOrigin,
    #[error("target cell is occupied")]
    TargetOccupied,
    #[error("no path to the target")]
    NoPath,
    #[error("no move to finalize")]
    NoPendingMove,
    #[error("move does not match the one in progress")]
    MoveMismatch,
}

/// Board and upcoming pieces as shown to the player.
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzleView {
    pub board: Board<Color>,
    pub upcoming: Vec<UpcomingPiece>,
}

impl PuzzleView {
    pub fn to_json(&self) -> serde_json::Value {
        let upcoming: Vec<serde_json::Value> =
            self.upcoming.iter().map(UpcomingPiece::to_json).collect();
        serde_json::json!({
            "board": self.board.to_json(),
            "upcoming": upcoming
        })
    }
}

/// A validated move waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    /// Origin first, target last
    pub path: Vec<Position>,
    pub color: Color,
}

/// Outcome of a committed move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveResolution {
    pub view: PuzzleView,
    /// Cells emptied by completed lines
    pub cleared: BTreeSet<Position>,
    /// Upcoming pieces that landed
    pub spawned: Vec<UpcomingPiece>,
}

/// A suggested legal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hint {
    pub from: Position,
    pub to: Position,
}

impl Hint {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "from": self.from.to_json(),
            "to": self.to.to_json()
        })
    }
}

/// One user's puzzle.
#[derive(Debug, Clone)]
pub struct PuzzleSession {
    pub user_id: UserId,
    pub board: Board<Color>,
    pub upcoming: Vec<UpcomingPiece>,
    pub status: PuzzleStatus,
    pub updated_at: DateTime<Utc>,
}

impl PuzzleSession {
    pub fn new(user_id: UserId, board: Board<Color>, upcoming: Vec<UpcomingPiece>) -> Self {
        Self {
            user_id,
            board,
            upcoming,
            status: PuzzleStatus::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Empty board with seeded pieces and a predicted upcoming set.
    pub fn fresh<R: RandomSource + ?Sized>(
        user_id: UserId,
        config: &EngineConfig,
        rng: &mut R,
    ) -> Self {
        let mut board = Board::new(config.puzzle_board_size);
        let mut empty = board.empty_cells();
        for _ in 0..config.initial_pieces {
            let Some(pos) = pick(rng, &mut empty) else {
                break;
            };
            board.set(pos, Some(Color::random(rng)));
        }
        let upcoming = predict_upcoming(&board, config.upcoming_pieces, rng);
        Self::new(user_id, board, upcoming)
    }

    /// Rebuild a session from storage. Returns `None` when the snapshot does
    /// not fit the configured board.
    pub fn from_snapshot(
        user_id: UserId,
        snapshot: PuzzleSnapshot,
        config: &EngineConfig,
    ) -> Option<Self> {
        let board = Board::from_rows(snapshot.board)?;
        if board.size() != config.puzzle_board_size {
            return None;
        }
        if snapshot.upcoming.len() > config.upcoming_pieces {
            return None;
        }

        let mut seen = BTreeSet::new();
        for piece in &snapshot.upcoming {
            if !board.contains(piece.position) || !seen.insert(piece.position) {
                return None;
            }
        }

        Some(Self {
            user_id,
            board,
            upcoming: snapshot.upcoming,
            status: PuzzleStatus::Idle,
            updated_at: snapshot.updated_at,
        })
    }

    pub fn snapshot(&self) -> PuzzleSnapshot {
        PuzzleSnapshot {
            board: self.board.rows(),
            upcoming: self.upcoming.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn view(&self) -> PuzzleView {
        PuzzleView {
            board: self.board.clone(),
            upcoming: self.upcoming.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.status, PuzzleStatus::AwaitingMove { .. })
    }

    /// Validate a move and mark it in flight. The board is not touched.
    pub fn plan_move(
        &mut self,
        from: Position,
        to: Position,
    ) -> Result<PlannedMove, PuzzleRejection> {
        if self.is_busy() {
            return Err(PuzzleRejection::Busy);
        }
        if !self.board.contains(from) || !self.board.contains(to) {
            return Err(PuzzleRejection::OutOfBounds);
        }
        if from == to {
            return Err(PuzzleRejection::SameCell);
        }
        let color = self.board.get(from).ok_or(PuzzleRejection::EmptyOrigin)?;
        if !self.board.is_empty_at(to) {
            return Err(PuzzleRejection::TargetOccupied);
        }
        let path = find_shortest_path(&self.board, from, to).ok_or(PuzzleRejection::NoPath)?;

        self.status = PuzzleStatus::AwaitingMove {
            path: path.clone(),
            color,
        };
        Ok(PlannedMove { path, color })
    }

    /// Drop the in-flight move. Returns false if there was none.
    pub fn cancel(&mut self) -> bool {
        let was_busy = self.is_busy();
        self.status = PuzzleStatus::Idle;
        was_busy
    }

    /// Commit the in-flight move, clear lines and land upcoming pieces.
    pub fn resolve<R: RandomSource + ?Sized>(
        &mut self,
        path: &[Position],
        color: Color,
        config: &EngineConfig,
        rng: &mut R,
    ) -> Result<MoveResolution, PuzzleRejection> {
        match &self.status {
            PuzzleStatus::Idle => return Err(PuzzleRejection::NoPendingMove),
            PuzzleStatus::AwaitingMove {
                path: pending,
                color: pending_color,
            } => {
                if pending.as_slice() != path || *pending_color != color {
                    return Err(PuzzleRejection::MoveMismatch);
                }
            }
        }
        let (Some(&origin), Some(&target)) = (path.first(), path.last()) else {
            return Err(PuzzleRejection::MoveMismatch);
        };

        self.status = PuzzleStatus::Idle;
        self.board.set(origin, None);
        self.board.set(target, Some(color));

        let mut cleared = detect_lines(&self.board, config.line_length);
        let mut spawned = Vec::new();
        if cleared.is_empty() {
            spawned = self.spawn_upcoming();
            self.upcoming = predict_upcoming(&self.board, config.upcoming_pieces, rng);
            cleared = detect_lines(&self.board, config.line_length);
        }
        clear_cells(&mut self.board, cleared.iter().copied());
        self.updated_at = Utc::now();

        Ok(MoveResolution {
            view: self.view(),
            cleared,
            spawned,
        })
    }

    /// Land every upcoming piece whose cell is still empty.
    pub fn spawn_upcoming(&mut self) -> Vec<UpcomingPiece> {
        let mut landed = Vec::new();
        for piece in &self.upcoming {
            if self.board.is_empty_at(piece.position) {
                self.board.set(piece.position, Some(piece.color));
                landed.push(*piece);
            }
        }
        landed
    }
}

/// Choose `count` distinct empty cells and a colour for each.
pub fn predict_upcoming<R: RandomSource + ?Sized>(
    board: &Board<Color>,
    count: usize,
    rng: &mut R,
) -> Vec<UpcomingPiece> {
    let mut empty = board.empty_cells();
    let mut upcoming = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(position) = pick(rng, &mut empty) else {
            break;
        };
        upcoming.push(UpcomingPiece {
            position,
            color: Color::random(rng),
        });
    }
    upcoming
}

/// First reachable (piece, empty cell) pair, both visited in random order.
pub fn find_hint<R: RandomSource + ?Sized>(board: &Board<Color>, rng: &mut R) -> Option<Hint> {
    let mut pieces = board.occupied_cells();
    shuffle(rng, &mut pieces);

    for from in pieces {
        let mut targets = board.empty_cells();
        shuffle(rng, &mut targets);
        for to in targets {
            if find_shortest_path(board, from, to).is_some() {
                return Some(Hint { from, to });
            }
        }
    }
    None
}

/// Boards showing the ball at each step of `path` after the origin.
pub fn path_frames(board: &Board<Color>, path: &[Position], color: Color) -> Vec<Board<Color>> {
    let mut frame = board.clone();
    path.windows(2)
        .map(|step| {
            frame.set(step[0], None);
            frame.set(step[1], Some(color));
            frame.clone()
        })
        .collect()
}

/// Puzzle transitions over sessions held in the registry.
///
/// Lock order: a session, then the registry, then the random source.
pub struct PuzzleEngine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl PuzzleEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            store,
            rng: Mutex::new(rng),
        }
    }

    fn fresh_session(&self, user: &UserId) -> PuzzleSession {
        let mut rng = self.rng.lock();
        PuzzleSession::fresh(user.clone(), &self.config, &mut **rng)
    }

    /// Stored session for a user. Undecodable or ill-fitting records come back
    /// as `None`; an unreachable store is an error so nothing overwrites it.
    fn load(&self, user: &UserId) -> Result<Option<PuzzleSession>, StoreError> {
        let snapshot = match self.store.load_puzzle_session(user) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(err @ StoreError::Decode { .. }) => {
                warn!(%user, error = %err, "discarding unreadable puzzle session");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let session = PuzzleSession::from_snapshot(user.clone(), snapshot, &self.config);
        if session.is_none() {
            warn!(%user, "discarding stored puzzle session that does not fit the board");
        }
        Ok(session)
    }

    fn persist(&self, session: &PuzzleSession) {
        if let Err(err) = self
            .store
            .save_puzzle_session(&session.user_id, &session.snapshot())
        {
            warn!(user = %session.user_id, error = %err, "failed to persist puzzle session");
        }
    }

    fn session(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
    ) -> Result<SessionHandle, PuzzleRejection> {
        registry.session(user).ok_or(PuzzleRejection::UnknownSession)
    }

    /// Resident session, else the stored one, else a freshly seeded board.
    ///
    /// If the store cannot be read, nothing becomes resident and the next call
    /// retries the load.
    #[instrument(skip_all, fields(user = %user))]
    pub fn init(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
    ) -> Result<PuzzleView, StoreError> {
        if let Some(handle) = registry.session(user) {
            let session = handle.lock();
            return Ok(session.view());
        }

        let (session, created) = match self.load(user) {
            Ok(Some(session)) => (session, false),
            Ok(None) => (self.fresh_session(user), true),
            Err(err) => {
                warn!(error = %err, "failed to load puzzle session");
                return Err(err);
            }
        };

        let (handle, leftover) = registry.insert_session(session);
        let session = handle.lock();
        if leftover.is_none() && created {
            info!("puzzle session created");
            self.persist(&session);
        }
        Ok(session.view())
    }

    /// Validate a move and return its path. The board changes on `finalize`.
    #[instrument(skip_all, fields(user = %user))]
    pub fn move_ball(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
        from: Position,
        to: Position,
    ) -> Result<PlannedMove, PuzzleRejection> {
        let handle = self.session(registry, user)?;
        let mut session = handle.lock();
        let planned = session.plan_move(from, to);
        if let Err(rejection) = &planned {
            debug!(%rejection, "puzzle move rejected");
        }
        planned
    }

    /// Commit the in-flight move and persist the result.
    #[instrument(skip_all, fields(user = %user))]
    pub fn finalize(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
        path: &[Position],
        color: Color,
    ) -> Result<MoveResolution, PuzzleRejection> {
        let handle = self.session(registry, user)?;
        let mut session = handle.lock();
        let resolution = {
            let mut rng = self.rng.lock();
            session.resolve(path, color, &self.config, &mut **rng)?
        };
        if !resolution.cleared.is_empty() {
            debug!(cleared = resolution.cleared.len(), "lines cleared");
        }
        self.persist(&session);
        Ok(resolution)
    }

    /// Abandon an in-flight move without touching the board.
    pub fn cancel_pending(&self, registry: &SessionRegistry, user: &UserId) -> bool {
        let Some(handle) = registry.session(user) else {
            return false;
        };
        let mut session = handle.lock();
        session.cancel()
    }

    /// Replace the user's board with a freshly seeded one.
    #[instrument(skip_all, fields(user = %user))]
    pub fn reset(&self, registry: &SessionRegistry, user: &UserId) -> PuzzleView {
        let handle = match registry.session(user) {
            Some(handle) => handle,
            None => registry.insert_session(self.fresh_session(user)).0,
        };

        let mut session = handle.lock();
        let fresh = {
            let mut rng = self.rng.lock();
            PuzzleSession::fresh(user.clone(), &self.config, &mut **rng)
        };
        *session = fresh;
        info!("puzzle session reset");
        self.persist(&session);
        session.view()
    }

    #[instrument(skip_all, fields(user = %user))]
    pub fn hint(
        &self,
        registry: &SessionRegistry,
        user: &UserId,
    ) -> Result<Option<Hint>, PuzzleRejection> {
        let handle = self.session(registry, user)?;
        let session = handle.lock();
        let mut rng = self.rng.lock();
        Ok(find_hint(&session.board, &mut **rng))
    }

    pub fn view(&self, registry: &SessionRegistry, user: &UserId) -> Option<PuzzleView> {
        let handle = registry.session(user)?;
        let session = handle.lock();
        Some(session.view())
    }
}
