//! Inbound and outbound events.
//!
//! The transport decodes client frames into [`InboundEvent`]s and delivers
//! every [`Envelope`] the engines return to its addressee.

use serde::Deserialize;

use super::grid::{Board, CellValue, Position};
use super::player::UserId;
use super::puzzle::{Color, Hint, PuzzleView};
use super::room::{Mark, RoomId};

/// Events a client can send once its identity is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Connect,
    QueueForMatch,
    SubmitMatchMove { row: usize, col: usize },
    SubmitPuzzleMove { from: Position, to: Position },
    RequestPuzzleReset,
    RequestPuzzleHint,
    Disconnect,
}

impl InboundEvent {
    /// Decode a JSON frame such as `{"type": "submit_match_move", "row": 7, "col": 7}`.
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::QueueForMatch => "queue_for_match",
            Self::SubmitMatchMove { .. } => "submit_match_move",
            Self::SubmitPuzzleMove { .. } => "submit_puzzle_move",
            Self::RequestPuzzleReset => "request_puzzle_reset",
            Self::RequestPuzzleHint => "request_puzzle_hint",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Event decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Connected {
        user_id: UserId,
    },
    Queued,
    MatchStarted {
        room_id: RoomId,
        mark: Mark,
        turn: UserId,
    },
    MatchBoardUpdated {
        board: Board<Mark>,
        turn: UserId,
    },
    /// `winner` is `None` for a draw on a full board
    MatchFinished {
        winner: Option<UserId>,
        board: Board<Mark>,
    },
    OpponentDeparted,
    PuzzleBoardUpdated {
        view: PuzzleView,
    },
    /// One intermediate board while a ball travels its path
    PathStep {
        board: Board<Color>,
    },
    Hint {
        hint: Option<Hint>,
    },
    Rejected {
        reason: String,
    },
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Queued => "queued",
            Self::MatchStarted { .. } => "match_started",
            Self::MatchBoardUpdated { .. } | Self::PuzzleBoardUpdated { .. } => "board_updated",
            Self::MatchFinished { .. } => "match_finished",
            Self::OpponentDeparted => "opponent_departed",
            Self::PathStep { .. } => "path_step",
            Self::Hint { .. } => "hint",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = match self {
            Self::Connected { user_id } => serde_json::json!({"user_id": user_id}),
            Self::Queued | Self::OpponentDeparted => serde_json::json!({}),
            Self::MatchStarted {
                room_id,
                mark,
                turn,
            } => serde_json::json!({
                "room_id": room_id,
                "mark": mark.as_str(),
                "turn": turn
            }),
            Self::MatchBoardUpdated { board, turn } => serde_json::json!({
                "board": board.to_json(),
                "turn": turn
            }),
            Self::MatchFinished { winner, board } => serde_json::json!({
                "winner": winner,
                "board": board.to_json()
            }),
            Self::PuzzleBoardUpdated { view } => view.to_json(),
            Self::PathStep { board } => serde_json::json!({"board": board.to_json()}),
            Self::Hint { hint } => match hint {
                Some(hint) => hint.to_json(),
                None => serde_json::json!({"from": null, "to": null}),
            },
            Self::Rejected { reason } => serde_json::json!({"reason": reason}),
        };
        obj["type"] = serde_json::json!(self.name());
        obj
    }
}

/// An outbound event addressed to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: UserId,
    pub event: OutboundEvent,
}

impl Envelope {
    pub fn new(to: UserId, event: OutboundEvent) -> Self {
        Self { to, event }
    }
}
