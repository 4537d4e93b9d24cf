//! Engine configuration.
//!
//! Every field has a default matching the standard rules (15x15 Caro with
//! five to win, 9x9 Lines with 5 seeded and 3 upcoming balls), so an empty
//! JSON object is a valid configuration.

use serde::{Deserialize, Serialize};

/// Default Caro board size.
pub const DEFAULT_MATCH_BOARD_SIZE: usize = 15;

/// Default Lines board size.
pub const DEFAULT_PUZZLE_BOARD_SIZE: usize = 9;

/// Tunables for both engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Side length of a Caro board. Default: 15.
    pub match_board_size: usize,
    /// Marks in a row needed to win. Default: 5.
    pub win_length: usize,
    /// Side length of a Lines board. Default: 9.
    pub puzzle_board_size: usize,
    /// Same-coloured balls in a row that clear. Default: 5.
    pub line_length: usize,
    /// Balls seeded on a fresh puzzle board. Default: 5.
    pub initial_pieces: usize,
    /// Upcoming balls predicted after each spawn. Default: 3.
    pub upcoming_pieces: usize,
    /// Length of generated room identifiers. Default: 10.
    pub room_id_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_board_size: DEFAULT_MATCH_BOARD_SIZE,
            win_length: 5,
            puzzle_board_size: DEFAULT_PUZZLE_BOARD_SIZE,
            line_length: 5,
            initial_pieces: 5,
            upcoming_pieces: 3,
            room_id_length: 10,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values describe a playable game.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.win_length < 2 {
            return Err(ConfigError::invalid("win_length must be at least 2"));
        }
        if self.match_board_size < self.win_length {
            return Err(ConfigError::invalid(
                "match_board_size must fit a winning run",
            ));
        }
        if self.line_length < 2 {
            return Err(ConfigError::invalid("line_length must be at least 2"));
        }
        if self.puzzle_board_size < self.line_length {
            return Err(ConfigError::invalid("puzzle_board_size must fit a line"));
        }
        let cells = self.puzzle_board_size * self.puzzle_board_size;
        if self.initial_pieces + self.upcoming_pieces >= cells {
            return Err(ConfigError::invalid(
                "initial_pieces and upcoming_pieces must leave room to move",
            ));
        }
        if self.room_id_length < 6 {
            return Err(ConfigError::invalid("room_id_length must be at least 6"));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(reason: &str) -> Self {
        Self::Invalid {
            reason: reason.to_string(),
        }
    }
}
