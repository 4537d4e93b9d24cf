//! State store interface.
//!
//! The durable database is an external collaborator. Engines only need the
//! operations on [`StateStore`]; [`MemoryStore`] backs tests and single-node
//! deployments. Failures surface as [`StoreError`] and callers log and
//! swallow them.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::player::UserId;
use super::puzzle::{Color, UpcomingPiece};

/// Persisted form of a puzzle session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleSnapshot {
    /// Board rows, `None` for empty cells
    pub board: Vec<Vec<Option<Color>>>,
    pub upcoming: Vec<UpcomingPiece>,
    pub updated_at: DateTime<Utc>,
}

/// A completed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: UserId,
    pub loser: UserId,
    pub finished_at: DateTime<Utc>,
}

impl MatchResult {
    pub fn new(winner: UserId, loser: UserId) -> Self {
        Self {
            winner,
            loser,
            finished_at: Utc::now(),
        }
    }
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode record for {user}: {source}")]
    Decode {
        user: UserId,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable persistence consumed by the engines.
pub trait StateStore: Send + Sync {
    fn load_puzzle_session(&self, user: &UserId) -> Result<Option<PuzzleSnapshot>, StoreError>;

    /// Upsert a user's puzzle session.
    fn save_puzzle_session(
        &self,
        user: &UserId,
        snapshot: &PuzzleSnapshot,
    ) -> Result<(), StoreError>;

    fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError>;

    /// Most recent results first.
    fn recent_match_results(&self, limit: usize) -> Result<Vec<MatchResult>, StoreError>;
}

/// In-memory store. Sessions are kept as encoded JSON, the same shape a
/// document database would hold.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<UserId, String>>,
    results: Mutex<Vec<MatchResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }
}

impl StateStore for MemoryStore {
    fn load_puzzle_session(&self, user: &UserId) -> Result<Option<PuzzleSnapshot>, StoreError> {
        let sessions = self.sessions.lock();
        let Some(raw) = sessions.get(user) else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                user: user.clone(),
                source,
            })
    }

    fn save_puzzle_session(
        &self,
        user: &UserId,
        snapshot: &PuzzleSnapshot,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot).map_err(StoreError::Encode)?;
        self.sessions.lock().insert(user.clone(), raw);
        Ok(())
    }

    fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        self.results.lock().push(result.clone());
        Ok(())
    }

    fn recent_match_results(&self, limit: usize) -> Result<Vec<MatchResult>, StoreError> {
        let results = self.results.lock();
        Ok(results.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Store a raw record as if written by another process.
    pub fn insert_raw(&self, user: &UserId, raw: &str) {
        self.sessions.lock().insert(user.clone(), raw.to_string());
    }
}

/// Store whose calls can be made to fail, for failure-path tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub failing: AtomicBool,
    /// Loads still to fail before reads recover
    pub load_failures: AtomicUsize,
}

#[cfg(test)]
impl FlakyStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next_loads(&self, count: usize) {
        self.load_failures.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn check_load(&self) -> Result<(), StoreError> {
        let consumed = self
            .load_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(unavailable());
        }
        self.check()
    }
}

#[cfg(test)]
fn unavailable() -> StoreError {
    StoreError::Unavailable {
        reason: "connection refused".to_string(),
    }
}

#[cfg(test)]
impl StateStore for FlakyStore {
    fn load_puzzle_session(&self, user: &UserId) -> Result<Option<PuzzleSnapshot>, StoreError> {
        self.check_load()?;
        self.inner.load_puzzle_session(user)
    }

    fn save_puzzle_session(
        &self,
        user: &UserId,
        snapshot: &PuzzleSnapshot,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_puzzle_session(user, snapshot)
    }

    fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        self.check()?;
        self.inner.record_match_result(result)
    }

    fn recent_match_results(&self, limit: usize) -> Result<Vec<MatchResult>, StoreError> {
        self.check()?;
        self.inner.recent_match_results(limit)
    }
}
