//! Persistence seam for sessions, wagers and tournaments.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bracket::{Tournament, TournamentStatus};
use crate::error::ArenaError;
use crate::session::{ClockPair, SessionSnapshot};
use crate::types::{MatchId, MatchStatus, TournamentId, UserId, WagerId};
use crate::wager::{Wager, WagerStatus};

/// Predicate for [`Store::find_sessions`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub status: Option<MatchStatus>,
    pub participant: Option<UserId>,
    pub tournament: Option<TournamentId>,
    /// Results are ordered newest first (by end time, then creation time)
    /// and truncated to `limit`.
    pub limit: Option<usize>,
}

impl SessionQuery {
    #[must_use]
    pub fn matches(&self, s: &SessionSnapshot) -> bool {
        self.status.map_or(true, |st| s.status == st)
            && self.participant.map_or(true, |u| s.involves(u))
            && self
                .tournament
                .map_or(true, |t| s.tournament.is_some_and(|l| l.tournament_id == t))
    }
}

/// Storage for arena records.
///
/// Writes carry a revision and implementations must never replace a stored
/// record with an older revision.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new session. Fails if the id exists.
    async fn insert_session(&self, snapshot: &SessionSnapshot) -> Result<(), ArenaError>;

    /// Replace a session unless the stored copy has a newer revision.
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), ArenaError>;

    /// Update remaining time of an ongoing session. Returns `false` when the
    /// stored session is missing or no longer ongoing.
    async fn update_clock(&self, id: MatchId, remaining: ClockPair) -> Result<bool, ArenaError>;

    async fn find_session(&self, id: MatchId) -> Result<Option<SessionSnapshot>, ArenaError>;

    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<SessionSnapshot>, ArenaError>;

    /// Insert a wager. A bettor holds at most one wager per match; a second
    /// one is a state error.
    async fn insert_wager(&self, wager: &Wager) -> Result<(), ArenaError>;

    async fn find_wager(&self, id: WagerId) -> Result<Option<Wager>, ArenaError>;

    async fn wagers_for_match(
        &self,
        match_id: MatchId,
        status: Option<WagerStatus>,
    ) -> Result<Vec<Wager>, ArenaError>;

    async fn wagers_for_user(&self, user: UserId) -> Result<Vec<Wager>, ArenaError>;

    /// Move a pending wager to `status`. Returns `false` if the wager was not
    /// pending, which makes resolution idempotent.
    async fn resolve_wager(
        &self,
        id: WagerId,
        status: WagerStatus,
        payout: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, ArenaError>;

    /// Record that settlement of `match_id` has begun. Returns `false` if it
    /// was already claimed, so exactly one caller settles a match.
    async fn claim_settlement(&self, match_id: MatchId) -> Result<bool, ArenaError>;

    async fn is_settlement_claimed(&self, match_id: MatchId) -> Result<bool, ArenaError>;

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), ArenaError>;

    /// Replace a tournament unless the stored copy has a newer revision.
    async fn save_tournament(&self, tournament: &Tournament) -> Result<(), ArenaError>;

    async fn find_tournament(&self, id: TournamentId) -> Result<Option<Tournament>, ArenaError>;

    async fn find_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, ArenaError>;
}
