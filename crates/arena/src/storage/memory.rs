use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{SessionQuery, Store};
use crate::bracket::{Tournament, TournamentStatus};
use crate::error::ArenaError;
use crate::session::{ClockPair, SessionSnapshot};
use crate::types::{MatchId, MatchStatus, TournamentId, UserId, WagerId};
use crate::wager::{Wager, WagerStatus};

/// In-memory store for tests and the demo binary.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<MatchId, SessionSnapshot>,
    wagers: HashMap<WagerId, Wager>,
    tournaments: HashMap<TournamentId, Tournament>,
    settled: HashSet<MatchId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, snapshot: &SessionSnapshot) -> Result<(), ArenaError> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&snapshot.id) {
            return Err(ArenaError::persistence(format!(
                "session {} already exists",
                snapshot.id
            )));
        }
        inner.sessions.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), ArenaError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get(&snapshot.id) {
            Some(stored) if stored.revision > snapshot.revision => {}
            _ => {
                inner.sessions.insert(snapshot.id, snapshot.clone());
            }
        }
        Ok(())
    }

    async fn update_clock(&self, id: MatchId, remaining: ClockPair) -> Result<bool, ArenaError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&id) {
            Some(stored) if stored.status == MatchStatus::Ongoing => {
                stored.remaining = remaining;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_session(&self, id: MatchId) -> Result<Option<SessionSnapshot>, ArenaError> {
        Ok(self.inner.lock().sessions.get(&id).cloned())
    }

    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<SessionSnapshot>, ArenaError> {
        let inner = self.inner.lock();
        let mut found: Vec<SessionSnapshot> = inner
            .sessions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.ended_at
                .cmp(&a.ended_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn insert_wager(&self, wager: &Wager) -> Result<(), ArenaError> {
        let mut inner = self.inner.lock();
        let duplicate = inner
            .wagers
            .values()
            .any(|w| w.match_id == wager.match_id && w.bettor == wager.bettor);
        if duplicate {
            return Err(ArenaError::state("a wager on this match already exists"));
        }
        inner.wagers.insert(wager.id, wager.clone());
        Ok(())
    }

    async fn find_wager(&self, id: WagerId) -> Result<Option<Wager>, ArenaError> {
        Ok(self.inner.lock().wagers.get(&id).cloned())
    }

    async fn wagers_for_match(
        &self,
        match_id: MatchId,
        status: Option<WagerStatus>,
    ) -> Result<Vec<Wager>, ArenaError> {
        let inner = self.inner.lock();
        let mut found: Vec<Wager> = inner
            .wagers
            .values()
            .filter(|w| w.match_id == match_id && status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|w| w.placed_at);
        Ok(found)
    }

    async fn wagers_for_user(&self, user: UserId) -> Result<Vec<Wager>, ArenaError> {
        let inner = self.inner.lock();
        let mut found: Vec<Wager> = inner
            .wagers
            .values()
            .filter(|w| w.bettor == user)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        Ok(found)
    }

    async fn resolve_wager(
        &self,
        id: WagerId,
        status: WagerStatus,
        payout: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, ArenaError> {
        let mut inner = self.inner.lock();
        let wager = inner
            .wagers
            .get_mut(&id)
            .ok_or_else(|| ArenaError::not_found("wager", id))?;
        if wager.status != WagerStatus::Pending {
            return Ok(false);
        }
        wager.status = status;
        wager.payout = payout;
        wager.settled_at = Some(at);
        Ok(true)
    }

    async fn claim_settlement(&self, match_id: MatchId) -> Result<bool, ArenaError> {
        Ok(self.inner.lock().settled.insert(match_id))
    }

    async fn is_settlement_claimed(&self, match_id: MatchId) -> Result<bool, ArenaError> {
        Ok(self.inner.lock().settled.contains(&match_id))
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), ArenaError> {
        let mut inner = self.inner.lock();
        if inner.tournaments.contains_key(&tournament.id) {
            return Err(ArenaError::persistence(format!(
                "tournament {} already exists",
                tournament.id
            )));
        }
        inner.tournaments.insert(tournament.id, tournament.clone());
        Ok(())
    }

    async fn save_tournament(&self, tournament: &Tournament) -> Result<(), ArenaError> {
        let mut inner = self.inner.lock();
        match inner.tournaments.get(&tournament.id) {
            Some(stored) if stored.revision > tournament.revision => {}
            _ => {
                inner.tournaments.insert(tournament.id, tournament.clone());
            }
        }
        Ok(())
    }

    async fn find_tournament(&self, id: TournamentId) -> Result<Option<Tournament>, ArenaError> {
        Ok(self.inner.lock().tournaments.get(&id).cloned())
    }

    async fn find_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, ArenaError> {
        let inner = self.inner.lock();
        let mut found: Vec<Tournament> = inner
            .tournaments
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.start_time);
        Ok(found)
    }
}
