//! Exactly-once settlement of finished matches.
//!
//! Both the move path and the flag-fall path hand their outcome to
//! [`SettlementCoordinator::settle`]. The first call per match id claims the
//! match in the store and wins, every later call is a silent no-op. Wager resolution and bracket advancement run
//! independently; a failure in one is logged and never undoes the other or
//! the finished match.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::bracket::{BracketAdvance, BracketEngine, Tournament};
use crate::error::Result;
use crate::metrics::ArenaMetrics;
use crate::storage::Store;
use crate::types::{MatchId, MatchOutcome, MatchResult};
use crate::wager::{Wager, WagerStatus};

/// What one settlement run did.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    /// Wagers moved out of pending by this run.
    pub wagers: Vec<Wager>,
    /// Set when the match was tournament-linked and the bracket accepted it.
    pub bracket: Option<(Tournament, BracketAdvance)>,
}

pub struct SettlementCoordinator {
    store: Arc<dyn Store>,
    brackets: Arc<BracketEngine>,
    multiplier: u64,
    metrics: Arc<ArenaMetrics>,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        brackets: Arc<BracketEngine>,
        multiplier: u64,
        metrics: Arc<ArenaMetrics>,
    ) -> Self {
        Self {
            store,
            brackets,
            multiplier,
            metrics,
        }
    }

    /// Whether settlement has started for `match_id`.
    pub async fn is_settled(&self, match_id: MatchId) -> Result<bool> {
        self.store.is_settlement_claimed(match_id).await
    }

    /// Settle `outcome`. Returns `None` if this match was already settled.
    #[instrument(skip(self, outcome), fields(match_id = %outcome.match_id, result = %outcome.result))]
    pub async fn settle(&self, outcome: &MatchOutcome) -> Option<Settlement> {
        match self.store.claim_settlement(outcome.match_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("already settled");
                return None;
            }
            Err(e) => {
                error!(error = %e, "failed to claim settlement");
                return None;
            }
        }

        let wagers = match self.settle_wagers(outcome.match_id, outcome.result).await {
            Ok(wagers) => wagers,
            Err(e) => {
                error!(error = %e, "wager settlement failed");
                Vec::new()
            }
        };

        let bracket = match outcome.tournament {
            Some(link) => match self.brackets.advance(outcome).await {
                Ok(advanced) => Some(advanced),
                Err(e) => {
                    error!(tournament_id = %link.tournament_id, error = %e, "bracket advancement failed");
                    None
                }
            },
            None => None,
        };

        info!(wagers = wagers.len(), tournament = bracket.is_some(), "match settled");
        Some(Settlement { wagers, bracket })
    }

    async fn settle_wagers(&self, match_id: MatchId, result: MatchResult) -> Result<Vec<Wager>> {
        let pending = self
            .store
            .wagers_for_match(match_id, Some(WagerStatus::Pending))
            .await?;
        let mut resolved = Vec::with_capacity(pending.len());
        for wager in pending {
            match self.resolve(wager, result).await {
                Ok(Some(w)) => resolved.push(w),
                Ok(None) => {}
                // One bad wager does not hold up the rest.
                Err(e) => warn!(error = %e, "failed to resolve wager"),
            }
        }
        Ok(resolved)
    }

    /// Resolve a single pending wager against `result`. Returns `None` if it
    /// had already left pending.
    pub async fn resolve(&self, mut wager: Wager, result: MatchResult) -> Result<Option<Wager>> {
        let (status, payout) = wager.resolution(result, self.multiplier);
        let now = Utc::now();
        if !self.store.resolve_wager(wager.id, status, payout, now).await? {
            return Ok(None);
        }
        self.metrics.settled_wagers.inc();
        debug!(wager_id = %wager.id, bettor = %wager.bettor, %status, payout, "wager resolved");
        wager.status = status;
        wager.payout = payout;
        wager.settled_at = Some(now);
        Ok(Some(wager))
    }

    /// Cancel every pending wager of an abandoned match.
    pub async fn cancel_wagers(&self, match_id: MatchId) -> Result<usize> {
        let pending = self
            .store
            .wagers_for_match(match_id, Some(WagerStatus::Pending))
            .await?;
        let now = Utc::now();
        let mut cancelled = 0;
        for wager in pending {
            if self
                .store
                .resolve_wager(wager.id, WagerStatus::Cancelled, 0, now)
                .await?
            {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(match_id = %match_id, cancelled, "wagers cancelled");
        }
        Ok(cancelled)
    }
}
