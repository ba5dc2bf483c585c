//! Single-elimination tournaments.
//!
//! A [`Tournament`] owns its [`Bracket`] and all transitions on it are plain
//! synchronous methods. [`BracketEngine`] keeps the live tournaments, one
//! mutex each, and writes every committed change through to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{ArenaError, Result};
use crate::storage::Store;
use crate::types::{MatchId, MatchOutcome, MatchResult, TimeControl, TournamentId, UserId};

/// One bracket slot: a registered user or a bot placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user", rename_all = "lowercase")]
pub enum Seed {
    Player(UserId),
    Bot,
}

impl Seed {
    #[must_use]
    pub const fn user(self) -> Option<UserId> {
        match self {
            Self::Player(user) => Some(user),
            Self::Bot => None,
        }
    }

    #[must_use]
    pub const fn is_bot(self) -> bool {
        matches!(self, Self::Bot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Pending,
    Ongoing,
    Finished,
}

/// One pairing in a round. Seed A plays white.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketCell {
    pub seed_a: Option<Seed>,
    pub seed_b: Option<Seed>,
    pub status: CellStatus,
    pub winner: Option<Seed>,
    pub match_id: Option<MatchId>,
}

impl BracketCell {
    const fn empty() -> Self {
        Self {
            seed_a: None,
            seed_b: None,
            status: CellStatus::Pending,
            winner: None,
            match_id: None,
        }
    }

    const fn seeds(&self) -> Option<(Seed, Seed)> {
        match (self.seed_a, self.seed_b) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}

/// Ordered rounds, round 0 first. Round `k + 1` has half as many cells as
/// round `k`; the last round has a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub rounds: Vec<Vec<BracketCell>>,
}

impl Bracket {
    #[must_use]
    pub fn round_sizes(&self) -> Vec<usize> {
        self.rounds.iter().map(Vec::len).collect()
    }

    fn cell_mut(&mut self, round: usize, cell: usize) -> Option<&mut BracketCell> {
        self.rounds.get_mut(round)?.get_mut(cell)
    }

    /// Locate the cell a match is linked to.
    #[must_use]
    pub fn find_match(&self, match_id: MatchId) -> Option<(usize, usize)> {
        self.rounds.iter().enumerate().find_map(|(r, cells)| {
            cells
                .iter()
                .position(|c| c.match_id == Some(match_id))
                .map(|i| (r, i))
        })
    }
}

/// Build a bracket for `participants` in input order.
///
/// Round 0 is padded to the next power of two with bot placeholders and
/// consecutive entries are paired.
pub fn generate_bracket(participants: &[Seed]) -> Result<Bracket> {
    if participants.len() < 2 {
        return Err(ArenaError::validation(format!(
            "a bracket needs at least 2 participants, got {}",
            participants.len()
        )));
    }
    let slots = participants.len().next_power_of_two();
    let round_count = slots.trailing_zeros() as usize;

    let mut seeds = participants.to_vec();
    seeds.resize(slots, Seed::Bot);

    let first: Vec<BracketCell> = seeds
        .chunks(2)
        .map(|pair| BracketCell {
            seed_a: Some(pair[0]),
            seed_b: Some(pair[1]),
            ..BracketCell::empty()
        })
        .collect();

    let mut rounds = vec![first];
    for k in 1..round_count {
        rounds.push(vec![BracketCell::empty(); slots >> (k + 1)]);
    }
    Ok(Bracket { rounds })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Upcoming,
    Ongoing,
    Finished,
    Cancelled,
}

impl std::fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upcoming => write!(f, "upcoming"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Finished => write!(f, "finished"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub creator: UserId,
    pub start_time: DateTime<Utc>,
    pub max_players: usize,
    pub time_control: TimeControl,
    pub participants: Vec<UserId>,
    pub status: TournamentStatus,
    pub bracket: Option<Bracket>,
    pub current_round: usize,
    /// Winner of the final. `None` while running and when a bot placeholder
    /// won.
    pub champion: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub revision: u64,
}

/// A bracket cell with both seeds set that needs a match session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCell {
    pub tournament_id: TournamentId,
    pub round: usize,
    pub cell: usize,
    pub white: Seed,
    pub black: Seed,
    pub time_control: TimeControl,
}

/// What [`BracketEngine::advance`] did with an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BracketAdvance {
    /// The outcome did not match an ongoing cell.
    Ignored,
    /// Winner recorded; the round is still being played.
    Recorded,
    /// The round completed and winners moved on. `pending` lists the cells
    /// that now need a match.
    RoundComplete {
        round: usize,
        pending: Vec<PendingCell>,
    },
    Finished { champion: Option<UserId> },
}

impl Tournament {
    fn bracket_mut(&mut self) -> Result<&mut Bracket> {
        self.bracket
            .as_mut()
            .ok_or_else(|| ArenaError::state(format!("tournament {} has no bracket", self.id)))
    }

    /// Record `winner` in a cell. Returns `false` if the cell was already
    /// decided.
    fn record(&mut self, round: usize, cell: usize, winner: Seed) -> Result<bool> {
        let id = self.id;
        let target = self
            .bracket_mut()?
            .cell_mut(round, cell)
            .ok_or_else(|| ArenaError::not_found("bracket cell", format!("{id}/{round}/{cell}")))?;
        if target.status == CellStatus::Finished {
            return Ok(false);
        }
        target.status = CellStatus::Finished;
        target.winner = Some(winner);
        Ok(true)
    }

    /// Resolve bot-against-bot walkovers in the current round, then move
    /// every completed round's winners forward until a round needs real
    /// matches or the final is decided.
    fn settle_rounds(&mut self) -> Result<Settled> {
        loop {
            let round = self.current_round;
            let id = self.id;
            let bracket = self.bracket_mut()?;
            let last = bracket.rounds.len() - 1;

            let cells = bracket
                .rounds
                .get_mut(round)
                .ok_or_else(|| ArenaError::state(format!("tournament {id} has no round {round}")))?;
            for cell in cells.iter_mut() {
                if cell.status == CellStatus::Pending && cell.seeds() == Some((Seed::Bot, Seed::Bot)) {
                    cell.status = CellStatus::Finished;
                    cell.winner = Some(Seed::Bot);
                }
            }

            if cells.iter().any(|c| c.status != CellStatus::Finished) {
                return Ok(Settled::Waiting);
            }

            let winners: Vec<Option<Seed>> = cells.iter().map(|c| c.winner).collect();
            if round == last {
                let champion = winners.first().copied().flatten().and_then(Seed::user);
                self.status = TournamentStatus::Finished;
                self.champion = champion;
                return Ok(Settled::Finished { champion });
            }

            let next = bracket
                .rounds
                .get_mut(round + 1)
                .ok_or_else(|| ArenaError::state(format!("tournament {id} has no round {}", round + 1)))?;
            for (i, winner) in winners.into_iter().enumerate() {
                let target = &mut next[i / 2];
                if i % 2 == 0 {
                    target.seed_a = winner;
                } else {
                    target.seed_b = winner;
                }
                target.status = CellStatus::Pending;
            }
            self.current_round = round + 1;
        }
    }

    /// Cells in the current round that are ready for a match.
    fn pending_cells(&self) -> Vec<PendingCell> {
        let Some(bracket) = &self.bracket else {
            return Vec::new();
        };
        let Some(cells) = bracket.rounds.get(self.current_round) else {
            return Vec::new();
        };
        cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == CellStatus::Pending && c.match_id.is_none())
            .filter_map(|(i, c)| {
                let (white, black) = c.seeds()?;
                Some(PendingCell {
                    tournament_id: self.id,
                    round: self.current_round,
                    cell: i,
                    white,
                    black,
                    time_control: self.time_control,
                })
            })
            .collect()
    }

    /// Record a finished match and advance the bracket.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        outcome: &MatchOutcome,
        rng: &mut R,
    ) -> Result<BracketAdvance> {
        if self.status != TournamentStatus::Ongoing {
            return Ok(BracketAdvance::Ignored);
        }
        let bracket = self.bracket_mut()?;
        let Some((round, cell)) = bracket.find_match(outcome.match_id) else {
            return Ok(BracketAdvance::Ignored);
        };
        let Some((seed_a, seed_b)) = bracket.rounds[round][cell].seeds() else {
            return Ok(BracketAdvance::Ignored);
        };

        let winner = match outcome.result {
            MatchResult::WhiteWins => seed_a,
            MatchResult::BlackWins => seed_b,
            MatchResult::Draw => {
                if rng.gen_bool(0.5) {
                    seed_a
                } else {
                    seed_b
                }
            }
            MatchResult::Ongoing => return Ok(BracketAdvance::Ignored),
        };

        if !self.record(round, cell, winner)? {
            return Ok(BracketAdvance::Ignored);
        }
        self.revision += 1;

        match self.settle_rounds()? {
            Settled::Finished { champion } => Ok(BracketAdvance::Finished { champion }),
            Settled::Waiting if self.current_round == round => Ok(BracketAdvance::Recorded),
            Settled::Waiting => Ok(BracketAdvance::RoundComplete {
                round: self.current_round,
                pending: self.pending_cells(),
            }),
        }
    }
}

enum Settled {
    Waiting,
    Finished { champion: Option<UserId> },
}

/// Parameters for [`BracketEngine::create`].
#[derive(Debug, Clone)]
pub struct NewTournament {
    pub name: String,
    pub creator: UserId,
    pub start_time: DateTime<Utc>,
    pub max_players: Option<usize>,
    pub time_control: Option<TimeControl>,
}

/// Live tournaments, each behind its own mutex. A tournament leaves the map
/// once it finishes; the store keeps the final record.
pub struct BracketEngine {
    tournaments: DashMap<TournamentId, Arc<Mutex<Tournament>>>,
    store: Arc<dyn Store>,
    default_size: usize,
    max_size: usize,
}

impl BracketEngine {
    pub fn new(store: Arc<dyn Store>, default_size: usize, max_size: usize) -> Self {
        Self {
            tournaments: DashMap::new(),
            store,
            default_size,
            max_size,
        }
    }

    fn entry(&self, id: TournamentId) -> Result<Arc<Mutex<Tournament>>> {
        self.tournaments
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ArenaError::not_found("tournament", id))
    }

    async fn persist(&self, tournament: &Tournament) {
        if let Err(e) = self.store.save_tournament(tournament).await {
            warn!(tournament_id = %tournament.id, error = %e, "failed to persist tournament");
        }
    }

    /// Live (upcoming or ongoing) tournament by id.
    pub fn get(&self, id: TournamentId) -> Result<Tournament> {
        Ok(self.entry(id)?.lock().clone())
    }

    /// Number of tournaments currently ongoing.
    pub fn ongoing(&self) -> usize {
        self.tournaments
            .iter()
            .filter(|e| e.value().lock().status == TournamentStatus::Ongoing)
            .count()
    }

    pub async fn create(&self, params: NewTournament) -> Result<Tournament> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(ArenaError::validation("tournament name must not be empty"));
        }
        let max_players = params.max_players.unwrap_or(self.default_size);
        if !(2..=self.max_size).contains(&max_players) {
            return Err(ArenaError::validation(format!(
                "max players must be between 2 and {}, got {max_players}",
                self.max_size
            )));
        }

        let tournament = Tournament {
            id: TournamentId::new(),
            name: name.to_string(),
            creator: params.creator,
            start_time: params.start_time,
            max_players,
            time_control: params.time_control.unwrap_or_default(),
            participants: vec![params.creator],
            status: TournamentStatus::Upcoming,
            bracket: None,
            current_round: 0,
            champion: None,
            created_at: Utc::now(),
            revision: 0,
        };
        self.store.insert_tournament(&tournament).await?;
        self.tournaments
            .insert(tournament.id, Arc::new(Mutex::new(tournament.clone())));
        info!(tournament_id = %tournament.id, max_players, "tournament created");
        Ok(tournament)
    }

    pub async fn join(&self, id: TournamentId, user: UserId) -> Result<Tournament> {
        let entry = self.entry(id)?;
        let snapshot = {
            let mut t = entry.lock();
            if t.status != TournamentStatus::Upcoming {
                return Err(ArenaError::state(format!("tournament is {}", t.status)));
            }
            if t.participants.contains(&user) {
                return Err(ArenaError::state("already registered"));
            }
            if t.participants.len() >= t.max_players {
                return Err(ArenaError::state("tournament is full"));
            }
            t.participants.push(user);
            t.revision += 1;
            t.clone()
        };
        self.persist(&snapshot).await;
        debug!(tournament_id = %id, user_id = %user, "joined tournament");
        Ok(snapshot)
    }

    /// Seed the bracket and open round 0. Returns the cells needing matches.
    pub async fn start(&self, id: TournamentId) -> Result<(Tournament, Vec<PendingCell>)> {
        let entry = self.entry(id)?;
        let (snapshot, pending) = {
            let mut t = entry.lock();
            if t.status != TournamentStatus::Upcoming {
                return Err(ArenaError::state(format!("tournament is {}", t.status)));
            }
            let mut seeds: Vec<Seed> = t.participants.iter().copied().map(Seed::Player).collect();
            let size = t.max_players.max(seeds.len());
            seeds.resize(size, Seed::Bot);

            t.bracket = Some(generate_bracket(&seeds)?);
            t.status = TournamentStatus::Ongoing;
            t.current_round = 0;
            t.revision += 1;
            t.settle_rounds()?;
            (t.clone(), t.pending_cells())
        };
        self.persist(&snapshot).await;
        info!(
            tournament_id = %id,
            rounds = snapshot.bracket.as_ref().map_or(0, |b| b.rounds.len()),
            matches = pending.len(),
            "tournament started"
        );
        Ok((snapshot, pending))
    }

    /// Attach a launched match to its cell, marking the cell ongoing.
    pub async fn link_match(
        &self,
        id: TournamentId,
        round: usize,
        cell: usize,
        match_id: MatchId,
    ) -> Result<()> {
        let entry = self.entry(id)?;
        let snapshot = {
            let mut t = entry.lock();
            let target = t
                .bracket_mut()?
                .cell_mut(round, cell)
                .ok_or_else(|| ArenaError::not_found("bracket cell", format!("{id}/{round}/{cell}")))?;
            if target.seeds().is_none() {
                return Err(ArenaError::state("cell is missing a seed"));
            }
            if target.status != CellStatus::Pending || target.match_id.is_some() {
                return Err(ArenaError::state("cell already has a match"));
            }
            target.match_id = Some(match_id);
            target.status = CellStatus::Ongoing;
            t.revision += 1;
            t.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Feed a finished tournament match into its bracket.
    #[instrument(skip(self, outcome), fields(match_id = %outcome.match_id))]
    pub async fn advance(&self, outcome: &MatchOutcome) -> Result<(Tournament, BracketAdvance)> {
        let link = outcome
            .tournament
            .ok_or_else(|| ArenaError::state("match is not part of a tournament"))?;
        let entry = self.entry(link.tournament_id)?;
        let (snapshot, advance) = {
            let mut t = entry.lock();
            let advance = t.advance(outcome, &mut rand::thread_rng())?;
            (t.clone(), advance)
        };
        if advance != BracketAdvance::Ignored {
            self.persist(&snapshot).await;
        }
        match &advance {
            BracketAdvance::Finished { champion } => {
                self.tournaments.remove(&snapshot.id);
                info!(tournament_id = %snapshot.id, champion = ?champion, "tournament finished");
            }
            BracketAdvance::RoundComplete { round, pending } => {
                info!(tournament_id = %snapshot.id, round, matches = pending.len(), "round opened");
            }
            BracketAdvance::Recorded | BracketAdvance::Ignored => {}
        }
        Ok((snapshot, advance))
    }
}
