//! One match: seats, clock, move log and the waiting/ongoing/finished state
//! machine.
//!
//! A session serializes its own mutations behind a per-session mutex. Rules
//! engine calls happen outside that lock: a move is validated against a
//! snapshot and recommitted only if nothing changed in between.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::bot::BotTier;
use crate::error::{ArenaError, Result};
use crate::rules::RulesEngine;
use crate::types::{
    Color, MatchId, MatchOutcome, MatchResult, MatchStatus, MoveRequest, PieceType, Position,
    Square, Termination, TimeControl, TournamentLink, UserId,
};

/// Remaining or initial time per side, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockPair {
    pub white: u64,
    pub black: u64,
}

impl ClockPair {
    #[must_use]
    pub const fn even(ms: u64) -> Self {
        Self {
            white: ms,
            black: ms,
        }
    }

    #[must_use]
    pub const fn get(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn get_mut(&mut self, color: Color) -> &mut u64 {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Subtract `ms` from `color`, clamping at zero. Returns the new value.
    fn charge(&mut self, color: Color, ms: u64) -> u64 {
        let slot = self.get_mut(color);
        *slot = slot.saturating_sub(ms);
        *slot
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.white + self.black
    }
}

/// The seat a bot occupies in a bot match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSeat {
    pub color: Color,
    pub tier: BotTier,
}

/// Who is submitting a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mover {
    Player(UserId),
    Bot,
}

/// One entry of the append-only move log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceType>,
    pub san: String,
    pub color: Color,
    pub timestamp: DateTime<Utc>,
}

/// Serializable view of a session. This is what gets persisted and what
/// queries return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: MatchId,
    pub white: Option<UserId>,
    pub black: Option<UserId>,
    pub time_control: TimeControl,
    pub initial: ClockPair,
    pub remaining: ClockPair,
    pub moves: Vec<MoveRecord>,
    pub position: Position,
    pub side_to_move: Color,
    pub status: MatchStatus,
    pub result: MatchResult,
    pub winner: Option<UserId>,
    pub termination: Option<Termination>,
    pub spectators: BTreeSet<UserId>,
    pub bot: Option<BotSeat>,
    pub tournament: Option<TournamentLink>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Bumped on every committed transition. Storage refuses to overwrite a
    /// newer revision with an older one.
    pub revision: u64,
}

impl SessionSnapshot {
    #[must_use]
    pub const fn seat(&self, color: Color) -> Option<UserId> {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    #[must_use]
    pub fn color_of(&self, user: UserId) -> Option<Color> {
        if self.white == Some(user) {
            Some(Color::White)
        } else if self.black == Some(user) {
            Some(Color::Black)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_bot_match(&self) -> bool {
        self.bot.is_some()
    }

    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.color_of(user).is_some()
    }

    /// Whether the side to move is the bot seat of an ongoing bot match.
    #[must_use]
    pub fn is_bot_turn(&self) -> bool {
        self.status == MatchStatus::Ongoing
            && self.bot.is_some_and(|seat| seat.color == self.side_to_move)
    }

    /// The outcome record, once the session is finished.
    #[must_use]
    pub fn outcome(&self) -> Option<MatchOutcome> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        Some(MatchOutcome {
            match_id: self.id,
            result: self.result,
            winner: self.winner,
            termination: self.termination?,
            tournament: self.tournament,
        })
    }
}

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub white: Option<UserId>,
    pub black: Option<UserId>,
    pub time_control: TimeControl,
    pub bot: Option<BotSeat>,
    pub tournament: Option<TournamentLink>,
}

impl NewSession {
    #[must_use]
    pub fn human(white: UserId, black: UserId, time_control: TimeControl) -> Self {
        Self {
            white: Some(white),
            black: Some(black),
            time_control,
            bot: None,
            tournament: None,
        }
    }

    /// A match against a bot. The user takes `user_color`, the bot the other.
    #[must_use]
    pub fn against_bot(
        user: UserId,
        user_color: Color,
        tier: BotTier,
        time_control: TimeControl,
    ) -> Self {
        let (white, black) = match user_color {
            Color::White => (Some(user), None),
            Color::Black => (None, Some(user)),
        };
        Self {
            white,
            black,
            time_control,
            bot: Some(BotSeat {
                color: user_color.opposite(),
                tier,
            }),
            tournament: None,
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.white, self.black, self.bot) {
            (None, None, _) => Err(ArenaError::validation(
                "a match needs at least one human seat",
            )),
            (Some(w), Some(b), None) if w == b => {
                Err(ArenaError::validation("a user cannot play against themselves"))
            }
            (Some(_), Some(_), None) => Ok(()),
            (_, _, None) => Err(ArenaError::validation(
                "an empty seat is only allowed in a bot match",
            )),
            (white, black, Some(seat)) => {
                let empty = match (white, black) {
                    (None, Some(_)) => Color::White,
                    (Some(_), None) => Color::Black,
                    _ => {
                        return Err(ArenaError::validation(
                            "a bot match has exactly one empty seat",
                        ))
                    }
                };
                if empty != seat.color {
                    return Err(ArenaError::validation(format!(
                        "bot seat is {} but the empty seat is {empty}",
                        seat.color
                    )));
                }
                Ok(())
            }
        }
    }
}

/// What a clock tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    /// The session is no longer ongoing. The ticker should exit.
    Stopped,
    Running(ClockPair),
    /// `Color`'s time reached zero on this tick.
    Flagged(Color),
}

/// A move committed by [`MatchSession::apply_move`].
#[derive(Debug, Clone)]
pub struct MoveApplied {
    pub record: MoveRecord,
    pub snapshot: SessionSnapshot,
    /// Set when this move ended the match.
    pub outcome: Option<MatchOutcome>,
}

struct Inner {
    snapshot: SessionSnapshot,
    /// Side whose time is running and the instant it was last charged up to.
    running: Option<(Color, Instant)>,
}

impl Inner {
    fn finish(
        &mut self,
        result: MatchResult,
        winning_color: Option<Color>,
        termination: Termination,
    ) -> Option<MatchOutcome> {
        let s = &mut self.snapshot;
        s.status = MatchStatus::Finished;
        s.result = result;
        let winner = winning_color.and_then(|c| s.seat(c));
        s.winner = winner;
        s.termination = Some(termination);
        s.ended_at = Some(Utc::now());
        s.revision += 1;
        self.running = None;
        self.snapshot.outcome()
    }
}

/// State machine and data owner for one game.
pub struct MatchSession {
    id: MatchId,
    inner: Mutex<Inner>,
}

impl MatchSession {
    /// Create a session in `waiting` with full clocks and the given starting
    /// position.
    pub fn new(id: MatchId, params: NewSession, position: Position) -> Result<Self> {
        params.validate()?;
        let initial = ClockPair::even(params.time_control.initial_ms());
        let snapshot = SessionSnapshot {
            id,
            white: params.white,
            black: params.black,
            time_control: params.time_control,
            initial,
            remaining: initial,
            moves: Vec::new(),
            position,
            side_to_move: Color::White,
            status: MatchStatus::Waiting,
            result: MatchResult::Ongoing,
            winner: None,
            termination: None,
            spectators: BTreeSet::new(),
            bot: params.bot,
            tournament: params.tournament,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            revision: 0,
        };
        Ok(Self {
            id,
            inner: Mutex::new(Inner {
                snapshot,
                running: None,
            }),
        })
    }

    #[must_use]
    pub const fn id(&self) -> MatchId {
        self.id
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot.clone()
    }

    #[must_use]
    pub fn status(&self) -> MatchStatus {
        self.inner.lock().snapshot.status
    }

    /// `waiting -> ongoing`. The side to move starts its clock at `now`.
    pub fn start(&self, now: Instant) -> Result<SessionSnapshot> {
        let mut inner = self.inner.lock();
        if inner.snapshot.status != MatchStatus::Waiting {
            return Err(ArenaError::state(format!(
                "cannot start a match that is {}",
                inner.snapshot.status
            )));
        }
        let side = inner.snapshot.side_to_move;
        let s = &mut inner.snapshot;
        s.status = MatchStatus::Ongoing;
        s.started_at = Some(Utc::now());
        s.revision += 1;
        inner.running = Some((side, now));
        Ok(inner.snapshot.clone())
    }

    /// Validate and commit a move.
    ///
    /// The mover's elapsed time is charged at commit and the clock is handed
    /// to the next side in the same critical section.
    pub fn apply_move(
        &self,
        mover: Mover,
        request: &MoveRequest,
        rules: &dyn RulesEngine,
        now: Instant,
    ) -> Result<MoveApplied> {
        let (position, ply, side) = {
            let inner = self.inner.lock();
            let s = &inner.snapshot;
            if s.status != MatchStatus::Ongoing {
                return Err(ArenaError::state(format!("match is {}", s.status)));
            }
            let side = s.side_to_move;
            let owns_turn = match mover {
                Mover::Player(user) => s.seat(side) == Some(user),
                Mover::Bot => s.bot.is_some_and(|b| b.color == side),
            };
            if !owns_turn {
                return Err(ArenaError::state(format!("it is {side}'s turn")));
            }
            (s.position.clone(), s.moves.len(), side)
        };

        let applied = rules.apply_move(&position, request)?;
        if applied.mover != side {
            return Err(ArenaError::state(format!(
                "position has {} to move, session expected {side}",
                applied.mover
            )));
        }
        let terminal = rules.terminal(&applied.position)?;
        let next = rules.side_to_move(&applied.position)?;

        let mut inner = self.inner.lock();
        if inner.snapshot.status != MatchStatus::Ongoing || inner.snapshot.moves.len() != ply {
            return Err(ArenaError::state("match changed while the move was validated"));
        }

        let elapsed = match inner.running {
            Some((running, since)) if running == side => whole_millis(now, since),
            _ => 0,
        };
        if inner.snapshot.remaining.get(side) <= elapsed {
            return Err(ArenaError::state(format!("{side}'s flag has fallen")));
        }
        inner.snapshot.remaining.charge(side, elapsed);

        let record = MoveRecord {
            from: request.from,
            to: request.to,
            promotion: applied.promotion,
            san: applied.san,
            color: side,
            timestamp: Utc::now(),
        };
        let s = &mut inner.snapshot;
        s.moves.push(record.clone());
        s.position = applied.position;
        s.side_to_move = next;
        s.revision += 1;

        let outcome = match terminal.termination() {
            None => {
                inner.running = Some((next, now));
                None
            }
            Some(Termination::Checkmate) => {
                // In bot matches the human seat is credited with every mate.
                let credited = match inner.snapshot.bot {
                    Some(seat) => seat.color.opposite(),
                    None => side,
                };
                inner.finish(
                    MatchResult::win_for(credited),
                    Some(credited),
                    Termination::Checkmate,
                )
            }
            Some(draw) => inner.finish(MatchResult::Draw, None, draw),
        };

        Ok(MoveApplied {
            record,
            snapshot: inner.snapshot.clone(),
            outcome,
        })
    }

    /// `ongoing -> finished` on flag-fall. The opposite side wins. Returns
    /// `None` if the session already left `ongoing`.
    pub fn apply_timeout(&self, side: Color) -> Option<MatchOutcome> {
        let mut inner = self.inner.lock();
        if inner.snapshot.status != MatchStatus::Ongoing {
            return None;
        }
        let remaining = &mut inner.snapshot.remaining;
        *remaining.get_mut(side) = 0;
        let winner = side.opposite();
        inner.finish(MatchResult::win_for(winner), Some(winner), Termination::Timeout)
    }

    /// Charge the running side for the time elapsed since the previous tick.
    pub fn tick_clock(&self, now: Instant) -> ClockTick {
        let mut inner = self.inner.lock();
        if inner.snapshot.status != MatchStatus::Ongoing {
            return ClockTick::Stopped;
        }
        let Some((side, since)) = inner.running else {
            return ClockTick::Running(inner.snapshot.remaining);
        };
        let elapsed = whole_millis(now, since);
        // Advance by whole milliseconds only so sub-millisecond remainders
        // carry over to the next tick.
        inner.running = Some((side, since + Duration::from_millis(elapsed)));
        if inner.snapshot.remaining.charge(side, elapsed) == 0 {
            return ClockTick::Flagged(side);
        }
        ClockTick::Running(inner.snapshot.remaining)
    }

    /// The side whose clock is running, if any.
    #[must_use]
    pub fn running_side(&self) -> Option<Color> {
        self.inner.lock().running.map(|(side, _)| side)
    }

    /// `waiting | ongoing -> abandoned`. Tournament matches cannot be
    /// abandoned.
    pub fn abandon(&self) -> Result<SessionSnapshot> {
        let mut inner = self.inner.lock();
        let s = &mut inner.snapshot;
        if s.tournament.is_some() {
            return Err(ArenaError::state("tournament matches cannot be abandoned"));
        }
        if s.status.is_terminal() {
            return Err(ArenaError::state(format!("match is already {}", s.status)));
        }
        s.status = MatchStatus::Abandoned;
        s.ended_at = Some(Utc::now());
        s.revision += 1;
        inner.running = None;
        Ok(inner.snapshot.clone())
    }

    /// Add a spectator. Returns the spectator count.
    pub fn add_spectator(&self, user: UserId) -> usize {
        let mut inner = self.inner.lock();
        if inner.snapshot.spectators.insert(user) {
            inner.snapshot.revision += 1;
        }
        inner.snapshot.spectators.len()
    }

    /// Remove a spectator. Returns the spectator count.
    pub fn remove_spectator(&self, user: UserId) -> usize {
        let mut inner = self.inner.lock();
        if inner.snapshot.spectators.remove(&user) {
            inner.snapshot.revision += 1;
        }
        inner.snapshot.spectators.len()
    }
}

fn whole_millis(now: Instant, since: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(since).as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ShakmatyRules;

    fn mv(from: &str, to: &str) -> MoveRequest {
        MoveRequest::parse(from, to, None).unwrap()
    }

    fn human_session(tc: TimeControl) -> (MatchSession, UserId, UserId) {
        let (w, b) = (UserId::new(), UserId::new());
        let rules = ShakmatyRules::new();
        let session = MatchSession::new(
            MatchId::new(),
            NewSession::human(w, b, tc),
            rules.initial_position(),
        )
        .unwrap();
        (session, w, b)
    }

    #[test]
    fn seat_validation() {
        let rules = ShakmatyRules::new();
        let u = UserId::new();
        let empty = NewSession {
            white: None,
            black: None,
            time_control: TimeControl::OneMinute,
            bot: None,
            tournament: None,
        };
        assert!(MatchSession::new(MatchId::new(), empty, rules.initial_position()).is_err());

        let mut mismatched = NewSession::against_bot(u, Color::White, BotTier::Base, TimeControl::OneMinute);
        mismatched.bot = Some(BotSeat {
            color: Color::White,
            tier: BotTier::Base,
        });
        assert!(MatchSession::new(MatchId::new(), mismatched, rules.initial_position()).is_err());

        let half_empty = NewSession {
            white: Some(u),
            black: None,
            time_control: TimeControl::OneMinute,
            bot: None,
            tournament: None,
        };
        assert!(MatchSession::new(MatchId::new(), half_empty, rules.initial_position()).is_err());

        let bot = NewSession::against_bot(u, Color::Black, BotTier::Base, TimeControl::OneMinute);
        let session = MatchSession::new(MatchId::new(), bot, rules.initial_position()).unwrap();
        let snap = session.snapshot();
        assert_eq!(snap.white, None);
        assert_eq!(snap.black, Some(u));
        assert_eq!(snap.bot.unwrap().color, Color::White);
    }

    #[test]
    fn new_session_has_full_clocks() {
        let (session, _, _) = human_session(TimeControl::FiveMinutes);
        let snap = session.snapshot();
        assert_eq!(snap.status, MatchStatus::Waiting);
        assert_eq!(snap.remaining, ClockPair::even(300_000));
        assert_eq!(snap.result, MatchResult::Ongoing);
    }

    #[test]
    fn start_is_only_valid_from_waiting() {
        let (session, _, _) = human_session(TimeControl::OneMinute);
        let now = Instant::now();
        session.start(now).unwrap();
        assert_eq!(session.status(), MatchStatus::Ongoing);
        assert_eq!(session.running_side(), Some(Color::White));
        assert!(matches!(session.start(now), Err(ArenaError::State { .. })));
    }

    #[test]
    fn moves_alternate_and_charge_the_mover() {
        let rules = ShakmatyRules::new();
        let (session, w, b) = human_session(TimeControl::OneMinute);
        let t0 = Instant::now();
        session.start(t0).unwrap();

        let applied = session
            .apply_move(Mover::Player(w), &mv("e2", "e4"), &rules, t0 + Duration::from_millis(1_500))
            .unwrap();
        assert_eq!(applied.record.san, "e4");
        assert_eq!(applied.snapshot.remaining.white, 58_500);
        assert_eq!(applied.snapshot.remaining.black, 60_000);
        assert_eq!(applied.snapshot.side_to_move, Color::Black);
        assert_eq!(session.running_side(), Some(Color::Black));

        let err = session
            .apply_move(Mover::Player(w), &mv("d2", "d4"), &rules, t0 + Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, ArenaError::State { .. }));

        let applied = session
            .apply_move(Mover::Player(b), &mv("e7", "e5"), &rules, t0 + Duration::from_millis(2_000))
            .unwrap();
        assert_eq!(applied.snapshot.remaining.black, 59_500);
        assert_eq!(applied.snapshot.moves.len(), 2);
    }

    #[test]
    fn illegal_move_leaves_state_untouched() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = human_session(TimeControl::OneMinute);
        session.start(Instant::now()).unwrap();
        let before = session.snapshot();
        let err = session
            .apply_move(Mover::Player(w), &mv("e2", "e5"), &rules, Instant::now())
            .unwrap_err();
        assert!(matches!(err, ArenaError::IllegalMove(_)));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn moves_rejected_unless_ongoing() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = human_session(TimeControl::OneMinute);
        let err = session
            .apply_move(Mover::Player(w), &mv("e2", "e4"), &rules, Instant::now())
            .unwrap_err();
        assert!(matches!(err, ArenaError::State { .. }));
    }

    #[test]
    fn checkmate_credits_the_mover() {
        let rules = ShakmatyRules::new();
        let (session, w, b) = human_session(TimeControl::ThreeMinutes);
        let now = Instant::now();
        session.start(now).unwrap();
        session.apply_move(Mover::Player(w), &mv("f2", "f3"), &rules, now).unwrap();
        session.apply_move(Mover::Player(b), &mv("e7", "e5"), &rules, now).unwrap();
        session.apply_move(Mover::Player(w), &mv("g2", "g4"), &rules, now).unwrap();
        let applied = session
            .apply_move(Mover::Player(b), &mv("d8", "h4"), &rules, now)
            .unwrap();

        let outcome = applied.outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::BlackWins);
        assert_eq!(outcome.winner, Some(b));
        assert_eq!(outcome.termination, Termination::Checkmate);
        assert_eq!(session.status(), MatchStatus::Finished);
        assert_eq!(session.running_side(), None);
    }

    #[test]
    fn bot_checkmate_credits_the_human() {
        let rules = ShakmatyRules::new();
        let human = UserId::new();
        let session = MatchSession::new(
            MatchId::new(),
            NewSession::against_bot(human, Color::White, BotTier::Base, TimeControl::OneMinute),
            rules.initial_position(),
        )
        .unwrap();
        let now = Instant::now();
        session.start(now).unwrap();
        session.apply_move(Mover::Player(human), &mv("f2", "f3"), &rules, now).unwrap();
        session.apply_move(Mover::Bot, &mv("e7", "e5"), &rules, now).unwrap();
        session.apply_move(Mover::Player(human), &mv("g2", "g4"), &rules, now).unwrap();
        let applied = session.apply_move(Mover::Bot, &mv("d8", "h4"), &rules, now).unwrap();

        let outcome = applied.outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::WhiteWins);
        assert_eq!(outcome.winner, Some(human));
    }

    fn session_from(fen: &str) -> (MatchSession, UserId, UserId) {
        let (w, b) = (UserId::new(), UserId::new());
        let session = MatchSession::new(
            MatchId::new(),
            NewSession::human(w, b, TimeControl::OneMinute),
            Position::new(fen),
        )
        .unwrap();
        (session, w, b)
    }

    #[test]
    fn stalemate_is_a_draw_without_winner() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = session_from("7k/5Q2/8/8/8/8/8/6K1 w - - 0 1");
        let t0 = Instant::now();
        session.start(t0).unwrap();
        let applied = session
            .apply_move(Mover::Player(w), &mv("f7", "g6"), &rules, t0 + Duration::from_millis(800))
            .unwrap();

        let outcome = applied.outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::Draw);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.termination, Termination::Stalemate);
        let snap = session.snapshot();
        assert_eq!(snap.status, MatchStatus::Finished);
        assert_eq!(snap.result, MatchResult::Draw);
        assert_eq!(snap.winner, None);
        assert_eq!(session.running_side(), None);
        assert_eq!(session.tick_clock(t0 + Duration::from_secs(5)), ClockTick::Stopped);
        assert_eq!(session.snapshot().remaining.black, 60_000);
    }

    #[test]
    fn bare_kings_are_a_draw_without_winner() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = session_from("7k/8/8/8/8/8/6n1/6K1 w - - 0 1");
        let t0 = Instant::now();
        session.start(t0).unwrap();
        let applied = session
            .apply_move(Mover::Player(w), &mv("g1", "g2"), &rules, t0)
            .unwrap();

        let outcome = applied.outcome.unwrap();
        assert_eq!(outcome.result, MatchResult::Draw);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.termination, Termination::InsufficientMaterial);
        assert_eq!(session.status(), MatchStatus::Finished);
        assert_eq!(session.running_side(), None);
        assert_eq!(session.tick_clock(t0 + Duration::from_secs(5)), ClockTick::Stopped);
    }

    #[test]
    fn human_cannot_move_for_the_bot() {
        let rules = ShakmatyRules::new();
        let human = UserId::new();
        let session = MatchSession::new(
            MatchId::new(),
            NewSession::against_bot(human, Color::Black, BotTier::Base, TimeControl::OneMinute),
            rules.initial_position(),
        )
        .unwrap();
        session.start(Instant::now()).unwrap();
        assert!(session.snapshot().is_bot_turn());
        let err = session
            .apply_move(Mover::Player(human), &mv("e2", "e4"), &rules, Instant::now())
            .unwrap_err();
        assert!(matches!(err, ArenaError::State { .. }));
        session
            .apply_move(Mover::Bot, &mv("e2", "e4"), &rules, Instant::now())
            .unwrap();
        assert!(!session.snapshot().is_bot_turn());
    }

    #[test]
    fn timeout_finishes_once() {
        let (session, w, b) = human_session(TimeControl::OneMinute);
        session.start(Instant::now()).unwrap();
        let outcome = session.apply_timeout(Color::White).unwrap();
        assert_eq!(outcome.result, MatchResult::BlackWins);
        assert_eq!(outcome.winner, Some(b));
        assert_eq!(outcome.termination, Termination::Timeout);
        assert_ne!(outcome.winner, Some(w));
        assert!(session.apply_timeout(Color::Black).is_none());
        assert_eq!(session.snapshot().remaining.white, 0);
    }

    #[test]
    fn bot_win_on_time_has_no_winner() {
        let rules = ShakmatyRules::new();
        let human = UserId::new();
        let session = MatchSession::new(
            MatchId::new(),
            NewSession::against_bot(human, Color::White, BotTier::Base, TimeControl::OneMinute),
            rules.initial_position(),
        )
        .unwrap();
        session.start(Instant::now()).unwrap();
        let outcome = session.apply_timeout(Color::White).unwrap();
        assert_eq!(outcome.result, MatchResult::BlackWins);
        assert_eq!(outcome.winner, None);
    }

    #[test]
    fn ticks_charge_only_the_side_to_move() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = human_session(TimeControl::OneMinute);
        let t0 = Instant::now();
        session.start(t0).unwrap();

        let tick = session.tick_clock(t0 + Duration::from_millis(100));
        assert_eq!(
            tick,
            ClockTick::Running(ClockPair {
                white: 59_900,
                black: 60_000
            })
        );

        session
            .apply_move(Mover::Player(w), &mv("e2", "e4"), &rules, t0 + Duration::from_millis(250))
            .unwrap();
        let tick = session.tick_clock(t0 + Duration::from_millis(350));
        assert_eq!(
            tick,
            ClockTick::Running(ClockPair {
                white: 59_750,
                black: 59_900
            })
        );
    }

    #[test]
    fn tick_flags_at_zero_and_clamps() {
        let (session, _, _) = human_session(TimeControl::OneMinute);
        let t0 = Instant::now();
        session.start(t0).unwrap();
        let tick = session.tick_clock(t0 + Duration::from_secs(61));
        assert_eq!(tick, ClockTick::Flagged(Color::White));
        assert_eq!(session.snapshot().remaining.white, 0);

        session.apply_timeout(Color::White).unwrap();
        assert_eq!(session.tick_clock(t0 + Duration::from_secs(62)), ClockTick::Stopped);
    }

    #[test]
    fn move_after_flag_is_rejected() {
        let rules = ShakmatyRules::new();
        let (session, w, _) = human_session(TimeControl::OneMinute);
        let t0 = Instant::now();
        session.start(t0).unwrap();
        let err = session
            .apply_move(Mover::Player(w), &mv("e2", "e4"), &rules, t0 + Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, ArenaError::State { .. }));
        assert!(session.snapshot().moves.is_empty());
    }

    #[test]
    fn abandon_rules() {
        let (session, _, _) = human_session(TimeControl::OneMinute);
        let snap = session.abandon().unwrap();
        assert_eq!(snap.status, MatchStatus::Abandoned);
        assert!(session.abandon().is_err());
        assert!(session.start(Instant::now()).is_err());
    }

    #[test]
    fn spectators_are_a_set() {
        let (session, _, _) = human_session(TimeControl::OneMinute);
        let viewer = UserId::new();
        assert_eq!(session.add_spectator(viewer), 1);
        assert_eq!(session.add_spectator(viewer), 1);
        assert_eq!(session.add_spectator(UserId::new()), 2);
        assert_eq!(session.remove_spectator(viewer), 1);
        assert_eq!(session.remove_spectator(viewer), 1);
    }
}
