//! Stateless bot move selection.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, Result};
use crate::rules::RulesEngine;
use crate::types::{LegalMove, MoveRequest, PieceType, Position};

/// Bot strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotTier {
    /// Uniformly random legal move.
    #[default]
    #[serde(alias = "easy")]
    Base,
    /// One-ply material and check heuristic.
    #[serde(alias = "hard")]
    Elevated,
}

impl std::fmt::Display for BotTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Elevated => write!(f, "elevated"),
        }
    }
}

impl std::str::FromStr for BotTier {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" | "easy" => Ok(Self::Base),
            "elevated" | "hard" => Ok(Self::Elevated),
            other => Err(ArenaError::validation(format!("unknown bot difficulty `{other}`"))),
        }
    }
}

const CHECK_BONUS: i32 = 2;
const MATE_BONUS: i32 = 1000;

fn piece_value(piece: PieceType) -> i32 {
    match piece {
        PieceType::Pawn => 1,
        PieceType::Knight | PieceType::Bishop => 3,
        PieceType::Rook => 5,
        PieceType::Queen => 9,
        PieceType::King => 0,
    }
}

fn score(m: &LegalMove) -> i32 {
    let mut score = m.captured.map_or(0, piece_value);
    if m.gives_check {
        score += CHECK_BONUS;
    }
    if m.gives_checkmate {
        score += MATE_BONUS;
    }
    score
}

/// Move generator for bot seats. Holds no per-match state; the caller is
/// responsible for checking it is the bot's turn.
pub struct BotAgent;

impl BotAgent {
    /// Pick a move for the side to move in `position`.
    ///
    /// Returns `Ok(None)` when there is no legal move.
    pub fn choose_move<R: Rng + ?Sized>(
        rules: &dyn RulesEngine,
        position: &Position,
        tier: BotTier,
        rng: &mut R,
    ) -> Result<Option<MoveRequest>> {
        let moves = rules.legal_moves(position)?;
        let chosen = match tier {
            BotTier::Base => moves.choose(rng),
            BotTier::Elevated => Self::best(&moves),
        };
        Ok(chosen.map(LegalMove::request))
    }

    /// Highest scoring move. Ties go to the move listed first.
    fn best(moves: &[LegalMove]) -> Option<&LegalMove> {
        let mut best: Option<(&LegalMove, i32)> = None;
        for m in moves {
            let s = score(m);
            if best.map_or(true, |(_, top)| s > top) {
                best = Some((m, s));
            }
        }
        best.map(|(m, _)| m)
    }

    /// Random think time in `[min, max]`.
    pub fn decision_delay<R: Rng + ?Sized>(min: Duration, max: Duration, rng: &mut R) -> Duration {
        if max <= min {
            return min;
        }
        let span = u64::try_from((max - min).as_millis()).unwrap_or(u64::MAX);
        min + Duration::from_millis(rng.gen_range(0..=span))
    }
}
