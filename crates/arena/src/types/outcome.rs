//! Match status, result and the outcome record handed to settlement.

use serde::{Deserialize, Serialize};

use super::chess::Color;
use super::ids::{MatchId, TournamentId, UserId};

/// Lifecycle status of a match session.
///
/// Transitions are monotonic: `waiting -> ongoing -> finished | abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Ongoing,
    Finished,
    Abandoned,
}

impl MatchStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Abandoned)
    }

    /// Whether the session still accepts wagers.
    #[must_use]
    pub const fn accepts_wagers(self) -> bool {
        matches!(self, Self::Waiting | Self::Ongoing)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Ongoing => 1,
            Self::Finished | Self::Abandoned => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic order.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        next.rank() == self.rank() + 1
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Finished => write!(f, "finished"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    WhiteWins,
    BlackWins,
    Draw,
    Ongoing,
}

impl MatchResult {
    /// The result in which `color` wins.
    #[must_use]
    pub const fn win_for(color: Color) -> Self {
        match color {
            Color::White => Self::WhiteWins,
            Color::Black => Self::BlackWins,
        }
    }

    #[must_use]
    pub const fn winning_color(self) -> Option<Color> {
        match self {
            Self::WhiteWins => Some(Color::White),
            Self::BlackWins => Some(Color::Black),
            Self::Draw | Self::Ongoing => None,
        }
    }
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WhiteWins => write!(f, "white_wins"),
            Self::BlackWins => write!(f, "black_wins"),
            Self::Draw => write!(f, "draw"),
            Self::Ongoing => write!(f, "ongoing"),
        }
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    Timeout,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checkmate => write!(f, "checkmate"),
            Self::Stalemate => write!(f, "stalemate"),
            Self::InsufficientMaterial => write!(f, "insufficient_material"),
            Self::FiftyMoveRule => write!(f, "fifty_move_rule"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Where a tournament match sits in its bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TournamentLink {
    pub tournament_id: TournamentId,
    pub round: usize,
    pub cell: usize,
}

/// The committed result of a finished match. Produced exactly once per
/// match by the transition into `finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub match_id: MatchId,
    pub result: MatchResult,
    /// Winning user. `None` on draws and when a bot seat won.
    pub winner: Option<UserId>,
    pub termination: Termination,
    pub tournament: Option<TournamentLink>,
}
