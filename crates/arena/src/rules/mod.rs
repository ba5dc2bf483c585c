//! Rules engine seam.
//!
//! Sessions never interpret the board themselves. They hand an opaque
//! [`Position`] to a [`RulesEngine`] and get back legality decisions, the
//! successor position and terminal detection.

mod standard;

pub use standard::ShakmatyRules;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Color, LegalMove, MoveRequest, PieceType, Position, Termination};

/// Errors raised by a rules engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The stored position could not be imported.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// The move is not legal in the given position.
    #[error("illegal move: {0}")]
    IllegalMove(String),
}

/// Terminal classification of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    None,
    /// The side to move is mated.
    Checkmate,
    Stalemate,
    Draw(DrawKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawKind {
    InsufficientMaterial,
    FiftyMoveRule,
}

impl Terminal {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::None)
    }

    /// How the match ends in this position, if it does.
    #[must_use]
    pub const fn termination(self) -> Option<Termination> {
        match self {
            Self::None => None,
            Self::Checkmate => Some(Termination::Checkmate),
            Self::Stalemate => Some(Termination::Stalemate),
            Self::Draw(DrawKind::InsufficientMaterial) => Some(Termination::InsufficientMaterial),
            Self::Draw(DrawKind::FiftyMoveRule) => Some(Termination::FiftyMoveRule),
        }
    }
}

/// Result of applying a legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub position: Position,
    pub san: String,
    /// Promotion piece actually played. Set to queen when a promoting move
    /// arrived without one.
    pub promotion: Option<PieceType>,
    /// Side that played the move.
    pub mover: Color,
}

/// External chess rules.
///
/// Implementations must be pure with respect to the arena: every call takes
/// a position and returns a value, holding no per-match state.
pub trait RulesEngine: Send + Sync + 'static {
    fn initial_position(&self) -> Position;

    fn side_to_move(&self, position: &Position) -> Result<Color, RulesError>;

    fn legal_moves(&self, position: &Position) -> Result<Vec<LegalMove>, RulesError>;

    fn apply_move(
        &self,
        position: &Position,
        request: &MoveRequest,
    ) -> Result<AppliedMove, RulesError>;

    fn terminal(&self, position: &Position) -> Result<Terminal, RulesError>;
}
