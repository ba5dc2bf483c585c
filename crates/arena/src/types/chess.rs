//! Board vocabulary shared between sessions, the bot and the rules engine.
//!
//! These types carry no chess logic. Legality and terminal detection live
//! behind [`RulesEngine`](crate::rules::RulesEngine).

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

impl std::str::FromStr for Color {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" | "w" => Ok(Self::White),
            "black" | "b" => Ok(Self::Black),
            other => Err(ArenaError::validation(format!("unknown color `{other}`"))),
        }
    }
}

/// Chess piece type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    /// Lowercase letter used in move notation (`p`, `n`, `b`, `r`, `q`, `k`).
    #[must_use]
    pub const fn char(self) -> char {
        match self {
            Self::Pawn => 'p',
            Self::Knight => 'n',
            Self::Bishop => 'b',
            Self::Rook => 'r',
            Self::Queen => 'q',
            Self::King => 'k',
        }
    }

    /// Parse a promotion piece. Only knight, bishop, rook and queen qualify.
    pub fn promotion_from_str(s: &str) -> Result<Self, ArenaError> {
        match s.to_ascii_lowercase().as_str() {
            "q" | "queen" => Ok(Self::Queen),
            "r" | "rook" => Ok(Self::Rook),
            "b" | "bishop" => Ok(Self::Bishop),
            "n" | "knight" => Ok(Self::Knight),
            other => Err(ArenaError::validation(format!(
                "promotion must be q, r, b or n, got `{other}`"
            ))),
        }
    }
}

impl std::fmt::Display for PieceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pawn => write!(f, "pawn"),
            Self::Knight => write!(f, "knight"),
            Self::Bishop => write!(f, "bishop"),
            Self::Rook => write!(f, "rook"),
            Self::Queen => write!(f, "queen"),
            Self::King => write!(f, "king"),
        }
    }
}

/// A square on the board (a1-h8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square(u8);

impl Square {
    /// Create a square from file (0-7) and rank (0-7).
    #[must_use]
    pub const fn new(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 {
            Some(Self(rank * 8 + file))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn file(self) -> u8 {
        self.0 % 8
    }

    #[must_use]
    pub const fn rank(self) -> u8 {
        self.0 / 8
    }
}

impl std::fmt::Display for Square {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        write!(f, "{file}{rank}")
    }
}

impl std::str::FromStr for Square {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(ArenaError::validation(format!(
                "square must be 2 characters, got `{s}`"
            )));
        }
        let (file, rank) = (bytes[0], bytes[1]);
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return Err(ArenaError::validation(format!("`{s}` is not a board square")));
        }
        Self::new(file - b'a', rank - b'1')
            .ok_or_else(|| ArenaError::validation(format!("`{s}` is not a board square")))
    }
}

impl TryFrom<String> for Square {
    type Error = ArenaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.to_string()
    }
}

/// Opaque board position, exported and imported by the rules engine.
///
/// The arena never looks inside; the shakmaty engine stores FEN here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A move as submitted by a player or the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceType>,
}

impl MoveRequest {
    #[must_use]
    pub const fn new(from: Square, to: Square, promotion: Option<PieceType>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }

    /// Parse the raw command fields of a move.
    pub fn parse(from: &str, to: &str, promotion: Option<&str>) -> Result<Self, ArenaError> {
        let promotion = match promotion.map(str::trim) {
            None | Some("") => None,
            Some(p) => Some(PieceType::promotion_from_str(p)?),
        };
        Ok(Self {
            from: from.trim().parse()?,
            to: to.trim().parse()?,
            promotion,
        })
    }

    /// Long algebraic form, e.g. `e2e4` or `e7e8q`.
    #[must_use]
    pub fn to_uci(&self) -> String {
        match self.promotion {
            Some(piece) => format!("{}{}{}", self.from, self.to, piece.char()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl std::fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uci())
    }
}

/// A legal move as reported by the rules engine, annotated with what the bot
/// heuristic needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceType>,
    /// Standard algebraic notation, e.g. `Nf3`.
    pub san: String,
    /// Piece captured by the move, if any.
    pub captured: Option<PieceType>,
    pub gives_check: bool,
    pub gives_checkmate: bool,
}

impl LegalMove {
    #[must_use]
    pub const fn request(&self) -> MoveRequest {
        MoveRequest::new(self.from, self.to, self.promotion)
    }
}
