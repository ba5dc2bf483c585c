//! Domain types shared across the arena.

pub mod chess;
pub mod ids;
pub mod outcome;
pub mod time_control;

pub use chess::{Color, LegalMove, MoveRequest, PieceType, Position, Square};
pub use ids::{ConnectionId, MatchId, TournamentId, UserId, WagerId};
pub use outcome::{MatchOutcome, MatchResult, MatchStatus, Termination, TournamentLink};
pub use time_control::TimeControl;
