//! Real-time match lifecycle engine.
//!
//! Users queue for timed games, play against each other or a bot, watch and
//! wager, and compete in single-elimination tournaments. The [`arena::Arena`]
//! orchestrates matchmaking, one state machine and clock per match, bot
//! moves, exactly-once settlement and bracket advancement. Chess rules,
//! persistence and delivery to clients sit behind the
//! [`rules::RulesEngine`], [`storage::Store`] and [`events::Transport`]
//! traits.

pub mod arena;
pub mod bot;
pub mod bracket;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod matchmaking;
pub mod metrics;
pub mod rules;
pub mod session;
pub mod settlement;
pub mod storage;
pub mod tasks;
pub mod testing;
pub mod types;
pub mod wager;

/// Commonly used items.
pub mod prelude {
    pub use crate::arena::Arena;
    pub use crate::bot::BotTier;
    pub use crate::bracket::{NewTournament, Tournament, TournamentStatus};
    pub use crate::commands::{Command, MatchRequest, Reply};
    pub use crate::config::ArenaConfig;
    pub use crate::error::{ArenaError, Result};
    pub use crate::events::{ArenaEvent, BroadcastHub, Room, Transport};
    pub use crate::session::SessionSnapshot;
    pub use crate::types::{
        Color, ConnectionId, MatchId, MatchResult, MatchStatus, MoveRequest, TimeControl,
        TournamentId, UserId,
    };
    pub use crate::wager::{Prediction, Wager, WagerStatus};
}
