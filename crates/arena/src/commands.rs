//! Inbound command surface.
//!
//! Commands arrive as JSON objects tagged by `command`. Anything that fails
//! to deserialize is a validation error and never reaches the arena.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bot::BotTier;
use crate::bracket::Tournament;
use crate::error::{ArenaError, Result};
use crate::matchmaking::QueueEntry;
use crate::session::SessionSnapshot;
use crate::types::{Color, ConnectionId, MatchId, MoveRequest, TimeControl, TournamentId, UserId};
use crate::wager::{Prediction, Wager};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RequestMatch {
        user: UserId,
        time_control: TimeControl,
        #[serde(default)]
        connection: Option<ConnectionId>,
    },
    RequestBotMatch {
        user: UserId,
        time_control: TimeControl,
        color: Color,
        #[serde(default)]
        difficulty: BotTier,
    },
    CancelRequest {
        user: UserId,
    },
    SubmitMove {
        match_id: MatchId,
        user: UserId,
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
    JoinSpectator {
        match_id: MatchId,
        user: UserId,
    },
    LeaveSpectator {
        match_id: MatchId,
        user: UserId,
    },
    PlaceWager {
        match_id: MatchId,
        user: UserId,
        amount: u64,
        prediction: Prediction,
    },
    AbandonMatch {
        match_id: MatchId,
    },
    CreateTournament {
        creator: UserId,
        name: String,
        #[serde(default)]
        start_time: Option<DateTime<Utc>>,
        #[serde(default)]
        max_players: Option<usize>,
        #[serde(default)]
        time_control: Option<TimeControl>,
    },
    JoinTournament {
        tournament_id: TournamentId,
        user: UserId,
    },
    StartTournament {
        tournament_id: TournamentId,
    },
}

impl Command {
    /// Parse a JSON command. Malformed input is a validation error.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ArenaError::validation(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ArenaError::validation(e.to_string()))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestMatch { .. } => "request_match",
            Self::RequestBotMatch { .. } => "request_bot_match",
            Self::CancelRequest { .. } => "cancel_request",
            Self::SubmitMove { .. } => "submit_move",
            Self::JoinSpectator { .. } => "join_spectator",
            Self::LeaveSpectator { .. } => "leave_spectator",
            Self::PlaceWager { .. } => "place_wager",
            Self::AbandonMatch { .. } => "abandon_match",
            Self::CreateTournament { .. } => "create_tournament",
            Self::JoinTournament { .. } => "join_tournament",
            Self::StartTournament { .. } => "start_tournament",
        }
    }

    /// Move fields of a `submit_move`, parsed.
    pub(crate) fn move_request(from: &str, to: &str, promotion: Option<&str>) -> Result<MoveRequest> {
        MoveRequest::parse(from, to, promotion)
    }
}

/// Result of a match request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchRequest {
    /// Waiting for an opponent.
    Queued { entry: QueueEntry, position: usize },
    /// Paired immediately; the session is already ongoing.
    Paired { session: Box<SessionSnapshot> },
}

/// Successful reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Match(MatchRequest),
    Session(Box<SessionSnapshot>),
    Cancelled { removed: bool },
    Spectators { count: usize },
    Wager(Wager),
    Tournament(Box<Tournament>),
}
