//! Wagers on match outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, Result};
use crate::types::{MatchId, MatchResult, UserId, WagerId};

/// Predicted outcome of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    White,
    Black,
    Draw,
}

impl Prediction {
    #[must_use]
    pub const fn matches(self, result: MatchResult) -> bool {
        matches!(
            (self, result),
            (Self::White, MatchResult::WhiteWins)
                | (Self::Black, MatchResult::BlackWins)
                | (Self::Draw, MatchResult::Draw)
        )
    }
}

impl std::str::FromStr for Prediction {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            "draw" => Ok(Self::Draw),
            other => Err(ArenaError::validation(format!(
                "prediction must be white, black or draw, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    /// The match was abandoned. The stake is returned, nothing is paid out.
    Cancelled,
}

impl WagerStatus {
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Won => write!(f, "won"),
            Self::Lost => write!(f, "lost"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub match_id: MatchId,
    pub bettor: UserId,
    pub stake: u64,
    pub prediction: Prediction,
    pub status: WagerStatus,
    pub payout: u64,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    /// A new pending wager. The stake must be positive.
    pub fn new(match_id: MatchId, bettor: UserId, stake: u64, prediction: Prediction) -> Result<Self> {
        if stake == 0 {
            return Err(ArenaError::validation("stake must be positive"));
        }
        Ok(Self {
            id: WagerId::new(),
            match_id,
            bettor,
            stake,
            prediction,
            status: WagerStatus::Pending,
            payout: 0,
            placed_at: Utc::now(),
            settled_at: None,
        })
    }

    /// Status and payout this wager settles to under `result`.
    #[must_use]
    pub fn resolution(&self, result: MatchResult, multiplier: u64) -> (WagerStatus, u64) {
        if self.prediction.matches(result) {
            (WagerStatus::Won, self.stake.saturating_mul(multiplier))
        } else {
            (WagerStatus::Lost, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stake_is_rejected() {
        let err = Wager::new(MatchId::new(), UserId::new(), 0, Prediction::White).unwrap_err();
        assert!(matches!(err, ArenaError::Validation { .. }));
    }

    #[test]
    fn winning_prediction_pays_multiplier() {
        let w = Wager::new(MatchId::new(), UserId::new(), 50, Prediction::White).unwrap();
        assert_eq!(w.resolution(MatchResult::WhiteWins, 2), (WagerStatus::Won, 100));
        assert_eq!(w.resolution(MatchResult::BlackWins, 2), (WagerStatus::Lost, 0));
        assert_eq!(w.resolution(MatchResult::Draw, 2), (WagerStatus::Lost, 0));
    }

    #[test]
    fn draw_prediction() {
        let w = Wager::new(MatchId::new(), UserId::new(), 10, Prediction::Draw).unwrap();
        assert_eq!(w.resolution(MatchResult::Draw, 2), (WagerStatus::Won, 20));
    }

    #[test]
    fn prediction_parsing() {
        assert_eq!("black".parse::<Prediction>().unwrap(), Prediction::Black);
        assert!("white_wins".parse::<Prediction>().is_err());
    }

    #[test]
    fn wager_json_shape() {
        let w = Wager::new(MatchId::new(), UserId::new(), 5, Prediction::Black).unwrap();
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["prediction"], "black");
        assert_eq!(json["status"], "pending");
    }
}
