//! Time control categories.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;

/// Fixed time control categories. Each side starts with the same budget and
/// there is no increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeControl {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    TenMinutes,
    ThirtyMinutes,
}

impl TimeControl {
    /// All categories, shortest first.
    pub const ALL: [Self; 5] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::TenMinutes,
        Self::ThirtyMinutes,
    ];

    /// Starting budget per side in milliseconds.
    #[must_use]
    pub const fn initial_ms(self) -> u64 {
        match self {
            Self::OneMinute => 60_000,
            Self::ThreeMinutes => 180_000,
            Self::FiveMinutes => 300_000,
            Self::TenMinutes => 600_000,
            Self::ThirtyMinutes => 1_800_000,
        }
    }

    #[must_use]
    pub const fn initial_time(self) -> Duration {
        Duration::from_millis(self.initial_ms())
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::ThreeMinutes => "3min",
            Self::FiveMinutes => "5min",
            Self::TenMinutes => "10min",
            Self::ThirtyMinutes => "30min",
        }
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        Self::FiveMinutes
    }
}

impl std::fmt::Display for TimeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeControl {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tc| tc.as_str() == s)
            .ok_or_else(|| ArenaError::validation(format!("unknown time control `{s}`")))
    }
}

impl TryFrom<String> for TimeControl {
    type Error = ArenaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeControl> for String {
    fn from(tc: TimeControl) -> Self {
        tc.as_str().to_string()
    }
}
