use crate::bot::BotTier;
use crate::error::ArenaError;
use std::time::Duration;

/// Configuration for the match lifecycle engine.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Period of each session's clock ticker. Default: 100ms.
    pub clock_tick_interval: Duration,
    /// How long a queued user waits for a human peer before being matched
    /// against a bot. Default: 3s.
    pub bot_fallback_wait: Duration,
    /// Lower bound of the random delay before a bot submits its move. Default: 100ms.
    pub bot_move_delay_min: Duration,
    /// Upper bound of the bot move delay. Default: 900ms.
    pub bot_move_delay_max: Duration,
    /// Bot strength used for queue fallback matches. Default: base.
    pub fallback_bot_tier: BotTier,
    /// Bot strength used for tournament placeholder seats. Default: base.
    pub tournament_bot_tier: BotTier,
    /// A winning wager pays `stake * payout_multiplier`. Default: 2.
    pub payout_multiplier: u64,
    /// Capacity of each room's broadcast channel. Slow subscribers lag
    /// behind and drop events past this bound. Default: 256.
    pub event_buffer: usize,
    /// Tournament size when the creator does not specify one. Default: 8.
    pub default_tournament_size: usize,
    /// Largest accepted tournament. Default: 128.
    pub max_tournament_size: usize,
    /// How long shutdown waits for clock and bot tasks to stop. Default: 5s.
    pub shutdown_timeout: Duration,
}

impl ArenaConfig {
    /// Validate configuration values.
    ///
    /// Checks:
    /// - tick, fallback and shutdown durations are non-zero
    /// - `bot_move_delay_min <= bot_move_delay_max`
    /// - `payout_multiplier >= 1` and `event_buffer >= 1`
    /// - `2 <= default_tournament_size <= max_tournament_size`
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.clock_tick_interval.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "clock_tick_interval must be > 0".to_string(),
            });
        }
        if self.bot_fallback_wait.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "bot_fallback_wait must be > 0".to_string(),
            });
        }
        if self.bot_move_delay_min > self.bot_move_delay_max {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "bot_move_delay_min ({:?}) must not exceed bot_move_delay_max ({:?})",
                    self.bot_move_delay_min, self.bot_move_delay_max
                ),
            });
        }
        if self.payout_multiplier == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "payout_multiplier must be >= 1".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "event_buffer must be >= 1".to_string(),
            });
        }
        if self.default_tournament_size < 2 {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "default_tournament_size must be >= 2, got {}",
                    self.default_tournament_size
                ),
            });
        }
        if self.max_tournament_size < self.default_tournament_size {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_tournament_size ({}) must be >= default_tournament_size ({})",
                    self.max_tournament_size, self.default_tournament_size
                ),
            });
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ArenaError::InvalidConfig {
                reason: "shutdown_timeout must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            clock_tick_interval: Duration::from_millis(100),
            bot_fallback_wait: Duration::from_secs(3),
            bot_move_delay_min: Duration::from_millis(100),
            bot_move_delay_max: Duration::from_millis(900),
            fallback_bot_tier: BotTier::Base,
            tournament_bot_tier: BotTier::Base,
            payout_multiplier: 2,
            event_buffer: 256,
            default_tournament_size: 8,
            max_tournament_size: 128,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
