use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Arena-level prometheus metrics.
pub struct ArenaMetrics {
    /// Number of sessions currently waiting or ongoing.
    pub active_sessions: IntGauge,
    /// Number of users waiting in matchmaking buckets.
    pub queued_players: IntGauge,
    /// Matches that reached `finished`.
    pub finished_matches: IntCounter,
    /// Wagers resolved as won or lost.
    pub settled_wagers: IntCounter,
    /// Tournaments currently ongoing.
    pub active_tournaments: IntGauge,
}

impl ArenaMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let active_sessions = IntGauge::with_opts(Opts::new(
            "arena_active_sessions",
            "Number of waiting or ongoing match sessions",
        ))?;
        let queued_players = IntGauge::with_opts(Opts::new(
            "arena_queued_players",
            "Number of users waiting for a pairing",
        ))?;
        let finished_matches = IntCounter::with_opts(Opts::new(
            "arena_finished_matches_total",
            "Matches that reached the finished state",
        ))?;
        let settled_wagers = IntCounter::with_opts(Opts::new(
            "arena_settled_wagers_total",
            "Wagers resolved as won or lost",
        ))?;
        let active_tournaments = IntGauge::with_opts(Opts::new(
            "arena_active_tournaments",
            "Number of ongoing tournaments",
        ))?;

        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(queued_players.clone()))?;
        registry.register(Box::new(finished_matches.clone()))?;
        registry.register(Box::new(settled_wagers.clone()))?;
        registry.register(Box::new(active_tournaments.clone()))?;

        Ok(Self {
            active_sessions,
            queued_players,
            finished_matches,
            settled_wagers,
            active_tournaments,
        })
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self {
            active_sessions: IntGauge::new("arena_active_sessions", "sessions")
                .expect("valid metric name"),
            queued_players: IntGauge::new("arena_queued_players", "queued")
                .expect("valid metric name"),
            finished_matches: IntCounter::new("arena_finished_matches_total", "finished")
                .expect("valid metric name"),
            settled_wagers: IntCounter::new("arena_settled_wagers_total", "wagers")
                .expect("valid metric name"),
            active_tournaments: IntGauge::new("arena_active_tournaments", "tournaments")
                .expect("valid metric name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_metrics_work() {
        let m = ArenaMetrics::unregistered();
        m.active_sessions.set(3);
        m.finished_matches.inc();
        assert_eq!(m.active_sessions.get(), 3);
        assert_eq!(m.finished_matches.get(), 1);
    }

    #[test]
    fn registered_metrics_work() {
        let r = Registry::new();
        let m = ArenaMetrics::new(&r).unwrap();
        m.queued_players.set(2);
        assert_eq!(m.queued_players.get(), 2);
        assert_eq!(r.gather().len(), 5);
    }

    #[test]
    fn double_registration_fails() {
        let r = Registry::new();
        let _first = ArenaMetrics::new(&r).unwrap();
        assert!(ArenaMetrics::new(&r).is_err());
    }
}
