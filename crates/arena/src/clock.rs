use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::{ClockPair, ClockTick, MatchSession};
use crate::tasks::TaskRegistry;
use crate::types::{Color, MatchId};

/// Receives what session tickers observe.
#[async_trait]
pub trait ClockListener: Send + Sync + 'static {
    /// The running side was charged. Called once per tick.
    async fn clock_updated(&self, match_id: MatchId, remaining: ClockPair);

    /// `side` reached zero. Called at most once per session, after which the
    /// ticker exits.
    async fn flag_fell(&self, session: Arc<MatchSession>, side: Color);
}

/// One periodic ticker per ongoing session.
///
/// The ticker only reads which side is running from the session; moves hand
/// the clock over inside the session's own critical section.
pub struct ClockScheduler {
    tick: Duration,
    tasks: TaskRegistry<MatchId>,
}

impl ClockScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            tasks: TaskRegistry::new(),
        }
    }

    /// Start ticking `session`. Replaces a ticker already attached to the
    /// same match. Returns `false` after shutdown.
    pub fn attach(&self, session: Arc<MatchSession>, listener: Weak<dyn ClockListener>) -> bool {
        let tick = self.tick;
        self.tasks.spawn(session.id(), move |cancel| {
            Self::run(session, listener, tick, cancel)
        })
    }

    async fn run(
        session: Arc<MatchSession>,
        listener: Weak<dyn ClockListener>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let match_id = session.id();
        let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(match_id = %match_id, "clock attached");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match session.tick_clock(Instant::now()) {
                ClockTick::Stopped => break,
                ClockTick::Running(remaining) => {
                    let Some(listener) = listener.upgrade() else {
                        break;
                    };
                    listener.clock_updated(match_id, remaining).await;
                }
                ClockTick::Flagged(side) => {
                    info!(match_id = %match_id, side = %side, "flag fell");
                    if let Some(listener) = listener.upgrade() {
                        listener.flag_fell(Arc::clone(&session), side).await;
                    }
                    break;
                }
            }
        }
        debug!(match_id = %match_id, "clock stopped");
    }

    /// Stop the ticker for `match_id`. Idempotent.
    pub fn detach(&self, match_id: MatchId) -> bool {
        self.tasks.cancel(&match_id)
    }

    pub fn is_attached(&self, match_id: MatchId) -> bool {
        self.tasks.contains(&match_id)
    }

    /// Number of running tickers.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    pub async fn shutdown(&self, timeout: Duration) {
        self.tasks.shutdown(timeout).await;
    }
}
