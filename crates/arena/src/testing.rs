//! In-memory arena for unit and integration testing.
//!
//! Wires an [`Arena`] to the in-memory store, the shakmaty rules engine and a
//! [`BroadcastHub`], with metrics left unregistered. A firehose receiver
//! records every published event so tests can assert on what was broadcast.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use crate::arena::Arena;
use crate::commands::MatchRequest;
use crate::config::ArenaConfig;
use crate::events::{ArenaEvent, BroadcastHub, Room};
use crate::metrics::ArenaMetrics;
use crate::rules::ShakmatyRules;
use crate::session::SessionSnapshot;
use crate::storage::MemoryStore;
use crate::types::{ConnectionId, TimeControl, UserId};

/// Room capacity used by test arenas. Large enough that clock updates from
/// a full one-minute game do not push lifecycle events out of the firehose.
const TEST_EVENT_BUFFER: usize = 8_192;

/// A single-process arena over in-memory collaborators.
///
/// # Example
///
/// ```ignore
/// let mut arena = TestArena::new();
/// let (session, white, black) = arena.paired_match(TimeControl::FiveMinutes).await;
/// arena.submit_move(session.id, white, MoveRequest::parse("e2", "e4", None)?).await?;
/// assert_eq!(arena.drain_named("move.applied").len(), 1);
/// arena.shutdown().await;
/// ```
pub struct TestArena {
    pub arena: Arc<Arena>,
    pub store: Arc<MemoryStore>,
    pub hub: Arc<BroadcastHub>,
    events: Receiver<(Room, ArenaEvent)>,
}

impl TestArena {
    /// Create a test arena with default configuration.
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Create a test arena with custom configuration.
    pub fn with_config(config: ArenaConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(BroadcastHub::new(config.event_buffer.max(TEST_EVENT_BUFFER)));
        let events = hub.subscribe_all();
        let arena = Arena::new(
            config,
            Arc::new(ShakmatyRules::new()),
            store.clone(),
            hub.clone(),
            Arc::new(ArenaMetrics::unregistered()),
        )
        .expect("TestArena config should be valid");
        Self {
            arena,
            store,
            hub,
            events,
        }
    }

    /// Every event published since the last drain, in publish order.
    pub fn drain(&mut self) -> Vec<(Room, ArenaEvent)> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        drained
    }

    /// Drained events with the given wire name. Events published to several
    /// rooms appear once per room.
    pub fn drain_named(&mut self, name: &str) -> Vec<ArenaEvent> {
        self.drain()
            .into_iter()
            .map(|(_, event)| event)
            .filter(|event| event.name() == name)
            .collect()
    }

    /// Queue two fresh users for `time_control` and return the resulting
    /// session with its white and black user.
    pub async fn paired_match(&self, time_control: TimeControl) -> (SessionSnapshot, UserId, UserId) {
        let (white, black) = (UserId::new(), UserId::new());
        self.arena
            .request_match(time_control, white, ConnectionId::new())
            .await
            .expect("first request should queue");
        let reply = self
            .arena
            .request_match(time_control, black, ConnectionId::new())
            .await
            .expect("second request should pair");
        match reply {
            MatchRequest::Paired { session } => (*session, white, black),
            MatchRequest::Queued { .. } => panic!("expected an immediate pairing"),
        }
    }
}

impl Default for TestArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestArena {
    type Target = Arena;

    fn deref(&self) -> &Self::Target {
        &self.arena
    }
}
