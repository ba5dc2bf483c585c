//! Outbound events and the real-time transport seam.
//!
//! Events are published only after the transition they describe has been
//! committed. Rejected commands never produce an event.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::bracket::{Bracket, Tournament};
use crate::session::{BotSeat, ClockPair, MoveRecord};
use crate::types::{
    Color, ConnectionId, MatchId, MatchResult, Position, Termination, TimeControl, TournamentId,
    TournamentLink, UserId,
};
use crate::wager::Wager;

/// Everything the arena tells clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ArenaEvent {
    #[serde(rename = "queue.joined")]
    QueueJoined {
        user: UserId,
        time_control: TimeControl,
        position: usize,
    },
    #[serde(rename = "queue.cancelled")]
    QueueCancelled { user: UserId },
    #[serde(rename = "session.created")]
    SessionCreated {
        match_id: MatchId,
        white: Option<UserId>,
        black: Option<UserId>,
        time_control: TimeControl,
        bot: Option<BotSeat>,
        tournament: Option<TournamentLink>,
    },
    #[serde(rename = "session.started")]
    SessionStarted {
        match_id: MatchId,
        remaining: ClockPair,
    },
    #[serde(rename = "move.applied")]
    MoveApplied {
        match_id: MatchId,
        record: MoveRecord,
        position: Position,
        side_to_move: Color,
        remaining: ClockPair,
    },
    #[serde(rename = "clock.updated")]
    ClockUpdated {
        match_id: MatchId,
        white: u64,
        black: u64,
    },
    #[serde(rename = "match.finished")]
    MatchFinished {
        match_id: MatchId,
        result: MatchResult,
        winner: Option<UserId>,
        reason: Termination,
    },
    #[serde(rename = "match.abandoned")]
    MatchAbandoned { match_id: MatchId },
    #[serde(rename = "spectators.updated")]
    SpectatorsUpdated { match_id: MatchId, count: usize },
    #[serde(rename = "wager.placed")]
    WagerPlaced { match_id: MatchId, wager: Wager },
    #[serde(rename = "bracket.updated")]
    BracketUpdated {
        tournament_id: TournamentId,
        current_round: usize,
        bracket: Bracket,
    },
    #[serde(rename = "tournament.updated")]
    TournamentUpdated { tournament: Box<Tournament> },
}

impl ArenaEvent {
    /// Wire name of the event, e.g. `match.finished`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::QueueJoined { .. } => "queue.joined",
            Self::QueueCancelled { .. } => "queue.cancelled",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionStarted { .. } => "session.started",
            Self::MoveApplied { .. } => "move.applied",
            Self::ClockUpdated { .. } => "clock.updated",
            Self::MatchFinished { .. } => "match.finished",
            Self::MatchAbandoned { .. } => "match.abandoned",
            Self::SpectatorsUpdated { .. } => "spectators.updated",
            Self::WagerPlaced { .. } => "wager.placed",
            Self::BracketUpdated { .. } => "bracket.updated",
            Self::TournamentUpdated { .. } => "tournament.updated",
        }
    }
}

/// Pub/sub scope of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "room", content = "id", rename_all = "lowercase")]
pub enum Room {
    /// Everyone browsing live matches and tournaments.
    Lobby,
    Match(MatchId),
    Tournament(TournamentId),
}

/// Real-time delivery to clients.
pub trait Transport: Send + Sync {
    /// Deliver to every subscriber of `room`.
    fn publish(&self, room: Room, event: ArenaEvent);

    /// Deliver to a single connection.
    fn send_to(&self, connection: ConnectionId, event: ArenaEvent);
}

/// In-process [`Transport`] over tokio channels.
///
/// Each room is a broadcast channel created on first subscription.
/// Connections get an unbounded mpsc channel. A firehose receiver sees every
/// room event, which is what the demo binary and tests use.
pub struct BroadcastHub {
    rooms: DashMap<Room, broadcast::Sender<ArenaEvent>>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<ArenaEvent>>,
    firehose: broadcast::Sender<(Room, ArenaEvent)>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity.max(1));
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            firehose,
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, room: Room) -> broadcast::Receiver<ArenaEvent> {
        self.rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<(Room, ArenaEvent)> {
        self.firehose.subscribe()
    }

    /// Register a connection and return its inbox.
    pub fn connect(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ArenaEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection, tx);
        rx
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Transport for BroadcastHub {
    fn publish(&self, room: Room, event: ArenaEvent) {
        trace!(?room, event = event.name(), "publish");
        let _ = self.firehose.send((room, event.clone()));
        let delivered = match self.rooms.get(&room) {
            Some(tx) => tx.send(event).is_ok(),
            None => return,
        };
        if !delivered {
            // Nobody listens any more.
            self.rooms.remove_if(&room, |_, tx| tx.receiver_count() == 0);
        }
    }

    fn send_to(&self, connection: ConnectionId, event: ArenaEvent) {
        let closed = match self.connections.get(&connection) {
            Some(tx) => tx.send(event).is_err(),
            None => return,
        };
        if closed {
            self.connections.remove(&connection);
        }
    }
}
