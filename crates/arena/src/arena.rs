//! The match lifecycle orchestrator.
//!
//! [`Arena`] owns the live sessions and every background registry (clock
//! tickers, bot move timers, matchmaking fallbacks). Commands mutate a
//! session under that session's own lock, then persist and publish after the
//! lock is released. Finished sessions funnel into one `conclude` path that
//! hands the outcome to settlement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::bot::{BotAgent, BotTier};
use crate::bracket::{
    BracketAdvance, BracketEngine, NewTournament, PendingCell, Seed, Tournament, TournamentStatus,
};
use crate::clock::{ClockListener, ClockScheduler};
use crate::commands::{Command, MatchRequest, Reply};
use crate::config::ArenaConfig;
use crate::error::{ArenaError, Result};
use crate::events::{ArenaEvent, Room, Transport};
use crate::matchmaking::{MatchmakingQueue, Pairing, QueueEntry, QueueStatus};
use crate::metrics::ArenaMetrics;
use crate::rules::RulesEngine;
use crate::session::{BotSeat, ClockPair, MatchSession, MoveApplied, Mover, NewSession, SessionSnapshot};
use crate::settlement::SettlementCoordinator;
use crate::storage::{SessionQuery, Store};
use crate::tasks::TaskRegistry;
use crate::types::{
    Color, ConnectionId, MatchId, MatchOutcome, MatchStatus, MoveRequest, TimeControl,
    TournamentId, TournamentLink, UserId,
};
use crate::wager::{Prediction, Wager, WagerStatus};

/// Finished matches returned by [`Arena::match_history`].
pub const HISTORY_LIMIT: usize = 50;

pub struct Arena {
    config: ArenaConfig,
    rules: Arc<dyn RulesEngine>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    metrics: Arc<ArenaMetrics>,
    queue: Arc<MatchmakingQueue>,
    /// Waiting and ongoing sessions. Finished and abandoned sessions are
    /// only in the store.
    sessions: DashMap<MatchId, Arc<MatchSession>>,
    clocks: ClockScheduler,
    bots: TaskRegistry<MatchId>,
    brackets: Arc<BracketEngine>,
    settlement: SettlementCoordinator,
    shutdown: AtomicBool,
    self_ref: OnceLock<Weak<Arena>>,
}

impl Arena {
    pub fn new(
        config: ArenaConfig,
        rules: Arc<dyn RulesEngine>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        metrics: Arc<ArenaMetrics>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let brackets = Arc::new(BracketEngine::new(
            Arc::clone(&store),
            config.default_tournament_size,
            config.max_tournament_size,
        ));
        let settlement = SettlementCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&brackets),
            config.payout_multiplier,
            Arc::clone(&metrics),
        );

        let this = Arc::new(Self {
            clocks: ClockScheduler::new(config.clock_tick_interval),
            config,
            rules,
            store,
            transport,
            metrics,
            queue: Arc::new(MatchmakingQueue::new()),
            sessions: DashMap::new(),
            bots: TaskRegistry::new(),
            brackets,
            settlement,
            shutdown: AtomicBool::new(false),
            self_ref: OnceLock::new(),
        });
        // Freshly created, so the cell is empty.
        let _ = this.self_ref.set(Arc::downgrade(&this));
        Ok(this)
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ArenaMetrics {
        &self.metrics
    }

    fn weak(&self) -> Weak<Self> {
        self.self_ref.get().cloned().unwrap_or_default()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ArenaError::ShuttingDown);
        }
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn live(&self, match_id: MatchId) -> Option<Arc<MatchSession>> {
        self.sessions.get(&match_id).map(|e| Arc::clone(e.value()))
    }

    /// The live session, or the reason there is none.
    async fn live_session(&self, match_id: MatchId) -> Result<Arc<MatchSession>> {
        if let Some(session) = self.live(match_id) {
            return Ok(session);
        }
        match self.store.find_session(match_id).await? {
            Some(stored) => Err(ArenaError::state(format!("match is {}", stored.status))),
            None => Err(ArenaError::not_found("match", match_id)),
        }
    }

    async fn persist(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.store.save_session(snapshot).await {
            warn!(match_id = %snapshot.id, error = %e, "failed to persist session");
        }
    }

    fn sync_queue_gauge(&self) {
        self.metrics
            .queued_players
            .set(i64::try_from(self.queue.len()).unwrap_or(i64::MAX));
    }

    fn untrack(&self, match_id: MatchId) {
        self.clocks.detach(match_id);
        self.bots.cancel(&match_id);
        if self.sessions.remove(&match_id).is_some() {
            self.metrics.active_sessions.dec();
        }
    }

    // ---- matchmaking ----

    /// Queue `user` for a human opponent. Pairs immediately when someone is
    /// already waiting, otherwise arms the bot fallback.
    #[instrument(skip(self, connection), fields(user_id = %user, time_control = %time_control))]
    pub async fn request_match(
        &self,
        time_control: TimeControl,
        user: UserId,
        connection: ConnectionId,
    ) -> Result<MatchRequest> {
        self.ensure_running()?;
        let (entry, position) = self.queue.enqueue(time_control, user, connection);
        let weak = self.weak();
        self.queue.schedule_bot_fallback(
            entry.clone(),
            self.config.bot_fallback_wait,
            move |entry| async move {
                if let Some(arena) = weak.upgrade() {
                    arena.fallback_to_bot(entry).await;
                }
            },
        );
        self.sync_queue_gauge();

        let mut paired = None;
        while let Some(pairing) = self.queue.pair(time_control) {
            self.sync_queue_gauge();
            let involves = pairing.white.user == user || pairing.black.user == user;
            match self.launch_pairing(pairing).await {
                Ok(snapshot) if involves => paired = Some(snapshot),
                Ok(_) => {}
                Err(e) if involves => return Err(e),
                Err(e) => error!(error = %e, "failed to launch paired match"),
            }
        }

        match paired {
            Some(snapshot) => Ok(MatchRequest::Paired {
                session: Box::new(snapshot),
            }),
            None => {
                self.transport.send_to(
                    connection,
                    ArenaEvent::QueueJoined {
                        user,
                        time_control,
                        position,
                    },
                );
                Ok(MatchRequest::Queued { entry, position })
            }
        }
    }

    async fn launch_pairing(&self, pairing: Pairing) -> Result<SessionSnapshot> {
        let Pairing { white, black } = pairing;
        self.launch_session(
            NewSession::human(white.user, black.user, white.time_control),
            &[white.connection, black.connection],
        )
        .await
    }

    async fn fallback_to_bot(&self, entry: QueueEntry) {
        self.sync_queue_gauge();
        let params = NewSession::against_bot(
            entry.user,
            Color::White,
            self.config.fallback_bot_tier,
            entry.time_control,
        );
        if let Err(e) = self.launch_session(params, &[entry.connection]).await {
            error!(user_id = %entry.user, error = %e, "bot fallback failed");
        }
    }

    /// Start a match against a bot right away. The user leaves any queue.
    pub async fn request_bot_match(
        &self,
        time_control: TimeControl,
        user: UserId,
        color: Color,
        tier: BotTier,
    ) -> Result<SessionSnapshot> {
        self.ensure_running()?;
        if self.queue.cancel(user).is_some() {
            self.sync_queue_gauge();
        }
        self.launch_session(NewSession::against_bot(user, color, tier, time_control), &[])
            .await
    }

    /// Leave matchmaking. Returns whether the user was queued.
    pub fn cancel_request(&self, user: UserId) -> bool {
        match self.queue.cancel(user) {
            Some(entry) => {
                self.sync_queue_gauge();
                self.transport
                    .send_to(entry.connection, ArenaEvent::QueueCancelled { user });
                debug!(user_id = %user, "left queue");
                true
            }
            None => false,
        }
    }

    // ---- session lifecycle ----

    async fn launch_session(
        &self,
        params: NewSession,
        notify: &[ConnectionId],
    ) -> Result<SessionSnapshot> {
        let session = self.create_session(params, notify).await?;
        self.start_session(&session).await
    }

    async fn create_session(
        &self,
        params: NewSession,
        notify: &[ConnectionId],
    ) -> Result<Arc<MatchSession>> {
        self.ensure_running()?;
        let session = Arc::new(MatchSession::new(
            MatchId::new(),
            params,
            self.rules.initial_position(),
        )?);
        let snapshot = session.snapshot();
        self.store.insert_session(&snapshot).await?;
        self.sessions.insert(snapshot.id, Arc::clone(&session));
        self.metrics.active_sessions.inc();

        let event = ArenaEvent::SessionCreated {
            match_id: snapshot.id,
            white: snapshot.white,
            black: snapshot.black,
            time_control: snapshot.time_control,
            bot: snapshot.bot,
            tournament: snapshot.tournament,
        };
        for connection in notify {
            self.transport.send_to(*connection, event.clone());
        }
        self.transport.publish(Room::Lobby, event.clone());
        self.transport.publish(Room::Match(snapshot.id), event);
        debug!(match_id = %snapshot.id, "session created");
        Ok(session)
    }

    async fn start_session(&self, session: &Arc<MatchSession>) -> Result<SessionSnapshot> {
        let snapshot = session.start(Instant::now())?;
        self.persist(&snapshot).await;
        self.transport.publish(
            Room::Match(snapshot.id),
            ArenaEvent::SessionStarted {
                match_id: snapshot.id,
                remaining: snapshot.remaining,
            },
        );

        let listener: Weak<dyn ClockListener> = self.weak();
        self.clocks.attach(Arc::clone(session), listener);
        if snapshot.is_bot_turn() {
            self.schedule_bot_move(Arc::clone(session));
        }
        info!(
            match_id = %snapshot.id,
            white = ?snapshot.white,
            black = ?snapshot.black,
            time_control = %snapshot.time_control,
            bot = snapshot.is_bot_match(),
            "session started"
        );
        Ok(snapshot)
    }

    /// Submit a human move.
    #[instrument(skip(self, request), fields(match_id = %match_id, user_id = %user, mv = %request))]
    pub async fn submit_move(
        &self,
        match_id: MatchId,
        user: UserId,
        request: MoveRequest,
    ) -> Result<SessionSnapshot> {
        self.ensure_running()?;
        let session = self.live_session(match_id).await?;
        let applied = session.apply_move(
            Mover::Player(user),
            &request,
            self.rules.as_ref(),
            Instant::now(),
        )?;
        let snapshot = applied.snapshot.clone();
        self.after_move(&session, applied).await;
        Ok(snapshot)
    }

    async fn after_move(&self, session: &Arc<MatchSession>, applied: MoveApplied) {
        let MoveApplied {
            record,
            snapshot,
            outcome,
        } = applied;
        self.persist(&snapshot).await;
        self.transport.publish(
            Room::Match(snapshot.id),
            ArenaEvent::MoveApplied {
                match_id: snapshot.id,
                record,
                position: snapshot.position.clone(),
                side_to_move: snapshot.side_to_move,
                remaining: snapshot.remaining,
            },
        );

        match outcome {
            Some(outcome) => self.conclude(session, outcome).await,
            None if snapshot.is_bot_turn() => self.schedule_bot_move(Arc::clone(session)),
            None => {}
        }
    }

    fn schedule_bot_move(&self, session: Arc<MatchSession>) {
        let delay = BotAgent::decision_delay(
            self.config.bot_move_delay_min,
            self.config.bot_move_delay_max,
            &mut rand::thread_rng(),
        );
        let weak = self.weak();
        let match_id = session.id();
        self.bots.schedule_after(match_id, delay, async move {
            if let Some(arena) = weak.upgrade() {
                arena.play_bot_move(session).await;
            }
        });
    }

    async fn play_bot_move(&self, session: Arc<MatchSession>) {
        let snapshot = session.snapshot();
        let Some(seat) = snapshot.bot.filter(|_| snapshot.is_bot_turn()) else {
            return;
        };
        let choice = {
            let mut rng = rand::thread_rng();
            BotAgent::choose_move(self.rules.as_ref(), &snapshot.position, seat.tier, &mut rng)
        };
        let request = match choice {
            Ok(Some(request)) => request,
            Ok(None) => {
                warn!(match_id = %snapshot.id, "bot has no legal move");
                return;
            }
            Err(e) => {
                error!(match_id = %snapshot.id, error = %e, "bot failed to choose a move");
                return;
            }
        };

        match session.apply_move(Mover::Bot, &request, self.rules.as_ref(), Instant::now()) {
            Ok(applied) => {
                debug!(match_id = %snapshot.id, mv = %request, tier = %seat.tier, "bot moved");
                self.after_move(&session, applied).await;
            }
            // Lost a race with the clock or an abandonment.
            Err(e) => debug!(match_id = %snapshot.id, error = %e, "bot move discarded"),
        }
    }

    /// Tear down a finished session and settle it.
    #[instrument(skip(self, session, outcome), fields(match_id = %outcome.match_id, result = %outcome.result))]
    async fn conclude(&self, session: &Arc<MatchSession>, outcome: MatchOutcome) {
        self.untrack(outcome.match_id);
        self.metrics.finished_matches.inc();
        self.persist(&session.snapshot()).await;

        let event = ArenaEvent::MatchFinished {
            match_id: outcome.match_id,
            result: outcome.result,
            winner: outcome.winner,
            reason: outcome.termination,
        };
        self.transport.publish(Room::Lobby, event.clone());
        self.transport.publish(Room::Match(outcome.match_id), event);
        info!(winner = ?outcome.winner, termination = %outcome.termination, "match finished");

        let Some(settlement) = self.settlement.settle(&outcome).await else {
            return;
        };
        if let Some((tournament, advance)) = settlement.bracket {
            self.on_bracket_advance(tournament, advance).await;
        }
    }

    /// `waiting | ongoing -> abandoned` for a casual match. Pending wagers are
    /// cancelled and nothing is settled.
    pub async fn abandon_match(&self, match_id: MatchId) -> Result<SessionSnapshot> {
        let session = self.live_session(match_id).await?;
        let snapshot = session.abandon()?;
        self.untrack(match_id);
        self.persist(&snapshot).await;
        if let Err(e) = self.settlement.cancel_wagers(match_id).await {
            error!(match_id = %match_id, error = %e, "failed to cancel wagers");
        }

        let event = ArenaEvent::MatchAbandoned { match_id };
        self.transport.publish(Room::Lobby, event.clone());
        self.transport.publish(Room::Match(match_id), event);
        info!(match_id = %match_id, "match abandoned");
        Ok(snapshot)
    }

    // ---- spectators and wagers ----

    pub async fn join_spectator(&self, match_id: MatchId, user: UserId) -> Result<usize> {
        let session = self.live_session(match_id).await?;
        let count = session.add_spectator(user);
        self.persist(&session.snapshot()).await;
        self.transport.publish(
            Room::Match(match_id),
            ArenaEvent::SpectatorsUpdated { match_id, count },
        );
        Ok(count)
    }

    pub async fn leave_spectator(&self, match_id: MatchId, user: UserId) -> Result<usize> {
        let session = self.live_session(match_id).await?;
        let count = session.remove_spectator(user);
        self.persist(&session.snapshot()).await;
        self.transport.publish(
            Room::Match(match_id),
            ArenaEvent::SpectatorsUpdated { match_id, count },
        );
        Ok(count)
    }

    /// Place a wager on a waiting or ongoing match.
    #[instrument(skip(self), fields(match_id = %match_id, user_id = %user))]
    pub async fn place_wager(
        &self,
        match_id: MatchId,
        user: UserId,
        amount: u64,
        prediction: Prediction,
    ) -> Result<Wager> {
        self.ensure_running()?;
        let mut wager = Wager::new(match_id, user, amount, prediction)?;
        let session = self.live_session(match_id).await?;
        let status = session.status();
        if !status.accepts_wagers() {
            return Err(ArenaError::state(format!("cannot wager on a match that is {status}")));
        }
        self.store.insert_wager(&wager).await?;
        self.transport.publish(
            Room::Match(match_id),
            ArenaEvent::WagerPlaced {
                match_id,
                wager: wager.clone(),
            },
        );

        // The match may have ended while the wager was stored. If settlement
        // already read the pending wagers, this one is resolved here.
        let current = session.snapshot();
        match current.status {
            MatchStatus::Finished => {
                if self.settlement.is_settled(match_id).await? {
                    if let Some(resolved) =
                        self.settlement.resolve(wager.clone(), current.result).await?
                    {
                        return Ok(resolved);
                    }
                }
            }
            MatchStatus::Abandoned => {
                self.settlement.cancel_wagers(match_id).await?;
                wager.status = WagerStatus::Cancelled;
            }
            _ => {}
        }
        Ok(wager)
    }

    // ---- tournaments ----

    pub async fn create_tournament(&self, params: NewTournament) -> Result<Tournament> {
        self.ensure_running()?;
        let tournament = self.brackets.create(params).await?;
        self.publish_tournament(&tournament);
        Ok(tournament)
    }

    pub async fn join_tournament(&self, id: TournamentId, user: UserId) -> Result<Tournament> {
        self.ensure_running()?;
        let tournament = self.brackets.join(id, user).await?;
        self.publish_tournament(&tournament);
        Ok(tournament)
    }

    /// Seed the bracket and launch the first round's matches.
    #[instrument(skip(self), fields(tournament_id = %id))]
    pub async fn start_tournament(&self, id: TournamentId) -> Result<Tournament> {
        self.ensure_running()?;
        let (started, pending) = self.brackets.start(id).await?;
        if started.status == TournamentStatus::Ongoing {
            self.metrics.active_tournaments.inc();
        }
        self.launch_cells(pending).await;
        let latest = self.brackets.get(id).unwrap_or(started);
        self.publish_tournament(&latest);
        Ok(latest)
    }

    async fn on_bracket_advance(&self, tournament: Tournament, advance: BracketAdvance) {
        match advance {
            BracketAdvance::Ignored => return,
            BracketAdvance::Recorded => {}
            BracketAdvance::RoundComplete { pending, .. } => self.launch_cells(pending).await,
            BracketAdvance::Finished { .. } => self.metrics.active_tournaments.dec(),
        }
        let latest = self.brackets.get(tournament.id).unwrap_or(tournament);
        self.publish_tournament(&latest);
    }

    async fn launch_cells(&self, cells: Vec<PendingCell>) {
        for cell in cells {
            if let Err(e) = self.launch_cell(&cell).await {
                error!(
                    tournament_id = %cell.tournament_id,
                    round = cell.round,
                    cell = cell.cell,
                    error = %e,
                    "failed to launch tournament match"
                );
            }
        }
    }

    /// One session per ready cell. A bot seed takes its seat as a bot.
    async fn launch_cell(&self, cell: &PendingCell) -> Result<()> {
        let tier = self.config.tournament_bot_tier;
        let bot = match (cell.white, cell.black) {
            (Seed::Bot, Seed::Bot) => return Err(ArenaError::state("bot walkovers need no match")),
            (Seed::Bot, _) => Some(BotSeat {
                color: Color::White,
                tier,
            }),
            (_, Seed::Bot) => Some(BotSeat {
                color: Color::Black,
                tier,
            }),
            _ => None,
        };
        let params = NewSession {
            white: cell.white.user(),
            black: cell.black.user(),
            time_control: cell.time_control,
            bot,
            tournament: Some(TournamentLink {
                tournament_id: cell.tournament_id,
                round: cell.round,
                cell: cell.cell,
            }),
        };

        // Link before starting so the outcome always finds its cell.
        let session = self.create_session(params, &[]).await?;
        if let Err(e) = self
            .brackets
            .link_match(cell.tournament_id, cell.round, cell.cell, session.id())
            .await
        {
            self.untrack(session.id());
            return Err(e);
        }
        self.start_session(&session).await?;
        Ok(())
    }

    fn publish_tournament(&self, tournament: &Tournament) {
        let room = Room::Tournament(tournament.id);
        if let Some(bracket) = &tournament.bracket {
            self.transport.publish(
                room,
                ArenaEvent::BracketUpdated {
                    tournament_id: tournament.id,
                    current_round: tournament.current_round,
                    bracket: bracket.clone(),
                },
            );
        }
        let event = ArenaEvent::TournamentUpdated {
            tournament: Box::new(tournament.clone()),
        };
        self.transport.publish(room, event.clone());
        self.transport.publish(Room::Lobby, event);
    }

    // ---- queries ----

    pub async fn get_match(&self, match_id: MatchId) -> Result<SessionSnapshot> {
        if let Some(session) = self.live(match_id) {
            return Ok(session.snapshot());
        }
        self.store
            .find_session(match_id)
            .await?
            .ok_or_else(|| ArenaError::not_found("match", match_id))
    }

    /// Ongoing matches, newest first.
    pub fn live_matches(&self) -> Vec<SessionSnapshot> {
        let mut live: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|s| s.status == MatchStatus::Ongoing)
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        live
    }

    /// A user's finished matches, newest first.
    pub async fn match_history(&self, user: UserId) -> Result<Vec<SessionSnapshot>> {
        self.store
            .find_sessions(&SessionQuery {
                status: Some(MatchStatus::Finished),
                participant: Some(user),
                tournament: None,
                limit: Some(HISTORY_LIMIT),
            })
            .await
    }

    pub async fn wagers_for_match(&self, match_id: MatchId) -> Result<Vec<Wager>> {
        self.store.wagers_for_match(match_id, None).await
    }

    pub async fn wagers_for_user(&self, user: UserId) -> Result<Vec<Wager>> {
        self.store.wagers_for_user(user).await
    }

    pub fn queue_status(&self) -> Vec<QueueStatus> {
        self.queue.status()
    }

    pub async fn get_tournament(&self, id: TournamentId) -> Result<Tournament> {
        if let Ok(tournament) = self.brackets.get(id) {
            return Ok(tournament);
        }
        self.store
            .find_tournament(id)
            .await?
            .ok_or_else(|| ArenaError::not_found("tournament", id))
    }

    pub async fn tournaments(&self, status: Option<TournamentStatus>) -> Result<Vec<Tournament>> {
        self.store.find_tournaments(status).await
    }

    /// Number of waiting or ongoing sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_clock_running(&self, match_id: MatchId) -> bool {
        self.clocks.is_attached(match_id)
    }

    pub fn has_pending_bot_move(&self, match_id: MatchId) -> bool {
        self.bots.contains(&match_id)
    }

    // ---- command surface ----

    pub async fn dispatch(&self, command: Command) -> Result<Reply> {
        debug!(command = command.name(), "dispatch");
        match command {
            Command::RequestMatch {
                user,
                time_control,
                connection,
            } => self
                .request_match(time_control, user, connection.unwrap_or_default())
                .await
                .map(Reply::Match),
            Command::RequestBotMatch {
                user,
                time_control,
                color,
                difficulty,
            } => self
                .request_bot_match(time_control, user, color, difficulty)
                .await
                .map(|s| Reply::Session(Box::new(s))),
            Command::CancelRequest { user } => Ok(Reply::Cancelled {
                removed: self.cancel_request(user),
            }),
            Command::SubmitMove {
                match_id,
                user,
                from,
                to,
                promotion,
            } => {
                let request = Command::move_request(&from, &to, promotion.as_deref())?;
                self.submit_move(match_id, user, request)
                    .await
                    .map(|s| Reply::Session(Box::new(s)))
            }
            Command::JoinSpectator { match_id, user } => self
                .join_spectator(match_id, user)
                .await
                .map(|count| Reply::Spectators { count }),
            Command::LeaveSpectator { match_id, user } => self
                .leave_spectator(match_id, user)
                .await
                .map(|count| Reply::Spectators { count }),
            Command::PlaceWager {
                match_id,
                user,
                amount,
                prediction,
            } => self
                .place_wager(match_id, user, amount, prediction)
                .await
                .map(Reply::Wager),
            Command::AbandonMatch { match_id } => self
                .abandon_match(match_id)
                .await
                .map(|s| Reply::Session(Box::new(s))),
            Command::CreateTournament {
                creator,
                name,
                start_time,
                max_players,
                time_control,
            } => self
                .create_tournament(NewTournament {
                    name,
                    creator,
                    start_time: start_time.unwrap_or_else(Utc::now),
                    max_players,
                    time_control,
                })
                .await
                .map(|t| Reply::Tournament(Box::new(t))),
            Command::JoinTournament {
                tournament_id,
                user,
            } => self
                .join_tournament(tournament_id, user)
                .await
                .map(|t| Reply::Tournament(Box::new(t))),
            Command::StartTournament { tournament_id } => self
                .start_tournament(tournament_id)
                .await
                .map(|t| Reply::Tournament(Box::new(t))),
        }
    }

    /// Stop accepting commands and tear down every background task.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let timeout = self.config.shutdown_timeout;
        self.queue.shutdown(timeout).await;
        self.bots.shutdown(timeout).await;
        self.clocks.shutdown(timeout).await;
        self.metrics.queued_players.set(0);
        info!(live_sessions = self.sessions.len(), "arena shut down");
    }
}

#[async_trait]
impl ClockListener for Arena {
    async fn clock_updated(&self, match_id: MatchId, remaining: ClockPair) {
        if let Err(e) = self.store.update_clock(match_id, remaining).await {
            warn!(match_id = %match_id, error = %e, "failed to persist clock");
        }
        self.transport.publish(
            Room::Match(match_id),
            ArenaEvent::ClockUpdated {
                match_id,
                white: remaining.white,
                black: remaining.black,
            },
        );
    }

    async fn flag_fell(&self, session: Arc<MatchSession>, side: Color) {
        if let Some(outcome) = session.apply_timeout(side) {
            self.conclude(&session, outcome).await;
        }
    }
}
