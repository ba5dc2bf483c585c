//! Chess Arena - self-contained match lifecycle simulation
//!
//! Run with: `cargo run --package chess-arena -- --players 6 --tournament`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chess_arena::arena::Arena;
use chess_arena::bot::{BotAgent, BotTier};
use chess_arena::bracket::NewTournament;
use chess_arena::config::ArenaConfig;
use chess_arena::events::{ArenaEvent, BroadcastHub, Room};
use chess_arena::metrics::ArenaMetrics;
use chess_arena::rules::{RulesEngine, ShakmatyRules};
use chess_arena::storage::MemoryStore;
use chess_arena::types::{ConnectionId, MatchId, TimeControl, UserId};
use chess_arena::wager::Prediction;
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "chess-arena")]
#[command(about = "Simulate queueing, play, wagers and a tournament in-process")]
struct Args {
    /// Number of simulated players queueing for casual matches.
    #[arg(long, env = "ARENA_PLAYERS", default_value_t = 5)]
    players: usize,

    /// Time control for casual matches (1min, 3min, 5min, 10min, 30min).
    #[arg(long, env = "ARENA_TIME_CONTROL", default_value = "1min")]
    time_control: TimeControl,

    /// How long to run before shutting down, in seconds.
    #[arg(long, env = "ARENA_DURATION_SECS", default_value_t = 90)]
    duration_secs: u64,

    /// Seconds a lone player waits before getting a bot opponent.
    #[arg(long, env = "ARENA_BOT_FALLBACK_SECS", default_value_t = 3)]
    bot_fallback_secs: u64,

    /// Strength of fallback and tournament bots (base or elevated).
    #[arg(long, env = "ARENA_BOT_TIER", default_value = "base")]
    bot_tier: BotTier,

    /// Also run a tournament between the simulated players.
    #[arg(long, env = "ARENA_TOURNAMENT")]
    tournament: bool,

    /// Stake of each simulated wager.
    #[arg(long, env = "ARENA_STAKE", default_value_t = 10)]
    stake: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("chess_arena=info".parse()?))
        .init();

    let args = Args::parse();
    tracing::info!(?args, "Chess Arena starting...");

    let config = ArenaConfig {
        bot_fallback_wait: Duration::from_secs(args.bot_fallback_secs),
        fallback_bot_tier: args.bot_tier,
        tournament_bot_tier: args.bot_tier,
        ..ArenaConfig::default()
    };
    let registry = Registry::new();
    let metrics = Arc::new(ArenaMetrics::new(&registry)?);
    let hub = Arc::new(BroadcastHub::new(config.event_buffer));
    let rules: Arc<dyn RulesEngine> = Arc::new(ShakmatyRules::new());
    let arena = Arena::new(
        config,
        Arc::clone(&rules),
        Arc::new(MemoryStore::new()),
        hub.clone(),
        metrics,
    )?;

    let players: Vec<UserId> = (0..args.players).map(|_| UserId::new()).collect();
    let roster: Arc<HashSet<UserId>> = Arc::new(players.iter().copied().collect());
    let bettor = UserId::new();

    let driver = tokio::spawn(drive_clients(
        Arc::clone(&arena),
        Arc::clone(&rules),
        hub,
        Arc::clone(&roster),
        bettor,
        args.stake,
        args.time_control,
    ));

    if args.tournament && players.len() >= 2 {
        let tournament = arena
            .create_tournament(NewTournament {
                name: "Simulation Cup".to_string(),
                creator: players[0],
                start_time: chrono::Utc::now(),
                max_players: Some(players.len()),
                time_control: Some(args.time_control),
            })
            .await?;
        for &player in &players[1..] {
            arena.join_tournament(tournament.id, player).await?;
        }
        arena.start_tournament(tournament.id).await?;
    } else {
        for &player in &players {
            arena
                .request_match(args.time_control, player, ConnectionId::new())
                .await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    arena.shutdown().await;
    driver.abort();

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    println!("{}", String::from_utf8_lossy(&buffer));
    tracing::info!("Chess Arena shutdown");
    Ok(())
}

/// Play for every simulated user and bet on every new match.
async fn drive_clients(
    arena: Arc<Arena>,
    rules: Arc<dyn RulesEngine>,
    hub: Arc<BroadcastHub>,
    roster: Arc<HashSet<UserId>>,
    bettor: UserId,
    stake: u64,
    time_control: TimeControl,
) {
    let mut events = hub.subscribe_all();
    loop {
        let (room, event) = match events.recv().await {
            Ok(received) => received,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "simulation driver lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        // Lifecycle events also go to the lobby; handle each once.
        match (room, event) {
            (Room::Lobby, ArenaEvent::SessionCreated { match_id, .. }) => {
                let prediction = match rand::thread_rng().gen_range(0..3) {
                    0 => Prediction::White,
                    1 => Prediction::Black,
                    _ => Prediction::Draw,
                };
                if let Err(e) = arena.place_wager(match_id, bettor, stake, prediction).await {
                    tracing::debug!(match_id = %match_id, error = %e, "wager rejected");
                }
            }
            (_, ArenaEvent::SessionStarted { match_id, .. } | ArenaEvent::MoveApplied { match_id, .. }) => {
                tokio::spawn(play_turn(
                    Arc::clone(&arena),
                    Arc::clone(&rules),
                    Arc::clone(&roster),
                    match_id,
                ));
            }
            (
                Room::Lobby,
                ArenaEvent::MatchFinished {
                    match_id,
                    result,
                    reason,
                    ..
                },
            ) => {
                tracing::info!(match_id = %match_id, %result, %reason, "simulated match over");
                requeue(&arena, &roster, match_id, time_control).await;
            }
            _ => {}
        }
    }
}

/// Move for a simulated user if it is their turn.
async fn play_turn(
    arena: Arc<Arena>,
    rules: Arc<dyn RulesEngine>,
    roster: Arc<HashSet<UserId>>,
    match_id: MatchId,
) {
    let think = Duration::from_millis(rand::thread_rng().gen_range(200..1_500));
    tokio::time::sleep(think).await;

    let Ok(snapshot) = arena.get_match(match_id).await else {
        return;
    };
    let Some(user) = snapshot
        .seat(snapshot.side_to_move)
        .filter(|u| roster.contains(u))
    else {
        return;
    };
    let choice = {
        let mut rng = rand::thread_rng();
        BotAgent::choose_move(rules.as_ref(), &snapshot.position, BotTier::Base, &mut rng)
    };
    if let Ok(Some(request)) = choice {
        if let Err(e) = arena.submit_move(match_id, user, request).await {
            tracing::debug!(match_id = %match_id, error = %e, "simulated move rejected");
        }
    }
}

/// Put casual players back in the queue once their match ends.
async fn requeue(arena: &Arena, roster: &HashSet<UserId>, match_id: MatchId, time_control: TimeControl) {
    let Ok(snapshot) = arena.get_match(match_id).await else {
        return;
    };
    if snapshot.tournament.is_some() {
        return;
    }
    for user in [snapshot.white, snapshot.black].into_iter().flatten() {
        if roster.contains(&user) {
            if let Err(e) = arena
                .request_match(time_control, user, ConnectionId::new())
                .await
            {
                tracing::debug!(user_id = %user, error = %e, "requeue failed");
            }
        }
    }
}
