use std::time::Duration;

use chess_arena::bot::BotTier;
use chess_arena::commands::MatchRequest;
use chess_arena::error::ArenaError;
use chess_arena::events::ArenaEvent;
use chess_arena::session::BotSeat;
use chess_arena::testing::TestArena;
use chess_arena::storage::Store;
use chess_arena::types::{
    Color, ConnectionId, MatchId, MatchResult, MatchStatus, MoveRequest, Termination, TimeControl,
    UserId,
};
use chess_arena::wager::{Prediction, WagerStatus};

fn mv(from: &str, to: &str) -> MoveRequest {
    MoveRequest::parse(from, to, None).unwrap()
}

/// Play 1. f3 e5 2. g4 Qh4#, black mates.
async fn fools_mate(t: &TestArena, match_id: MatchId, white: UserId, black: UserId) {
    t.submit_move(match_id, white, mv("f2", "f3")).await.unwrap();
    t.submit_move(match_id, black, mv("e7", "e5")).await.unwrap();
    t.submit_move(match_id, white, mv("g2", "g4")).await.unwrap();
    t.submit_move(match_id, black, mv("d8", "h4")).await.unwrap();
}

fn waiting_for(t: &TestArena, time_control: TimeControl) -> usize {
    t.queue_status()
        .into_iter()
        .find(|s| s.time_control == time_control)
        .map_or(0, |s| s.waiting)
}

#[tokio::test(start_paused = true)]
async fn pairing_starts_an_ongoing_match_with_full_clocks() {
    let t = TestArena::new();
    let (session, white, black) = t.paired_match(TimeControl::FiveMinutes).await;

    assert_eq!(session.status, MatchStatus::Ongoing);
    assert_eq!(session.white, Some(white));
    assert_eq!(session.black, Some(black));
    assert_eq!(session.remaining.white, 300_000);
    assert_eq!(session.remaining.black, 300_000);
    assert_eq!(session.side_to_move, Color::White);
    assert!(session.bot.is_none());
    assert!(t.is_clock_running(session.id));
    assert_eq!(waiting_for(&t, TimeControl::FiveMinutes), 0);
    assert_eq!(t.live_matches().len(), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn queue_pairs_oldest_first_and_holds_one_entry_per_user() {
    let t = TestArena::new();
    let (a, b, c, d) = (UserId::new(), UserId::new(), UserId::new(), UserId::new());

    t.request_match(TimeControl::ThreeMinutes, a, ConnectionId::new())
        .await
        .unwrap();
    // Switching time control moves the single entry.
    let reply = t
        .request_match(TimeControl::OneMinute, a, ConnectionId::new())
        .await
        .unwrap();
    assert!(matches!(reply, MatchRequest::Queued { position: 1, .. }));
    assert_eq!(waiting_for(&t, TimeControl::ThreeMinutes), 0);
    assert_eq!(waiting_for(&t, TimeControl::OneMinute), 1);

    let reply = t
        .request_match(TimeControl::OneMinute, b, ConnectionId::new())
        .await
        .unwrap();
    let MatchRequest::Paired { session } = reply else {
        panic!("expected a pairing");
    };
    assert_eq!(session.white, Some(a));
    assert_eq!(session.black, Some(b));

    let reply = t
        .request_match(TimeControl::OneMinute, c, ConnectionId::new())
        .await
        .unwrap();
    assert!(matches!(reply, MatchRequest::Queued { position: 1, .. }));
    let reply = t
        .request_match(TimeControl::OneMinute, d, ConnectionId::new())
        .await
        .unwrap();
    let MatchRequest::Paired { session } = reply else {
        panic!("expected a pairing");
    };
    assert_eq!(session.white, Some(c));
    assert_eq!(session.black, Some(d));
    assert_eq!(t.active_sessions(), 2);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lone_player_gets_a_bot_after_the_fallback_wait() {
    let t = TestArena::new();
    let user = UserId::new();
    let reply = t
        .request_match(TimeControl::ThreeMinutes, user, ConnectionId::new())
        .await
        .unwrap();
    assert!(matches!(reply, MatchRequest::Queued { position: 1, .. }));

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(t.live_matches().is_empty());
    assert_eq!(waiting_for(&t, TimeControl::ThreeMinutes), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let live = t.live_matches();
    assert_eq!(live.len(), 1);
    let session = &live[0];
    assert_eq!(session.white, Some(user));
    assert_eq!(session.black, None);
    assert_eq!(
        session.bot,
        Some(BotSeat {
            color: Color::Black,
            tier: BotTier::Base,
        })
    );
    assert_eq!(session.status, MatchStatus::Ongoing);
    assert_eq!(waiting_for(&t, TimeControl::ThreeMinutes), 0);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn human_pairing_before_the_wait_never_adds_a_bot() {
    let t = TestArena::new();
    let a = UserId::new();
    t.request_match(TimeControl::OneMinute, a, ConnectionId::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let reply = t
        .request_match(TimeControl::OneMinute, UserId::new(), ConnectionId::new())
        .await
        .unwrap();
    assert!(matches!(reply, MatchRequest::Paired { .. }));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(t.active_sessions(), 1);
    assert!(t.live_matches().iter().all(|s| s.bot.is_none()));
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_gets_no_bot() {
    let t = TestArena::new();
    let user = UserId::new();
    t.request_match(TimeControl::TenMinutes, user, ConnectionId::new())
        .await
        .unwrap();
    assert!(t.cancel_request(user));
    assert!(!t.cancel_request(user));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(t.active_sessions(), 0);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bot_opens_when_it_plays_white() {
    let t = TestArena::new();
    let user = UserId::new();
    let session = t
        .request_bot_match(TimeControl::FiveMinutes, user, Color::Black, BotTier::Elevated)
        .await
        .unwrap();
    assert_eq!(session.black, Some(user));
    assert!(t.has_pending_bot_move(session.id));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let after = t.get_match(session.id).await.unwrap();
    assert_eq!(after.moves.len(), 1);
    assert_eq!(after.moves[0].color, Color::White);
    assert_eq!(after.side_to_move, Color::Black);
    assert!(!t.has_pending_bot_move(session.id));

    // The bot's seat is not the user's to play.
    let err = t
        .submit_move(session.id, UserId::new(), mv("e7", "e5"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::State { .. }));
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn illegal_and_out_of_turn_moves_leave_the_match_untouched() {
    let t = TestArena::new();
    let (session, white, black) = t.paired_match(TimeControl::TenMinutes).await;

    let err = t.submit_move(session.id, black, mv("e7", "e5")).await.unwrap_err();
    assert!(matches!(err, ArenaError::State { .. }));
    let err = t.submit_move(session.id, white, mv("e2", "e5")).await.unwrap_err();
    assert!(matches!(err, ArenaError::IllegalMove(_)));

    let current = t.get_match(session.id).await.unwrap();
    assert!(current.moves.is_empty());
    assert_eq!(current.side_to_move, Color::White);
    assert_eq!(current.position, session.position);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn moves_charge_the_mover_and_hand_over_the_clock() {
    let mut t = TestArena::new();
    let (session, white, black) = t.paired_match(TimeControl::OneMinute).await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let after = t.submit_move(session.id, white, mv("e2", "e4")).await.unwrap();
    assert_eq!(after.remaining.white, 57_500);
    assert_eq!(after.remaining.black, 60_000);
    assert_eq!(after.side_to_move, Color::Black);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let after = t.submit_move(session.id, black, mv("c7", "c5")).await.unwrap();
    assert_eq!(after.remaining.white, 57_500);
    assert_eq!(after.remaining.black, 59_000);
    assert_eq!(after.moves.len(), 2);
    assert_eq!(after.moves[1].san, "c5");

    let applied = t.drain_named("move.applied");
    assert_eq!(applied.len(), 2);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flag_fall_finishes_once_and_stops_the_clock() {
    let mut t = TestArena::new();
    let (session, _white, black) = t.paired_match(TimeControl::OneMinute).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    let finished = t.get_match(session.id).await.unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert_eq!(finished.result, MatchResult::BlackWins);
    assert_eq!(finished.winner, Some(black));
    assert_eq!(finished.termination, Some(Termination::Timeout));
    assert_eq!(finished.remaining.white, 0);
    assert_eq!(finished.remaining.black, 60_000);
    assert!(!t.is_clock_running(session.id));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let later = t.get_match(session.id).await.unwrap();
    assert_eq!(later.remaining, finished.remaining);

    let events = t.drain();
    let finishes: Vec<_> = events
        .iter()
        .filter(|(_, e)| matches!(e, ArenaEvent::MatchFinished { match_id, .. } if *match_id == session.id))
        .collect();
    // One to the lobby, one to the match room.
    assert_eq!(finishes.len(), 2);
    assert_eq!(t.metrics().finished_matches.get(), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn checkmate_settles_wagers_exactly_once() {
    let t = TestArena::new();
    let (session, white, black) = t.paired_match(TimeControl::FiveMinutes).await;
    let (backs_white, backs_black) = (UserId::new(), UserId::new());
    let lost = t
        .place_wager(session.id, backs_white, 50, Prediction::White)
        .await
        .unwrap();
    let won = t
        .place_wager(session.id, backs_black, 20, Prediction::Black)
        .await
        .unwrap();
    assert_eq!(lost.status, WagerStatus::Pending);

    fools_mate(&t, session.id, white, black).await;

    let finished = t.get_match(session.id).await.unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert_eq!(finished.result, MatchResult::BlackWins);
    assert_eq!(finished.winner, Some(black));
    assert_eq!(finished.termination, Some(Termination::Checkmate));

    let lost = t.store.find_wager(lost.id).await.unwrap().unwrap();
    assert_eq!(lost.status, WagerStatus::Lost);
    assert_eq!(lost.payout, 0);
    let won = t.store.find_wager(won.id).await.unwrap().unwrap();
    assert_eq!(won.status, WagerStatus::Won);
    assert_eq!(won.payout, 40);
    assert!(won.settled_at.is_some());
    assert_eq!(t.metrics().settled_wagers.get(), 2);

    // Terminal matches take no more moves or wagers.
    let err = t
        .submit_move(session.id, white, mv("e2", "e4"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::State { .. }));
    let err = t
        .place_wager(session.id, UserId::new(), 10, Prediction::Draw)
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::State { .. }));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(t.metrics().settled_wagers.get(), 2);
    assert_eq!(t.wagers_for_user(backs_black).await.unwrap(), vec![won]);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalemate_pays_draw_backers() {
    let t = TestArena::new();
    let (session, white, black) = t.paired_match(TimeControl::FiveMinutes).await;
    let (backs_draw, backs_white) = (UserId::new(), UserId::new());
    let draw = t
        .place_wager(session.id, backs_draw, 30, Prediction::Draw)
        .await
        .unwrap();
    let lost = t
        .place_wager(session.id, backs_white, 10, Prediction::White)
        .await
        .unwrap();

    // Ten-move stalemate: black is left with no legal move and no check.
    let line = [
        ("e2", "e3"), ("a7", "a5"),
        ("d1", "h5"), ("a8", "a6"),
        ("h5", "a5"), ("h7", "h5"),
        ("h2", "h4"), ("a6", "h6"),
        ("a5", "c7"), ("f7", "f6"),
        ("c7", "d7"), ("e8", "f7"),
        ("d7", "b7"), ("d8", "d3"),
        ("b7", "b8"), ("d3", "h7"),
        ("b8", "c8"), ("f7", "g6"),
        ("c8", "e6"),
    ];
    for (i, (from, to)) in line.into_iter().enumerate() {
        let mover = if i % 2 == 0 { white } else { black };
        t.submit_move(session.id, mover, mv(from, to)).await.unwrap();
    }

    let finished = t.get_match(session.id).await.unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert_eq!(finished.result, MatchResult::Draw);
    assert_eq!(finished.winner, None);
    assert_eq!(finished.termination, Some(Termination::Stalemate));
    assert!(!t.is_clock_running(session.id));

    let draw = t.store.find_wager(draw.id).await.unwrap().unwrap();
    assert_eq!(draw.status, WagerStatus::Won);
    assert_eq!(draw.payout, 60);
    let lost = t.store.find_wager(lost.id).await.unwrap().unwrap();
    assert_eq!(lost.status, WagerStatus::Lost);
    assert_eq!(lost.payout, 0);
    assert_eq!(t.metrics().settled_wagers.get(), 2);

    let before = t.get_match(session.id).await.unwrap().remaining;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(t.get_match(session.id).await.unwrap().remaining, before);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_wagers_are_rejected() {
    let t = TestArena::new();
    let (session, _, _) = t.paired_match(TimeControl::ThreeMinutes).await;

    let err = t
        .place_wager(session.id, UserId::new(), 0, Prediction::White)
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::Validation { .. }));
    let err = t
        .place_wager(MatchId::new(), UserId::new(), 10, Prediction::White)
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::NotFound { .. }));
    assert!(t.wagers_for_match(session.id).await.unwrap().is_empty());
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn finished_matches_move_from_live_to_history() {
    let t = TestArena::new();
    let (first, white, black) = t.paired_match(TimeControl::FiveMinutes).await;
    let (second, _, _) = t.paired_match(TimeControl::FiveMinutes).await;
    assert_eq!(t.live_matches().len(), 2);

    fools_mate(&t, first.id, white, black).await;

    let live = t.live_matches();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, second.id);

    for user in [white, black] {
        let history = t.match_history(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].moves.len(), 4);
    }
    assert!(t.match_history(UserId::new()).await.unwrap().is_empty());
    t.shutdown().await;
}
