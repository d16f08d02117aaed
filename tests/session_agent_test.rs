//! Integration tests for the authoritative session agent.

use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use strictly_chess::{Color, Move, Position};
use strictly_session::{
    GameStatus, LocalTransport, MoveOutcome, ParticipantId, PreferredRole, RejectReason, Role,
    SessionError, SessionId, SessionManager, SessionState, SessionTransport, StandardChess,
};

fn pid(s: &str) -> ParticipantId {
    ParticipantId::new(s).expect("valid participant id")
}

fn mv(s: &str) -> Move {
    Move::parse(s).expect("valid move")
}

async fn seated_game() -> (SessionManager, SessionId) {
    let sessions = SessionManager::new(Arc::new(StandardChess::new()));
    let id = SessionId::new("game-1").expect("valid session id");
    sessions.join(&id, pid("white"), PreferredRole::FirstSide).await;
    sessions.join(&id, pid("black"), PreferredRole::Any).await;
    (sessions, id)
}

async fn play(
    sessions: &SessionManager,
    id: &SessionId,
    who: &str,
    m: &str,
    base: &Position,
) -> MoveOutcome {
    sessions
        .propose_move(id, &pid(who), &mv(m), base)
        .await
        .expect("session exists")
}

#[tokio::test]
async fn test_roles_are_exclusive_and_recovered_on_rejoin() {
    let sessions = SessionManager::new(Arc::new(StandardChess::new()));
    let id = SessionId::new("roles").expect("valid session id");

    let a = sessions.join(&id, pid("a"), PreferredRole::Any).await;
    let b = sessions.join(&id, pid("b"), PreferredRole::FirstSide).await;
    let c = sessions.join(&id, pid("c"), PreferredRole::SecondSide).await;
    assert_eq!(a.role, Role::FirstSide);
    assert_eq!(b.role, Role::SecondSide);
    assert_eq!(c.role, Role::Observer);

    let again = sessions.join(&id, pid("a"), PreferredRole::SecondSide).await;
    assert_eq!(again.role, Role::FirstSide);
    assert_eq!(again.state.roles.len(), 3);
    assert_eq!(again.state.version, 0);
}

#[tokio::test]
async fn test_committed_move_bumps_version_and_flips_turn() {
    let (sessions, id) = seated_game().await;
    let outcome = play(&sessions, &id, "white", "e2e4", &Position::starting()).await;

    let state = match outcome {
        MoveOutcome::Committed(state) => state,
        other => panic!("expected commit, got {:?}", other),
    };
    assert_eq!(state.version, 1);
    assert_eq!(state.side_to_move(), Color::Black);
    assert_eq!(state.status, GameStatus::InProgress);
    assert_eq!(sessions.snapshot(&id).await.expect("snapshot"), state);
}

#[tokio::test]
async fn test_out_of_turn_and_observer_are_rejected() {
    let (sessions, id) = seated_game().await;
    sessions.join(&id, pid("watcher"), PreferredRole::Any).await;

    let black = play(&sessions, &id, "black", "e7e5", &Position::starting()).await;
    assert_eq!(black.reason(), Some(RejectReason::NotYourTurn));

    let watcher = play(&sessions, &id, "watcher", "e2e4", &Position::starting()).await;
    assert_eq!(watcher.reason(), Some(RejectReason::NotYourTurn));
    assert_eq!(watcher.state().version, 0);
}

#[tokio::test]
async fn test_stale_base_is_rejected_with_current_state() {
    let (sessions, id) = seated_game().await;
    let after_e4 = play(&sessions, &id, "white", "e2e4", &Position::starting()).await;
    assert!(after_e4.is_ok());

    let stale = play(&sessions, &id, "black", "e7e5", &Position::starting()).await;
    assert_eq!(stale.reason(), Some(RejectReason::StaleState));
    assert_eq!(stale.state(), after_e4.state());
}

#[tokio::test]
async fn test_illegal_move_carries_detail() {
    let (sessions, id) = seated_game().await;
    let outcome = play(&sessions, &id, "white", "e2e5", &Position::starting()).await;
    match outcome {
        MoveOutcome::Rejected {
            reason,
            detail,
            authoritative_state,
        } => {
            assert_eq!(reason, RejectReason::IllegalMove);
            assert!(detail.is_some());
            assert_eq!(authoritative_state.position, Position::starting());
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_proposals_commit_exactly_once() {
    let (sessions, id) = seated_game().await;
    let proposals = [
        ("white", "e2e4"),
        ("black", "e7e5"),
        ("white", "d2d4"),
        ("black", "d7d5"),
        ("white", "g1f3"),
    ];

    let tasks = proposals.iter().map(|(who, m)| {
        let sessions = sessions.clone();
        let id = id.clone();
        let who = pid(who);
        let m = mv(m);
        tokio::spawn(async move {
            let outcome = sessions
                .propose_move(&id, &who, &m, &Position::starting())
                .await
                .expect("session exists");
            (who, outcome)
        })
    });
    let outcomes: Vec<(ParticipantId, MoveOutcome)> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task completed"))
        .collect();

    let committed: Vec<_> = outcomes.iter().filter(|(_, o)| o.is_ok()).collect();
    assert_eq!(committed.len(), 1);
    let (winner, commit) = committed[0];
    assert_eq!(winner, &pid("white"));
    assert_eq!(commit.state().version, 1);

    for (who, loser) in outcomes.iter().filter(|(_, o)| !o.is_ok()) {
        match loser.reason() {
            // Black proposing after the commit is on turn, but from an old base.
            Some(RejectReason::StaleState) => {
                assert_eq!(who, &pid("black"));
                assert_eq!(loser.state(), commit.state());
            }
            Some(RejectReason::NotYourTurn) => {
                let expected = if who == &pid("white") { 1 } else { 0 };
                assert_eq!(loser.state().version, expected);
            }
            other => panic!("unexpected rejection {:?}", other),
        }
    }
    let state = sessions.snapshot(&id).await.expect("snapshot");
    assert_eq!(state.version, 1);
}

#[tokio::test]
async fn test_same_base_loser_on_turn_sees_stale_state() {
    let (sessions, id) = seated_game().await;
    let after_e4 = play(&sessions, &id, "white", "e2e4", &Position::starting()).await;
    let base = after_e4.state().position.clone();

    let (first, second) = tokio::join!(
        play(&sessions, &id, "black", "e7e5", &base),
        play(&sessions, &id, "black", "c7c5", &base),
    );
    let (winner, loser) = if first.is_ok() { (first, second) } else { (second, first) };
    assert!(winner.is_ok());
    // White is on turn again, so the second black proposal is out of turn.
    assert_eq!(loser.reason(), Some(RejectReason::NotYourTurn));
    assert_eq!(loser.state(), winner.state());

    let late = play(&sessions, &id, "white", "g1f3", &base).await;
    assert_eq!(late.reason(), Some(RejectReason::StaleState));
    assert_eq!(late.state(), winner.state());
}

#[tokio::test]
async fn test_concurrent_joins_seat_each_side_once() {
    let sessions = SessionManager::new(Arc::new(StandardChess::new()));
    let id = SessionId::new("crowded").expect("valid session id");
    let preferences = [
        PreferredRole::FirstSide,
        PreferredRole::FirstSide,
        PreferredRole::SecondSide,
        PreferredRole::Any,
        PreferredRole::Any,
        PreferredRole::FirstSide,
        PreferredRole::SecondSide,
        PreferredRole::Any,
    ];

    let tasks = preferences.into_iter().enumerate().map(|(i, preferred)| {
        let sessions = sessions.clone();
        let id = id.clone();
        tokio::spawn(async move { sessions.join(&id, pid(&format!("p{}", i)), preferred).await })
    });
    let roles: Vec<Role> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task completed").role)
        .collect();

    let count = |role: Role| roles.iter().filter(|r| **r == role).count();
    assert_eq!(count(Role::FirstSide), 1);
    assert_eq!(count(Role::SecondSide), 1);
    assert_eq!(count(Role::Observer), preferences.len() - 2);

    let state = sessions.snapshot(&id).await.expect("snapshot");
    assert_eq!(state.roles.len(), preferences.len());
    assert_eq!(state.version, 0);
}

#[tokio::test]
async fn test_checkmate_ends_the_game() {
    let (sessions, id) = seated_game().await;
    let mut base = Position::starting();
    for (who, m) in [
        ("white", "f2f3"),
        ("black", "e7e5"),
        ("white", "g2g4"),
        ("black", "d8h4"),
    ] {
        let outcome = play(&sessions, &id, who, m, &base).await;
        assert!(outcome.is_ok(), "{} should be accepted", m);
        base = outcome.state().position.clone();
    }

    let state = sessions.snapshot(&id).await.expect("snapshot");
    assert_eq!(state.status, GameStatus::Checkmate);
    assert_eq!(state.version, 4);

    let late = play(&sessions, &id, "white", "e2e4", &base).await;
    assert_eq!(late.reason(), Some(RejectReason::GameOver));
}

#[tokio::test]
async fn test_resign_and_abandon() {
    let (sessions, id) = seated_game().await;
    sessions.join(&id, pid("watcher"), PreferredRole::Any).await;

    let refused = sessions.resign(&id, &pid("watcher")).await.expect("session exists");
    assert_eq!(refused.reason(), Some(RejectReason::NotSeated));

    let resigned = sessions.resign(&id, &pid("white")).await.expect("session exists");
    assert!(resigned.is_ok());
    assert_eq!(resigned.state().status, GameStatus::Resigned);
    assert_eq!(resigned.state().resigned, Some(Color::White));
    assert_eq!(resigned.state().version, 1);

    let abandoned = sessions.abandon(&id, &pid("black")).await.expect("session exists");
    assert_eq!(abandoned.reason(), Some(RejectReason::GameOver));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let sessions = SessionManager::new(Arc::new(StandardChess::new()));
    let id = SessionId::new("nowhere").expect("valid session id");
    assert_eq!(
        sessions.snapshot(&id).await,
        Err(SessionError::NotFound(id.clone()))
    );
    assert!(sessions.list().await.is_empty());
}

#[tokio::test]
async fn test_pushes_arrive_in_commit_order() {
    let (sessions, id) = seated_game().await;
    let transport = LocalTransport::new(sessions.clone(), id.clone());
    let mut pushes = transport.subscribe().await.expect("subscribe");

    let first = pushes.next().await.expect("current state");
    assert_eq!(first.version, 0);

    let mut base = Position::starting();
    for (who, m) in [("white", "e2e4"), ("black", "e7e5"), ("white", "g1f3")] {
        base = play(&sessions, &id, who, m, &base).await.state().position.clone();
    }
    // Rejections are not pushed.
    play(&sessions, &id, "white", "a2a3", &base).await;

    let mut versions = Vec::new();
    for _ in 0..3 {
        let state: SessionState = tokio::time::timeout(Duration::from_secs(1), pushes.next())
            .await
            .expect("push in time")
            .expect("stream open");
        versions.push(state.version);
    }
    assert_eq!(versions, vec![1, 2, 3]);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), pushes.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_lagging_subscriber_skips_to_newer_state() {
    let sessions = SessionManager::with_capacity(Arc::new(StandardChess::new()), 1);
    let id = SessionId::new("laggy").expect("valid session id");
    sessions.join(&id, pid("white"), PreferredRole::FirstSide).await;
    sessions.join(&id, pid("black"), PreferredRole::SecondSide).await;

    let transport = LocalTransport::new(sessions.clone(), id.clone());
    let mut pushes = transport.subscribe().await.expect("subscribe");

    let mut base = Position::starting();
    for (who, m) in [("white", "e2e4"), ("black", "e7e5"), ("white", "g1f3")] {
        base = play(&sessions, &id, who, m, &base).await.state().position.clone();
    }

    assert_eq!(pushes.next().await.expect("current state").version, 0);
    let latest = tokio::time::timeout(Duration::from_secs(1), pushes.next())
        .await
        .expect("push in time")
        .expect("stream open");
    assert_eq!(latest.version, 3);
    assert_eq!(latest.position, base);
}
