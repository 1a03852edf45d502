//! Starter-game system calls against a simulated world.

use optimist_core::starter::{last_direction, remaining_moves, total_entities, Direction};
use optimist_core::{ChangeCause, EntityStore, TransactionError, UpdateStatus};
use optimist_testkit::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_spawn_shows_full_budget_before_indexer_catches_up() {
    init_tracing();
    let store = EntityStore::new();
    let world = Arc::new(StarterWorld::new(store.clone(), player(1)).with_lag(Duration::from_millis(20)));
    world.publish_current();
    let engine = engine_over(&store, world, Duration::from_millis(500));
    let mut changes = store.watch(&player(1));

    let calls = engine.system_calls(player(1));
    let spawn = calls.spawn();
    tokio::pin!(spawn);

    // Drive the transaction until its speculative write lands.
    let speculative = tokio::select! {
        change = changes.recv() => change.unwrap(),
        _ = &mut spawn => panic!("spawn resolved before its optimistic update"),
    };
    assert!(matches!(speculative.cause, ChangeCause::Speculative(_)));
    assert_eq!(
        speculative.layers.view.as_ref().and_then(remaining_moves),
        Some(100)
    );
    assert_eq!(
        speculative.layers.authoritative.as_ref().and_then(remaining_moves),
        Some(0)
    );

    let receipt = spawn.await.unwrap();
    assert_eq!(remaining_moves(&receipt.state), Some(100));
    assert_eq!(
        engine.ledger().status(receipt.transaction_id),
        Some(UpdateStatus::Confirmed)
    );
    assert_eq!(total_entities(engine.store()), 1);
}

#[tokio::test]
async fn test_moves_decrement_and_track_direction() {
    let store = EntityStore::new();
    let world = Arc::new(StarterWorld::new(store.clone(), player(1)));
    world.publish_current();
    let engine = engine_over(&store, world, Duration::from_millis(500));
    let calls = engine.system_calls(player(1));

    calls.spawn().await.unwrap();
    calls.move_to(Direction::Left).await.unwrap();
    let receipt = calls.move_to(Direction::Up).await.unwrap();

    assert_eq!(remaining_moves(&receipt.state), Some(98));
    assert_eq!(last_direction(&receipt.state), Some(Direction::Up));
    let view = store.get(&player(1)).unwrap();
    assert_eq!(last_direction(&view), Some(Direction::Up));
    assert_eq!(engine.ledger().pending_count(), 0);
}

#[tokio::test]
async fn test_rejected_move_restores_previous_direction() {
    let store = EntityStore::new();
    let world = Arc::new(StarterWorld::new(store.clone(), player(1)));
    world.publish_current();
    let engine = engine_over(&store, world, Duration::from_millis(500));
    let calls = engine.system_calls(player(1));

    // No spawn yet: the world has no moves to spend.
    let err = calls.move_to(Direction::Right).await.unwrap_err();

    match &err {
        TransactionError::RemoteActionFailed { source, .. } => {
            assert_eq!(source.action, "move");
            assert_eq!(source.message, "no moves remaining");
        }
        other => panic!("unexpected error: {other}"),
    }
    let view = store.get(&player(1)).unwrap();
    assert_eq!(last_direction(&view), None);
    assert_eq!(remaining_moves(&view), Some(0));
}

#[tokio::test]
async fn test_system_calls_send_expected_requests() {
    let store = seeded_store([(player(2), starter_player(0, None))]);
    let client = Arc::new(ScriptedClient::new(store.clone()));
    let engine = engine_over(&store, client.clone(), Duration::from_millis(30));
    let calls = engine.system_calls(player(2));

    let _ = calls.spawn().await;
    let _ = calls.move_to(Direction::Down).await;

    let requests = client.invocations();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].name, "spawn");
    assert!(requests[0].args.is_empty());
    assert_eq!(requests[1].name, "move");
    assert_eq!(requests[1].args, vec![json!("Down")]);
}

#[tokio::test]
async fn test_unconfirmed_spawn_restores_previous_budget() {
    let store = seeded_store([(player(3), moves_entity(0))]);
    let client = Arc::new(ScriptedClient::new(store.clone()));
    let engine = engine_over(&store, client, Duration::from_millis(30));

    let err = engine.system_calls(player(3)).spawn().await.unwrap_err();

    assert!(matches!(err, TransactionError::WaitTimeout { .. }));
    assert_eq!(store.get(&player(3)), Some(moves_entity(0)));
}

#[tokio::test]
async fn test_spawn_on_unindexed_player_stays_absent() {
    let store = EntityStore::new();
    let client = Arc::new(ScriptedClient::new(store.clone()).then(ScriptedOutcome::Hang));
    let engine = engine_over(&store, client, Duration::from_millis(60));
    let calls = engine.system_calls(player(7));

    let spawn = calls.spawn();
    tokio::pin!(spawn);
    tokio::select! {
        _ = &mut spawn => panic!("spawn resolved before its bound"),
        () = tokio::time::sleep(Duration::from_millis(20)) => {}
    }

    // The moves model is not loaded, so there is nothing to show yet.
    assert_eq!(store.get(&player(7)), None);
    assert!(!store.contains(&player(7)));
    assert_eq!(engine.ledger().pending_count(), 1);

    let err = spawn.await.unwrap_err();
    assert!(matches!(err, TransactionError::WaitTimeout { .. }));
    assert_eq!(store.get(&player(7)), None);
    assert!(!store.contains(&player(7)));
    assert_eq!(engine.ledger().pending_count(), 0);
}
