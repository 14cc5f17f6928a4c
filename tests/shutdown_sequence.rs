//! Full shutdown sequence across the server and loop actors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use worldsync::config::ShutdownConfig;
use worldsync::lifecycle::{Actor, ShutdownCoordinator, ShutdownError, Stage, StageRegister};

mod common;

fn running_coordinator() -> ShutdownCoordinator {
    let stage = Arc::new(StageRegister::new());
    stage.store(Stage::Running);
    let config = ShutdownConfig {
        server_timeout_secs: 2,
        loop_timeout_secs: 3,
        poll_interval_ms: 50,
    };
    ShutdownCoordinator::new(&config, stage).unwrap()
}

/// Poll for shutdown, counting cleanups, until one succeeds.
async fn actor(coordinator: ShutdownCoordinator, who: Actor, cleanups: Arc<AtomicUsize>) {
    loop {
        let handled = coordinator
            .handle_shutdown(who, coordinator.poll_interval(), || async {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::io::Error>(())
            })
            .await
            .unwrap();
        if handled {
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_all_stops_both_actors() {
    let coordinator = running_coordinator();
    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let loop_cleanups = Arc::new(AtomicUsize::new(0));

    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups.clone()));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, loop_cleanups.clone()));

    assert!(coordinator.shutdown_all().await);
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);

    server.await.unwrap();
    tick.await.unwrap();
    assert_eq!(server_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(loop_cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_timeout_skips_loop() {
    let coordinator = running_coordinator();
    let loop_cleanups = Arc::new(AtomicUsize::new(0));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, loop_cleanups.clone()));

    // No server actor: the first handshake times out.
    let start = Instant::now();
    assert!(!coordinator.shutdown_all().await);
    assert!(start.elapsed() >= Duration::from_secs(2));

    assert_eq!(coordinator.stage().load(), Stage::ShuttingDown);
    assert_eq!(loop_cleanups.load(Ordering::SeqCst), 0);
    tick.abort();
}

#[tokio::test(start_paused = true)]
async fn test_loop_timeout_leaves_shutting_down() {
    let coordinator = running_coordinator();
    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups.clone()));

    assert!(!coordinator.shutdown_all().await);
    server.await.unwrap();

    assert_eq!(server_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.stage().load(), Stage::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_shutdown_all_calls_are_serialized() {
    let coordinator = running_coordinator();
    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let loop_cleanups = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups.clone()));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, loop_cleanups.clone()));

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.shutdown_all().await })
        })
        .collect();

    for attempt in attempts {
        assert!(attempt.await.unwrap());
    }

    server.await.unwrap();
    tick.await.unwrap();
    assert_eq!(server_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(loop_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_loop_cleanup_failure_is_reported_on_both_sides() {
    let coordinator = running_coordinator();
    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups));

    let failing = coordinator.clone();
    let tick = tokio::spawn(async move {
        loop {
            let result = failing
                .handle_shutdown(Actor::Loop, failing.poll_interval(), || async {
                    Err::<(), _>(std::io::Error::other("final flush failed"))
                })
                .await;
            match result {
                Ok(false) => continue,
                other => return other,
            }
        }
    });

    assert!(!coordinator.shutdown_all().await);
    server.await.unwrap();

    match tick.await.unwrap() {
        Err(ShutdownError::CleanupFailed { actor, .. }) => assert_eq!(actor, Actor::Loop),
        other => panic!("expected cleanup failure, got {:?}", other),
    }
    assert_eq!(coordinator.stage().load(), Stage::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_final_round_flushes_pending_messages() {
    let coordinator = running_coordinator();
    let pipeline = common::pipeline();
    let server = tokio::spawn(actor(
        coordinator.clone(),
        Actor::Server,
        Arc::new(AtomicUsize::new(0)),
    ));
    // Long interval: only the shutdown cleanup submits.
    let tick = tokio::spawn(
        Arc::clone(&pipeline.submitter).run(coordinator.clone(), Duration::from_secs(3600)),
    );

    pipeline
        .batcher
        .send(vec![common::msg("alice", 1), common::msg("bob", 1)]);
    pipeline.batcher.send(vec![common::msg("alice", 1)]);

    assert!(coordinator.shutdown_all().await);
    tick.await.unwrap().unwrap();
    server.await.unwrap();

    assert_eq!(
        pipeline.sequencer.forwarded(),
        vec![("alice".to_string(), 1), ("bob".to_string(), 1)]
    );
    assert!(pipeline.batcher.is_empty());
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_server_timeout() {
    let coordinator = running_coordinator();

    assert!(!coordinator.shutdown_all().await);
    assert_eq!(coordinator.stage().load(), Stage::ShuttingDown);

    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let loop_cleanups = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups.clone()));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, loop_cleanups.clone()));

    assert!(coordinator.shutdown_all().await);
    server.await.unwrap();
    tick.await.unwrap();

    // The request left over from the first attempt is never acted on.
    assert_eq!(server_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(loop_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_loop_timeout_skips_stopped_server() {
    let coordinator = running_coordinator();
    let server_cleanups = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, server_cleanups.clone()));

    assert!(!coordinator.shutdown_all().await);
    server.await.unwrap();

    let loop_cleanups = Arc::new(AtomicUsize::new(0));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, loop_cleanups.clone()));

    assert!(coordinator.shutdown_all().await);
    tick.await.unwrap();

    assert_eq!(server_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(loop_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_running() {
    let coordinator = running_coordinator();
    coordinator.stage().store(Stage::Starting);
    let server = tokio::spawn(actor(coordinator.clone(), Actor::Server, Arc::new(AtomicUsize::new(0))));
    let tick = tokio::spawn(actor(coordinator.clone(), Actor::Loop, Arc::new(AtomicUsize::new(0))));

    assert!(coordinator.shutdown_all().await);
    server.await.unwrap();
    tick.await.unwrap();
    assert_eq!(coordinator.stage().load(), Stage::ShutDown);
}
