//! At-least-once delivery: lease expiry, competing workers, idempotent results

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, Fleet};
use rangescan_core::application::shutdown_channel;
use rangescan_core::domain::{ScanOutcome, ScanResult};
use rangescan_core::port::scanner::mocks::ScriptedScanner;
use rangescan_core::port::{NodeRegistry, QueueBroker, ResultSink};

#[tokio::test]
async fn test_two_workers_split_the_queue_without_duplicate_rows() {
    let fleet = Fleet::new(Duration::from_secs(900)).await;
    assert_eq!(fleet.enqueue(1, 2_000, 50).await, 40);

    let scanner = Arc::new(
        ScriptedScanner::new()
            .with_hits([42, 1_999])
            .with_latency(Duration::from_millis(1)),
    );
    let worker_a = Arc::new(fleet.worker("node-a", scanner.clone(), test_config(4)));
    let worker_b = Arc::new(fleet.worker("node-b", scanner.clone(), test_config(4)));

    let (tx, token) = shutdown_channel();
    let runners: Vec<_> = [worker_a, worker_b]
        .into_iter()
        .map(|worker| {
            let token = token.clone();
            tokio::spawn(async move { worker.run(token).await })
        })
        .collect();

    fleet.wait_until_drained(Duration::from_secs(60)).await;
    tx.shutdown();
    for runner in runners {
        tokio_test::assert_ok!(runner.await.unwrap());
    }

    let counts = fleet.sink.count_by_outcome().await.unwrap();
    assert_eq!(counts.values().sum::<u64>(), 2_000);
    assert_eq!(counts.get("HIT"), Some(&2));

    // No lease expired, so no candidate was scanned or written twice
    assert_eq!(scanner.call_count(), 2_000);
    let row = fleet.sink.get(42).await.unwrap().unwrap();
    assert_eq!(row.write_count, 1);

    let processed: u64 = fleet
        .registry
        .list()
        .await
        .unwrap()
        .iter()
        .map(|n| n.processed_count)
        .sum();
    assert_eq!(processed, 2_000);
}

#[tokio::test]
async fn test_expired_lease_is_redelivered_and_results_converge() {
    let fleet = Fleet::new(Duration::from_millis(300)).await;
    fleet.enqueue(1, 100, 100).await;

    // A worker leases the chunk, persists part of it and dies before acking
    let crashed = fleet
        .broker
        .receive(1, Duration::from_millis(100))
        .await
        .unwrap()
        .remove(0);
    let first_scan_at = 1_000;
    fleet
        .sink
        .upsert(&[
            ScanResult::hit(42, first_scan_at),
            ScanResult::miss(43, first_scan_at),
        ])
        .await
        .unwrap();

    // Invisible while the lease holds
    let early = fleet.broker.receive(1, Duration::from_millis(50)).await.unwrap();
    assert!(early.is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let scanner = Arc::new(ScriptedScanner::new().with_hits([42]));
    let mut config = test_config(4);
    config.heartbeat_interval = Duration::from_millis(100);
    config.lease_extension = Duration::from_millis(300);
    let worker = Arc::new(fleet.worker("node-b", scanner, config));

    let (tx, token) = shutdown_channel();
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(token).await })
    };
    fleet.wait_until_drained(Duration::from_secs(20)).await;
    tx.shutdown();
    tokio_test::assert_ok!(runner.await.unwrap());

    // The dead worker's lease no longer acks
    assert!(fleet.broker.ack(&crashed.lease).await.is_err());

    let hit = fleet.sink.get(42).await.unwrap().unwrap();
    assert_eq!(hit.outcome, ScanOutcome::Hit);
    assert_eq!(hit.write_count, 2);
    assert_eq!(hit.discovered_at, first_scan_at);
    assert!(hit.updated_at > first_scan_at);

    let counts = fleet.sink.count_by_outcome().await.unwrap();
    assert_eq!(counts.values().sum::<u64>(), 100);
    assert_eq!(counts.get("HIT"), Some(&1));
}

#[tokio::test]
async fn test_heartbeat_keeps_a_slow_chunk_leased() {
    // Chunk takes longer than the base lease; heartbeats must keep it ours
    let fleet = Fleet::new(Duration::from_millis(200)).await;
    fleet.enqueue(1, 40, 40).await;

    let scanner = Arc::new(ScriptedScanner::new().with_latency(Duration::from_millis(20)));
    let mut config = test_config(2);
    config.heartbeat_interval = Duration::from_millis(50);
    config.lease_extension = Duration::from_millis(200);
    let worker = Arc::new(fleet.worker("node-slow", scanner.clone(), config));

    let (tx, token) = shutdown_channel();
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    // While the chunk runs, nobody else may lease it
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stolen = fleet.broker.receive(1, Duration::from_millis(10)).await.unwrap();
    assert!(stolen.is_empty());

    fleet.wait_until_drained(Duration::from_secs(20)).await;
    tx.shutdown();
    tokio_test::assert_ok!(runner.await.unwrap());

    assert_eq!(scanner.call_count(), 40);
    let row = fleet.sink.get(1).await.unwrap().unwrap();
    assert_eq!(row.write_count, 1);
}

#[tokio::test]
async fn test_abandoned_chunk_is_given_back() {
    let fleet = Fleet::new(Duration::from_secs(900)).await;
    fleet.enqueue(1, 500, 500).await;

    let scanner = Arc::new(ScriptedScanner::new().with_latency(Duration::from_millis(10)));
    let worker = Arc::new(fleet.worker("node-a", scanner.clone(), test_config(2)));

    let (tx, token) = shutdown_channel();
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    while scanner.call_count() < 10 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tx.shutdown();
    tx.abandon();
    tokio_test::assert_ok!(runner.await.unwrap());

    // Released immediately, not after the 15 minute lease
    let snapshot = fleet.snapshot().await;
    assert_eq!(snapshot.waiting_count, 1);
    assert_eq!(snapshot.in_flight_count, 0);
    assert!(scanner.call_count() < 500);

    let redelivered = fleet
        .broker
        .receive(1, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].job.attempt_count, 2);
}
