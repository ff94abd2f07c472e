//! Crash detection and zone repair.

use std::time::Duration;

use canopy_integration_tests::{assert_consistent, grow, heartbeat_all, network, settle, spawn_named, tracker};
use canopy_protocols::PeerHandle;

async fn neighbors_of(peer: &PeerHandle) -> Vec<PeerHandle> {
    let network = peer.network();
    peer.neighbor_table()
        .await
        .unwrap()
        .ids()
        .into_iter()
        .map(|id| network.handle(id))
        .collect()
}

#[tokio::test]
async fn lone_neighbor_absorbs_crashed_peer() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1", "p2"]).await;
    peers[0].create().await.unwrap();
    peers[1].join(peers[0].id()).await.unwrap();
    heartbeat_all(&peers).await;

    assert!(network.crash(&peers[1].id()).await);
    peers[0].report_failure(peers[1].id()).await.unwrap();

    assert_eq!(peers[0].zone().await.unwrap(), Some(network.space().zone()));
    assert!(peers[0].neighbor_table().await.unwrap().is_empty());
    assert_consistent(&network).await;
}

#[tokio::test]
async fn reported_crash_is_repaired_once() {
    let network = network(2, "A", "Z");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 10).await;
    heartbeat_all(&peers).await;

    let victim = &peers[4];
    let witnesses = neighbors_of(victim).await;
    assert!(!witnesses.is_empty());
    assert!(network.crash(&victim.id()).await);

    // Every neighbor reports; only the first finds work to do.
    for witness in &witnesses {
        witness.report_failure(victim.id()).await.unwrap();
    }

    assert_consistent(&network).await;
    assert_eq!(network.audit().await.peers, 9);
    for peer in network.snapshot().await {
        assert!(!peer.neighbors.contains(&victim.id()), "{} still lists the victim", peer.id);
    }
}

#[tokio::test]
async fn live_peer_reported_dead_keeps_its_zone() {
    let network = network(2, "A", "Z");
    let peers = spawn_named(&network, &["p1", "p2"]).await;
    peers[0].create().await.unwrap();
    let zone = peers[1].join(peers[0].id()).await.unwrap();

    peers[0].report_failure(peers[1].id()).await.unwrap();

    assert_eq!(peers[1].zone().await.unwrap(), Some(zone));
    assert!(peers[0].neighbor_table().await.unwrap().contains(&peers[1].id()));
    assert_consistent(&network).await;
}

#[tokio::test]
async fn heartbeat_detects_crashed_neighbor() {
    let network = network(2, "A", "Z");
    let tracker = tracker(&network);
    let peers = grow(&network, &tracker, 6).await;
    heartbeat_all(&peers).await;

    let victim = &peers[2];
    let detector = neighbors_of(victim).await.remove(0);
    assert!(network.crash(&victim.id()).await);

    detector.heartbeat().await.unwrap();
    assert!(!detector.neighbor_table().await.unwrap().contains(&victim.id()));

    let report = settle(&network, Duration::from_secs(2)).await;
    assert!(report.is_consistent(), "{report}");
    assert_eq!(report.peers, 5);
}
