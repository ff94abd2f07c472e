//! Shared helpers for the Canopy multi-peer tests.
//!
//! Every test builds its own [`Network`] with [`OverlayConfig::fast`], so
//! background maintenance is off and state only changes in response to the
//! calls a test makes.

use std::sync::{Arc, Once};
use std::time::Duration;

use canopy_protocols::{AuditReport, Network, OverlayConfig, PeerHandle, PeerId, Tracker, TrackerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static TRACING: Once = Once::new();

/// Install a `RUST_LOG`-driven subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "canopy_protocols=info,canopy_overlay=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// A network over `[lower, upper)^dimensions` with test timings.
pub fn network(dimensions: usize, lower: &str, upper: &str) -> Arc<Network> {
    init_tracing();
    Network::new(
        OverlayConfig::fast()
            .with_dimensions(dimensions)
            .with_bounds(lower, upper),
    )
    .expect("valid test config")
}

/// Spawn one peer per name. Nothing is joined.
pub async fn spawn_named(network: &Arc<Network>, names: &[&str]) -> Vec<PeerHandle> {
    let mut peers = Vec::with_capacity(names.len());
    for name in names {
        peers.push(
            network
                .spawn_peer(PeerId::from_name(name))
                .await
                .expect("unique peer name"),
        );
    }
    peers
}

/// A tracker that retries joins often enough for concurrent tests.
pub fn tracker(network: &Arc<Network>) -> Arc<Tracker> {
    let config = TrackerConfig::fast().with_join_retry(Duration::from_millis(10), 100);
    Arc::new(Tracker::new(Arc::clone(network), config).expect("valid tracker config"))
}

/// Grow an overlay of `count` random peers, one join at a time.
pub async fn grow(network: &Arc<Network>, tracker: &Tracker, count: usize) -> Vec<PeerHandle> {
    let mut peers = Vec::with_capacity(count);
    for _ in 0..count {
        let peer = network.spawn_random_peer().await.expect("spawn peer");
        tracker.inject(&peer).await.expect("join through tracker");
        peers.push(peer);
    }
    peers
}

/// Run one heartbeat round on every peer so each knows its neighbors'
/// holdings.
pub async fn heartbeat_all(peers: &[PeerHandle]) {
    for peer in peers {
        let _ = peer.heartbeat().await;
    }
}

/// Panic with the full report unless the network is consistent right now.
pub async fn assert_consistent(network: &Network) {
    let report = network.audit().await;
    assert!(report.is_consistent(), "{report}");
}

/// Audit until the network is consistent or `within` has passed, returning
/// the last report. Sends nothing to the peers.
pub async fn settle(network: &Network, within: Duration) -> AuditReport {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let report = network.audit().await;
        if report.is_consistent() || tokio::time::Instant::now() >= deadline {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Run heartbeat rounds over every live peer until the audit passes or
/// `rounds` are used up, returning the last report.
pub async fn converge(network: &Arc<Network>, rounds: usize) -> AuditReport {
    let mut report = network.audit().await;
    for _ in 0..rounds {
        if report.is_consistent() {
            break;
        }
        for id in network.peers().await {
            let _ = network.handle(id).heartbeat().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        report = network.audit().await;
    }
    report
}

/// [`converge`] and panic with the full report if it fails.
pub async fn assert_converges(network: &Arc<Network>) {
    let report = converge(network, 10).await;
    assert!(report.is_consistent(), "{report}");
}
