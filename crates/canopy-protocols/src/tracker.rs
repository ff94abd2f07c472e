//! Bootstrap tracker.
//!
//! A [`Tracker`] keeps a bounded random sample of joined peers and hands
//! them out as landmarks. It plays no part in the tiling: losing it only
//! means new peers have nowhere to enter.
//!
//! The first injected peer creates the overlay. The sample lock is never
//! held while that happens; peers injected meanwhile wait for the sample to
//! fill, and take over the bootstrap if creation fails.

use std::sync::Arc;

use canopy_overlay::PeerId;
use canopy_topology::Zone;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::handle::PeerHandle;
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bootstrap {
    /// No overlay yet.
    Pending,
    /// A peer is creating the overlay.
    InProgress,
    /// The overlay exists; an empty sample means every tracked peer is gone.
    Done,
}

#[derive(Debug)]
struct Sample {
    peers: Vec<PeerId>,
    bootstrap: Bootstrap,
}

/// What an injected peer should do next.
enum Entry {
    Create,
    Wait,
    Through(PeerId),
}

pub struct Tracker {
    network: Arc<Network>,
    config: TrackerConfig,
    sample: Mutex<Sample>,
}

impl Tracker {
    pub fn new(network: Arc<Network>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            network,
            config,
            sample: Mutex::new(Sample {
                peers: Vec::new(),
                bootstrap: Bootstrap::Pending,
            }),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Bring a spawned peer into the overlay.
    ///
    /// The first peer creates the overlay. Later peers join through a
    /// random landmark from the sample, trying another one while landmarks
    /// are busy or gone.
    pub async fn inject(&self, peer: &PeerHandle) -> Result<Zone> {
        let attempts = self.config.join_attempts;
        let mut last = Error::EmptyOverlay;
        for attempt in 1..=attempts {
            match self.entry().await? {
                Entry::Create => return self.bootstrap(peer).await,
                Entry::Wait => {
                    debug!(peer = %peer.id(), attempt, "waiting for the overlay to be created");
                    last = Error::EmptyOverlay;
                }
                Entry::Through(landmark) => match peer.join(landmark).await {
                    Ok(zone) => {
                        self.store(peer.id()).await;
                        return Ok(zone);
                    }
                    Err(Error::NeighborUnreachable(id)) if id == landmark => {
                        warn!(landmark = %landmark, "tracked landmark is gone");
                        self.remove_peer(&landmark).await;
                        last = Error::NeighborUnreachable(id);
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(peer = %peer.id(), landmark = %landmark, attempt, error = %e, "join retry");
                        last = e;
                    }
                    Err(e) => return Err(e),
                },
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.join_retry_interval).await;
            }
        }
        warn!(peer = %peer.id(), attempts, error = %last, "join through tracker failed");
        Err(last)
    }

    /// Pick the next step for a peer being injected, claiming the
    /// bootstrap when nobody has created the overlay yet.
    async fn entry(&self) -> Result<Entry> {
        let mut sample = self.sample.lock().await;
        if let Some(landmark) = sample.peers.choose(&mut rand::thread_rng()) {
            return Ok(Entry::Through(*landmark));
        }
        match sample.bootstrap {
            Bootstrap::Pending => {
                sample.bootstrap = Bootstrap::InProgress;
                Ok(Entry::Create)
            }
            Bootstrap::InProgress => Ok(Entry::Wait),
            Bootstrap::Done => Err(Error::EmptyOverlay),
        }
    }

    async fn bootstrap(&self, peer: &PeerHandle) -> Result<Zone> {
        let created = peer.create().await;
        let mut sample = self.sample.lock().await;
        match created {
            Ok(zone) => {
                sample.peers.push(peer.id());
                sample.bootstrap = Bootstrap::Done;
                info!(peer = %peer.id(), "tracker bootstrapped overlay");
                Ok(zone)
            }
            Err(e) => {
                sample.bootstrap = Bootstrap::Pending;
                warn!(peer = %peer.id(), error = %e, "overlay creation failed");
                Err(e)
            }
        }
    }

    /// Record a joined peer, subject to the storage probability. Once the
    /// sample is full a random slot is replaced.
    pub async fn store(&self, id: PeerId) {
        let mut sample = self.sample.lock().await;
        sample.bootstrap = Bootstrap::Done;
        if sample.peers.contains(&id) {
            return;
        }
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.config.storage_probability) {
            return;
        }
        if sample.peers.len() < self.config.capacity {
            sample.peers.push(id);
        } else {
            let slot = rng.gen_range(0..sample.peers.len());
            sample.peers[slot] = id;
        }
    }

    /// A random tracked peer.
    pub async fn random_peer(&self) -> Result<PeerId> {
        let sample = self.sample.lock().await;
        sample
            .peers
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or(Error::EmptyOverlay)
    }

    pub async fn remove_peer(&self, id: &PeerId) -> bool {
        let mut sample = self.sample.lock().await;
        let before = sample.peers.len();
        sample.peers.retain(|p| p != id);
        sample.peers.len() != before
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.sample.lock().await.peers.clone()
    }

    pub async fn len(&self) -> usize {
        self.sample.lock().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sample.lock().await.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::actor::Command;
    use crate::config::OverlayConfig;

    fn network() -> Arc<Network> {
        Network::new(OverlayConfig::fast().with_dimensions(2).with_bounds("A", "Z")).unwrap()
    }

    #[tokio::test]
    async fn empty_tracker_has_no_landmark() {
        let tracker = Tracker::new(network(), TrackerConfig::fast()).unwrap();
        assert!(matches!(tracker.random_peer().await, Err(Error::EmptyOverlay)));
    }

    #[tokio::test]
    async fn first_peer_creates_the_rest_join() {
        let network = network();
        let tracker = Tracker::new(Arc::clone(&network), TrackerConfig::fast()).unwrap();
        for _ in 0..5 {
            let peer = network.spawn_random_peer().await.unwrap();
            tracker.inject(&peer).await.unwrap();
        }
        assert_eq!(tracker.len().await, 5);
        let report = network.audit().await;
        assert!(report.is_consistent(), "{report}");
        assert_eq!(report.peers, 5);
    }

    #[tokio::test]
    async fn sample_is_bounded() {
        let tracker = Tracker::new(network(), TrackerConfig::fast().with_capacity(3)).unwrap();
        for i in 0..10 {
            tracker.store(PeerId::from_name(&format!("p{i}"))).await;
        }
        assert_eq!(tracker.len().await, 3);
    }

    #[tokio::test]
    async fn departed_landmarks_are_dropped() {
        let network = network();
        let tracker = Tracker::new(Arc::clone(&network), TrackerConfig::fast()).unwrap();
        let first = network.spawn_random_peer().await.unwrap();
        tracker.inject(&first).await.unwrap();
        assert!(tracker.remove_peer(&first.id()).await);
        assert!(!tracker.remove_peer(&first.id()).await);
        tracker.store(PeerId::from_name("ghost")).await;

        let peer = network.spawn_random_peer().await.unwrap();
        assert!(matches!(tracker.inject(&peer).await, Err(Error::EmptyOverlay)));
        assert!(tracker.is_empty().await);

        tracker.store(first.id()).await;
        tracker.inject(&peer).await.unwrap();
        assert_eq!(tracker.len().await, 2);
    }

    #[tokio::test]
    async fn slow_bootstrap_does_not_block_the_tracker() {
        let network = network();
        let config = TrackerConfig::fast().with_join_retry(Duration::from_millis(5), 400);
        let tracker = Arc::new(Tracker::new(Arc::clone(&network), config).unwrap());

        let slow = PeerId::from_name("slow");
        let mut mailbox = network.attach(slow).await;
        let first = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            let peer = network.handle(slow);
            async move { tracker.inject(&peer).await }
        });
        let Some(Command::Create { reply }) = mailbox.recv().await else {
            panic!("first peer was not asked to create the overlay");
        };

        // While the first peer is still creating, the tracker answers and
        // later peers wait instead of creating a second overlay.
        let second = network.spawn_random_peer().await.unwrap();
        let second_id = second.id();
        let waiting = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.inject(&second).await }
        });
        let answer = tokio::time::timeout(Duration::from_millis(100), tracker.random_peer()).await;
        assert!(matches!(answer, Ok(Err(Error::EmptyOverlay))));
        assert!(!waiting.is_finished());

        // Creation fails, so the waiting peer bootstraps instead.
        let _ = reply.send(Err(Error::Busy("create")));
        assert!(first.await.unwrap().is_err());
        let zone = waiting.await.unwrap().unwrap();
        assert_eq!(zone, network.space().zone());
        assert_eq!(tracker.peers().await, vec![second_id]);
    }
}
