//! The network context.
//!
//! A [`Network`] owns the mailbox of every live peer together with the
//! configuration they share. It is created explicitly by whoever runs the
//! overlay (a node binary, a simulation, a test) and passed to every handle;
//! there is no process-wide registry.
//!
//! Peers only hold a weak reference back to their network. Once the last
//! [`Arc<Network>`] (including those inside handles and trackers) is dropped,
//! every mailbox closes and the peer tasks stop.

use std::collections::HashMap;
use std::sync::Arc;

use canopy_overlay::PeerId;
use canopy_topology::Space;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::actor::{Command, PeerActor};
use crate::audit::{self, AuditReport, PeerSnapshot};
use crate::config::OverlayConfig;
use crate::error::{Error, Result};
use crate::handle::PeerHandle;

/// Registry of live peers plus the shared overlay configuration.
#[derive(Debug)]
pub struct Network {
    config: OverlayConfig,
    space: Space,
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Command>>>,
}

impl Network {
    /// Create an empty network.
    pub fn new(config: OverlayConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let space = config.space()?;
        Ok(Arc::new(Self {
            config,
            space,
            peers: RwLock::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The coordinate domain the peers tile.
    pub fn space(&self) -> &Space {
        &self.space
    }

    /// Start a peer actor. The peer is not part of the overlay until it
    /// creates it or joins.
    pub async fn spawn_peer(self: &Arc<Self>, id: PeerId) -> Result<PeerHandle> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = PeerActor::new(id, self, cmd_rx)?;
        {
            let mut peers = self.peers.write().await;
            if peers.contains_key(&id) {
                return Err(Error::DuplicatePeer(id));
            }
            peers.insert(id, cmd_tx);
        }
        tokio::spawn(actor.run());
        debug!(peer = %id, "spawned peer");
        Ok(PeerHandle::new(id, Arc::clone(self)))
    }

    /// Start a peer with a random id.
    pub async fn spawn_random_peer(self: &Arc<Self>) -> Result<PeerHandle> {
        self.spawn_peer(PeerId::random()).await
    }

    /// Handle to a peer, registered or not.
    pub fn handle(self: &Arc<Self>, id: PeerId) -> PeerHandle {
        PeerHandle::new(id, Arc::clone(self))
    }

    /// Whether a peer is registered.
    pub async fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().await.contains_key(id)
    }

    /// Ids of every registered peer, sorted.
    pub async fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer is registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Put a command in a peer's mailbox, handing it back if the peer is gone.
    pub(crate) async fn deliver(&self, to: &PeerId, cmd: Command) -> std::result::Result<(), Command> {
        let sender = self.peers.read().await.get(to).cloned();
        match sender {
            Some(sender) => sender.send(cmd).map_err(|e| e.0),
            None => Err(cmd),
        }
    }

    pub(crate) async fn send(&self, to: PeerId, cmd: Command) -> Result<()> {
        self.deliver(&to, cmd)
            .await
            .map_err(|_| Error::NeighborUnreachable(to))
    }

    /// Send a command and wait for its reply.
    pub(crate) async fn call<T>(
        &self,
        to: PeerId,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(to, make(tx)).await?;
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::NeighborUnreachable(to)),
            Err(_) => Err(Error::Timeout(self.config.request_timeout)),
        }
    }

    /// [`call`](Self::call) for commands whose reply is itself a result.
    pub(crate) async fn request<T>(
        &self,
        to: PeerId,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        self.call(to, make).await?
    }

    /// Register a mailbox with no actor behind it; tests play the peer by
    /// reading the commands it receives.
    #[cfg(test)]
    pub(crate) async fn attach(&self, id: PeerId) -> mpsc::UnboundedReceiver<Command> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(id, cmd_tx);
        cmd_rx
    }

    /// Remove a peer's mailbox. Commands already queued are still processed.
    pub(crate) async fn deregister(&self, id: &PeerId) -> bool {
        self.peers.write().await.remove(id).is_some()
    }

    /// Kill a peer without any goodbye, as a crash would.
    ///
    /// Its neighbors find out when they next fail to reach it (or are told
    /// with [`PeerHandle::report_failure`]) and repair its zone.
    pub async fn crash(&self, id: &PeerId) -> bool {
        let sender = self.peers.write().await.remove(id);
        match sender {
            Some(sender) => {
                let _ = sender.send(Command::Crash);
                warn!(peer = %id, "peer crashed");
                true
            }
            None => false,
        }
    }

    /// Snapshots of every registered peer that answers in time.
    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut snapshots = Vec::new();
        for id in self.peers().await {
            match self.call(id, |reply| Command::Snapshot { reply }).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => debug!(peer = %id, error = %e, "snapshot skipped"),
            }
        }
        snapshots
    }

    /// Check the tiling and neighbor symmetry over every live peer.
    pub async fn audit(&self) -> AuditReport {
        audit::audit(&self.space, &self.snapshot().await)
    }

    /// Stop every peer.
    pub async fn shutdown(&self) {
        let peers: Vec<_> = self.peers.write().await.drain().collect();
        info!(peers = peers.len(), "network shutting down");
        for (_, sender) in peers {
            let _ = sender.send(Command::Crash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn network() -> Arc<Network> {
        Network::new(OverlayConfig::fast().with_dimensions(2).with_bounds("A", "Z")).unwrap()
    }

    #[tokio::test]
    async fn spawn_registers_peer() {
        let network = network();
        let id = PeerId::from_name("p1");
        network.spawn_peer(id).await.unwrap();
        assert!(network.contains(&id).await);
        assert_eq!(network.peers().await, vec![id]);
        assert!(matches!(
            network.spawn_peer(id).await,
            Err(Error::DuplicatePeer(_))
        ));
    }

    #[tokio::test]
    async fn unknown_peer_is_unreachable() {
        let network = network();
        let err = network
            .call(PeerId::from_name("ghost"), |reply| Command::Snapshot { reply })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NeighborUnreachable(_)));
    }

    #[tokio::test]
    async fn crash_and_shutdown_remove_peers() {
        let network = network();
        let a = network.spawn_random_peer().await.unwrap();
        network.spawn_random_peer().await.unwrap();
        assert!(network.crash(&a.id()).await);
        assert!(!network.crash(&a.id()).await);
        assert_eq!(network.len().await, 1);
        network.shutdown().await;
        assert!(network.is_empty().await);
    }

    #[tokio::test]
    async fn dropping_the_network_stops_its_peers() {
        let network = network();
        let peer = network.spawn_random_peer().await.unwrap();
        peer.create().await.unwrap();
        let mut deliveries = peer.subscribe().await.unwrap();

        drop(peer);
        drop(network);

        // The delivery channel closes once the actor task has exited.
        let closed = tokio::time::timeout(Duration::from_secs(1), deliveries.recv()).await;
        assert!(matches!(closed, Ok(Err(RecvError::Closed))));
    }

    #[tokio::test]
    async fn maintained_peers_stop_with_the_network() {
        let config = OverlayConfig::fast()
            .with_dimensions(2)
            .with_bounds("A", "Z")
            .with_maintenance_interval(Duration::from_millis(5));
        let network = Network::new(config).unwrap();
        let peer = network.spawn_random_peer().await.unwrap();
        let mut deliveries = peer.subscribe().await.unwrap();
        drop(peer);
        drop(network);

        let closed = tokio::time::timeout(Duration::from_secs(1), deliveries.recv()).await;
        assert!(matches!(closed, Ok(Err(RecvError::Closed))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = OverlayConfig::fast().with_max_hops(0);
        assert!(matches!(Network::new(config), Err(Error::Config(_))));
    }
}
