//! Caller-side handle to a peer.

use std::sync::Arc;

use canopy_overlay::{NeighborTable, PeerId, PeerStatus, RequestId};
use canopy_topology::{Constraint, Coordinate, GeometryError, Zone};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::actor::Command;
use crate::audit::PeerSnapshot;
use crate::error::{Error, Result, RoutingFailure};
use crate::membership;
use crate::network::Network;
use crate::repair;
use crate::routing::{self, Action, AnycastHandler, AnycastOutcome, MulticastRequest, RouteOutcome, UnicastRequest};

/// Handle to one peer of a [`Network`].
///
/// Handles are cheap to clone. Every method sends commands to the peer's
/// actor; a handle to a peer that has left or crashed fails with
/// [`Error::NeighborUnreachable`].
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    network: Arc<Network>,
}

impl PeerHandle {
    pub(crate) fn new(id: PeerId, network: Arc<Network>) -> Self {
        Self { id, network }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Become the first peer of the overlay, owning the whole domain.
    pub async fn create(&self) -> Result<Zone> {
        self.network
            .request(self.id, |reply| Command::Create { reply })
            .await
    }

    /// Join through `landmark`, which splits its zone with this peer.
    pub async fn join(&self, landmark: PeerId) -> Result<Zone> {
        membership::join(&self.network, self.id, landmark).await
    }

    /// Hand the zone to a neighbor and leave.
    pub async fn leave(&self) -> Result<()> {
        membership::leave(&self.network, self.id).await
    }

    /// Route to the peer whose zone contains `target`.
    pub async fn route_unicast(&self, target: Coordinate) -> Result<RouteOutcome> {
        let space = self.network.space();
        if target.dimensions() != space.dimensions() {
            return Err(GeometryError::DimensionMismatch {
                expected: space.dimensions(),
                actual: target.dimensions(),
            }
            .into());
        }
        if !space.contains(&target) {
            return Err(Error::RoutingIncomplete {
                hops: 0,
                reason: RoutingFailure::OutsideDomain,
            });
        }

        let (reply, rx) = oneshot::channel();
        let request = UnicastRequest {
            target,
            hops: 0,
            reply,
        };
        self.network.send(self.id, Command::Route(request)).await?;

        let timeout = self.network.config().request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::RoutingIncomplete {
                hops: 0,
                reason: RoutingFailure::Lost,
            }),
            Err(_) => Err(Error::RoutingIncomplete {
                hops: 0,
                reason: RoutingFailure::Timeout(timeout),
            }),
        }
    }

    /// Run `handler` on every peer whose zone satisfies `constraint`.
    ///
    /// Completes once every copy has been accounted for. Each qualifying
    /// peer is hit exactly once.
    pub async fn route_anycast<H>(&self, constraint: Constraint, handler: H) -> Result<AnycastOutcome>
    where
        H: AnycastHandler + 'static,
    {
        self.multicast(constraint, Action::Invoke(Arc::new(handler))).await
    }

    /// Deliver `payload` to every peer. Receivers get it through
    /// [`subscribe`](Self::subscribe).
    pub async fn route_broadcast(&self, payload: Vec<u8>) -> Result<AnycastOutcome> {
        let constraint = Constraint::any(self.network.space().dimensions());
        self.multicast(constraint, Action::Deliver(Arc::new(payload))).await
    }

    async fn multicast(&self, constraint: Constraint, action: Action) -> Result<AnycastOutcome> {
        let dimensions = self.network.space().dimensions();
        if constraint.dimensions() != dimensions {
            return Err(GeometryError::DimensionMismatch {
                expected: dimensions,
                actual: constraint.dimensions(),
            }
            .into());
        }

        let id = RequestId::random();
        let (reports, rx) = mpsc::unbounded_channel();
        let request = MulticastRequest {
            id,
            constraint,
            action,
            from: None,
            hops: 0,
            reports,
        };
        debug!(peer = %self.id, request = %id, constraint = %request.constraint, "multicast started");
        self.network.send(self.id, Command::Multicast(request)).await?;
        routing::collect(id, rx, self.network.config().anycast_timeout).await
    }

    pub async fn zone(&self) -> Result<Option<Zone>> {
        Ok(self.snapshot().await?.zone)
    }

    pub async fn neighbor_table(&self) -> Result<NeighborTable> {
        Ok(self.snapshot().await?.neighbors)
    }

    pub async fn status(&self) -> Result<PeerStatus> {
        Ok(self.snapshot().await?.status)
    }

    pub async fn snapshot(&self) -> Result<PeerSnapshot> {
        self.network
            .call(self.id, |reply| Command::Snapshot { reply })
            .await
    }

    /// Receive broadcast payloads delivered to this peer from now on.
    ///
    /// The peer buffers `delivery_capacity` payloads; a receiver that falls
    /// further behind gets [`RecvError::Lagged`](broadcast::error::RecvError)
    /// and misses the oldest ones. Payloads delivered while nobody is
    /// subscribed are dropped, though the peer still counts as a hit.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Vec<u8>>> {
        self.network
            .call(self.id, |reply| Command::Subscribe { reply })
            .await
    }

    /// Tell this peer that its neighbor `peer` is dead and wait for the
    /// repair to finish.
    ///
    /// Does nothing if `peer` is not (or no longer) a neighbor.
    pub async fn report_failure(&self, peer: PeerId) -> Result<()> {
        let job = self
            .network
            .call(self.id, |reply| Command::Suspect { peer, reply })
            .await?;
        match job {
            Some(job) => {
                info!(peer = %self.id, failed = %peer, "failure reported");
                repair::run(&self.network, job).await
            }
            None => Ok(()),
        }
    }

    /// Run one maintenance round now: prune stale neighbors and heartbeat
    /// the rest.
    pub async fn heartbeat(&self) -> Result<()> {
        self.network
            .call(self.id, |reply| Command::Maintain { reply })
            .await
    }
}
