//! Peer actor.
//!
//! Each peer is a task that owns its [`OverlayState`] and processes one
//! [`Command`] at a time from an unbounded mailbox. The actor never waits on
//! another peer: notifications and forwarded requests are dropped into the
//! recipient's mailbox and the actor moves on. Multi-step protocols (join,
//! leave, repair) are driven from outside the actor as sequences of
//! request/reply commands, so no peer holds its state across a call to
//! another.

use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use canopy_overlay::{
    multicast_fanout, unicast_step, HandoffOffer, Holdings, JoinOffer, NeighborEntry, Notice,
    OverlayState, PeerId, RequestId, SplitEntry, UnicastStep, VisitedCache,
};
use canopy_topology::{Space, Zone};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::audit::PeerSnapshot;
use crate::config::OverlayConfig;
use crate::error::{Error, Result, RoutingFailure};
use crate::network::Network;
use crate::repair::{self, RepairJob};
use crate::routing::{Action, MulticastRequest, ReportKind, RouteOutcome, UnicastRequest};

pub(crate) enum Command {
    // Lifecycle
    Create {
        reply: oneshot::Sender<Result<Zone>>,
    },
    BeginJoin {
        reply: oneshot::Sender<Result<()>>,
    },
    AbortJoin,
    Introduce {
        joiner: PeerId,
        reply: oneshot::Sender<Result<JoinOffer>>,
    },
    Welcome {
        joiner: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelJoin {
        joiner: PeerId,
        reply: oneshot::Sender<bool>,
    },
    InstallJoin {
        offer: JoinOffer,
        reply: oneshot::Sender<Result<()>>,
    },
    BeginLeave {
        reply: oneshot::Sender<Result<Holdings>>,
    },
    Release,
    Depart {
        reply: oneshot::Sender<()>,
    },
    Absorb {
        leaver: PeerId,
        holdings: Holdings,
        reply: oneshot::Sender<Result<NeighborEntry>>,
    },
    ReserveHandoff {
        leaver: PeerId,
        reply: oneshot::Sender<Result<Option<HandoffOffer>>>,
    },
    TakeOver {
        leaver: PeerId,
        holdings: Holdings,
        partner: NeighborEntry,
        reply: oneshot::Sender<Result<()>>,
    },
    Cede {
        owner: NeighborEntry,
        reply: oneshot::Sender<Result<()>>,
    },

    // Neighbor notifications
    Refresh {
        entry: NeighborEntry,
    },
    Forget {
        peer: PeerId,
    },
    Heartbeat {
        from: PeerId,
        holdings: Holdings,
    },

    // Failure handling and maintenance
    Suspect {
        peer: PeerId,
        reply: oneshot::Sender<Option<RepairJob>>,
    },
    Maintain {
        reply: oneshot::Sender<()>,
    },

    // Routing
    Route(UnicastRequest),
    Multicast(MulticastRequest),

    // Introspection
    Snapshot {
        reply: oneshot::Sender<PeerSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Vec<u8>>>,
    },

    Crash,
}

pub(crate) struct PeerActor {
    state: OverlayState,
    /// Weak so that dropping the last handle to the network stops its peers.
    network: Weak<Network>,
    config: OverlayConfig,
    space: Space,
    visited: VisitedCache,
    deliveries: broadcast::Sender<Vec<u8>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

enum Event {
    Command(Option<Command>),
    Tick,
}

impl PeerActor {
    pub fn new(
        id: PeerId,
        network: &Arc<Network>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Result<Self> {
        let config = network.config().clone();
        let capacity = NonZeroUsize::new(config.visited_capacity)
            .ok_or_else(|| Error::Config("visited capacity must be positive".into()))?;
        let visited = VisitedCache::new(capacity, config.visited_retention);
        let (deliveries, _) = broadcast::channel(config.delivery_capacity.max(1));
        let space = network.space().clone();
        Ok(Self {
            state: OverlayState::new(id, space.dimensions()),
            network: Arc::downgrade(network),
            config,
            space,
            visited,
            deliveries,
            cmd_rx,
        })
    }

    fn id(&self) -> PeerId {
        self.state.id()
    }

    /// Put a command in another peer's mailbox, handing it back if the peer
    /// (or the whole network) is gone.
    async fn deliver(&self, to: &PeerId, cmd: Command) -> std::result::Result<(), Command> {
        match self.network.upgrade() {
            Some(network) => network.deliver(to, cmd).await,
            None => Err(cmd),
        }
    }

    pub async fn run(mut self) {
        let mut ticker = self.config.maintenance_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let event = tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Command(cmd),
                _ = tick(&mut ticker) => Event::Tick,
            };
            match event {
                Event::Command(Some(Command::Crash)) | Event::Command(None) => break,
                Event::Command(Some(cmd)) => self.handle(cmd).await,
                Event::Tick if self.network.strong_count() == 0 => break,
                Event::Tick => self.maintain().await,
            }
        }
        debug!(peer = %self.id(), status = %self.state.status(), "peer stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Create { reply } => {
                let result = self.state.create(&self.space).map_err(Error::from);
                if result.is_ok() {
                    info!(peer = %self.id(), "created overlay");
                }
                let _ = reply.send(result.map(|()| self.space.zone()));
            }
            Command::BeginJoin { reply } => {
                let _ = reply.send(self.state.begin_join().map_err(Error::from));
            }
            Command::AbortJoin => self.state.abort_join(),
            Command::Introduce { joiner, reply } => {
                let result = self
                    .state
                    .offer_join(joiner, self.config.split_policy, self.config.join_timeout)
                    .map_err(Error::from);
                match &result {
                    Ok(offer) => debug!(
                        peer = %self.id(),
                        joiner = %joiner,
                        zone = %offer.zone,
                        "split reserved for joiner"
                    ),
                    Err(e) => warn!(peer = %self.id(), joiner = %joiner, error = %e, "join refused"),
                }
                let _ = reply.send(result);
            }
            Command::Welcome { joiner, reply } => self.welcome(joiner, reply).await,
            Command::CancelJoin { joiner, reply } => {
                let cancelled = self.state.cancel_join(joiner);
                if cancelled {
                    debug!(peer = %self.id(), joiner = %joiner, "reserved split released");
                }
                let _ = reply.send(cancelled);
            }
            Command::InstallJoin { offer, reply } => {
                let landmark = offer.landmark.id;
                match self.state.install_join(offer) {
                    Ok(()) => {
                        if let Some(zone) = self.state.zone() {
                            info!(peer = %self.id(), landmark = %landmark, zone = %zone, "joined overlay");
                        }
                        let notices = self.state.announce();
                        self.dispatch(notices).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            Command::BeginLeave { reply } => {
                let _ = reply.send(self.state.begin_leave().map_err(Error::from));
            }
            Command::Release => self.state.release(),
            Command::Depart { reply } => {
                let notices = self.state.depart();
                self.dispatch(notices).await;
                if let Some(network) = self.network.upgrade() {
                    network.deregister(&self.id()).await;
                }
                info!(peer = %self.id(), "left overlay");
                let _ = reply.send(());
            }
            Command::Absorb {
                leaver,
                holdings,
                reply,
            } => {
                let result = match self.state.absorb(leaver, &holdings) {
                    Ok(notices) => {
                        self.dispatch(notices).await;
                        info!(peer = %self.id(), leaver = %leaver, zone = %holdings.zone, "absorbed zone");
                        self.own_entry()
                    }
                    Err(e) => {
                        debug!(peer = %self.id(), leaver = %leaver, error = %e, "absorb refused");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
            Command::ReserveHandoff { leaver, reply } => {
                let _ = reply.send(self.state.reserve_handoff(leaver).map_err(Error::from));
            }
            Command::TakeOver {
                leaver,
                holdings,
                partner,
                reply,
            } => {
                let result = match self.state.take_over(leaver, holdings, partner) {
                    Ok(notices) => {
                        self.dispatch(notices).await;
                        if let Some(zone) = self.state.zone() {
                            info!(peer = %self.id(), leaver = %leaver, zone = %zone, "took over zone");
                        }
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::Cede { owner, reply } => {
                let id = owner.id;
                let result = match self.state.cede(owner) {
                    Ok(notices) => {
                        self.dispatch(notices).await;
                        if let Some(zone) = self.state.zone() {
                            info!(peer = %self.id(), owner = %id, zone = %zone, "ceded absorbed zone");
                        }
                        Ok(())
                    }
                    Err(e) => {
                        warn!(peer = %self.id(), owner = %id, error = %e, "cede refused");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
            Command::Refresh { entry } => {
                let id = entry.id;
                if let Some(answer) = self.state.learn(entry) {
                    debug!(peer = %self.id(), neighbor = %id, "new neighbor");
                    self.dispatch(vec![answer]).await;
                } else {
                    trace!(peer = %self.id(), neighbor = %id, "neighbor refreshed");
                }
            }
            Command::Forget { peer } => {
                if self.state.forget(&peer).is_some() {
                    debug!(peer = %self.id(), neighbor = %peer, "neighbor forgotten");
                }
            }
            Command::Heartbeat { from, holdings } => {
                let notices = self.state.heartbeat(from, holdings);
                self.dispatch(notices).await;
            }
            Command::Suspect { peer, reply } => {
                let _ = reply.send(self.repair_job(peer));
            }
            Command::Maintain { reply } => {
                self.maintain().await;
                let _ = reply.send(());
            }
            Command::Route(request) => self.route(request).await,
            Command::Multicast(request) => self.multicast(request).await,
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.deliveries.subscribe());
            }
            Command::Crash => {}
        }
    }

    fn own_entry(&self) -> Result<NeighborEntry> {
        self.state.entry().ok_or_else(|| Error::InvalidState {
            expected: "Joined",
            actual: self.state.status().to_string(),
        })
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id(),
            status: self.state.status(),
            zone: self.state.zone().cloned(),
            neighbors: self.state.table().clone(),
            split_history: self.state.split_history().to_vec(),
            pending: self.state.pending().map(str::to_string),
        }
    }

    /// Apply the landmark side of a join and hand the joiner its zone.
    async fn welcome(&mut self, joiner: PeerId, reply: oneshot::Sender<Result<()>>) {
        let (offer, notices) = match self.state.welcome(joiner) {
            Ok(welcome) => welcome,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        self.dispatch(notices).await;
        if let Some(zone) = self.state.zone() {
            debug!(peer = %self.id(), joiner = %joiner, kept = %zone, "split applied");
        }

        // The joiner installs its half before anything this peer forwards
        // afterwards can reach it.
        let install = Command::InstallJoin { offer, reply };
        if let Err(bounced) = self.deliver(&joiner, install).await {
            warn!(peer = %self.id(), joiner = %joiner, "joiner vanished mid-join");
            if let Command::InstallJoin { reply, .. } = bounced {
                let _ = reply.send(Err(Error::NeighborUnreachable(joiner)));
            }
            self.suspect(joiner);
        }
    }

    /// Deliver notices produced by a state transition.
    async fn dispatch(&mut self, notices: Vec<Notice>) {
        for notice in notices {
            let to = notice.recipient();
            let cmd = match notice {
                Notice::Refresh { entry, .. } => Command::Refresh { entry },
                Notice::Forget { peer, .. } => Command::Forget { peer },
            };
            if self.deliver(&to, cmd).await.is_err() {
                warn!(peer = %self.id(), neighbor = %to, "notice undeliverable");
                self.suspect(to);
            }
        }
    }

    /// Drop prunable neighbors and heartbeat the rest.
    async fn maintain(&mut self) {
        let dropped = self.state.prune();
        if !dropped.is_empty() {
            debug!(peer = %self.id(), dropped = dropped.len(), "pruned non-adjacent neighbors");
        }
        let Some(holdings) = self.state.holdings() else {
            return;
        };
        let from = self.id();
        for neighbor in self.state.table().ids() {
            let heartbeat = Command::Heartbeat {
                from,
                holdings: holdings.clone(),
            };
            if self.deliver(&neighbor, heartbeat).await.is_err() {
                warn!(peer = %from, neighbor = %neighbor, "heartbeat failed");
                self.suspect(neighbor);
            }
        }
    }

    /// Build the repair job for a neighbor presumed dead, dropping it from
    /// the table. `None` if it is not a neighbor.
    fn repair_job(&mut self, peer: PeerId) -> Option<RepairJob> {
        let view = self.state.view(&peer).cloned();
        let entry = self.state.forget(&peer)?;

        let zone = match &view {
            Some(view) if view.zone.contains_zone(&entry.zone) => view.zone.clone(),
            _ => entry.zone,
        };
        let split_history: Vec<SplitEntry> = view
            .as_ref()
            .map(|v| v.split_history.clone())
            .unwrap_or_default();

        let mut candidates: Vec<PeerId> = self.state.table().ids();
        candidates.push(self.id());
        if let Some(view) = &view {
            candidates.extend(view.neighbors.iter().map(|e| e.id));
        }
        candidates.sort();
        candidates.dedup();
        candidates.retain(|id| *id != peer);

        Some(RepairJob {
            failed: peer,
            detector: self.id(),
            zone,
            split_history,
            candidates,
        })
    }

    /// Start repairing a neighbor that could not be reached.
    fn suspect(&mut self, peer: PeerId) {
        let Some(network) = self.network.upgrade() else {
            return;
        };
        if let Some(job) = self.repair_job(peer) {
            warn!(peer = %self.id(), failed = %peer, "neighbor unreachable, starting repair");
            tokio::spawn(async move {
                if let Err(e) = repair::run(&network, job).await {
                    warn!(failed = %peer, error = %e, "repair failed");
                }
            });
        }
    }

    async fn route(&mut self, mut request: UnicastRequest) {
        let max_hops = self.config.max_hops;
        let mut excluded = Vec::new();
        loop {
            let Some(zone) = self.state.zone().cloned() else {
                request.fail(RoutingFailure::NotJoined);
                return;
            };
            match unicast_step(&zone, self.state.table(), &request.target, &excluded) {
                UnicastStep::Arrived => {
                    debug!(peer = %self.id(), hops = request.hops, target = %request.target, "unicast arrived");
                    let _ = request.reply.send(Ok(RouteOutcome {
                        owner: self.id(),
                        zone,
                        hops: request.hops,
                    }));
                    return;
                }
                UnicastStep::DeadEnd => {
                    warn!(peer = %self.id(), target = %request.target, "unicast dead end");
                    request.fail(RoutingFailure::DeadEnd);
                    return;
                }
                UnicastStep::Forward(next) => {
                    if request.hops >= max_hops {
                        request.fail(RoutingFailure::TtlExceeded { max_hops });
                        return;
                    }
                    request.hops += 1;
                    trace!(peer = %self.id(), next = %next, hops = request.hops, "unicast forward");
                    match self.deliver(&next, Command::Route(request)).await {
                        Ok(()) => return,
                        Err(Command::Route(bounced)) => {
                            request = bounced;
                            request.hops -= 1;
                            excluded.push(next);
                            self.suspect(next);
                        }
                        Err(_) => return,
                    }
                }
            }
        }
    }

    async fn multicast(&mut self, request: MulticastRequest) {
        let me = self.id();
        if !self.visited.first_visit(request.id) {
            trace!(peer = %me, request = %request.id, "duplicate suppressed");
            request.report(me, ReportKind::Duplicate, 0);
            return;
        }
        let Some(zone) = self.state.zone().cloned() else {
            request.report(me, ReportKind::Dropped(RoutingFailure::NotJoined), 0);
            return;
        };
        let max_hops = self.config.max_hops;

        if request.constraint.matches_zone(&zone) {
            let payload = match &request.action {
                Action::Invoke(handler) => handler.on_match(me, &zone),
                Action::Deliver(payload) => {
                    self.deliver_locally(request.id, payload);
                    None
                }
            };
            let targets = multicast_fanout(self.state.table(), &request.constraint, request.from.as_ref());
            debug!(peer = %me, request = %request.id, fanout = targets.len(), "multicast hit");
            request.report(me, ReportKind::Hit { zone: zone.clone(), payload }, targets.len());

            for target in targets {
                if request.hops >= max_hops {
                    request.report(me, ReportKind::Dropped(RoutingFailure::TtlExceeded { max_hops }), 0);
                    continue;
                }
                let toward = self.state.table().get(&target).map(|e| e.zone.clone());
                let copy = Command::Multicast(request.forward(me));
                if let Err(Command::Multicast(copy)) = self.deliver(&target, copy).await {
                    self.suspect(target);
                    self.reroute(copy, target, toward, &zone).await;
                }
            }
            return;
        }

        // Not in the constrained region: steer one copy toward it.
        request.report(me, ReportKind::Relay, 1);
        if request.hops >= max_hops {
            request.report(me, ReportKind::Dropped(RoutingFailure::TtlExceeded { max_hops }), 0);
            return;
        }
        let target = request.constraint.target_from(&zone);
        let mut excluded = Vec::new();
        loop {
            match unicast_step(&zone, self.state.table(), &target, &excluded) {
                UnicastStep::Forward(next) => {
                    let copy = Command::Multicast(request.forward(me));
                    if self.deliver(&next, copy).await.is_ok() {
                        trace!(peer = %me, next = %next, "multicast relayed");
                        return;
                    }
                    excluded.push(next);
                    self.suspect(next);
                }
                UnicastStep::Arrived | UnicastStep::DeadEnd => {
                    let reason = excluded
                        .last()
                        .map_or(RoutingFailure::DeadEnd, |dead| RoutingFailure::Unreachable(*dead));
                    request.report(me, ReportKind::Dropped(reason), 0);
                    return;
                }
            }
        }
    }

    /// Send a copy meant for a dead neighbor toward the zone it held, through
    /// another neighbor. Whoever owns that zone now (after repair) handles
    /// it; a peer that already saw the request reports a duplicate.
    ///
    /// The dead neighbor is reported either way, and the copy is retired
    /// here when no other neighbor leads toward the zone.
    async fn reroute(&mut self, copy: MulticastRequest, dead: PeerId, toward: Option<Zone>, own: &Zone) {
        let me = self.id();
        let Some(target) = toward.map(|zone| copy.constraint.target_from(&zone)) else {
            copy.report(me, ReportKind::Unreachable(dead), 0);
            return;
        };
        let mut copy = copy;
        let mut excluded = vec![dead];
        while let UnicastStep::Forward(next) = unicast_step(own, self.state.table(), &target, &excluded) {
            // The report retires the lost copy and announces its replacement.
            if excluded.len() == 1 {
                copy.report(me, ReportKind::Unreachable(dead), 1);
            }
            match self.deliver(&next, Command::Multicast(copy)).await {
                Ok(()) => {
                    debug!(peer = %me, dead = %dead, next = %next, "multicast copy rerouted");
                    return;
                }
                Err(Command::Multicast(bounced)) => {
                    excluded.push(next);
                    self.suspect(next);
                    copy = bounced;
                }
                Err(_) => return,
            }
        }
        warn!(peer = %me, dead = %dead, "no route around unreachable neighbor");
        copy.report(me, ReportKind::Unreachable(dead), 0);
    }

    /// Hand a broadcast payload to this peer's subscribers.
    fn deliver_locally(&self, request: RequestId, payload: &Arc<Vec<u8>>) {
        let me = self.id();
        if self.deliveries.len() >= self.config.delivery_capacity.max(1) {
            trace!(peer = %me, request = %request, "subscriber lagging, oldest payload evicted");
        }
        if self.deliveries.send(payload.as_ref().clone()).is_err() {
            trace!(peer = %me, request = %request, "no subscriber, payload dropped");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
