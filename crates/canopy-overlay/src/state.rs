//! Per-peer overlay state and its transitions.
//!
//! [`OverlayState`] is everything one peer owns: its lifecycle status, its
//! zone, its neighbor table, the history of splits that produced its zone,
//! and at most one pending multi-step operation. Every transition is a plain
//! method that either applies completely or returns an error and leaves the
//! state untouched. Transitions that other peers must hear about return the
//! [`Notice`]s to deliver; sending them is the caller's job.
//!
//! # Join
//!
//! ```text
//! joiner                      landmark
//!   begin_join
//!   ───── introduce ────────▶ offer_join     (split, reserve)
//!   ───── welcome ──────────▶ welcome        (apply split, refresh neighbors)
//!   install_join ◀── offer ──
//!   announce                                 (refresh joiner's neighbors)
//! ```
//!
//! The landmark keeps the lower half of the split and hands the upper half
//! to the joiner. The offer returned by `welcome` is rebuilt from the
//! landmark's table at that moment, so neighbors that refreshed the landmark
//! while the split was reserved are passed on.
//!
//! # Discovery
//!
//! A peer that files a neighbor it did not know answers with its own entry
//! ([`learn`](OverlayState::learn)), so the two sides always meet. Heartbeats
//! carry each peer's neighbor list; unknown peers in it that look adjacent are
//! greeted the same way ([`discover`](OverlayState::discover)).
//!
//! # Leave
//!
//! `begin_leave` reserves the leaver and snapshots its [`Holdings`]. A
//! mergeable neighbor `absorb`s it. Without one, a neighbor
//! that can itself merge with one of its own neighbors is reserved with
//! `reserve_handoff`, its partner absorbs it, and it `take_over`s the
//! leaver's zone. The leaver finally `depart`s.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use canopy_topology::{Direction, GeometryError, Space, Zone};
use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};
use crate::{NeighborEntry, NeighborTable, PeerId};

/// Lifecycle of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Created but not part of the overlay.
    NotJoined,
    /// Waiting for a landmark to hand over a zone.
    Joining,
    /// Owns a zone.
    Joined,
    /// Gave its zone away and left.
    Left,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJoined => write!(f, "NotJoined"),
            Self::Joining => write!(f, "Joining"),
            Self::Joined => write!(f, "Joined"),
            Self::Left => write!(f, "Left"),
        }
    }
}

/// How a landmark picks the dimension to split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// The dimension after the one of the last split (0 for a fresh zone).
    #[default]
    RoundRobin,
    /// The dimension with the widest range (lowest index on ties).
    LargestExtent,
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::LargestExtent => write!(f, "largest-extent"),
        }
    }
}

impl FromStr for SplitPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "largest-extent" | "largestextent" => Ok(Self::LargestExtent),
            other => Err(format!("unknown split policy: {other}")),
        }
    }
}

/// One split in the ancestry of a zone: the dimension that was split and
/// the half this zone descends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub dimension: usize,
    pub direction: Direction,
}

/// Everything a joiner needs to take its half of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOffer {
    /// The landmark with the zone it keeps.
    pub landmark: NeighborEntry,
    /// The zone handed to the joiner.
    pub zone: Zone,
    /// The joiner's initial neighbors.
    pub neighbors: NeighborTable,
    /// The joiner's split history.
    pub split_history: Vec<SplitEntry>,
}

/// What a peer holds: its zone, neighbors and split history.
///
/// Carried by heartbeats so neighbors can stand in for a peer that dies,
/// and handed to the absorber when a peer leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holdings {
    pub zone: Zone,
    pub neighbors: Vec<NeighborEntry>,
    pub split_history: Vec<SplitEntry>,
}

/// A reserved take-over candidate and the partner that will absorb it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffOffer {
    /// The reserved candidate's own holdings, minus the leaver.
    pub candidate: Holdings,
    /// The neighbor that can merge with the candidate.
    pub partner: NeighborEntry,
}

/// A message a transition asks the caller to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// Tell `to` about our current zone. The receiver files, moves or drops
    /// us based on adjacency.
    Refresh { to: PeerId, entry: NeighborEntry },
    /// Tell `to` that `peer` is gone.
    Forget { to: PeerId, peer: PeerId },
}

impl Notice {
    /// The peer this notice goes to.
    pub fn recipient(&self) -> PeerId {
        match self {
            Self::Refresh { to, .. } | Self::Forget { to, .. } => *to,
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Join {
        joiner: PeerId,
        dimension: usize,
        kept: Zone,
        given: Zone,
        since: Instant,
    },
    Leave,
    Handoff {
        leaver: PeerId,
    },
}

impl Pending {
    fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave => "leave",
            Self::Handoff { .. } => "handoff",
        }
    }
}

/// One peer's view of the overlay.
#[derive(Debug, Clone)]
pub struct OverlayState {
    id: PeerId,
    status: PeerStatus,
    zone: Option<Zone>,
    table: NeighborTable,
    split_history: Vec<SplitEntry>,
    pending: Option<Pending>,
    /// Last neighbor list each neighbor advertised.
    views: BTreeMap<PeerId, Holdings>,
}

impl OverlayState {
    /// A fresh, not yet joined peer.
    pub fn new(id: PeerId, dimensions: usize) -> Self {
        Self {
            id,
            status: PeerStatus::NotJoined,
            zone: None,
            table: NeighborTable::new(dimensions),
            split_history: Vec::new(),
            pending: None,
            views: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    /// The owned zone, once joined.
    pub fn zone(&self) -> Option<&Zone> {
        self.zone.as_ref()
    }

    pub fn table(&self) -> &NeighborTable {
        &self.table
    }

    pub fn split_history(&self) -> &[SplitEntry] {
        &self.split_history
    }

    /// Name of the pending operation, if any.
    pub fn pending(&self) -> Option<&'static str> {
        self.pending.as_ref().map(Pending::name)
    }

    /// This peer as a neighbor entry, once joined.
    pub fn entry(&self) -> Option<NeighborEntry> {
        self.zone.clone().map(|zone| NeighborEntry::new(self.id, zone))
    }

    /// Last holdings advertised by a neighbor.
    pub fn view(&self, id: &PeerId) -> Option<&Holdings> {
        self.views.get(id)
    }

    /// Current holdings, once joined.
    pub fn holdings(&self) -> Option<Holdings> {
        self.zone.clone().map(|zone| Holdings {
            zone,
            neighbors: self.table.entries().cloned().collect(),
            split_history: self.split_history.clone(),
        })
    }

    fn expect_status(&self, expected: PeerStatus, name: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(OverlayError::InvalidState {
                expected: name,
                actual: self.status,
            })
        }
    }

    fn joined_zone(&self) -> Result<&Zone> {
        match (&self.status, &self.zone) {
            (PeerStatus::Joined, Some(zone)) => Ok(zone),
            _ => Err(OverlayError::InvalidState {
                expected: "Joined",
                actual: self.status,
            }),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.pending {
            Some(p) => Err(OverlayError::Busy { pending: p.name() }),
            None => Ok(()),
        }
    }

    fn refresh_all(&self, recipients: impl IntoIterator<Item = PeerId>) -> Vec<Notice> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        recipients
            .into_iter()
            .filter(|to| *to != self.id)
            .filter(|to| {
                if seen.contains(to) {
                    false
                } else {
                    seen.push(*to);
                    true
                }
            })
            .map(|to| Notice::Refresh {
                to,
                entry: entry.clone(),
            })
            .collect()
    }

    /// Become the first peer, owning the whole space.
    pub fn create(&mut self, space: &Space) -> Result<()> {
        self.expect_status(PeerStatus::NotJoined, "NotJoined")?;
        self.zone = Some(space.zone());
        self.table = NeighborTable::new(space.dimensions());
        self.split_history.clear();
        self.status = PeerStatus::Joined;
        Ok(())
    }

    /// Start joining through a landmark.
    pub fn begin_join(&mut self) -> Result<()> {
        self.expect_status(PeerStatus::NotJoined, "NotJoined")?;
        self.status = PeerStatus::Joining;
        Ok(())
    }

    /// Give up a join in progress.
    pub fn abort_join(&mut self) {
        if self.status == PeerStatus::Joining {
            self.status = PeerStatus::NotJoined;
        }
    }

    /// Dimension the next split of this zone would use.
    pub fn next_split_dimension(&self, policy: SplitPolicy) -> usize {
        let dimensions = self.table.dimensions().max(1);
        match policy {
            SplitPolicy::RoundRobin => self
                .split_history
                .last()
                .map_or(0, |last| (last.dimension + 1) % dimensions),
            SplitPolicy::LargestExtent => match &self.zone {
                Some(zone) => (0..zone.dimensions())
                    .fold((0, f64::MIN), |(best, width), d| {
                        let extent = zone.extent(d);
                        if extent > width {
                            (d, extent)
                        } else {
                            (best, width)
                        }
                    })
                    .0,
                None => 0,
            },
        }
    }

    /// Landmark side of a join: split the zone and reserve the upper half
    /// for `joiner`.
    ///
    /// A pending join older than `join_timeout` is treated as abandoned.
    pub fn offer_join(
        &mut self,
        joiner: PeerId,
        policy: SplitPolicy,
        join_timeout: Duration,
    ) -> Result<JoinOffer> {
        let zone = self.joined_zone()?.clone();
        if let Some(Pending::Join { since, .. }) = &self.pending {
            if since.elapsed() >= join_timeout {
                self.pending = None;
            }
        }
        self.ensure_idle()?;

        let dimension = self.next_split_dimension(policy);
        let (kept, given) = zone.split(dimension)?;
        let offer = self.build_offer(dimension, &kept, &given);

        self.pending = Some(Pending::Join {
            joiner,
            dimension,
            kept,
            given,
            since: Instant::now(),
        });
        Ok(offer)
    }

    fn build_offer(&self, dimension: usize, kept: &Zone, given: &Zone) -> JoinOffer {
        let mut neighbors = NeighborTable::from_adjacent(given, self.table.entries().cloned());
        neighbors.add(
            NeighborEntry::new(self.id, kept.clone()),
            dimension,
            Direction::Inferior,
        );

        let mut split_history = self.split_history.clone();
        split_history.push(SplitEntry {
            dimension,
            direction: Direction::Superior,
        });

        JoinOffer {
            landmark: NeighborEntry::new(self.id, kept.clone()),
            zone: given.clone(),
            neighbors,
            split_history,
        }
    }

    /// Landmark side: apply the reserved split. Returns the joiner's final
    /// offer and the notices for the landmark's neighbors.
    pub fn welcome(&mut self, joiner: PeerId) -> Result<(JoinOffer, Vec<Notice>)> {
        let (dimension, kept, given) = match &self.pending {
            Some(Pending::Join {
                joiner: pending,
                dimension,
                kept,
                given,
                ..
            }) if *pending == joiner => (*dimension, kept.clone(), given.clone()),
            _ => {
                return Err(OverlayError::NoPendingOperation {
                    operation: "join",
                    peer: joiner,
                })
            }
        };

        let offer = self.build_offer(dimension, &kept, &given);
        let previous = self.table.ids();
        self.zone = Some(kept.clone());
        self.split_history.push(SplitEntry {
            dimension,
            direction: Direction::Inferior,
        });
        for dropped in self.table.retain_adjacent(&kept) {
            self.views.remove(&dropped);
        }
        self.table
            .add(NeighborEntry::new(joiner, given), dimension, Direction::Superior);
        self.pending = None;

        let notices = self.refresh_all(previous.into_iter().filter(|id| *id != joiner));
        Ok((offer, notices))
    }

    /// Landmark side: forget a reserved join that will not complete.
    pub fn cancel_join(&mut self, joiner: PeerId) -> bool {
        match &self.pending {
            Some(Pending::Join { joiner: pending, .. }) if *pending == joiner => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Joiner side: take the offered zone and neighbors.
    pub fn install_join(&mut self, offer: JoinOffer) -> Result<()> {
        self.expect_status(PeerStatus::Joining, "Joining")?;
        self.zone = Some(offer.zone);
        self.table = offer.neighbors;
        self.split_history = offer.split_history;
        self.status = PeerStatus::Joined;
        Ok(())
    }

    /// Refresh notices for every current neighbor.
    pub fn announce(&self) -> Vec<Notice> {
        self.refresh_all(self.table.ids())
    }

    /// Reserve this peer for leaving and snapshot its holdings.
    pub fn begin_leave(&mut self) -> Result<Holdings> {
        let zone = self.joined_zone()?.clone();
        self.ensure_idle()?;
        self.pending = Some(Pending::Leave);
        Ok(Holdings {
            zone,
            neighbors: self.table.entries().cloned().collect(),
            split_history: self.split_history.clone(),
        })
    }

    /// Drop a leave or handoff reservation.
    pub fn release(&mut self) {
        if matches!(self.pending, Some(Pending::Leave | Pending::Handoff { .. })) {
            self.pending = None;
        }
    }

    /// Leave the overlay; every neighbor is told to forget us.
    pub fn depart(&mut self) -> Vec<Notice> {
        let notices = self
            .table
            .ids()
            .into_iter()
            .map(|to| Notice::Forget { to, peer: self.id })
            .collect();
        self.status = PeerStatus::Left;
        self.zone = None;
        self.table.clear();
        self.views.clear();
        self.pending = None;
        notices
    }

    /// Merge a departing (or dead) neighbor's zone into ours.
    ///
    /// Absorbing a zone we already cover is a no-op, so repeated repairs of
    /// the same failure are harmless.
    pub fn absorb(&mut self, leaver: PeerId, holdings: &Holdings) -> Result<Vec<Notice>> {
        let zone = self.joined_zone()?.clone();
        if zone.contains_zone(&holdings.zone) {
            return Ok(Vec::new());
        }
        self.ensure_idle()?;

        let merged = zone.merge(&holdings.zone)?;
        if let Some(owner) = self
            .table
            .entries()
            .find(|e| e.id != leaver && e.zone.intersects(&holdings.zone))
        {
            return Err(OverlayError::AlreadyClaimed {
                zone: holdings.zone.to_string(),
                owner: owner.id,
            });
        }

        let previous = self.table.ids();
        self.zone = Some(merged.clone());
        self.table.remove(&leaver);
        self.views.remove(&leaver);
        for entry in &holdings.neighbors {
            if entry.id != self.id && entry.id != leaver && !self.table.contains(&entry.id) {
                self.table.insert_adjacent(entry.clone(), &merged);
            }
        }
        for dropped in self.table.retain_adjacent(&merged) {
            self.views.remove(&dropped);
        }

        if let Some(adjacency) = zone.can_merge(&holdings.zone) {
            if self
                .split_history
                .last()
                .is_some_and(|last| last.dimension == adjacency.dimension)
            {
                self.split_history.pop();
            }
        }

        let mut recipients = previous;
        recipients.extend(self.table.ids());
        Ok(self.refresh_all(recipients.into_iter().filter(|id| *id != leaver)))
    }

    /// Reserve this peer as a take-over candidate for `leaver`.
    ///
    /// Returns `None` (and reserves nothing) if no neighbor other than the
    /// leaver can merge with us.
    pub fn reserve_handoff(&mut self, leaver: PeerId) -> Result<Option<HandoffOffer>> {
        let zone = self.joined_zone()?.clone();
        self.ensure_idle()?;

        let partner = self
            .table
            .mergeable_with(&zone)
            .into_iter()
            .find(|e| e.id != leaver)
            .cloned();
        let Some(partner) = partner else {
            return Ok(None);
        };

        self.pending = Some(Pending::Handoff { leaver });
        Ok(Some(HandoffOffer {
            candidate: Holdings {
                zone,
                neighbors: self
                    .table
                    .entries()
                    .filter(|e| e.id != leaver)
                    .cloned()
                    .collect(),
                split_history: self.split_history.clone(),
            },
            partner,
        }))
    }

    /// Move into the leaver's zone after our partner absorbed our old one.
    ///
    /// `partner` carries the partner's zone after the merge.
    pub fn take_over(
        &mut self,
        leaver: PeerId,
        holdings: Holdings,
        partner: NeighborEntry,
    ) -> Result<Vec<Notice>> {
        self.joined_zone()?;
        match &self.pending {
            Some(Pending::Handoff { leaver: pending }) if *pending == leaver => {}
            _ => {
                return Err(OverlayError::NoPendingOperation {
                    operation: "handoff",
                    peer: leaver,
                })
            }
        }

        let previous = self.table.ids();
        let zone = holdings.zone;
        let inherited = holdings
            .neighbors
            .into_iter()
            .filter(|e| e.id != self.id && e.id != leaver && e.id != partner.id);
        let mut table = NeighborTable::from_adjacent(&zone, inherited);
        table.insert_adjacent(partner, &zone);

        self.zone = Some(zone);
        self.table = table;
        self.split_history = holdings.split_history;
        self.views.clear();
        self.pending = None;

        let mut recipients = previous;
        recipients.extend(self.table.ids());
        Ok(self.refresh_all(recipients.into_iter().filter(|id| *id != leaver)))
    }

    /// Hand the zone of `owner` back after absorbing it, when the hand-over
    /// that absorb was part of did not complete.
    ///
    /// `owner.zone` must be a slab cut off one end of our zone.
    pub fn cede(&mut self, owner: NeighborEntry) -> Result<Vec<Notice>> {
        let zone = self.joined_zone()?.clone();
        self.ensure_idle()?;
        let rest = zone
            .without(&owner.zone)
            .ok_or_else(|| GeometryError::NotMergeable {
                left: zone.to_string(),
                right: owner.zone.to_string(),
            })?;

        let previous = self.table.ids();
        self.zone = Some(rest.clone());
        for dropped in self.table.retain_adjacent(&rest) {
            self.views.remove(&dropped);
        }
        if let Some(adjacency) = self.table.insert_adjacent(owner, &rest) {
            self.split_history.push(SplitEntry {
                dimension: adjacency.dimension,
                direction: adjacency.direction.opposite(),
            });
        }

        let mut recipients = previous;
        recipients.extend(self.table.ids());
        Ok(self.refresh_all(recipients))
    }

    /// Apply a neighbor's advertised zone. Returns whether it is now filed.
    pub fn refresh(&mut self, entry: NeighborEntry) -> bool {
        let Some(zone) = &self.zone else {
            return false;
        };
        if entry.id == self.id || self.status != PeerStatus::Joined {
            return false;
        }
        let id = entry.id;
        let filed = self.table.insert_adjacent(entry, zone).is_some();
        if !filed {
            self.views.remove(&id);
        }
        filed
    }

    /// [`refresh`](Self::refresh), answering a peer filed for the first time
    /// with our own entry.
    pub fn learn(&mut self, entry: NeighborEntry) -> Option<Notice> {
        let id = entry.id;
        let known = self.table.contains(&id);
        if !self.refresh(entry) || known {
            return None;
        }
        self.entry().map(|entry| Notice::Refresh { to: id, entry })
    }

    /// Greet peers a neighbor lists that we do not know but that appear
    /// adjacent to us.
    pub fn discover(&self, holdings: &Holdings) -> Vec<Notice> {
        let (Some(zone), Some(own)) = (&self.zone, self.entry()) else {
            return Vec::new();
        };
        if self.status != PeerStatus::Joined {
            return Vec::new();
        }
        holdings
            .neighbors
            .iter()
            .filter(|e| e.id != self.id && !self.table.contains(&e.id))
            .filter(|e| zone.neighbors(&e.zone).is_some())
            .map(|e| Notice::Refresh {
                to: e.id,
                entry: own.clone(),
            })
            .collect()
    }

    /// Handle a neighbor's heartbeat.
    ///
    /// The sender is filed (or re-filed) from its advertised zone and its
    /// holdings are kept as its view. A sender that is not adjacent to us is
    /// told to forget us, and unknown adjacent peers it lists are greeted.
    pub fn heartbeat(&mut self, from: PeerId, holdings: Holdings) -> Vec<Notice> {
        let mut notices: Vec<Notice> = self
            .learn(NeighborEntry::new(from, holdings.zone.clone()))
            .into_iter()
            .collect();
        if self.table.contains(&from) {
            notices.extend(self.discover(&holdings));
            self.views.insert(from, holdings);
        } else if from != self.id {
            notices.push(Notice::Forget {
                to: from,
                peer: self.id,
            });
        }
        notices
    }

    /// Record the holdings a neighbor advertised. Ignored for non-neighbors.
    pub fn record_view(&mut self, id: PeerId, holdings: Holdings) {
        if self.table.contains(&id) {
            self.views.insert(id, holdings);
        }
    }

    /// Drop a neighbor. Returns its last entry.
    pub fn forget(&mut self, id: &PeerId) -> Option<NeighborEntry> {
        self.views.remove(id);
        self.table.remove(id)
    }

    /// Drop neighbors that are no longer adjacent.
    pub fn prune(&mut self) -> Vec<PeerId> {
        let Some(zone) = self.zone.clone() else {
            return Vec::new();
        };
        let dropped = self.table.retain_adjacent(&zone);
        for id in &dropped {
            self.views.remove(id);
        }
        dropped
    }
}
