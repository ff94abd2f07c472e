//! Global invariant checks over peer snapshots.
//!
//! The overlay never computes these itself (no peer sees the whole
//! network); they exist for tests, simulations and operators. At quiescence
//! the zones of the joined peers tile the domain exactly, and every pair of
//! geometrically adjacent peers lists each other at mutually opposite slots.

use std::collections::HashMap;
use std::fmt;

use canopy_overlay::{NeighborTable, PeerId, PeerStatus, SplitEntry};
use canopy_topology::{Adjacency, Space, Zone};
use serde::{Deserialize, Serialize};

/// Relative tolerance of the coverage check.
const VOLUME_TOLERANCE: f64 = 1e-6;

/// Point-in-time view of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub status: PeerStatus,
    pub zone: Option<Zone>,
    pub neighbors: NeighborTable,
    pub split_history: Vec<SplitEntry>,
    /// Name of the pending operation, if any.
    pub pending: Option<String>,
}

impl PeerSnapshot {
    /// Human-readable JSON dump.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Violation {
    /// Two zones share points.
    Overlap { a: PeerId, b: PeerId },
    /// A zone reaches outside the domain.
    OutsideDomain { peer: PeerId },
    /// The zones do not add up to the domain.
    Coverage { expected: f64, actual: f64 },
    /// An adjacent peer is missing from the table.
    MissingNeighbor {
        peer: PeerId,
        neighbor: PeerId,
        expected: Adjacency,
    },
    /// An adjacent peer is filed under the wrong slot.
    Misfiled {
        peer: PeerId,
        neighbor: PeerId,
        expected: Adjacency,
        actual: Adjacency,
    },
    /// A listed peer is not adjacent.
    NotAdjacent { peer: PeerId, neighbor: PeerId },
    /// A listed peer's cached zone is out of date.
    StaleZone { peer: PeerId, neighbor: PeerId },
    /// A listed peer is not a live, joined peer.
    UnknownNeighbor { peer: PeerId, neighbor: PeerId },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap { a, b } => write!(f, "zones of {a} and {b} overlap"),
            Self::OutsideDomain { peer } => write!(f, "zone of {peer} leaves the domain"),
            Self::Coverage { expected, actual } => {
                write!(f, "zones cover volume {actual}, domain is {expected}")
            }
            Self::MissingNeighbor {
                peer,
                neighbor,
                expected,
            } => write!(f, "{peer} does not list {neighbor} at {expected}"),
            Self::Misfiled {
                peer,
                neighbor,
                expected,
                actual,
            } => write!(f, "{peer} lists {neighbor} at {actual}, expected {expected}"),
            Self::NotAdjacent { peer, neighbor } => {
                write!(f, "{peer} lists non-adjacent {neighbor}")
            }
            Self::StaleZone { peer, neighbor } => {
                write!(f, "{peer} caches a stale zone for {neighbor}")
            }
            Self::UnknownNeighbor { peer, neighbor } => {
                write!(f, "{peer} lists departed {neighbor}")
            }
        }
    }
}

/// Result of an audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Joined peers examined.
    pub peers: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    /// Whether every invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() {
            return write!(f, "{} peers consistent", self.peers);
        }
        writeln!(f, "{} peers, {} violations:", self.peers, self.violations.len())?;
        for v in &self.violations {
            writeln!(f, "  {v}")?;
        }
        Ok(())
    }
}

fn joined(snapshots: &[PeerSnapshot]) -> Vec<(&PeerSnapshot, &Zone)> {
    snapshots
        .iter()
        .filter(|s| s.status == PeerStatus::Joined)
        .filter_map(|s| s.zone.as_ref().map(|z| (s, z)))
        .collect()
}

/// Zones are pairwise disjoint, inside the domain, and cover all of it.
pub fn check_tiling(space: &Space, snapshots: &[PeerSnapshot]) -> Vec<Violation> {
    let peers = joined(snapshots);
    let domain = space.zone();
    let mut violations = Vec::new();

    for (i, (a, za)) in peers.iter().enumerate() {
        if !domain.contains_zone(za) {
            violations.push(Violation::OutsideDomain { peer: a.id });
        }
        for (b, zb) in &peers[i + 1..] {
            if za.intersects(zb) {
                violations.push(Violation::Overlap { a: a.id, b: b.id });
            }
        }
    }

    let expected = space.volume();
    let actual: f64 = peers.iter().map(|(_, z)| z.volume()).sum();
    if ((actual - expected) / expected).abs() > VOLUME_TOLERANCE {
        violations.push(Violation::Coverage { expected, actual });
    }
    violations
}

/// Every adjacency is recorded on both sides, and nothing else is.
pub fn check_symmetry(snapshots: &[PeerSnapshot]) -> Vec<Violation> {
    let peers = joined(snapshots);
    let zones: HashMap<PeerId, &Zone> = peers.iter().map(|(s, z)| (s.id, *z)).collect();
    let mut violations = Vec::new();

    for (a, za) in &peers {
        for (b, zb) in &peers {
            if a.id == b.id {
                continue;
            }
            let Some(expected) = za.neighbors(zb) else {
                continue;
            };
            match a.neighbors.find(&b.id) {
                None => violations.push(Violation::MissingNeighbor {
                    peer: a.id,
                    neighbor: b.id,
                    expected,
                }),
                Some(actual) if actual != expected => violations.push(Violation::Misfiled {
                    peer: a.id,
                    neighbor: b.id,
                    expected,
                    actual,
                }),
                Some(_) => {}
            }
        }

        for entry in a.neighbors.entries() {
            match zones.get(&entry.id) {
                None => violations.push(Violation::UnknownNeighbor {
                    peer: a.id,
                    neighbor: entry.id,
                }),
                Some(actual) if **actual != entry.zone => violations.push(Violation::StaleZone {
                    peer: a.id,
                    neighbor: entry.id,
                }),
                Some(actual) => {
                    if za.neighbors(actual).is_none() {
                        violations.push(Violation::NotAdjacent {
                            peer: a.id,
                            neighbor: entry.id,
                        });
                    }
                }
            }
        }
    }
    violations
}

/// Run every check.
pub fn audit(space: &Space, snapshots: &[PeerSnapshot]) -> AuditReport {
    let mut violations = check_tiling(space, snapshots);
    violations.extend(check_symmetry(snapshots));
    AuditReport {
        peers: joined(snapshots).len(),
        violations,
    }
}
