//! Failure repair.
//!
//! When a neighbor cannot be reached, the peer that noticed (the detector)
//! drops it and builds a [`RepairJob`] from what it knows: the failed peer's
//! last known zone, and the neighbors and split history from its last
//! heartbeat. The job then runs the same hand-over as a graceful leave on
//! the failed peer's behalf.
//!
//! Several peers may detect the same failure. Repair is idempotent: each run
//! first asks the candidates for their current zones and stops if one of
//! them already covers the failed zone.

use canopy_overlay::{Holdings, NeighborEntry, PeerId, SplitEntry};
use canopy_topology::Zone;
use tracing::{debug, info, warn};

use crate::actor::Command;
use crate::error::{Error, Result};
use crate::membership::{backoff, hand_over};
use crate::network::Network;

/// Everything needed to reassign the zone of a failed peer.
#[derive(Debug, Clone)]
pub(crate) struct RepairJob {
    pub failed: PeerId,
    pub detector: PeerId,
    pub zone: Zone,
    pub split_history: Vec<SplitEntry>,
    /// Peers that may have been adjacent to the failed zone.
    pub candidates: Vec<PeerId>,
}

enum Coverage {
    /// A live peer owns the whole zone.
    Covered(PeerId),
    /// Part of the zone is owned, a hand-over is in flight.
    Partial,
    Uncovered,
}

fn coverage(zone: &Zone, live: &[NeighborEntry]) -> Coverage {
    if let Some(owner) = live.iter().find(|e| e.zone.contains_zone(zone)) {
        Coverage::Covered(owner.id)
    } else if live.iter().any(|e| e.zone.intersects(zone)) {
        Coverage::Partial
    } else {
        Coverage::Uncovered
    }
}

/// Current entries of the candidates that still answer.
async fn live_entries(network: &Network, candidates: &[PeerId]) -> Vec<NeighborEntry> {
    let mut live = Vec::new();
    for id in candidates {
        if let Ok(snapshot) = network.call(*id, |reply| Command::Snapshot { reply }).await {
            if let Some(zone) = snapshot.zone {
                live.push(NeighborEntry::new(*id, zone));
            }
        }
    }
    live
}

/// Reassign the failed peer's zone, then purge its id from the candidates.
pub(crate) async fn run(network: &Network, job: RepairJob) -> Result<()> {
    // A peer reported dead that still answers keeps its zone.
    if let Ok(snapshot) = network
        .call(job.failed, |reply| Command::Snapshot { reply })
        .await
    {
        if let Some(zone) = snapshot.zone {
            warn!(peer = %job.failed, "reported peer is alive, repair skipped");
            let entry = NeighborEntry::new(job.failed, zone);
            let _ = network.send(job.detector, Command::Refresh { entry }).await;
            return Ok(());
        }
    }

    info!(failed = %job.failed, detector = %job.detector, zone = %job.zone, "repairing zone");
    let attempts = network.config().repair_attempts;
    let mut live = Vec::new();
    let mut owner = None;

    for attempt in 1..=attempts {
        live = live_entries(network, &job.candidates).await;
        match coverage(&job.zone, &live) {
            Coverage::Covered(id) => {
                debug!(failed = %job.failed, owner = %id, attempt, "zone already covered");
                owner = Some(id);
                break;
            }
            Coverage::Partial => {
                debug!(failed = %job.failed, attempt, "hand-over in flight, waiting");
            }
            Coverage::Uncovered => {
                let holdings = Holdings {
                    zone: job.zone.clone(),
                    neighbors: live
                        .iter()
                        .filter(|e| e.zone.neighbors(&job.zone).is_some())
                        .cloned()
                        .collect(),
                    split_history: job.split_history.clone(),
                };
                if let Some(id) = hand_over(network, job.failed, &holdings).await {
                    owner = Some(id);
                    break;
                }
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff(network.config())).await;
        }
    }

    let Some(owner) = owner else {
        warn!(failed = %job.failed, attempts, "zone left unowned");
        return Err(Error::RepairIncomplete {
            peer: job.failed,
            attempts,
        });
    };

    for entry in &live {
        let _ = network
            .send(entry.id, Command::Forget { peer: job.failed })
            .await;
    }
    info!(failed = %job.failed, owner = %owner, "repair complete");
    Ok(())
}
