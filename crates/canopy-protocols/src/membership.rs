//! Join and leave orchestration.
//!
//! Both protocols are driven by the caller's task as a sequence of
//! request/reply commands to the peers involved. Each command completes and
//! releases its peer before the next one is sent.

use std::time::Duration;

use canopy_overlay::{HandoffOffer, Holdings, NeighborEntry, PeerId, PeerStatus};
use canopy_topology::Zone;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::actor::Command;
use crate::config::OverlayConfig;
use crate::error::{Error, Result};
use crate::network::Network;

/// Join `joiner` to the overlay through `landmark`.
///
/// 1. The joiner enters `Joining`.
/// 2. The landmark picks a split and reserves the upper half.
/// 3. The landmark applies the split, tells its neighbors, and passes the
///    final offer on to the joiner, which installs it and announces itself.
pub(crate) async fn join(network: &Network, joiner: PeerId, landmark: PeerId) -> Result<Zone> {
    if joiner == landmark {
        return Err(Error::JoinRejected {
            landmark,
            reason: "a peer cannot join through itself".into(),
        });
    }
    network
        .request(joiner, |reply| Command::BeginJoin { reply })
        .await?;

    let offer = match network
        .request(landmark, |reply| Command::Introduce { joiner, reply })
        .await
    {
        Ok(offer) => offer,
        Err(e) => {
            // A reservation made after the caller gave up must not block
            // the landmark until the join timeout.
            let _ = network
                .call(landmark, |reply| Command::CancelJoin { joiner, reply })
                .await;
            let _ = network.send(joiner, Command::AbortJoin).await;
            return Err(rejection(landmark, e));
        }
    };
    let zone = offer.zone;

    if let Err(e) = network
        .request(landmark, |reply| Command::Welcome { joiner, reply })
        .await
    {
        return recover_join(network, joiner, landmark, e).await;
    }

    info!(peer = %joiner, landmark = %landmark, zone = %zone, "join complete");
    Ok(zone)
}

/// Settle a join whose welcome did not answer.
///
/// The landmark handles commands in order, so once it answers the cancel
/// its split has either been dropped or applied, and an applied split has
/// already put the joiner's install in the joiner's mailbox. The joiner is
/// only told to abort when it is known not to have been given a zone.
async fn recover_join(network: &Network, joiner: PeerId, landmark: PeerId, err: Error) -> Result<Zone> {
    let cancelled = network
        .call(landmark, |reply| Command::CancelJoin { joiner, reply })
        .await;
    match cancelled {
        Ok(true) => {}
        Ok(false) | Err(Error::NeighborUnreachable(_)) => {
            if let Ok(snapshot) = network.call(joiner, |reply| Command::Snapshot { reply }).await {
                if let (PeerStatus::Joined, Some(zone)) = (snapshot.status, snapshot.zone) {
                    info!(peer = %joiner, landmark = %landmark, zone = %zone, "join complete after slow welcome");
                    return Ok(zone);
                }
            }
        }
        Err(cancel) => {
            // The landmark may still apply the split; aborting now could
            // strand the half it gives away.
            warn!(peer = %joiner, landmark = %landmark, error = %cancel, "join outcome unknown");
            return Err(rejection(landmark, err));
        }
    }
    let _ = network.send(joiner, Command::AbortJoin).await;
    Err(rejection(landmark, err))
}

fn rejection(landmark: PeerId, err: Error) -> Error {
    match err {
        Error::NeighborUnreachable(_) | Error::Timeout(_) => err,
        other => Error::JoinRejected {
            landmark,
            reason: other.to_string(),
        },
    }
}

/// Leave the overlay gracefully, retrying with random backoff while no
/// neighbor can take the zone.
pub(crate) async fn leave(network: &Network, id: PeerId) -> Result<()> {
    let config = network.config();
    let attempts = config.leave_attempts;

    for attempt in 1..=attempts {
        match network
            .request(id, |reply| Command::BeginLeave { reply })
            .await
        {
            Ok(holdings) => {
                let last_peer = holdings.neighbors.is_empty() && holdings.zone == network.space().zone();
                let successor = if last_peer {
                    Some(id)
                } else {
                    hand_over(network, id, &holdings).await
                };
                if let Some(successor) = successor {
                    network.call(id, |reply| Command::Depart { reply }).await?;
                    info!(peer = %id, successor = %successor, attempt, "leave complete");
                    return Ok(());
                }
                let _ = network.send(id, Command::Release).await;
                debug!(peer = %id, attempt, "no neighbor can take the zone yet");
            }
            Err(Error::Busy(pending)) => {
                debug!(peer = %id, attempt, pending, "leave waiting on pending operation");
            }
            Err(e) => return Err(e),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff(config)).await;
        }
    }

    warn!(peer = %id, attempts, "leave deferred");
    Err(Error::LeaveDeferred { attempts })
}

/// Random delay in the configured leave retry range.
pub(crate) fn backoff(config: &OverlayConfig) -> Duration {
    let min = config.leave_retry_min.as_millis() as u64;
    let max = config.leave_retry_max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
}

/// Give the zone described by `holdings` to a neighbor of `leaver`.
///
/// A neighbor that can merge with the zone absorbs it (lowest id first).
/// Otherwise a neighbor that can merge with one of its own neighbors is
/// reserved, that partner absorbs the neighbor's zone, and the freed
/// neighbor takes the leaver's zone over. Returns the new owner.
pub(crate) async fn hand_over(network: &Network, leaver: PeerId, holdings: &Holdings) -> Option<PeerId> {
    let mut neighbors: Vec<&NeighborEntry> = holdings
        .neighbors
        .iter()
        .filter(|e| e.id != leaver)
        .collect();
    neighbors.sort_by_key(|e| e.id);

    for candidate in neighbors
        .iter()
        .filter(|e| holdings.zone.can_merge(&e.zone).is_some())
    {
        match network
            .request(candidate.id, |reply| Command::Absorb {
                leaver,
                holdings: holdings.clone(),
                reply,
            })
            .await
        {
            Ok(_) => return Some(candidate.id),
            Err(e) => debug!(leaver = %leaver, candidate = %candidate.id, error = %e, "merge declined"),
        }
    }

    for candidate in &neighbors {
        let offer = match network
            .request(candidate.id, |reply| Command::ReserveHandoff { leaver, reply })
            .await
        {
            Ok(Some(offer)) => offer,
            Ok(None) => continue,
            Err(e) => {
                debug!(leaver = %leaver, candidate = %candidate.id, error = %e, "handoff declined");
                continue;
            }
        };

        let partner = match network
            .request(offer.partner.id, |reply| Command::Absorb {
                leaver: candidate.id,
                holdings: offer.candidate.clone(),
                reply,
            })
            .await
        {
            Ok(partner) => partner,
            Err(e) => {
                debug!(candidate = %candidate.id, partner = %offer.partner.id, error = %e, "partner declined");
                let _ = network.send(candidate.id, Command::Release).await;
                continue;
            }
        };

        if let Some(owner) = take_over(network, leaver, holdings, candidate.id, &offer, partner).await {
            return Some(owner);
        }
    }
    None
}

/// Last step of a hand-over: `candidate`, whose old zone `partner` has
/// absorbed, moves into the leaver's zone.
///
/// When the move fails the candidate's reservation is released and its
/// state decides what happens to the absorbed zone. A candidate that moved
/// anyway is the new owner. One still holding its old zone gets it back from
/// the partner. A dead one leaves it with the partner.
async fn take_over(
    network: &Network,
    leaver: PeerId,
    holdings: &Holdings,
    candidate: PeerId,
    offer: &HandoffOffer,
    partner: NeighborEntry,
) -> Option<PeerId> {
    let partner_id = partner.id;
    let err = match network
        .request(candidate, |reply| Command::TakeOver {
            leaver,
            holdings: holdings.clone(),
            partner,
            reply,
        })
        .await
    {
        Ok(()) => return Some(candidate),
        Err(e) => e,
    };
    warn!(leaver = %leaver, candidate = %candidate, error = %err, "take-over failed");

    let _ = network.send(candidate, Command::Release).await;
    let Ok(snapshot) = network.call(candidate, |reply| Command::Snapshot { reply }).await else {
        info!(candidate = %candidate, partner = %partner_id, "candidate gone, partner keeps its zone");
        return None;
    };
    match snapshot.zone {
        Some(zone) if zone == holdings.zone => Some(candidate),
        Some(zone) if zone == offer.candidate.zone => {
            let owner = NeighborEntry::new(candidate, zone);
            if let Err(e) = network
                .request(partner_id, |reply| Command::Cede { owner, reply })
                .await
            {
                warn!(candidate = %candidate, partner = %partner_id, error = %e, "absorbed zone not returned");
            }
            None
        }
        _ => None,
    }
}
