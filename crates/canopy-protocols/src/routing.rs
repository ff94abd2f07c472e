//! Routed requests and their completion.
//!
//! # Unicast
//!
//! A [`UnicastRequest`] is moved from mailbox to mailbox, carrying the
//! caller's reply channel with it. The peer whose zone contains the target
//! answers directly; intermediate hops never reply.
//!
//! # Multicast
//!
//! Anycast and broadcast copies fan out over an unknown number of peers, so
//! completion is counted explicitly. Every peer that receives a copy sends
//! exactly one [`Report`] to the caller, stating how many copies it forwarded
//! in turn. The caller starts with one outstanding copy; each report retires
//! one and adds the copies it announces. Zero outstanding means every branch
//! has finished. A report is always sent before the copies it announces, so
//! the count can never reach zero early.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use canopy_overlay::{PeerId, RequestId};
use canopy_topology::{Constraint, Coordinate, Zone};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, Result, RoutingFailure};

/// Where a unicast request ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOutcome {
    /// The peer whose zone contains the target.
    pub owner: PeerId,
    /// That peer's zone.
    pub zone: Zone,
    /// Forwards taken to get there.
    pub hops: u32,
}

pub(crate) struct UnicastRequest {
    pub target: Coordinate,
    pub hops: u32,
    pub reply: oneshot::Sender<Result<RouteOutcome>>,
}

impl UnicastRequest {
    pub fn fail(self, reason: RoutingFailure) {
        let _ = self.reply.send(Err(Error::RoutingIncomplete {
            hops: self.hops,
            reason,
        }));
    }
}

/// Application callback run on every peer whose zone satisfies an anycast
/// constraint.
///
/// The returned payload, if any, is handed back to the caller with the hit.
pub trait AnycastHandler: Send + Sync {
    fn on_match(&self, peer: PeerId, zone: &Zone) -> Option<Vec<u8>>;
}

impl<F> AnycastHandler for F
where
    F: Fn(PeerId, &Zone) -> Option<Vec<u8>> + Send + Sync,
{
    fn on_match(&self, peer: PeerId, zone: &Zone) -> Option<Vec<u8>> {
        self(peer, zone)
    }
}

/// What a qualifying peer does with a multicast copy.
#[derive(Clone)]
pub(crate) enum Action {
    Invoke(Arc<dyn AnycastHandler>),
    Deliver(Arc<Vec<u8>>),
}

pub(crate) struct MulticastRequest {
    pub id: RequestId,
    pub constraint: Constraint,
    pub action: Action,
    pub from: Option<PeerId>,
    pub hops: u32,
    pub reports: mpsc::UnboundedSender<Report>,
}

impl MulticastRequest {
    /// A copy for the next hop.
    pub fn forward(&self, from: PeerId) -> Self {
        Self {
            id: self.id,
            constraint: self.constraint.clone(),
            action: self.action.clone(),
            from: Some(from),
            hops: self.hops + 1,
            reports: self.reports.clone(),
        }
    }

    pub fn report(&self, peer: PeerId, kind: ReportKind, spawned: usize) {
        let _ = self.reports.send(Report {
            peer,
            hops: self.hops,
            kind,
            spawned,
        });
    }
}

#[derive(Debug)]
pub(crate) struct Report {
    pub peer: PeerId,
    pub hops: u32,
    pub kind: ReportKind,
    pub spawned: usize,
}

#[derive(Debug)]
pub(crate) enum ReportKind {
    /// The peer qualified and ran the action.
    Hit { zone: Zone, payload: Option<Vec<u8>> },
    /// The peer passed the copy on toward the constrained region.
    Relay,
    /// The peer had already seen the request.
    Duplicate,
    /// A copy was lost; stands in for the copy it replaces.
    Dropped(RoutingFailure),
    /// A copy could not be handed to this neighbor. Sent by the peer that
    /// tried, together with the number of replacement copies it sent around
    /// the neighbor.
    Unreachable(PeerId),
}

/// One qualifying peer of a multicast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnycastHit {
    pub peer: PeerId,
    pub zone: Zone,
    pub hops: u32,
    pub payload: Option<Vec<u8>>,
}

/// Aggregate result of an anycast or broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnycastOutcome {
    /// Every qualifying peer, in report order.
    pub hits: Vec<AnycastHit>,
    /// Non-qualifying peers that relayed a copy.
    pub relays: usize,
    /// Copies suppressed as duplicates.
    pub duplicates: usize,
    /// Neighbors found dead on the way; their zones may have been missed
    /// while under repair.
    pub unreachable: Vec<PeerId>,
}

impl AnycastOutcome {
    /// Ids of the qualifying peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.hits.iter().map(|h| h.peer).collect();
        peers.sort();
        peers
    }

    /// Largest hop count among the hits.
    pub fn max_hops(&self) -> u32 {
        self.hits.iter().map(|h| h.hops).max().unwrap_or(0)
    }
}

impl fmt::Display for AnycastOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} relays, {} duplicates",
            self.hits.len(),
            self.relays,
            self.duplicates
        )?;
        if !self.unreachable.is_empty() {
            write!(f, ", {} unreachable", self.unreachable.len())?;
        }
        Ok(())
    }
}

/// Wait for every branch of a multicast to report.
pub(crate) async fn collect(
    request: RequestId,
    mut reports: mpsc::UnboundedReceiver<Report>,
    timeout: Duration,
) -> Result<AnycastOutcome> {
    let mut outcome = AnycastOutcome::default();
    let mut max_hops = 0;

    let counted = tokio::time::timeout(timeout, async {
        let mut outstanding: usize = 1;
        while let Some(report) = reports.recv().await {
            outstanding = outstanding.saturating_sub(1) + report.spawned;
            max_hops = max_hops.max(report.hops);
            match report.kind {
                ReportKind::Hit { zone, payload } => outcome.hits.push(AnycastHit {
                    peer: report.peer,
                    zone,
                    hops: report.hops,
                    payload,
                }),
                ReportKind::Relay => outcome.relays += 1,
                ReportKind::Duplicate => outcome.duplicates += 1,
                ReportKind::Unreachable(peer) => {
                    if !outcome.unreachable.contains(&peer) {
                        outcome.unreachable.push(peer);
                    }
                }
                ReportKind::Dropped(reason) => return Err(reason),
            }
            if outstanding == 0 {
                return Ok(());
            }
        }
        Err(RoutingFailure::Lost)
    })
    .await;

    match counted {
        Ok(Ok(())) => {
            debug!(request = %request, outcome = %outcome, "multicast complete");
            Ok(outcome)
        }
        Ok(Err(reason)) => Err(Error::RoutingIncomplete {
            hops: max_hops,
            reason,
        }),
        Err(_) => Err(Error::RoutingIncomplete {
            hops: max_hops,
            reason: RoutingFailure::Timeout(timeout),
        }),
    }
}
