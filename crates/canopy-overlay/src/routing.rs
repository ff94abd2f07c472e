//! Per-hop routing decisions.
//!
//! Stateless functions evaluated by the peer currently holding a message,
//! using nothing but its own zone and neighbor table.

use std::cmp::Ordering;

use canopy_topology::{Adjacency, Constraint, Coordinate, Direction, Zone};

use crate::{NeighborEntry, NeighborTable, PeerId};

/// Outcome of one unicast routing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicastStep {
    /// The local zone contains the target.
    Arrived,
    /// Forward to this neighbor.
    Forward(PeerId),
    /// No neighbor makes progress toward the target.
    DeadEnd,
}

/// The first dimension on which `zone` misses `target`, and which side the
/// target lies on. `None` when the zone contains the target.
pub fn first_unsatisfied(zone: &Zone, target: &Coordinate) -> Option<Adjacency> {
    (0..zone.dimensions()).find_map(|d| match zone.position(d, &target[d]) {
        Ordering::Less => Some(Adjacency::new(d, Direction::Inferior)),
        Ordering::Greater => Some(Adjacency::new(d, Direction::Superior)),
        Ordering::Equal => None,
    })
}

/// Most dimensions containing the target first, then closest, then lowest id.
fn rank(target: &Coordinate, a: &NeighborEntry, b: &NeighborEntry) -> Ordering {
    b.zone
        .matching_dimensions(target)
        .cmp(&a.zone.matching_dimensions(target))
        .then_with(|| a.zone.distance_to(target).total_cmp(&b.zone.distance_to(target)))
        .then_with(|| a.id.cmp(&b.id))
}

/// Choose the next hop toward `target`.
///
/// Dimensions are resolved in order. The first dimension the local zone
/// misses fixes the slot to forward through; within it, neighbors that
/// already contain the target on every earlier dimension are preferred, so
/// progress made on earlier dimensions is never undone. Neighbors listed in
/// `excluded` (known unreachable) are skipped. If the slot is empty, any
/// neighbor strictly closer to the target than the local zone is used.
pub fn unicast_step(
    zone: &Zone,
    table: &NeighborTable,
    target: &Coordinate,
    excluded: &[PeerId],
) -> UnicastStep {
    let Some(miss) = first_unsatisfied(zone, target) else {
        return UnicastStep::Arrived;
    };

    let candidates: Vec<&NeighborEntry> = table
        .at(miss.dimension, miss.direction)
        .filter(|e| !excluded.contains(&e.id))
        .collect();
    let aligned: Vec<&NeighborEntry> = candidates
        .iter()
        .copied()
        .filter(|e| {
            (0..miss.dimension).all(|d| e.zone.position(d, &target[d]) == Ordering::Equal)
        })
        .collect();
    let pool = if aligned.is_empty() { candidates } else { aligned };

    if let Some(best) = pool.into_iter().min_by(|a, b| rank(target, a, b)) {
        return UnicastStep::Forward(best.id);
    }

    let own_matching = zone.matching_dimensions(target);
    let own_distance = zone.distance_to(target);
    table
        .entries()
        .filter(|e| !excluded.contains(&e.id))
        .filter(|e| {
            let matching = e.zone.matching_dimensions(target);
            matching > own_matching
                || (matching == own_matching && e.zone.distance_to(target) < own_distance)
        })
        .min_by(|a, b| rank(target, a, b))
        .map_or(UnicastStep::DeadEnd, |e| UnicastStep::Forward(e.id))
}

/// Neighbors a qualifying peer forwards a constrained multicast to: every
/// neighbor whose cached zone satisfies the constraint, except the sender.
pub fn multicast_fanout(
    table: &NeighborTable,
    constraint: &Constraint,
    from: Option<&PeerId>,
) -> Vec<PeerId> {
    table
        .entries()
        .filter(|e| Some(&e.id) != from)
        .filter(|e| constraint.matches_zone(&e.zone))
        .map(|e| e.id)
        .collect()
}
