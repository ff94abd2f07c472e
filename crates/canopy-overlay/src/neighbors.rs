//! Neighbor tables.
//!
//! Every peer indexes its geometric neighbors by `(dimension, direction)`.
//! The zones cached here are advisory: right after a remote split or merge
//! they may be stale until the owner's next refresh reaches us. Placement is
//! always recomputed from geometry ([`NeighborTable::insert_adjacent`]), so a
//! stale entry is either corrected or dropped, never misfiled.

use std::collections::BTreeMap;

use canopy_topology::{Adjacency, Direction, Zone};
use serde::{Deserialize, Serialize};

use crate::PeerId;

/// A neighbor and its last known zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    /// The neighbor's id.
    pub id: PeerId,
    /// The zone the neighbor last advertised.
    pub zone: Zone,
}

impl NeighborEntry {
    /// Create an entry.
    pub fn new(id: PeerId, zone: Zone) -> Self {
        Self { id, zone }
    }
}

type Slot = BTreeMap<PeerId, NeighborEntry>;

/// Per-peer index of neighbors keyed by dimension and direction.
///
/// A peer id occupies at most one slot. Slots are ordered maps so iteration
/// and encoding are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborTable {
    slots: Vec<[Slot; 2]>,
}

impl NeighborTable {
    /// Create an empty table for a space of `dimensions` dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            slots: (0..dimensions).map(|_| [Slot::new(), Slot::new()]).collect(),
        }
    }

    /// Build a table holding every entry adjacent to `own`.
    pub fn from_adjacent<I>(own: &Zone, entries: I) -> Self
    where
        I: IntoIterator<Item = NeighborEntry>,
    {
        let mut table = Self::new(own.dimensions());
        for entry in entries {
            table.insert_adjacent(entry, own);
        }
        table
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.slots.len()
    }

    /// Add an entry at an explicit slot, moving it if already present elsewhere.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is out of range.
    pub fn add(&mut self, entry: NeighborEntry, dimension: usize, direction: Direction) {
        self.remove(&entry.id);
        self.slots[dimension][direction.index()].insert(entry.id, entry);
    }

    /// Merge every entry of `other` into this table at the same slots.
    pub fn add_all(&mut self, other: &NeighborTable) {
        for (adjacency, entry) in other.iter() {
            self.add(entry.clone(), adjacency.dimension, adjacency.direction);
        }
    }

    /// Place an entry where geometry says it belongs relative to `own`.
    ///
    /// Returns the slot used, or `None` (and removes any previous entry for
    /// the id) if the zones are not adjacent.
    pub fn insert_adjacent(&mut self, entry: NeighborEntry, own: &Zone) -> Option<Adjacency> {
        match own.neighbors(&entry.zone) {
            Some(adjacency) => {
                self.add(entry, adjacency.dimension, adjacency.direction);
                Some(adjacency)
            }
            None => {
                self.remove(&entry.id);
                None
            }
        }
    }

    /// Drop entries no longer adjacent to `own` and re-slot the rest.
    ///
    /// Returns the ids that were dropped.
    pub fn retain_adjacent(&mut self, own: &Zone) -> Vec<PeerId> {
        let entries: Vec<NeighborEntry> = self.entries().cloned().collect();
        let mut dropped = Vec::new();
        for entry in entries {
            let id = entry.id;
            if self.insert_adjacent(entry, own).is_none() {
                dropped.push(id);
            }
        }
        dropped
    }

    /// Get the entry for a peer.
    pub fn get(&self, id: &PeerId) -> Option<&NeighborEntry> {
        self.slots
            .iter()
            .flat_map(|pair| pair.iter())
            .find_map(|slot| slot.get(id))
    }

    /// Slot of a peer.
    pub fn find(&self, id: &PeerId) -> Option<Adjacency> {
        self.slots.iter().enumerate().find_map(|(dimension, pair)| {
            Direction::ALL
                .into_iter()
                .find(|dir| pair[dir.index()].contains_key(id))
                .map(|direction| Adjacency::new(dimension, direction))
        })
    }

    /// Dimension a peer is filed under.
    pub fn find_dimension(&self, id: &PeerId) -> Option<usize> {
        self.find(id).map(|a| a.dimension)
    }

    /// Direction a peer is filed under.
    pub fn find_direction(&self, id: &PeerId) -> Option<Direction> {
        self.find(id).map(|a| a.direction)
    }

    /// Whether the peer is anywhere in the table.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.find(id).is_some()
    }

    /// Whether the peer is filed at a specific slot.
    pub fn contains_at(&self, id: &PeerId, dimension: usize, direction: Direction) -> bool {
        self.slots
            .get(dimension)
            .is_some_and(|pair| pair[direction.index()].contains_key(id))
    }

    /// Remove a peer from whichever slot holds it.
    pub fn remove(&mut self, id: &PeerId) -> Option<NeighborEntry> {
        self.slots
            .iter_mut()
            .flat_map(|pair| pair.iter_mut())
            .find_map(|slot| slot.remove(id))
    }

    /// Remove a peer only if it is filed at a specific slot.
    pub fn remove_at(
        &mut self,
        id: &PeerId,
        dimension: usize,
        direction: Direction,
    ) -> Option<NeighborEntry> {
        self.slots
            .get_mut(dimension)
            .and_then(|pair| pair[direction.index()].remove(id))
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        for pair in &mut self.slots {
            pair[0].clear();
            pair[1].clear();
        }
    }

    /// Refresh the cached zone of a known neighbor without moving it.
    ///
    /// Returns false if the peer is unknown.
    pub fn update_zone(&mut self, id: &PeerId, zone: Zone) -> bool {
        for slot in self.slots.iter_mut().flat_map(|pair| pair.iter_mut()) {
            if let Some(entry) = slot.get_mut(id) {
                entry.zone = zone;
                return true;
            }
        }
        false
    }

    /// Entries filed at one slot.
    pub fn at(&self, dimension: usize, direction: Direction) -> impl Iterator<Item = &NeighborEntry> {
        self.slots
            .get(dimension)
            .into_iter()
            .flat_map(move |pair| pair[direction.index()].values())
    }

    /// Every entry with its slot.
    pub fn iter(&self) -> impl Iterator<Item = (Adjacency, &NeighborEntry)> {
        self.slots.iter().enumerate().flat_map(|(dimension, pair)| {
            Direction::ALL.into_iter().flat_map(move |direction| {
                pair[direction.index()]
                    .values()
                    .map(move |entry| (Adjacency::new(dimension, direction), entry))
            })
        })
    }

    /// Every entry.
    pub fn entries(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.iter().map(|(_, entry)| entry)
    }

    /// Every neighbor id, in slot order.
    pub fn ids(&self) -> Vec<PeerId> {
        self.entries().map(|e| e.id).collect()
    }

    /// Number of neighbors.
    pub fn len(&self) -> usize {
        self.slots.iter().map(|pair| pair[0].len() + pair[1].len()).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Neighbors whose cached zone can merge with `zone`, lowest id first.
    pub fn mergeable_with(&self, zone: &Zone) -> Vec<&NeighborEntry> {
        let mut candidates: Vec<_> = self
            .entries()
            .filter(|e| zone.can_merge(&e.zone).is_some())
            .collect();
        candidates.sort_by_key(|e| e.id);
        candidates
    }
}
