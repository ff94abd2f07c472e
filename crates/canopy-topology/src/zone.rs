//! Zones: axis-aligned boxes of coordinate space owned by a single peer.
//!
//! A zone is half-open on every dimension: it contains `lower[d]` and
//! excludes `upper[d]`. Two zones are neighbors when they share a boundary
//! hyperplane on exactly one dimension and their ranges overlap on every
//! other dimension.
//!
//! All operations here are pure. A failed precondition is reported as a
//! [`GeometryError`] and never leaves a partially updated value behind.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{GeometryError, Result};
use crate::{Coordinate, Element};

/// Side of a zone along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Toward the lower bound.
    Inferior,
    /// Toward the upper bound.
    Superior,
}

impl Direction {
    /// Both directions, inferior first.
    pub const ALL: [Self; 2] = [Self::Inferior, Self::Superior];

    /// The other side.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Inferior => Self::Superior,
            Self::Superior => Self::Inferior,
        }
    }

    /// Stable array index (inferior = 0, superior = 1).
    pub const fn index(self) -> usize {
        match self {
            Self::Inferior => 0,
            Self::Superior => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inferior => write!(f, "inferior"),
            Self::Superior => write!(f, "superior"),
        }
    }
}

/// Where another zone lies relative to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Adjacency {
    /// Dimension of the shared boundary.
    pub dimension: usize,
    /// Side of this zone the other one sits on.
    pub direction: Direction,
}

impl Adjacency {
    /// Create an adjacency.
    pub const fn new(dimension: usize, direction: Direction) -> Self {
        Self { dimension, direction }
    }

    /// The same adjacency seen from the other zone.
    pub const fn reversed(self) -> Self {
        Self {
            dimension: self.dimension,
            direction: self.direction.opposite(),
        }
    }
}

impl fmt::Display for Adjacency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.direction, self.dimension)
    }
}

/// The bounded domain that zones tile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawSpace"))]
pub struct Space {
    dimensions: usize,
    lower: Element,
    upper: Element,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawSpace {
    dimensions: usize,
    lower: Element,
    upper: Element,
}

#[cfg(feature = "serde")]
impl TryFrom<RawSpace> for Space {
    type Error = GeometryError;

    fn try_from(raw: RawSpace) -> Result<Self> {
        Self::new(raw.dimensions, raw.lower, raw.upper)
    }
}

impl Default for Space {
    fn default() -> Self {
        Self {
            dimensions: 3,
            lower: Element::new("0"),
            upper: Element::new("{"),
        }
    }
}

impl Space {
    /// Create a space with the same bounds on every dimension.
    pub fn new(dimensions: usize, lower: Element, upper: Element) -> Result<Self> {
        if dimensions == 0 {
            return Err(GeometryError::NoDimensions);
        }
        if lower >= upper {
            return Err(GeometryError::InvertedBounds { dimension: 0 });
        }
        Ok(Self {
            dimensions,
            lower,
            upper,
        })
    }

    /// Number of dimensions.
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Lower bound of every dimension (inclusive).
    pub fn lower(&self) -> &Element {
        &self.lower
    }

    /// Upper bound of every dimension (exclusive).
    pub fn upper(&self) -> &Element {
        &self.upper
    }

    /// The zone covering the whole space.
    pub fn zone(&self) -> Zone {
        Zone {
            lower: Coordinate::uniform(&self.lower, self.dimensions),
            upper: Coordinate::uniform(&self.upper, self.dimensions),
        }
    }

    /// Whether a coordinate lies inside the space.
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.dimensions() == self.dimensions
            && coordinate.iter().all(|e| &self.lower <= e && e < &self.upper)
    }

    /// Approximate volume of the whole space.
    pub fn volume(&self) -> f64 {
        self.zone().volume()
    }
}

/// An axis-aligned hyper-rectangle `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawZone"))]
pub struct Zone {
    lower: Coordinate,
    upper: Coordinate,
}

/// Decoded corners, validated by [`Zone::new`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawZone {
    lower: Coordinate,
    upper: Coordinate,
}

#[cfg(feature = "serde")]
impl TryFrom<RawZone> for Zone {
    type Error = GeometryError;

    fn try_from(raw: RawZone) -> Result<Self> {
        Self::new(raw.lower, raw.upper)
    }
}

impl Zone {
    /// Create a zone, checking that the corners agree on dimensionality and
    /// that no lower bound exceeds its upper bound.
    pub fn new(lower: Coordinate, upper: Coordinate) -> Result<Self> {
        if lower.dimensions() != upper.dimensions() {
            return Err(GeometryError::DimensionMismatch {
                expected: lower.dimensions(),
                actual: upper.dimensions(),
            });
        }
        if lower.dimensions() == 0 {
            return Err(GeometryError::NoDimensions);
        }
        if let Some(dimension) = (0..lower.dimensions()).find(|&d| lower[d] > upper[d]) {
            return Err(GeometryError::InvertedBounds { dimension });
        }
        Ok(Self { lower, upper })
    }

    /// Lower corner (inclusive).
    pub fn lower(&self) -> &Coordinate {
        &self.lower
    }

    /// Upper corner (exclusive).
    pub fn upper(&self) -> &Coordinate {
        &self.upper
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.lower.dimensions()
    }

    /// Where an element falls relative to this zone's range on a dimension:
    /// `Less` below it, `Equal` inside it, `Greater` at or above its upper bound.
    pub fn position(&self, dimension: usize, element: &Element) -> Ordering {
        if element >= &self.upper[dimension] {
            Ordering::Greater
        } else if element < &self.lower[dimension] {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }

    /// Whether the zone contains a point.
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.dimensions() == self.dimensions()
            && (0..self.dimensions()).all(|d| self.position(d, &coordinate[d]) == Ordering::Equal)
    }

    /// Whether the zone fully contains another zone.
    pub fn contains_zone(&self, other: &Zone) -> bool {
        other.dimensions() == self.dimensions()
            && (0..self.dimensions())
                .all(|d| self.lower[d] <= other.lower[d] && other.upper[d] <= self.upper[d])
    }

    /// Whether the ranges of both zones on `dimension` share an interior.
    pub fn overlaps(&self, other: &Zone, dimension: usize) -> bool {
        self.lower[dimension] < other.upper[dimension]
            && other.lower[dimension] < self.upper[dimension]
    }

    /// Whether the zones share any point.
    pub fn intersects(&self, other: &Zone) -> bool {
        other.dimensions() == self.dimensions()
            && (0..self.dimensions()).all(|d| self.overlaps(other, d))
    }

    /// Whether the zones touch on `dimension`, and on which side of this zone
    /// the other one lies.
    pub fn abuts(&self, other: &Zone, dimension: usize) -> Option<Direction> {
        if self.upper[dimension] == other.lower[dimension] {
            Some(Direction::Superior)
        } else if self.lower[dimension] == other.upper[dimension] {
            Some(Direction::Inferior)
        } else {
            None
        }
    }

    /// The adjacency of `other` relative to this zone, or `None` when the
    /// zones are not neighbors.
    pub fn neighbors(&self, other: &Zone) -> Option<Adjacency> {
        if other.dimensions() != self.dimensions() {
            return None;
        }

        let mut found = None;
        for d in 0..self.dimensions() {
            if let Some(direction) = self.abuts(other, d) {
                if found.is_some() {
                    return None;
                }
                found = Some(Adjacency::new(d, direction));
            } else if !self.overlaps(other, d) {
                return None;
            }
        }
        found
    }

    /// Split the zone in two halves at the midpoint of `dimension`.
    ///
    /// Returns `(low, high)`: `low` ends at the midpoint, `high` starts there.
    pub fn split(&self, dimension: usize) -> Result<(Zone, Zone)> {
        if dimension >= self.dimensions() {
            return Err(GeometryError::DimensionOutOfRange {
                dimension,
                dimensions: self.dimensions(),
            });
        }
        let lower = &self.lower[dimension];
        let upper = &self.upper[dimension];
        if lower >= upper {
            return Err(GeometryError::DegenerateSplit { dimension });
        }

        let middle = Element::middle(lower, upper);
        let low = Zone {
            lower: self.lower.clone(),
            upper: self.upper.with(dimension, middle.clone()),
        };
        let high = Zone {
            lower: self.lower.with(dimension, middle),
            upper: self.upper.clone(),
        };
        Ok((low, high))
    }

    /// The adjacency of `other` if both zones can be merged into one box:
    /// neighbors on one dimension and identical on all others.
    pub fn can_merge(&self, other: &Zone) -> Option<Adjacency> {
        let adjacency = self.neighbors(other)?;
        let identical = (0..self.dimensions())
            .filter(|&d| d != adjacency.dimension)
            .all(|d| self.lower[d] == other.lower[d] && self.upper[d] == other.upper[d]);
        identical.then_some(adjacency)
    }

    /// Merge with a neighbor into the union zone.
    pub fn merge(&self, other: &Zone) -> Result<Zone> {
        let adjacency = self
            .can_merge(other)
            .ok_or_else(|| GeometryError::NotMergeable {
                left: self.to_string(),
                right: other.to_string(),
            })?;

        let d = adjacency.dimension;
        let merged = match adjacency.direction {
            Direction::Superior => Zone {
                lower: self.lower.clone(),
                upper: self.upper.with(d, other.upper[d].clone()),
            },
            Direction::Inferior => Zone {
                lower: self.lower.with(d, other.lower[d].clone()),
                upper: self.upper.clone(),
            },
        };
        Ok(merged)
    }

    /// What is left of this zone once `part` is cut off one end of it, so
    /// that the result merges with `part` back into this zone.
    ///
    /// `None` unless `part` spans this zone on every dimension but one and
    /// shares a bound with it on that one.
    pub fn without(&self, part: &Zone) -> Option<Zone> {
        if part == self || !self.contains_zone(part) {
            return None;
        }
        let differing: Vec<usize> = (0..self.dimensions())
            .filter(|&d| self.lower[d] != part.lower[d] || self.upper[d] != part.upper[d])
            .collect();
        let d = match differing.as_slice() {
            [d] => *d,
            _ => return None,
        };
        if part.lower[d] == self.lower[d] {
            Some(Zone {
                lower: self.lower.with(d, part.upper[d].clone()),
                upper: self.upper.clone(),
            })
        } else if part.upper[d] == self.upper[d] {
            Some(Zone {
                lower: self.lower.clone(),
                upper: self.upper.with(d, part.lower[d].clone()),
            })
        } else {
            None
        }
    }

    /// Approximate width of the zone on a dimension.
    pub fn extent(&self, dimension: usize) -> f64 {
        self.upper[dimension].to_f64() - self.lower[dimension].to_f64()
    }

    /// Approximate volume.
    pub fn volume(&self) -> f64 {
        (0..self.dimensions()).map(|d| self.extent(d)).product()
    }

    /// Approximate Manhattan distance from the zone to a point; zero inside.
    pub fn distance_to(&self, coordinate: &Coordinate) -> f64 {
        (0..self.dimensions().min(coordinate.dimensions()))
            .map(|d| {
                let e = coordinate[d].to_f64();
                match self.position(d, &coordinate[d]) {
                    Ordering::Less => self.lower[d].to_f64() - e,
                    Ordering::Greater => e - self.upper[d].to_f64(),
                    Ordering::Equal => 0.0,
                }
            })
            .sum()
    }

    /// Number of dimensions on which the zone's range contains the point's
    /// element.
    pub fn matching_dimensions(&self, coordinate: &Coordinate) -> usize {
        (0..self.dimensions().min(coordinate.dimensions()))
            .filter(|&d| self.position(d, &coordinate[d]) == Ordering::Equal)
            .count()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for d in 0..self.dimensions() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{}, {})", self.lower[d], self.upper[d])?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(lower: &[&str], upper: &[&str]) -> Zone {
        Zone::new(Coordinate::from_strs(lower), Coordinate::from_strs(upper)).unwrap()
    }

    fn square() -> Zone {
        zone(&["A", "A"], &["Z", "Z"])
    }

    #[test]
    fn new_rejects_bad_corners() {
        assert_eq!(
            Zone::new(Coordinate::from_strs(&["A"]), Coordinate::from_strs(&["Z", "Z"])),
            Err(GeometryError::DimensionMismatch { expected: 1, actual: 2 })
        );
        assert_eq!(
            Zone::new(Coordinate::from_strs(&["A", "Q"]), Coordinate::from_strs(&["Z", "B"])),
            Err(GeometryError::InvertedBounds { dimension: 1 })
        );
    }

    #[test]
    fn containment_is_half_open() {
        let z = square();
        assert!(z.contains(&Coordinate::from_strs(&["A", "A"])));
        assert!(z.contains(&Coordinate::from_strs(&["M", "Y"])));
        assert!(!z.contains(&Coordinate::from_strs(&["Z", "M"])));
        assert!(!z.contains(&Coordinate::from_strs(&["M", "0"])));
        assert_eq!(z.position(0, &Element::new("0")), Ordering::Less);
        assert_eq!(z.position(0, &Element::new("Z")), Ordering::Greater);
    }

    #[test]
    fn split_halves_one_dimension() {
        let z = square();
        let m = Element::middle(&Element::new("A"), &Element::new("Z"));
        let (low, high) = z.split(0).unwrap();

        assert_eq!(low.lower(), z.lower());
        assert_eq!(low.upper()[0], m);
        assert_eq!(low.upper()[1], Element::new("Z"));
        assert_eq!(high.lower()[0], m);
        assert_eq!(high.upper(), z.upper());

        assert_eq!(low.neighbors(&high), Some(Adjacency::new(0, Direction::Superior)));
        assert_eq!(high.neighbors(&low), Some(Adjacency::new(0, Direction::Inferior)));
        assert!(!low.intersects(&high));
    }

    #[test]
    fn split_rejects_bad_dimension() {
        assert_eq!(
            square().split(2),
            Err(GeometryError::DimensionOutOfRange { dimension: 2, dimensions: 2 })
        );
        let flat = zone(&["A", "C"], &["Z", "C"]);
        assert_eq!(flat.split(1), Err(GeometryError::DegenerateSplit { dimension: 1 }));
    }

    #[test]
    fn merge_restores_split() {
        let z = square();
        for d in 0..2 {
            let (low, high) = z.split(d).unwrap();
            assert_eq!(low.merge(&high).unwrap(), z);
            assert_eq!(high.merge(&low).unwrap(), z);
        }
    }

    #[test]
    fn without_undoes_merge() {
        let z = square();
        for d in 0..2 {
            let (low, high) = z.split(d).unwrap();
            assert_eq!(z.without(&low), Some(high.clone()));
            assert_eq!(z.without(&high), Some(low.clone()));
        }
        let (left, right) = z.split(0).unwrap();
        let (corner, _) = right.split(1).unwrap();
        assert_eq!(z.without(&corner), None);
        assert_eq!(z.without(&z), None);
        assert_eq!(left.without(&right), None);
    }

    #[test]
    fn partial_overlap_is_adjacent_but_not_mergeable() {
        let (left, right) = square().split(0).unwrap();
        let (right_low, _right_high) = right.split(1).unwrap();

        assert_eq!(
            left.neighbors(&right_low),
            Some(Adjacency::new(0, Direction::Superior))
        );
        assert_eq!(left.can_merge(&right_low), None);
        assert!(matches!(
            left.merge(&right_low),
            Err(GeometryError::NotMergeable { .. })
        ));
    }

    #[test]
    fn corner_contact_is_not_adjacency() {
        let (left, right) = square().split(0).unwrap();
        let (left_low, _) = left.split(1).unwrap();
        let (_, right_high) = right.split(1).unwrap();
        assert_eq!(left_low.neighbors(&right_high), None);
        assert_eq!(right_high.neighbors(&left_low), None);
    }

    #[test]
    fn distant_zones_are_not_neighbors() {
        let a = zone(&["A", "A"], &["C", "C"]);
        let b = zone(&["D", "A"], &["F", "C"]);
        assert_eq!(a.neighbors(&b), None);
        assert_eq!(a.abuts(&b, 0), None);
    }

    #[test]
    fn contains_zone() {
        let z = square();
        let (low, high) = z.split(1).unwrap();
        assert!(z.contains_zone(&low));
        assert!(z.contains_zone(&high));
        assert!(!low.contains_zone(&z));
    }

    #[test]
    fn distance_and_matching_dimensions() {
        let (low, _) = square().split(0).unwrap();
        let inside = Coordinate::from_strs(&["B", "B"]);
        let outside = Coordinate::from_strs(&["Y", "B"]);
        assert_eq!(low.distance_to(&inside), 0.0);
        assert!(low.distance_to(&outside) > 0.0);
        assert_eq!(low.matching_dimensions(&outside), 1);
        assert_eq!(low.matching_dimensions(&inside), 2);
    }

    #[test]
    fn space_zone_covers_domain() {
        let space = Space::default();
        let full = space.zone();
        assert_eq!(full.dimensions(), 3);
        assert!(full.contains(&Coordinate::from_strs(&["0", "a", "z"])));
        assert!(!space.contains(&Coordinate::from_strs(&["0", "a", "{"])));
        assert!(space.volume() > 0.0);
    }

    #[test]
    fn space_rejects_empty_domain() {
        assert_eq!(
            Space::new(0, Element::new("A"), Element::new("Z")),
            Err(GeometryError::NoDimensions)
        );
        assert_eq!(
            Space::new(2, Element::new("Z"), Element::new("A")),
            Err(GeometryError::InvertedBounds { dimension: 0 })
        );
    }

    #[test]
    fn display_lists_ranges() {
        assert_eq!(square().to_string(), "[[A, Z), [A, Z)]");
        assert_eq!(Adjacency::new(1, Direction::Inferior).to_string(), "inferior@1");
    }
}
