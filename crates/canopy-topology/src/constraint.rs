//! Coordinate-shaped constraints for constrained multicast.
//!
//! A constraint holds one [`Bound`] per dimension. A zone qualifies when every
//! bound intersects the zone's range on that dimension, i.e. when the zone
//! may hold data matching the constraint.

use std::cmp::Ordering;
use std::fmt;

use crate::{Coordinate, Element, Zone};

/// Restriction on a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bound {
    /// Unconstrained.
    Any,
    /// Exactly this element.
    Point(Element),
    /// Inclusive range `[low, high]`.
    Range { low: Element, high: Element },
}

impl Bound {
    /// Whether the bound intersects the half-open range `[lower, upper)`.
    pub fn intersects(&self, lower: &Element, upper: &Element) -> bool {
        match self {
            Self::Any => true,
            Self::Point(e) => lower <= e && e < upper,
            Self::Range { low, high } => low < upper && high >= lower,
        }
    }

    /// Whether an element satisfies the bound.
    pub fn matches(&self, element: &Element) -> bool {
        match self {
            Self::Any => true,
            Self::Point(e) => e == element,
            Self::Range { low, high } => low <= element && element <= high,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Point(e) => write!(f, "{e}"),
            Self::Range { low, high } => write!(f, "{low}..={high}"),
        }
    }
}

/// A per-dimension filter over the coordinate space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraint {
    bounds: Vec<Bound>,
}

impl Constraint {
    /// A constraint every zone satisfies.
    pub fn any(dimensions: usize) -> Self {
        Self {
            bounds: vec![Bound::Any; dimensions],
        }
    }

    /// A constraint satisfied only by the zone containing `coordinate`.
    pub fn point(coordinate: &Coordinate) -> Self {
        Self {
            bounds: coordinate.iter().cloned().map(Bound::Point).collect(),
        }
    }

    /// Create from explicit bounds.
    pub fn new(bounds: Vec<Bound>) -> Self {
        Self { bounds }
    }

    /// Replace the bound on one dimension.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is out of range.
    #[must_use]
    pub fn with(mut self, dimension: usize, bound: Bound) -> Self {
        self.bounds[dimension] = bound;
        self
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    /// The bounds in dimension order.
    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    /// Whether the constraint leaves every dimension open.
    pub fn is_unconstrained(&self) -> bool {
        self.bounds.iter().all(|b| matches!(b, Bound::Any))
    }

    /// Whether a zone may hold matching coordinates.
    pub fn matches_zone(&self, zone: &Zone) -> bool {
        self.dimensions() == zone.dimensions()
            && self
                .bounds
                .iter()
                .enumerate()
                .all(|(d, b)| b.intersects(&zone.lower()[d], &zone.upper()[d]))
    }

    /// Whether a coordinate satisfies the constraint.
    pub fn matches(&self, coordinate: &Coordinate) -> bool {
        self.dimensions() == coordinate.dimensions()
            && self.bounds.iter().zip(coordinate.iter()).all(|(b, e)| b.matches(e))
    }

    /// A point of the constrained region as close as possible to `zone`.
    ///
    /// Dimensions the zone already satisfies resolve to a point inside the
    /// zone, so greedy routing toward the result only moves along dimensions
    /// the zone violates.
    pub fn target_from(&self, zone: &Zone) -> Coordinate {
        let elements = self
            .bounds
            .iter()
            .enumerate()
            .map(|(d, bound)| {
                let lower = &zone.lower()[d];
                match bound {
                    Bound::Any => lower.clone(),
                    Bound::Point(e) => e.clone(),
                    Bound::Range { low, high } => match zone.position(d, low) {
                        // Range starts inside or beyond the zone.
                        Ordering::Equal | Ordering::Greater => low.clone(),
                        Ordering::Less if high >= lower => lower.clone(),
                        Ordering::Less => high.clone(),
                    },
                }
            })
            .collect();
        Coordinate::new(elements)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, b) in self.bounds.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{b}")?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(lower: &[&str], upper: &[&str]) -> Zone {
        Zone::new(Coordinate::from_strs(lower), Coordinate::from_strs(upper)).unwrap()
    }

    fn subject(value: &str) -> Constraint {
        Constraint::any(3).with(0, Bound::Point(Element::new(value)))
    }

    #[test]
    fn any_matches_every_zone() {
        let c = Constraint::any(2);
        assert!(c.is_unconstrained());
        assert!(c.matches_zone(&zone(&["a", "a"], &["b", "b"])));
        assert!(c.matches(&Coordinate::from_strs(&["q", "r"])));
    }

    #[test]
    fn point_bound_uses_half_open_ranges() {
        let c = subject("k");
        assert!(c.matches_zone(&zone(&["a", "a", "a"], &["m", "z", "z"])));
        assert!(c.matches_zone(&zone(&["k", "a", "a"], &["m", "z", "z"])));
        assert!(!c.matches_zone(&zone(&["a", "a", "a"], &["k", "z", "z"])));
        assert!(!c.is_unconstrained());
    }

    #[test]
    fn range_bound_is_inclusive() {
        let c = Constraint::any(1).with(
            0,
            Bound::Range {
                low: Element::new("c"),
                high: Element::new("f"),
            },
        );
        assert!(c.matches_zone(&zone(&["f"], &["h"])));
        assert!(!c.matches_zone(&zone(&["a"], &["c"])));
        assert!(c.matches_zone(&zone(&["a"], &["c\u{1}"])));
        assert!(c.matches(&Coordinate::from_strs(&["f"])));
        assert!(!c.matches(&Coordinate::from_strs(&["g"])));
    }

    #[test]
    fn dimension_mismatch_never_matches() {
        let c = Constraint::any(2);
        assert!(!c.matches_zone(&zone(&["a"], &["b"])));
    }

    #[test]
    fn target_stays_inside_zone_on_satisfied_dimensions() {
        let z = zone(&["a", "a", "a"], &["m", "m", "m"]);
        let target = subject("x").target_from(&z);
        assert_eq!(target[0], Element::new("x"));
        assert_eq!(target[1], Element::new("a"));
        assert_eq!(target[2], Element::new("a"));
        assert!(subject("x").matches(&target));
    }

    #[test]
    fn target_clamps_ranges() {
        let z = zone(&["m"], &["p"]);
        let range = |lo: &str, hi: &str| {
            Constraint::new(vec![Bound::Range {
                low: Element::new(lo),
                high: Element::new(hi),
            }])
        };
        assert_eq!(range("a", "n").target_from(&z)[0], Element::new("m"));
        assert_eq!(range("a", "c").target_from(&z)[0], Element::new("c"));
        assert_eq!(range("x", "z").target_from(&z)[0], Element::new("x"));
        assert_eq!(range("n", "o").target_from(&z)[0], Element::new("n"));
    }

    #[test]
    fn display() {
        assert_eq!(subject("k").to_string(), "<k, *, *>");
    }
}
