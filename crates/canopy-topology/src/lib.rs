//! Canopy Zone Geometry
//!
//! Geometric model of a content-addressable overlay: a bounded,
//! multi-dimensional coordinate space tiled by axis-aligned zones, one zone
//! per peer.
//!
//! # Model
//!
//! - [`Element`]: an exact position on one axis. Strings map onto the axis in
//!   lexicographic order and every range has an exact midpoint.
//! - [`Coordinate`]: one element per dimension.
//! - [`Zone`]: a half-open box `[lower, upper)` supporting `split`, `merge`,
//!   `neighbors` and `contains`.
//! - [`Space`]: the domain the zones tile.
//! - [`Constraint`]: per-dimension point, range or wildcard filters used to
//!   select every zone that may hold matching data.
//!
//! # Invariants
//!
//! - `merge(split(z, d))` is `z` for every splittable zone and dimension.
//! - Adjacency is symmetric: if `a.neighbors(b)` is `(d, dir)` then
//!   `b.neighbors(a)` is `(d, dir.opposite())`.
//! - The two halves of a split never intersect and are always non-empty.

mod constraint;
mod coordinate;
mod element;
mod error;
mod zone;

pub use constraint::{Bound, Constraint};
pub use coordinate::Coordinate;
pub use element::{Element, RADIX};
pub use error::{GeometryError, Result};
pub use zone::{Adjacency, Direction, Space, Zone};
