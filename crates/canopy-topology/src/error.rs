//! Error types for canopy-topology.

use thiserror::Error;

/// Result type for geometry operations.
pub type Result<T> = std::result::Result<T, GeometryError>;

/// Structural precondition violations raised by zone geometry.
///
/// These are never transient: the caller attempted an operation on values
/// that cannot satisfy it and must refresh its view before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// Two values disagree on the number of dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A dimension index is outside the coordinate space.
    #[error("dimension {dimension} out of range for a {dimensions}-dimensional space")]
    DimensionOutOfRange { dimension: usize, dimensions: usize },

    /// A zone lower bound exceeds its upper bound.
    #[error("inverted bounds on dimension {dimension}")]
    InvertedBounds { dimension: usize },

    /// The zone has an empty range on the split dimension.
    #[error("cannot split empty range on dimension {dimension}")]
    DegenerateSplit { dimension: usize },

    /// The zones do not differ on exactly one contiguous dimension.
    #[error("zones {left} and {right} cannot be merged")]
    NotMergeable { left: String, right: String },

    /// A raw digit is not a valid element digit.
    #[error("invalid element digit {0:#x}")]
    InvalidDigit(u32),

    /// A space needs at least one dimension.
    #[error("a coordinate space needs at least one dimension")]
    NoDimensions,
}
