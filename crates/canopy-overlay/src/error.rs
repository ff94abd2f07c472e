//! Error types for canopy-overlay.

use canopy_topology::GeometryError;
use thiserror::Error;

use crate::{PeerId, PeerStatus};

/// Result type for canopy-overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Errors raised by a peer's local state transitions.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// A split or merge precondition does not hold.
    #[error("geometry precondition: {0}")]
    Geometry(#[from] GeometryError),

    /// The peer is in the middle of another join, leave or take-over.
    #[error("peer busy with pending {pending}")]
    Busy { pending: &'static str },

    /// The peer is in the wrong lifecycle state for the operation.
    #[error("invalid peer state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: PeerStatus,
    },

    /// A follow-up message arrived for an operation that is not pending.
    #[error("no pending {operation} for peer {peer}")]
    NoPendingOperation {
        operation: &'static str,
        peer: PeerId,
    },

    /// A neighbor already claims part of the zone offered for absorption.
    #[error("zone {zone} already claimed by {owner}")]
    AlreadyClaimed { zone: String, owner: PeerId },

    /// Wire encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}
