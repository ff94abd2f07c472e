//! Error types for canopy-protocols.

use std::fmt;
use std::time::Duration;

use canopy_overlay::{OverlayError, PeerId};
use canopy_topology::GeometryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for canopy-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a routed request did not reach its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingFailure {
    /// The hop budget ran out.
    TtlExceeded { max_hops: u32 },
    /// No neighbor makes progress toward the target.
    DeadEnd,
    /// The request reached a peer that holds no zone.
    NotJoined,
    /// A neighbor needed for the request could not be reached.
    Unreachable(PeerId),
    /// The target lies outside the coordinate domain.
    OutsideDomain,
    /// The caller stopped waiting.
    Timeout(Duration),
    /// The request was dropped by a peer that crashed or shut down.
    Lost,
}

impl fmt::Display for RoutingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TtlExceeded { max_hops } => write!(f, "hop limit of {max_hops} exceeded"),
            Self::DeadEnd => write!(f, "no neighbor closer to the target"),
            Self::NotJoined => write!(f, "reached a peer outside the overlay"),
            Self::Unreachable(peer) => write!(f, "neighbor {peer} unreachable"),
            Self::OutsideDomain => write!(f, "target outside the coordinate domain"),
            Self::Timeout(after) => write!(f, "no completion after {after:?}"),
            Self::Lost => write!(f, "request lost in transit"),
        }
    }
}

/// Errors surfaced by overlay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A split or merge was attempted on zones that do not allow it.
    #[error("geometry precondition violated: {0}")]
    GeometryPrecondition(#[from] GeometryError),

    /// A routed request ran out of hops or found no way forward.
    #[error("routing incomplete after {hops} hops: {reason}")]
    RoutingIncomplete { hops: u32, reason: RoutingFailure },

    /// A peer could not be reached.
    #[error("neighbor {0} unreachable")]
    NeighborUnreachable(PeerId),

    /// The landmark refused or could not complete a join.
    #[error("join rejected by landmark {landmark}: {reason}")]
    JoinRejected { landmark: PeerId, reason: String },

    /// The peer is in the wrong lifecycle state for the operation.
    #[error("invalid peer state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// The peer is in the middle of another join, leave or take-over.
    #[error("peer busy with pending {0}")]
    Busy(&'static str),

    /// No neighbor could take over the zone within the retry budget.
    #[error("leave deferred after {attempts} attempts")]
    LeaveDeferred { attempts: u32 },

    /// The zone of a failed peer could not be reassigned.
    #[error("repair of {peer} incomplete after {attempts} attempts")]
    RepairIncomplete { peer: PeerId, attempts: u32 },

    /// A reply did not arrive in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The tracker knows no joined peer.
    #[error("overlay has no joined peers")]
    EmptyOverlay,

    /// A peer with this id is already registered.
    #[error("peer {0} already registered")]
    DuplicatePeer(PeerId),

    /// Configuration value missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other peer-local failure.
    #[error(transparent)]
    Overlay(OverlayError),
}

impl From<OverlayError> for Error {
    fn from(err: OverlayError) -> Self {
        match err {
            OverlayError::Geometry(e) => Self::GeometryPrecondition(e),
            OverlayError::Busy { pending } => Self::Busy(pending),
            OverlayError::InvalidState { expected, actual } => Self::InvalidState {
                expected,
                actual: actual.to_string(),
            },
            other => Self::Overlay(other),
        }
    }
}

impl Error {
    /// Whether retrying against another (or the same, later) peer may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::JoinRejected { .. }
                | Self::NeighborUnreachable(_)
                | Self::Busy(_)
                | Self::RoutingIncomplete { .. }
                | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_overlay::PeerStatus;

    #[test]
    fn overlay_errors_map_onto_the_taxonomy() {
        let geometry: Error = OverlayError::Geometry(GeometryError::DegenerateSplit { dimension: 1 }).into();
        assert!(matches!(geometry, Error::GeometryPrecondition(_)));

        let busy: Error = OverlayError::Busy { pending: "join" }.into();
        assert!(matches!(busy, Error::Busy("join")));

        let state: Error = OverlayError::InvalidState {
            expected: "Joined",
            actual: PeerStatus::Left,
        }
        .into();
        assert_eq!(state.to_string(), "invalid peer state: expected Joined, got Left");
    }

    #[test]
    fn routing_failures_render() {
        let err = Error::RoutingIncomplete {
            hops: 7,
            reason: RoutingFailure::TtlExceeded { max_hops: 7 },
        };
        assert_eq!(err.to_string(), "routing incomplete after 7 hops: hop limit of 7 exceeded");
        assert!(err.is_retryable());
        assert!(!Error::EmptyOverlay.is_retryable());
    }
}
