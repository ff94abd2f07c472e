//! # Canopy Overlay
//!
//! Peer-local building blocks of the Canopy content-addressable overlay.
//!
//! Nothing in this crate talks to another peer. Each peer owns an
//! [`OverlayState`] (zone, [`NeighborTable`], split history, pending
//! operation) whose transitions return the [`Notice`]s other peers must
//! receive, and consults the [`routing`] functions to pick next hops from its
//! own table. The async runtime that carries messages between peers lives in
//! `canopy-protocols`.
//!
//! # Key Types
//!
//! - [`PeerId`] - 256-bit peer identity
//! - [`NeighborTable`] - neighbors keyed by dimension and direction
//! - [`OverlayState`] - join, leave, merge and take-over transitions
//! - [`VisitedCache`] - bounded duplicate suppression for multicast
//!
//! # Example
//!
//! ```
//! use canopy_overlay::{OverlayState, PeerId, SplitPolicy};
//! use canopy_topology::{Element, Space};
//! use std::time::Duration;
//!
//! let space = Space::new(2, Element::new("A"), Element::new("Z")).unwrap();
//! let mut landmark = OverlayState::new(PeerId::from_name("p1"), 2);
//! let mut joiner = OverlayState::new(PeerId::from_name("p2"), 2);
//!
//! landmark.create(&space).unwrap();
//! joiner.begin_join().unwrap();
//! landmark
//!     .offer_join(joiner.id(), SplitPolicy::RoundRobin, Duration::from_secs(5))
//!     .unwrap();
//! let (offer, _notices) = landmark.welcome(joiner.id()).unwrap();
//! joiner.install_join(offer).unwrap();
//!
//! assert!(landmark.table().contains(&joiner.id()));
//! assert!(joiner.table().contains(&landmark.id()));
//! ```

pub mod error;
pub mod neighbors;
pub mod peer;
pub mod request;
pub mod routing;
pub mod state;
pub mod wire;

pub use error::{OverlayError, Result};
pub use neighbors::{NeighborEntry, NeighborTable};
pub use peer::PeerId;
pub use request::{RequestId, VisitedCache};
pub use routing::{first_unsatisfied, multicast_fanout, unicast_step, UnicastStep};
pub use state::{
    HandoffOffer, Holdings, JoinOffer, Notice, OverlayState, PeerStatus, SplitEntry, SplitPolicy,
};
