//! Canopy Protocols - Peer Actors, Membership and Routing
//!
//! This crate runs the Canopy overlay: every peer is a tokio task owning its
//! zone and neighbor table, and peers talk only by putting commands in each
//! other's mailboxes.
//!
//! # Overview
//!
//! ## Membership
//!
//! - **Join**: a landmark splits its zone and hands the upper half to the
//!   joiner; both sides and every affected neighbor update their tables.
//! - **Leave**: the leaver's zone is merged into a neighbor, or taken over by
//!   a neighbor that first gives its own zone to a partner.
//! - **Repair**: a neighbor that cannot be reached is handed over on its
//!   behalf, using the holdings it last advertised in a heartbeat.
//!
//! ## Routing
//!
//! - **Unicast** reaches the owner of a coordinate by greedy forwarding.
//! - **Anycast** runs a handler on every peer whose zone satisfies a
//!   [`Constraint`](canopy_topology::Constraint), exactly once each.
//! - **Broadcast** is anycast with no constraint.
//!
//! Routed messages carry a hop count and fail with
//! [`Error::RoutingIncomplete`] rather than looping.
//!
//! # Example
//!
//! ```rust,no_run
//! use canopy_protocols::{Network, OverlayConfig, TrackerConfig, Tracker};
//! use canopy_topology::Coordinate;
//!
//! # async fn demo() -> canopy_protocols::Result<()> {
//! let network = Network::new(OverlayConfig::default())?;
//! let tracker = Tracker::new(network.clone(), TrackerConfig::default())?;
//!
//! let mut peers = Vec::new();
//! for _ in 0..8 {
//!     let peer = network.spawn_random_peer().await?;
//!     tracker.inject(&peer).await?;
//!     peers.push(peer);
//! }
//!
//! let outcome = peers[0].route_unicast(Coordinate::from_strs(&["a", "b", "c"])).await?;
//! println!("owned by {} after {} hops", outcome.owner, outcome.hops);
//! assert!(network.audit().await.is_consistent());
//! # Ok(())
//! # }
//! ```

mod actor;
pub mod audit;
pub mod config;
pub mod error;
mod handle;
mod membership;
mod network;
mod repair;
pub mod routing;
mod tracker;

pub use audit::{AuditReport, PeerSnapshot, Violation};
pub use config::{OverlayConfig, TrackerConfig};
pub use error::{Error, Result, RoutingFailure};
pub use handle::PeerHandle;
pub use network::Network;
pub use routing::{AnycastHandler, AnycastHit, AnycastOutcome, RouteOutcome};
pub use tracker::Tracker;

// Re-export the overlay types callers see through the public API
pub use canopy_overlay::{NeighborEntry, NeighborTable, PeerId, PeerStatus, SplitEntry, SplitPolicy};
