//! Request identity and duplicate suppression for multicast traversal.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Identifier shared by every copy of one routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u128);

impl RequestId {
    /// A fresh random id.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", (self.0 >> 64) as u64)
    }
}

/// Requests this peer has already processed.
///
/// Bounded twice: at most `capacity` ids are kept (least recently seen
/// evicted first), and an id older than `retention` counts as unseen again.
#[derive(Debug)]
pub struct VisitedCache {
    entries: LruCache<RequestId, Instant>,
    retention: Duration,
}

impl VisitedCache {
    /// Create a cache.
    pub fn new(capacity: NonZeroUsize, retention: Duration) -> Self {
        Self {
            entries: LruCache::new(capacity),
            retention,
        }
    }

    /// Record a visit; returns true if the request was not seen within the
    /// retention window.
    pub fn first_visit(&mut self, id: RequestId) -> bool {
        self.first_visit_at(id, Instant::now())
    }

    /// [`first_visit`](Self::first_visit) with an explicit clock.
    pub fn first_visit_at(&mut self, id: RequestId, now: Instant) -> bool {
        if let Some(seen) = self.entries.get(&id) {
            if now.saturating_duration_since(*seen) < self.retention {
                return false;
            }
        }
        self.entries.put(id, now);
        true
    }

    /// Whether an id is currently remembered (expired or not).
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains(id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retention window.
    pub const fn retention(&self) -> Duration {
        self.retention
    }
}
