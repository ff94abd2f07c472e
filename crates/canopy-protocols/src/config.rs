//! Overlay and tracker configuration.
//!
//! Both configs have production defaults, a `fast()` preset for tests and
//! local simulations, `with_*` builders, and `from_env()` readers for the
//! `CANOPY_*` variables below.
//!
//! | Variable | Field |
//! |---|---|
//! | `CANOPY_DIMENSIONS` | [`OverlayConfig::dimensions`] |
//! | `CANOPY_LOWER_BOUND` / `CANOPY_UPPER_BOUND` | domain bounds |
//! | `CANOPY_SPLIT_POLICY` | `round-robin` or `largest-extent` |
//! | `CANOPY_MAX_HOPS` | hop budget per routed request |
//! | `CANOPY_REQUEST_TIMEOUT_MS` | per-request reply timeout |
//! | `CANOPY_ANYCAST_TIMEOUT_MS` | multicast completion timeout |
//! | `CANOPY_JOIN_TIMEOUT_MS` | lifetime of a reserved split |
//! | `CANOPY_LEAVE_RETRY_MIN_MS` / `CANOPY_LEAVE_RETRY_MAX_MS` | leave backoff range |
//! | `CANOPY_LEAVE_ATTEMPTS` | leave attempts before deferring |
//! | `CANOPY_REPAIR_ATTEMPTS` | repair attempts per failed peer |
//! | `CANOPY_MAINTENANCE_INTERVAL_MS` | heartbeat period, `0` disables |
//! | `CANOPY_VISITED_CAPACITY` / `CANOPY_VISITED_RETENTION_MS` | duplicate suppression |
//! | `CANOPY_DELIVERY_CAPACITY` | broadcast delivery buffer per peer |
//! | `CANOPY_TRACKER_CAPACITY` | tracker sample size |
//! | `CANOPY_TRACKER_STORAGE_PROBABILITY` | chance a joined peer is sampled |
//! | `CANOPY_TRACKER_JOIN_RETRY_MS` / `CANOPY_TRACKER_JOIN_ATTEMPTS` | join retry policy |

use std::str::FromStr;
use std::time::Duration;

use canopy_overlay::SplitPolicy;
use canopy_topology::{Element, Space};

use crate::error::{Error, Result};

/// Configuration shared by every peer of a [`Network`](crate::Network).
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Number of dimensions of the coordinate space.
    pub dimensions: usize,
    /// Inclusive lower bound of every dimension.
    pub lower_bound: String,
    /// Exclusive upper bound of every dimension.
    pub upper_bound: String,
    /// How landmarks choose the dimension to split.
    pub split_policy: SplitPolicy,
    /// Forwards a routed request may take before it is dropped.
    pub max_hops: u32,
    /// How long a caller waits for a single reply.
    pub request_timeout: Duration,
    /// How long a multicast caller waits for every branch to report.
    pub anycast_timeout: Duration,
    /// How long a landmark keeps a split reserved for a joiner.
    pub join_timeout: Duration,
    /// Lower end of the random backoff between leave attempts.
    pub leave_retry_min: Duration,
    /// Upper end of the random backoff between leave attempts.
    pub leave_retry_max: Duration,
    /// Leave attempts before giving up with `LeaveDeferred`.
    pub leave_attempts: u32,
    /// Attempts to reassign the zone of a failed peer.
    pub repair_attempts: u32,
    /// Heartbeat period. `None` disables background maintenance.
    pub maintenance_interval: Option<Duration>,
    /// Multicast request ids remembered per peer.
    pub visited_capacity: usize,
    /// How long a remembered request id suppresses duplicates.
    pub visited_retention: Duration,
    /// Broadcast payloads buffered per subscriber.
    pub delivery_capacity: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dimensions: 3,
            lower_bound: "0".to_string(),
            upper_bound: "{".to_string(),
            split_policy: SplitPolicy::RoundRobin,
            max_hops: 256,
            request_timeout: Duration::from_secs(5),
            anycast_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
            leave_retry_min: Duration::from_millis(2000),
            leave_retry_max: Duration::from_millis(5000),
            leave_attempts: 5,
            repair_attempts: 5,
            maintenance_interval: Some(Duration::from_millis(500)),
            visited_capacity: 1024,
            visited_retention: Duration::from_secs(60),
            delivery_capacity: 64,
        }
    }
}

impl OverlayConfig {
    /// Short timeouts and backoffs, no background maintenance.
    ///
    /// Every state change happens in response to an explicit call, which
    /// keeps multi-peer tests deterministic.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            anycast_timeout: Duration::from_secs(2),
            join_timeout: Duration::from_secs(1),
            leave_retry_min: Duration::from_millis(10),
            leave_retry_max: Duration::from_millis(50),
            maintenance_interval: None,
            ..Default::default()
        }
    }

    /// Read the configuration from `CANOPY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let maintenance_ms = parse_or(
            &lookup,
            "CANOPY_MAINTENANCE_INTERVAL_MS",
            defaults.maintenance_interval.map_or(0, |d| d.as_millis() as u64),
        )?;

        let config = Self {
            dimensions: parse_or(&lookup, "CANOPY_DIMENSIONS", defaults.dimensions)?,
            lower_bound: lookup("CANOPY_LOWER_BOUND").unwrap_or(defaults.lower_bound),
            upper_bound: lookup("CANOPY_UPPER_BOUND").unwrap_or(defaults.upper_bound),
            split_policy: parse_or(&lookup, "CANOPY_SPLIT_POLICY", defaults.split_policy)?,
            max_hops: parse_or(&lookup, "CANOPY_MAX_HOPS", defaults.max_hops)?,
            request_timeout: millis_or(&lookup, "CANOPY_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            anycast_timeout: millis_or(&lookup, "CANOPY_ANYCAST_TIMEOUT_MS", defaults.anycast_timeout)?,
            join_timeout: millis_or(&lookup, "CANOPY_JOIN_TIMEOUT_MS", defaults.join_timeout)?,
            leave_retry_min: millis_or(&lookup, "CANOPY_LEAVE_RETRY_MIN_MS", defaults.leave_retry_min)?,
            leave_retry_max: millis_or(&lookup, "CANOPY_LEAVE_RETRY_MAX_MS", defaults.leave_retry_max)?,
            leave_attempts: parse_or(&lookup, "CANOPY_LEAVE_ATTEMPTS", defaults.leave_attempts)?,
            repair_attempts: parse_or(&lookup, "CANOPY_REPAIR_ATTEMPTS", defaults.repair_attempts)?,
            maintenance_interval: (maintenance_ms > 0).then(|| Duration::from_millis(maintenance_ms)),
            visited_capacity: parse_or(&lookup, "CANOPY_VISITED_CAPACITY", defaults.visited_capacity)?,
            visited_retention: millis_or(
                &lookup,
                "CANOPY_VISITED_RETENTION_MS",
                defaults.visited_retention,
            )?,
            delivery_capacity: parse_or(&lookup, "CANOPY_DELIVERY_CAPACITY", defaults.delivery_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the number of dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Set the domain bounds.
    #[must_use]
    pub fn with_bounds(mut self, lower: impl Into<String>, upper: impl Into<String>) -> Self {
        self.lower_bound = lower.into();
        self.upper_bound = upper.into();
        self
    }

    /// Set the split policy.
    #[must_use]
    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policy = policy;
        self
    }

    /// Set the hop budget.
    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Set the per-request reply timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the multicast completion timeout.
    #[must_use]
    pub fn with_anycast_timeout(mut self, timeout: Duration) -> Self {
        self.anycast_timeout = timeout;
        self
    }

    /// Set the backoff range between leave attempts.
    #[must_use]
    pub fn with_leave_retry(mut self, min: Duration, max: Duration) -> Self {
        self.leave_retry_min = min;
        self.leave_retry_max = max;
        self
    }

    /// Set the number of leave attempts.
    #[must_use]
    pub fn with_leave_attempts(mut self, attempts: u32) -> Self {
        self.leave_attempts = attempts;
        self
    }

    /// Enable background maintenance with the given heartbeat period.
    #[must_use]
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    /// Disable background maintenance.
    #[must_use]
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance_interval = None;
        self
    }

    /// Set duplicate suppression bounds.
    #[must_use]
    pub fn with_visited(mut self, capacity: usize, retention: Duration) -> Self {
        self.visited_capacity = capacity;
        self.visited_retention = retention;
        self
    }

    /// Set how many broadcast payloads a peer buffers for its subscribers.
    #[must_use]
    pub fn with_delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity;
        self
    }

    /// The coordinate domain described by this configuration.
    pub fn space(&self) -> Result<Space> {
        Ok(Space::new(
            self.dimensions,
            Element::new(&self.lower_bound),
            Element::new(&self.upper_bound),
        )?)
    }

    /// Check the configuration for values no overlay can run with.
    pub fn validate(&self) -> Result<()> {
        self.space()?;
        if self.max_hops == 0 {
            return Err(Error::Config("max_hops must be positive".into()));
        }
        if self.leave_retry_min > self.leave_retry_max {
            return Err(Error::Config(format!(
                "leave retry range inverted: {:?} > {:?}",
                self.leave_retry_min, self.leave_retry_max
            )));
        }
        if self.leave_attempts == 0 || self.repair_attempts == 0 {
            return Err(Error::Config("attempt counts must be positive".into()));
        }
        if self.visited_capacity == 0 || self.delivery_capacity == 0 {
            return Err(Error::Config("capacities must be positive".into()));
        }
        if self.maintenance_interval == Some(Duration::ZERO) {
            return Err(Error::Config("maintenance interval must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration of a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum number of sampled peers.
    pub capacity: usize,
    /// Probability that a newly joined peer enters the sample.
    pub storage_probability: f64,
    /// Pause before retrying a rejected join with another landmark.
    pub join_retry_interval: Duration,
    /// Join attempts before giving up.
    pub join_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            storage_probability: 1.0,
            join_retry_interval: Duration::from_millis(500),
            join_attempts: 10,
        }
    }
}

impl TrackerConfig {
    /// Short retry interval for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            join_retry_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Read the configuration from `CANOPY_TRACKER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            capacity: parse_or(&lookup, "CANOPY_TRACKER_CAPACITY", defaults.capacity)?,
            storage_probability: parse_or(
                &lookup,
                "CANOPY_TRACKER_STORAGE_PROBABILITY",
                defaults.storage_probability,
            )?,
            join_retry_interval: millis_or(
                &lookup,
                "CANOPY_TRACKER_JOIN_RETRY_MS",
                defaults.join_retry_interval,
            )?,
            join_attempts: parse_or(&lookup, "CANOPY_TRACKER_JOIN_ATTEMPTS", defaults.join_attempts)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the sample capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the storage probability.
    #[must_use]
    pub fn with_storage_probability(mut self, probability: f64) -> Self {
        self.storage_probability = probability;
        self
    }

    /// Set the join retry policy.
    #[must_use]
    pub fn with_join_retry(mut self, interval: Duration, attempts: u32) -> Self {
        self.join_retry_interval = interval;
        self.join_attempts = attempts;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("tracker capacity must be positive".into()));
        }
        if !(self.storage_probability > 0.0 && self.storage_probability <= 1.0) {
            return Err(Error::Config(format!(
                "storage probability {} outside (0, 1]",
                self.storage_probability
            )));
        }
        if self.join_attempts == 0 {
            return Err(Error::Config("join attempts must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = OverlayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dimensions, 3);
        assert_eq!(config.leave_retry_min, Duration::from_millis(2000));
        assert_eq!(config.maintenance_interval, Some(Duration::from_millis(500)));
        OverlayConfig::fast().validate().unwrap();
        TrackerConfig::default().validate().unwrap();
    }

    #[test]
    fn builders_chain() {
        let config = OverlayConfig::fast()
            .with_dimensions(2)
            .with_bounds("A", "Z")
            .with_split_policy(SplitPolicy::LargestExtent)
            .with_max_hops(12)
            .with_maintenance_interval(Duration::from_millis(20));
        assert_eq!(config.dimensions, 2);
        assert_eq!(config.space().unwrap().dimensions(), 2);
        assert_eq!(config.split_policy, SplitPolicy::LargestExtent);
        assert_eq!(config.max_hops, 12);
        assert!(config.without_maintenance().maintenance_interval.is_none());
    }

    #[test]
    fn reads_variables() {
        let config = OverlayConfig::from_lookup(lookup(&[
            ("CANOPY_DIMENSIONS", "4"),
            ("CANOPY_LOWER_BOUND", "a"),
            ("CANOPY_UPPER_BOUND", "z"),
            ("CANOPY_SPLIT_POLICY", "largest-extent"),
            ("CANOPY_MAX_HOPS", "32"),
            ("CANOPY_MAINTENANCE_INTERVAL_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.dimensions, 4);
        assert_eq!(config.lower_bound, "a");
        assert_eq!(config.split_policy, SplitPolicy::LargestExtent);
        assert_eq!(config.max_hops, 32);
        assert!(config.maintenance_interval.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn malformed_variables_are_rejected() {
        let err = OverlayConfig::from_lookup(lookup(&[("CANOPY_MAX_HOPS", "many")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.starts_with("CANOPY_MAX_HOPS=many")));

        let err = OverlayConfig::from_lookup(lookup(&[
            ("CANOPY_LOWER_BOUND", "z"),
            ("CANOPY_UPPER_BOUND", "a"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::GeometryPrecondition(_)));

        let err = OverlayConfig::from_lookup(lookup(&[
            ("CANOPY_LEAVE_RETRY_MIN_MS", "900"),
            ("CANOPY_LEAVE_RETRY_MAX_MS", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn tracker_variables() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("CANOPY_TRACKER_CAPACITY", "8"),
            ("CANOPY_TRACKER_STORAGE_PROBABILITY", "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.storage_probability, 0.5);

        assert!(TrackerConfig::from_lookup(lookup(&[(
            "CANOPY_TRACKER_STORAGE_PROBABILITY",
            "1.5"
        )]))
        .is_err());
    }
}
