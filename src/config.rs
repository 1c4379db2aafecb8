//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the dashboard runtime.
//!
//! Config is consumed in two places:
//! 1. **Component construction**: periods, TTLs, and timeouts for each
//!    component (cache, orchestrator, monitors, celebrations).
//! 2. **Supervision tree**: bounded restart window and shutdown grace.
//!
//! ## Field semantics
//! - All periodic loops reschedule their next tick only after the current
//!   one completes; the periods below are inter-tick sleeps, so ticks never
//!   overlap within one component.
//! - `bus_capacity` is clamped to a minimum of 1 by the bus.

use std::time::Duration;

/// Global configuration for the dashboard runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the external dashboard API (no trailing slash).
    pub base_url: String,

    /// Timeout applied to every external API call.
    pub fetch_timeout: Duration,

    /// Period of the main fetch→validate→store→cache→broadcast cycle.
    pub refresh_period: Duration,

    /// Period of the per-entity supervisor refresh tick.
    pub supervisor_period: Duration,

    /// Period of the returns poller tick.
    pub returns_period: Duration,

    /// Lookback window passed to the returns endpoint, in days.
    pub returns_lookback_days: u32,

    /// Whether the returns poller starts in the polling state.
    pub returns_poll_on_start: bool,

    /// Default TTL for cache entries when `put` does not override it.
    pub cache_ttl: Duration,

    /// Period of the cache background eviction sweep.
    pub cache_sweep_period: Duration,

    /// Period of the celebration dedup-cache sweep.
    pub celebration_sweep_period: Duration,

    /// Age at which generic celebration dedup entries are dropped.
    pub celebration_generic_ttl: Duration,

    /// Bound on store reads performed by cache-aside `get_data`.
    pub store_read_timeout: Duration,

    /// Capacity of the pub/sub bus ring buffer (min 1; clamped by the bus).
    pub bus_capacity: usize,

    /// Maximum child restarts tolerated within `restart_window` before the
    /// whole tree is stopped as fatal.
    pub max_restarts: usize,

    /// Sliding window over which restarts are counted.
    pub restart_window: Duration,

    /// Maximum wait for children to stop during graceful shutdown.
    pub grace: Duration,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `fetch_timeout = 10s`
    /// - `refresh_period = supervisor_period = returns_period = 30s`
    /// - `returns_lookback_days = 30`, polling enabled on start
    /// - `cache_ttl = 30s`, sweep every `60s`
    /// - celebration sweep every `10min`, generic dedup TTL `1h`
    /// - `store_read_timeout = 5s`
    /// - `bus_capacity = 1024`
    /// - restart budget: `3` restarts per `60s` window
    /// - `grace = 10s`
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000/api".to_string(),
            fetch_timeout: Duration::from_secs(10),
            refresh_period: Duration::from_secs(30),
            supervisor_period: Duration::from_secs(30),
            returns_period: Duration::from_secs(30),
            returns_lookback_days: 30,
            returns_poll_on_start: true,
            cache_ttl: Duration::from_secs(30),
            cache_sweep_period: Duration::from_secs(60),
            celebration_sweep_period: Duration::from_secs(600),
            celebration_generic_ttl: Duration::from_secs(3600),
            store_read_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
            max_restarts: 3,
            restart_window: Duration::from_secs(60),
            grace: Duration::from_secs(10),
        }
    }
}
