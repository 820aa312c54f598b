//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_core::{Result, TidepoolError};

use crate::health::PingPolicy;

/// Ping query placeholder meaning "no ping query configured"
pub const NO_PING_QUERY: &str = "NO PING QUERY SET";

/// Configuration for a connection pool
///
/// Controls pool sizing, checkout and wait timeouts, and how aggressively
/// idle connections are validated before reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once
    #[serde(alias = "maxActive")]
    max_active: usize,
    /// Maximum number of connections kept idle for reuse
    #[serde(alias = "maxIdle")]
    max_idle: usize,
    /// Checkout time in milliseconds after which a connection may be reclaimed
    #[serde(alias = "maxCheckoutTime")]
    max_checkout_time_ms: u64,
    /// How long in milliseconds an acquire blocks before giving up
    #[serde(alias = "timeToWait")]
    time_to_wait_ms: u64,
    /// Bad connections tolerated per acquire on top of `max_idle`
    #[serde(alias = "localBadConnectionTolerance")]
    local_bad_connection_tolerance: usize,
    /// Query used to check an idle connection against the database
    #[serde(alias = "pingQuery")]
    ping_query: String,
    /// Whether the ping query is sent at all
    #[serde(alias = "pingEnabled")]
    ping_enabled: bool,
    /// Idle time in milliseconds after which a connection is pinged before reuse
    #[serde(alias = "pingIdleThreshold")]
    ping_idle_threshold_ms: u64,
}

impl PoolConfig {
    /// Create a pool configuration with default values
    pub fn new() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            max_checkout_time_ms: 20_000,
            time_to_wait_ms: 20_000,
            local_bad_connection_tolerance: 3,
            ping_query: NO_PING_QUERY.to_string(),
            ping_enabled: false,
            ping_idle_threshold_ms: 0,
        }
    }

    /// Set the maximum number of active connections
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set the maximum number of idle connections
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the maximum checkout time in milliseconds
    pub fn with_max_checkout_time_ms(mut self, millis: u64) -> Self {
        self.max_checkout_time_ms = millis;
        self
    }

    /// Set the acquire wait time in milliseconds
    pub fn with_time_to_wait_ms(mut self, millis: u64) -> Self {
        self.time_to_wait_ms = millis;
        self
    }

    /// Set the local bad connection tolerance
    pub fn with_local_bad_connection_tolerance(mut self, tolerance: usize) -> Self {
        self.local_bad_connection_tolerance = tolerance;
        self
    }

    /// Set the ping query
    pub fn with_ping_query(mut self, query: impl Into<String>) -> Self {
        self.ping_query = query.into();
        self
    }

    /// Enable or disable pinging idle connections
    pub fn with_ping_enabled(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Set the idle threshold in milliseconds above which connections are pinged
    pub fn with_ping_idle_threshold_ms(mut self, millis: u64) -> Self {
        self.ping_idle_threshold_ms = millis;
        self
    }

    /// Check the configuration for values the pool cannot operate with
    ///
    /// A pool with `max_active == 0` could never hand out a connection, so
    /// it is rejected here rather than deadlocking the first acquire.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(TidepoolError::Configuration(
                "max_active must be greater than 0".into(),
            ));
        }
        if self.ping_enabled && !self.has_ping_query() {
            return Err(TidepoolError::Configuration(
                "ping is enabled but no ping query is set".into(),
            ));
        }
        Ok(())
    }

    /// Get the maximum number of active connections
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Get the maximum number of idle connections
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    /// Get the maximum checkout time as a Duration
    pub fn max_checkout_time(&self) -> Duration {
        Duration::from_millis(self.max_checkout_time_ms)
    }

    /// Get the acquire wait time as a Duration
    pub fn time_to_wait(&self) -> Duration {
        Duration::from_millis(self.time_to_wait_ms)
    }

    /// Get the local bad connection tolerance
    pub fn local_bad_connection_tolerance(&self) -> usize {
        self.local_bad_connection_tolerance
    }

    /// Get the ping query
    pub fn ping_query(&self) -> &str {
        &self.ping_query
    }

    /// Whether a real ping query (not the placeholder) is configured
    pub fn has_ping_query(&self) -> bool {
        !self.ping_query.trim().is_empty() && self.ping_query != NO_PING_QUERY
    }

    /// Whether pinging is enabled
    pub fn ping_enabled(&self) -> bool {
        self.ping_enabled
    }

    /// Get the ping idle threshold as a Duration
    pub fn ping_idle_threshold(&self) -> Duration {
        Duration::from_millis(self.ping_idle_threshold_ms)
    }

    /// Number of bad connections one acquire may discard before failing
    pub(crate) fn bad_connection_limit(&self) -> usize {
        self.max_idle + self.local_bad_connection_tolerance
    }

    /// The validity check settings derived from this configuration
    pub fn ping_policy(&self) -> PingPolicy<'_> {
        PingPolicy {
            enabled: self.ping_enabled,
            query: &self.ping_query,
            idle_threshold: self.ping_idle_threshold(),
        }
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - max_active: 10
    /// - max_idle: 5
    /// - max_checkout_time: 20 seconds
    /// - time_to_wait: 20 seconds
    /// - local_bad_connection_tolerance: 3
    /// - ping: disabled
    fn default() -> Self {
        Self::new()
    }
}
