//! Pool statistics types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time snapshot of a connection pool
///
/// Counters are cumulative for the life of the pool. Times are in
/// milliseconds, matching the configuration units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub(crate) pool_id: Uuid,
    pub(crate) captured_at: DateTime<Utc>,
    pub(crate) active: usize,
    pub(crate) idle: usize,
    pub(crate) request_count: u64,
    pub(crate) accumulated_request_time_ms: u64,
    pub(crate) had_to_wait_count: u64,
    pub(crate) accumulated_wait_time_ms: u64,
    pub(crate) accumulated_checkout_time_ms: u64,
    pub(crate) bad_connection_count: u64,
    pub(crate) claimed_overdue_count: u64,
    pub(crate) accumulated_overdue_checkout_time_ms: u64,
}

impl PoolStats {
    /// Identity of the pool this snapshot was taken from
    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    /// When the snapshot was taken
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Number of connections currently checked out
    pub fn active(&self) -> usize {
        self.active
    }

    /// Number of idle connections available for reuse
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Total pooled connections (active + idle)
    pub fn total(&self) -> usize {
        self.active + self.idle
    }

    /// Successful acquires served
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Acquires that had to block at least once
    pub fn had_to_wait_count(&self) -> u64 {
        self.had_to_wait_count
    }

    /// Connections found broken, on acquire or on return
    pub fn bad_connection_count(&self) -> u64 {
        self.bad_connection_count
    }

    /// Checkouts forcibly reclaimed for exceeding the checkout limit
    pub fn claimed_overdue_count(&self) -> u64 {
        self.claimed_overdue_count
    }

    /// Total time spent inside successful acquires
    pub fn accumulated_request_time(&self) -> Duration {
        Duration::from_millis(self.accumulated_request_time_ms)
    }

    /// Total time acquires spent blocked
    pub fn accumulated_wait_time(&self) -> Duration {
        Duration::from_millis(self.accumulated_wait_time_ms)
    }

    /// Total time connections spent checked out
    pub fn accumulated_checkout_time(&self) -> Duration {
        Duration::from_millis(self.accumulated_checkout_time_ms)
    }

    /// Total checkout time of reclaimed overdue connections
    pub fn accumulated_overdue_checkout_time(&self) -> Duration {
        Duration::from_millis(self.accumulated_overdue_checkout_time_ms)
    }

    pub fn average_request_time(&self) -> Duration {
        average(self.accumulated_request_time_ms, self.request_count)
    }

    pub fn average_wait_time(&self) -> Duration {
        average(self.accumulated_wait_time_ms, self.had_to_wait_count)
    }

    pub fn average_checkout_time(&self) -> Duration {
        average(self.accumulated_checkout_time_ms, self.request_count)
    }

    pub fn average_overdue_checkout_time(&self) -> Duration {
        average(
            self.accumulated_overdue_checkout_time_ms,
            self.claimed_overdue_count,
        )
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if the pool holds no connections.
    pub fn utilization(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.active as f64 / self.total() as f64
        }
    }
}

fn average(total_ms: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(total_ms / count)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== POOL {} ===", self.pool_id)?;
        writeln!(f, " active connections              {}", self.active)?;
        writeln!(f, " idle connections                {}", self.idle)?;
        writeln!(f, " request count                   {}", self.request_count)?;
        writeln!(f, " average request time            {:?}", self.average_request_time())?;
        writeln!(f, " average checkout time           {:?}", self.average_checkout_time())?;
        writeln!(f, " claimed overdue                 {}", self.claimed_overdue_count)?;
        writeln!(f, " average overdue checkout time   {:?}", self.average_overdue_checkout_time())?;
        writeln!(f, " had to wait                     {}", self.had_to_wait_count)?;
        writeln!(f, " average wait time               {:?}", self.average_wait_time())?;
        write!(f, " bad connection count            {}", self.bad_connection_count)
    }
}
