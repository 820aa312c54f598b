//! Database ping implementation
//!
//! Provides lightweight health checking by executing a minimal query
//! and measuring response time.

use std::time::{Duration, Instant};

use tidepool_core::Connection;

use crate::pool::millis;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    /// The connection is closed
    ConnectionClosed,
    /// Query execution failed
    QueryFailed(String),
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::ConnectionClosed => write!(f, "Connection is closed"),
            PingError::QueryFailed(msg) => write!(f, "Ping query failed: {}", msg),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a database connection to check if it's alive.
///
/// Executes `query` and returns the round-trip time. The result rows are
/// discarded.
///
/// # Returns
///
/// * `Ok(Duration)` - The round-trip time if the ping succeeded
/// * `Err(PingError)` - If the connection is closed or the query failed
pub fn ping_database(conn: &dyn Connection, query: &str) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match conn.execute(query) {
        Ok(_) => Ok(start.elapsed()),
        Err(e) => Err(PingError::QueryFailed(e.to_string())),
    }
}

/// When and how the pool validates a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPolicy<'a> {
    /// Whether the ping query is sent at all
    pub enabled: bool,
    /// The query to send
    pub query: &'a str,
    /// Only connections idle longer than this are pinged
    pub idle_threshold: Duration,
}

impl PingPolicy<'_> {
    /// Decide whether `conn` is usable after sitting idle for `idle_for`
    ///
    /// A connection that reports itself closed is never usable. When the
    /// policy pings, a failed query closes the connection (best effort) and
    /// marks it unusable; a successful one is followed by a rollback if the
    /// connection is in manual-commit mode.
    pub fn check(&self, conn: &dyn Connection, idle_for: Duration) -> bool {
        if conn.is_closed() {
            return false;
        }
        if !self.enabled || idle_for <= self.idle_threshold {
            return true;
        }

        tracing::debug!(
            driver = conn.driver_name(),
            idle_ms = millis(idle_for),
            "testing connection"
        );
        let outcome = ping_database(conn, self.query).and_then(|latency| {
            match conn.auto_commit() {
                Ok(true) => Ok(latency),
                Ok(false) => conn
                    .rollback()
                    .map(|_| latency)
                    .map_err(|e| PingError::QueryFailed(e.to_string())),
                Err(e) => Err(PingError::QueryFailed(e.to_string())),
            }
        });

        match outcome {
            Ok(latency) => {
                tracing::debug!(latency_ms = millis(latency), "connection is good");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "execution of ping query failed");
                if let Err(close_err) = conn.close() {
                    tracing::debug!(error = %close_err, "failed to close connection after ping");
                }
                false
            }
        }
    }
}
