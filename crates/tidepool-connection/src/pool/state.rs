//! Shared pool ledger
//!
//! Everything in here is read and written only while holding the pool's
//! single mutex.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tidepool_core::ConnectionParams;
use uuid::Uuid;

use super::config::PoolConfig;
use super::entry::{ConnectionId, PooledConnectionInner};
use super::identity::ConnectionTag;
use super::stats::PoolStats;

/// Lifetime counters; monotonic for the life of the pool
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolCounters {
    pub(crate) request_count: u64,
    pub(crate) accumulated_request_time: Duration,
    pub(crate) had_to_wait_count: u64,
    pub(crate) accumulated_wait_time: Duration,
    pub(crate) accumulated_checkout_time: Duration,
    pub(crate) bad_connection_count: u64,
    pub(crate) claimed_overdue_count: u64,
    pub(crate) accumulated_overdue_checkout_time: Duration,
}

pub(crate) struct PoolState {
    pub(crate) params: ConnectionParams,
    pub(crate) config: PoolConfig,
    /// Tag of connections opened with the configured parameters
    pub(crate) expected_tag: ConnectionTag,
    /// Oldest return first
    pub(crate) idle: VecDeque<PooledConnectionInner>,
    /// Oldest checkout first
    pub(crate) active: Vec<Arc<PooledConnectionInner>>,
    /// Connections being opened with the lock released; they count
    /// against `max_active` until they land in `active` or fail
    pub(crate) opening: usize,
    /// Bumped by every force-close so in-flight opens can tell they are stale
    pub(crate) generation: u64,
    /// Bumped by `interrupt_waiters`
    pub(crate) interrupts: u64,
    pub(crate) closed: bool,
    pub(crate) counters: PoolCounters,
}

impl PoolState {
    pub(crate) fn new(params: ConnectionParams, config: PoolConfig) -> Self {
        let expected_tag = tag_for(&params);
        Self {
            params,
            config,
            expected_tag,
            idle: VecDeque::new(),
            active: Vec::new(),
            opening: 0,
            generation: 0,
            interrupts: 0,
            closed: false,
            counters: PoolCounters::default(),
        }
    }

    /// Whether another connection may be opened without exceeding `max_active`
    pub(crate) fn has_capacity(&self) -> bool {
        self.active.len() + self.opening < self.config.max_active()
    }

    /// Remove an entry from the active set; `None` if it is not there
    pub(crate) fn remove_active(&mut self, id: ConnectionId) -> Option<Arc<PooledConnectionInner>> {
        let position = self.active.iter().position(|entry| entry.id() == id)?;
        Some(self.active.remove(position))
    }

    pub(crate) fn oldest_active(&self) -> Option<&Arc<PooledConnectionInner>> {
        self.active.first()
    }

    /// Recompute the expected tag from the current parameters
    pub(crate) fn refresh_tag(&mut self) {
        self.expected_tag = tag_for(&self.params);
    }

    pub(crate) fn snapshot(&self, pool_id: Uuid) -> PoolStats {
        PoolStats {
            pool_id,
            captured_at: Utc::now(),
            active: self.active.len(),
            idle: self.idle.len(),
            request_count: self.counters.request_count,
            accumulated_request_time_ms: millis(self.counters.accumulated_request_time),
            had_to_wait_count: self.counters.had_to_wait_count,
            accumulated_wait_time_ms: millis(self.counters.accumulated_wait_time),
            accumulated_checkout_time_ms: millis(self.counters.accumulated_checkout_time),
            bad_connection_count: self.counters.bad_connection_count,
            claimed_overdue_count: self.counters.claimed_overdue_count,
            accumulated_overdue_checkout_time_ms: millis(
                self.counters.accumulated_overdue_checkout_time,
            ),
        }
    }
}

pub(crate) fn tag_for(params: &ConnectionParams) -> ConnectionTag {
    ConnectionTag::new(
        &params.url,
        params.username.as_deref(),
        params.password.as_deref(),
    )
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
