//! Pool bookkeeping wrapped around one physical connection

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tidepool_core::Connection;

use super::identity::ConnectionTag;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identity of one wrapper instance.
///
/// Every time a physical connection is returned to the pool or reclaimed it
/// is rewrapped under a fresh id, so ids are never shared between pools or
/// between successive checkouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Internal wrapper for pooled connections with metadata
///
/// Idle entries are owned by the pool state. Once checked out an entry is
/// shared between the active set and the caller's handle, which is why the
/// validity flag and last-used time use interior mutability.
pub(crate) struct PooledConnectionInner {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
    tag: ConnectionTag,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    checkout_at: Option<Instant>,
    valid: AtomicBool,
}

impl PooledConnectionInner {
    /// Wrap a freshly opened physical connection
    pub(crate) fn new(connection: Arc<dyn Connection>, tag: ConnectionTag) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::next(),
            connection,
            tag,
            created_at: now,
            last_used_at: Mutex::new(now),
            checkout_at: None,
            valid: AtomicBool::new(true),
        }
    }

    /// Wrap this entry's physical connection in a brand-new entry
    ///
    /// Creation and last-used timestamps carry over; the checkout stamp and
    /// validity start fresh. The old entry is left untouched and must be
    /// invalidated by the caller.
    pub(crate) fn rewrap(&self) -> Self {
        Self {
            id: ConnectionId::next(),
            connection: Arc::clone(&self.connection),
            tag: self.tag,
            created_at: self.created_at,
            last_used_at: Mutex::new(self.last_used_at()),
            checkout_at: None,
            valid: AtomicBool::new(true),
        }
    }

    /// Stamp this entry as checked out under `tag`
    pub(crate) fn check_out(&mut self, tag: ConnectionTag) {
        let now = Instant::now();
        self.tag = tag;
        self.checkout_at = Some(now);
        *self.last_used_at.get_mut() = now;
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn tag(&self) -> ConnectionTag {
        self.tag
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    /// Time since the connection was last used
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at().elapsed()
    }

    /// How long the current checkout has lasted (zero while idle)
    pub(crate) fn checkout_time(&self) -> Duration {
        self.checkout_at.map(|at| at.elapsed()).unwrap_or_default()
    }

    /// The instant this checkout becomes reclaimable, if checked out
    pub(crate) fn overdue_at(&self, max_checkout_time: Duration) -> Option<Instant> {
        // Reclaiming requires the checkout time to strictly exceed the limit.
        self.checkout_at?
            .checked_add(max_checkout_time)?
            .checked_add(Duration::from_millis(1))
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl fmt::Debug for PooledConnectionInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("driver", &self.connection.driver_name())
            .field("tag", &self.tag)
            .field("checked_out", &self.checkout_at.is_some())
            .field("valid", &self.is_valid())
            .finish()
    }
}
