//! Connection pool implementation

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tidepool_core::{
    Connection, ConnectionFactory, ConnectionParams, Result, StatementResult, TidepoolError,
};
use uuid::Uuid;

use super::config::PoolConfig;
use super::entry::{ConnectionId, PooledConnectionInner};
use super::identity::ConnectionTag;
use super::state::{PoolState, millis, tag_for};
use super::stats::PoolStats;

/// Who an acquire authenticates as
#[derive(Clone, Copy)]
enum Principal<'a> {
    Configured,
    Explicit {
        username: &'a str,
        password: &'a str,
    },
}

impl Principal<'_> {
    fn params(&self, state: &PoolState) -> ConnectionParams {
        match self {
            Principal::Configured => state.params.clone(),
            Principal::Explicit { username, password } => state
                .params
                .for_credentials(Some(*username), Some(*password)),
        }
    }

    fn tag(&self, state: &PoolState) -> ConnectionTag {
        match self {
            Principal::Configured => state.expected_tag,
            Principal::Explicit { username, password } => {
                ConnectionTag::new(&state.params.url, Some(*username), Some(*password))
            }
        }
    }
}

struct PoolShared {
    id: Uuid,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    /// Signalled whenever a connection is returned, closed or reclaimed
    available: Condvar,
}

/// A synchronous, thread-safe database connection pool
///
/// Cloning is cheap and yields another handle to the same pool. When the
/// last handle and the last checked-out connection are gone, every pooled
/// connection is closed.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a new connection pool
    ///
    /// Fails with a configuration error if `config` does not validate.
    pub fn new<F: ConnectionFactory + 'static>(
        params: ConnectionParams,
        config: PoolConfig,
        factory: F,
    ) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        tracing::debug!(
            pool_id = %id,
            url = %params.url,
            max_active = config.max_active(),
            max_idle = config.max_idle(),
            "creating connection pool"
        );
        Ok(Self {
            shared: Arc::new(PoolShared {
                id,
                factory: Arc::new(factory),
                state: Mutex::new(PoolState::new(params, config)),
                available: Condvar::new(),
            }),
        })
    }

    /// Unique identity of this pool
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Get a connection using the configured credentials
    ///
    /// Reuses the oldest idle connection if there is one, opens a new one
    /// while fewer than `max_active` are checked out, reclaims the oldest
    /// checkout once it exceeds `max_checkout_time`, and otherwise blocks for
    /// up to `time_to_wait`.
    ///
    /// # Errors
    ///
    /// - `Timeout` if nothing became available in time
    /// - `BadConnection` if too many candidates failed validation
    /// - `Cancelled` if the wait was interrupted or the pool was closed
    /// - any error from the connection factory, unchanged
    pub fn acquire(&self) -> Result<PooledConnection> {
        self.checkout(Principal::Configured)
    }

    /// Get a connection authenticated as `username`
    ///
    /// Connections acquired this way carry a different identity tag than the
    /// pool's, so they are closed rather than pooled when released.
    pub fn acquire_as(&self, username: &str, password: &str) -> Result<PooledConnection> {
        self.checkout(Principal::Explicit { username, password })
    }

    fn checkout(&self, principal: Principal<'_>) -> Result<PooledConnection> {
        let shared = &self.shared;
        let started = Instant::now();
        let mut state = shared.state.lock();
        let deadline = started.checked_add(state.config.time_to_wait());
        let mut counted_wait = false;
        let mut local_bad_connections = 0usize;

        loop {
            if state.closed {
                return Err(TidepoolError::Connection("connection pool is closed".into()));
            }

            let mut candidate = if let Some(idle) = state.idle.pop_front() {
                tracing::debug!(connection_id = %idle.id(), "checked out connection from pool");
                idle
            } else if state.has_capacity() {
                let params = principal.params(&state);
                match shared.open_unlocked(&mut state, params)? {
                    Some(created) => created,
                    None => continue,
                }
            } else if let Some(reclaimed) = claim_overdue(&mut state) {
                reclaimed
            } else {
                if !counted_wait {
                    state.counters.had_to_wait_count += 1;
                    counted_wait = true;
                }
                let interrupts = state.interrupts;
                shared.wait_for_connection(&mut state, deadline)?;
                if state.closed || state.interrupts != interrupts {
                    tracing::debug!("interrupted while waiting for a connection");
                    return Err(TidepoolError::Cancelled);
                }
                continue;
            };

            if is_usable(&candidate, &state.config) && reset_transaction(&candidate) {
                candidate.check_out(principal.tag(&state));
                let entry = Arc::new(candidate);
                state.active.push(Arc::clone(&entry));
                state.counters.request_count += 1;
                state.counters.accumulated_request_time += started.elapsed();
                return Ok(PooledConnection {
                    entry,
                    pool: Arc::clone(shared),
                    released: false,
                });
            }

            tracing::debug!(
                connection_id = %candidate.id(),
                "a bad connection was returned from the pool, getting another connection"
            );
            state.counters.bad_connection_count += 1;
            local_bad_connections += 1;
            candidate.invalidate();
            close_quietly(candidate.connection().as_ref());
            if local_bad_connections > state.config.bad_connection_limit() {
                tracing::debug!(
                    attempts = local_bad_connections,
                    "could not get a good connection to the database"
                );
                return Err(TidepoolError::BadConnection(format!(
                    "could not get a good connection to the database after {} attempts",
                    local_bad_connections
                )));
            }
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().snapshot(self.shared.id)
    }

    /// Get a copy of the pool configuration
    pub fn config(&self) -> PoolConfig {
        self.shared.state.lock().config.clone()
    }

    /// Get a copy of the connection parameters
    pub fn params(&self) -> ConnectionParams {
        self.shared.state.lock().params.clone()
    }

    /// Identity tag connections must carry to be returned to the idle set
    pub fn expected_tag(&self) -> ConnectionTag {
        self.shared.state.lock().expected_tag
    }

    /// Close every active and idle connection
    ///
    /// Checked-out handles are invalidated; using them afterwards fails and
    /// releasing them only bumps the bad connection count. Rollback and
    /// close failures are logged and otherwise ignored.
    pub fn force_close_all(&self) {
        let mut state = self.shared.state.lock();
        force_close(&mut state);
        drop(state);
        self.shared.available.notify_all();
    }

    /// Wake every blocked acquire and make it fail with `Cancelled`
    ///
    /// Only acquires blocked at the time of the call are affected; one that
    /// was opening or validating a connection carries on.
    pub fn interrupt_waiters(&self) {
        let mut state = self.shared.state.lock();
        state.interrupts += 1;
        tracing::debug!("interrupting connection waiters");
        drop(state);
        self.shared.available.notify_all();
    }

    /// Close every connection and refuse further acquires
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            force_close(&mut state);
            tracing::info!(pool_id = %self.shared.id, "connection pool closed");
        }
        drop(state);
        self.shared.available.notify_all();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Replace the pool configuration, closing every connection
    pub fn reconfigure(&self, config: PoolConfig) -> Result<()> {
        self.update("pool", |_, _| config)
    }

    /// Replace connection parameters and pool configuration together,
    /// closing every connection
    pub fn reset(&self, params: ConnectionParams, config: PoolConfig) -> Result<()> {
        self.update("all", |current, _| {
            *current = params;
            config
        })
    }

    pub fn set_url(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        self.update("url", |params, config| {
            params.url = url;
            config
        })
    }

    pub fn set_username(&self, username: Option<String>) -> Result<()> {
        self.update("username", |params, config| {
            params.username = username;
            config
        })
    }

    pub fn set_password(&self, password: Option<String>) -> Result<()> {
        self.update("password", |params, config| {
            params.password = password;
            config
        })
    }

    pub fn set_driver(&self, driver: Option<String>) -> Result<()> {
        self.update("driver", |params, config| {
            params.driver = driver;
            config
        })
    }

    pub fn set_driver_properties(&self, properties: BTreeMap<String, String>) -> Result<()> {
        self.update("driver_properties", |params, config| {
            params.driver_properties = properties;
            config
        })
    }

    pub fn set_default_auto_commit(&self, auto_commit: Option<bool>) -> Result<()> {
        self.update("auto_commit", |params, config| {
            params.auto_commit = auto_commit;
            config
        })
    }

    pub fn set_max_active(&self, max_active: usize) -> Result<()> {
        self.update("max_active", |_, config| config.with_max_active(max_active))
    }

    pub fn set_max_idle(&self, max_idle: usize) -> Result<()> {
        self.update("max_idle", |_, config| config.with_max_idle(max_idle))
    }

    pub fn set_max_checkout_time(&self, max_checkout_time: Duration) -> Result<()> {
        let millis = millis(max_checkout_time);
        self.update("max_checkout_time", |_, config| {
            config.with_max_checkout_time_ms(millis)
        })
    }

    pub fn set_time_to_wait(&self, time_to_wait: Duration) -> Result<()> {
        let millis = millis(time_to_wait);
        self.update("time_to_wait", |_, config| config.with_time_to_wait_ms(millis))
    }

    pub fn set_ping_query(&self, query: impl Into<String>) -> Result<()> {
        let query = query.into();
        self.update("ping_query", |_, config| config.with_ping_query(query))
    }

    pub fn set_ping_enabled(&self, enabled: bool) -> Result<()> {
        self.update("ping_enabled", |_, config| config.with_ping_enabled(enabled))
    }

    pub fn set_ping_idle_threshold(&self, threshold: Duration) -> Result<()> {
        let millis = millis(threshold);
        self.update("ping_idle_threshold", |_, config| {
            config.with_ping_idle_threshold_ms(millis)
        })
    }

    /// Change the bad connection tolerance without touching existing connections
    pub fn set_local_bad_connection_tolerance(&self, tolerance: usize) {
        let mut state = self.shared.state.lock();
        state.config = state
            .config
            .clone()
            .with_local_bad_connection_tolerance(tolerance);
    }

    /// Apply a settings change under the lock, then close every connection
    /// so nothing opened under the old settings is handed out again.
    fn update(
        &self,
        setting: &'static str,
        apply: impl FnOnce(&mut ConnectionParams, PoolConfig) -> PoolConfig,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        let mut params = state.params.clone();
        let config = apply(&mut params, state.config.clone());
        config.validate()?;
        state.params = params;
        state.config = config;
        tracing::info!(pool_id = %self.shared.id, setting, "connection pool reconfigured");
        force_close(&mut state);
        drop(state);
        self.shared.available.notify_all();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&PoolState) -> T) -> T {
        f(&self.shared.state.lock())
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionPool")
            .field("id", &self.shared.id)
            .field("url", &state.params.url)
            .field("active", &state.active.len())
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl PoolShared {
    /// Open a physical connection with the pool lock released
    ///
    /// The slot is reserved in `opening` so concurrent acquires still respect
    /// `max_active`. Returns `None` if the pool was reset or closed while the
    /// connection was being opened; that connection is closed again.
    fn open_unlocked(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        params: ConnectionParams,
    ) -> Result<Option<PooledConnectionInner>> {
        let generation = state.generation;
        state.opening += 1;
        let opened = MutexGuard::unlocked(state, || self.open(&params));
        state.opening -= 1;

        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                tracing::debug!(error = %e, "failed to open connection");
                self.available.notify_all();
                return Err(e);
            }
        };

        if state.generation != generation || state.closed {
            tracing::debug!("discarding connection opened before the pool was reset");
            close_quietly(connection.as_ref());
            self.available.notify_all();
            return Ok(None);
        }

        let created = PooledConnectionInner::new(connection, tag_for(&params));
        tracing::debug!(connection_id = %created.id(), "created connection");
        Ok(Some(created))
    }

    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>> {
        let connection = self.factory.open(params)?;
        if let Some(auto_commit) = params.auto_commit
            && let Err(e) = connection.set_auto_commit(auto_commit)
        {
            close_quietly(connection.as_ref());
            return Err(e);
        }
        Ok(connection)
    }

    /// Block until something may have changed or `deadline` passes
    ///
    /// Wakes early when the oldest checkout becomes overdue so it can be
    /// reclaimed. Fails with `Timeout` once the deadline has passed.
    fn wait_for_connection(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            return Err(TidepoolError::Timeout(format!(
                "no connection became available within {:?}",
                state.config.time_to_wait()
            )));
        }

        let max_checkout_time = state.config.max_checkout_time();
        let overdue_at = state
            .oldest_active()
            .and_then(|oldest| oldest.overdue_at(max_checkout_time));
        let wake_at = match (deadline, overdue_at) {
            (Some(deadline), Some(overdue_at)) => Some(deadline.min(overdue_at)),
            (deadline, overdue_at) => deadline.or(overdue_at),
        };

        tracing::debug!(
            wait_ms = wake_at.map(|at| millis(at.saturating_duration_since(now))),
            "waiting for a connection"
        );
        match wake_at {
            Some(wake_at) => {
                self.available.wait_until(state, wake_at);
            }
            None => self.available.wait(state),
        }
        state.counters.accumulated_wait_time += now.elapsed();
        Ok(())
    }

    /// Return a checked-out entry to the pool
    ///
    /// Never fails: teardown errors are logged and swallowed. Releasing an
    /// entry that is no longer active leaves both sets untouched.
    fn push_connection(&self, entry: &Arc<PooledConnectionInner>) {
        let mut state = self.state.lock();
        let was_active = state.remove_active(entry.id()).is_some();

        if is_usable(entry, &state.config) {
            state.counters.accumulated_checkout_time += entry.checkout_time();
            let connection = entry.connection().as_ref();
            let poolable = !state.closed
                && state.idle.len() < state.config.max_idle()
                && entry.tag() == state.expected_tag;

            if poolable && reset_transaction(entry) {
                let fresh = entry.rewrap();
                tracing::debug!(
                    connection_id = %fresh.id(),
                    previous_id = %entry.id(),
                    "returned connection to pool"
                );
                state.idle.push_back(fresh);
            } else {
                if !poolable {
                    reset_transaction(entry);
                }
                close_quietly(connection);
                tracing::debug!(connection_id = %entry.id(), "closed connection");
            }
        } else {
            tracing::debug!(
                connection_id = %entry.id(),
                "a bad connection attempted to return to the pool, discarding connection"
            );
            state.counters.bad_connection_count += 1;
        }

        entry.invalidate();
        drop(state);
        if was_active {
            self.available.notify_all();
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.closed && (!state.active.is_empty() || !state.idle.is_empty()) {
            force_close(state);
        }
    }
}

/// Reclaim the oldest checkout if it has exceeded the checkout limit
fn claim_overdue(state: &mut PoolState) -> Option<PooledConnectionInner> {
    let held = state.oldest_active()?.checkout_time();
    if held <= state.config.max_checkout_time() {
        return None;
    }

    let oldest = state.active.remove(0);
    state.counters.claimed_overdue_count += 1;
    state.counters.accumulated_overdue_checkout_time += held;
    state.counters.accumulated_checkout_time += held;

    // A failed rollback still hands the connection to validation below,
    // which decides whether it is usable.
    if let Err(e) = rollback_if_manual(oldest.connection().as_ref()) {
        tracing::debug!(connection_id = %oldest.id(), error = %e, "bad connection, could not roll back");
    }

    let reclaimed = oldest.rewrap();
    oldest.invalidate();
    tracing::debug!(
        connection_id = %reclaimed.id(),
        previous_id = %oldest.id(),
        held_ms = millis(held),
        "claimed overdue connection"
    );
    Some(reclaimed)
}

/// Invalidate and close every connection, recomputing the expected tag
fn force_close(state: &mut PoolState) {
    state.refresh_tag();
    state.generation += 1;

    let active = std::mem::take(&mut state.active);
    let idle = std::mem::take(&mut state.idle);
    let count = active.len() + idle.len();

    for entry in active.iter().rev() {
        entry.invalidate();
        retire(entry.connection().as_ref());
    }
    for entry in idle.iter().rev() {
        entry.invalidate();
        retire(entry.connection().as_ref());
    }

    tracing::info!(closed = count, "forcefully closed and removed all connections");
}

/// Validity check: flag, cheap closed check, then the ping policy
fn is_usable(entry: &PooledConnectionInner, config: &PoolConfig) -> bool {
    entry.is_valid()
        && config
            .ping_policy()
            .check(entry.connection().as_ref(), entry.idle_for())
}

/// Roll back latent transaction state; false if the connection refused
fn reset_transaction(entry: &PooledConnectionInner) -> bool {
    match rollback_if_manual(entry.connection().as_ref()) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(connection_id = %entry.id(), error = %e, "could not roll back connection");
            false
        }
    }
}

fn rollback_if_manual(connection: &dyn Connection) -> Result<()> {
    if !connection.auto_commit()? {
        connection.rollback()?;
    }
    Ok(())
}

/// Best-effort rollback and close
fn retire(connection: &dyn Connection) {
    if let Err(e) = rollback_if_manual(connection) {
        tracing::debug!(error = %e, "rollback failed while closing connection");
    }
    close_quietly(connection);
}

fn close_quietly(connection: &dyn Connection) {
    if let Err(e) = connection.close() {
        tracing::warn!(driver = connection.driver_name(), error = %e, "failed to close connection");
    }
}

/// A connection checked out of the pool
///
/// Returned to the pool by `release` or when dropped. Once the pool has
/// reclaimed or force-closed it, the handle is inert: every `Connection` call fails
/// and releasing it does nothing beyond counting a bad connection.
pub struct PooledConnection {
    entry: Arc<PooledConnectionInner>,
    pool: Arc<PoolShared>,
    released: bool,
}

impl PooledConnection {
    /// Identity of this checkout
    pub fn id(&self) -> ConnectionId {
        self.entry.id()
    }

    /// Identity of the pool this connection was checked out from
    pub fn pool_id(&self) -> Uuid {
        self.pool.id
    }

    /// Whether the pool still considers this checkout live
    pub fn is_valid(&self) -> bool {
        self.entry.is_valid()
    }

    /// Identity tag stamped at checkout
    pub fn tag(&self) -> ConnectionTag {
        self.entry.tag()
    }

    /// When the underlying physical connection was opened
    pub fn created_at(&self) -> Instant {
        self.entry.created_at()
    }

    /// When the connection was last used through this or an earlier handle
    pub fn last_used_at(&self) -> Instant {
        self.entry.last_used_at()
    }

    /// How long this checkout has lasted
    pub fn checkout_time(&self) -> Duration {
        self.entry.checkout_time()
    }

    /// The physical connection, checked on every call
    ///
    /// Refreshes the last-used timestamp. Fails once the handle has been
    /// invalidated, so a handle the pool reclaimed can never reach a
    /// connection someone else now holds.
    fn live(&self) -> Result<&dyn Connection> {
        if !self.entry.is_valid() {
            return Err(TidepoolError::Connection(format!(
                "connection {} is invalid",
                self.entry.id()
            )));
        }
        self.entry.touch();
        Ok(self.entry.connection().as_ref())
    }

    /// Return the connection to the pool
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.push_connection(&self.entry);
        }
    }
}

/// Every call goes through the validity check first.
///
/// `close` closes the physical connection; the pool then discards it when
/// the handle is released.
impl Connection for PooledConnection {
    fn driver_name(&self) -> &str {
        self.entry.connection().driver_name()
    }

    fn execute(&self, sql: &str) -> Result<StatementResult> {
        self.live()?.execute(sql)
    }

    fn auto_commit(&self) -> Result<bool> {
        self.live()?.auto_commit()
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.live()?.set_auto_commit(auto_commit)
    }

    fn commit(&self) -> Result<()> {
        self.live()?.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.live()?.rollback()
    }

    fn close(&self) -> Result<()> {
        self.live()?.close()
    }

    /// An invalidated handle reports closed
    fn is_closed(&self) -> bool {
        match self.live() {
            Ok(connection) => connection.is_closed(),
            Err(_) => true,
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("entry", &self.entry)
            .field("pool_id", &self.pool.id)
            .field("released", &self.released)
            .finish()
    }
}
