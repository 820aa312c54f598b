//! Connection pooling for database connections
//!
//! A pool keeps two disjoint collections guarded by a single lock: idle
//! connections available for reuse and active connections checked out by
//! callers. Acquiring prefers an idle connection, then opens a new one while
//! under `max_active`, then reclaims the oldest checkout if it is overdue,
//! and otherwise blocks for up to `time_to_wait`.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_connection::pool::{ConnectionPool, PoolConfig};
//! use tidepool_core::ConnectionParams;
//!
//! let config = PoolConfig::new()
//!     .with_max_active(5)
//!     .with_time_to_wait_ms(5000);
//!
//! let pool = ConnectionPool::new(ConnectionParams::new(url), config, factory)?;
//! let conn = pool.acquire()?;
//! conn.execute("SELECT 1")?;
//! // Connection returned to pool on drop (or explicitly with `conn.release()`)
//! ```

mod config;
mod entry;
mod identity;
mod pool;
mod state;
mod stats;


pub use config::{NO_PING_QUERY, PoolConfig};
pub use entry::ConnectionId;
pub use identity::ConnectionTag;
pub use pool::{ConnectionPool, PooledConnection};
pub use stats::PoolStats;

pub(crate) use state::millis;
