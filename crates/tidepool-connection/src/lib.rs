//! Tidepool Connection - Synchronous database connection pooling
//!
//! This crate hands out reusable physical connections, reclaims them when
//! callers are done, bounds concurrency against the backing database and
//! discards connections that turn out to be broken.

pub mod datasource;
pub mod health;
pub mod pool;

#[cfg(test)]
mod mock;

pub use datasource::{DataSourceConfig, DataSourceFactory, PooledDataSourceFactory};
pub use health::{PingError, PingPolicy, PingResult, ping_database};
pub use pool::{
    ConnectionId, ConnectionPool, ConnectionTag, NO_PING_QUERY, PoolConfig, PoolStats,
    PooledConnection,
};
