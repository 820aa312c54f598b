//! Physical connection and connection factory traits

use crate::{ConnectionParams, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of executing a single statement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResult {
    /// Whether the statement produced a result set
    pub is_query: bool,
    /// Rows read from the result set (0 if `is_query` is false)
    pub rows_returned: u64,
    /// Rows affected (0 if `is_query` is true)
    pub affected_rows: u64,
}

impl StatementResult {
    /// Result of a statement that returned rows
    pub fn query(rows_returned: u64) -> Self {
        Self {
            is_query: true,
            rows_returned,
            affected_rows: 0,
        }
    }

    /// Result of a statement that modified data
    pub fn command(affected_rows: u64) -> Self {
        Self {
            is_query: false,
            rows_returned: 0,
            affected_rows,
        }
    }
}

/// A live physical session to a database.
///
/// All methods take `&self`: the pool may roll back and close a connection
/// that a caller still references when it reclaims an overdue checkout, so
/// drivers keep their session behind interior mutability.
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement, draining any rows it returns
    fn execute(&self, sql: &str) -> Result<StatementResult>;

    /// Whether each statement commits on its own
    fn auto_commit(&self) -> Result<bool>;

    /// Switch between auto-commit and manual transaction mode
    fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    /// Commit the open transaction, if any
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction, if any
    fn rollback(&self) -> Result<()>;

    /// Close the connection
    fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Produces physical connections.
///
/// Implementations perform network or file I/O and are always invoked
/// without any pool lock held.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open one live, authenticated connection or fail
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>>;
}

impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>> {
        (**self).open(params)
    }
}
