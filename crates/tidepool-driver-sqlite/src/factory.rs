//! Raw connection factory for SQLite

use std::sync::Arc;
use std::time::Duration;

use tidepool_core::{Connection, ConnectionFactory, ConnectionParams, Result, TidepoolError};

use crate::connection::SqliteConnection;

/// Driver property setting the busy timeout; every other property is a PRAGMA
const BUSY_TIMEOUT_PROPERTY: &str = "busy_timeout_ms";

/// Where a SQLite URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    /// A private in-memory database per connection
    Memory,
    /// A database file path or `file:` URI
    Path(String),
}

impl SqliteTarget {
    /// Parse `sqlite::memory:`, `:memory:`, `sqlite:<path>`, `sqlite://<path>`,
    /// `file:<uri>` or a bare path
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        match rest {
            "" => Err(TidepoolError::Configuration(format!(
                "SQLite url '{}' does not name a database",
                url
            ))),
            ":memory:" => Ok(Self::Memory),
            path => Ok(Self::Path(path.to_string())),
        }
    }
}

/// Opens [`SqliteConnection`]s from connection parameters
///
/// SQLite has no authentication, so usernames and passwords are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    pub fn new() -> Self {
        Self
    }

    /// Open a concrete SQLite connection
    pub fn open_sqlite(&self, params: &ConnectionParams) -> Result<SqliteConnection> {
        if let Some(driver) = params.driver.as_deref()
            && driver != "sqlite"
        {
            return Err(TidepoolError::Configuration(format!(
                "SQLite factory cannot open connections for driver '{}'",
                driver
            )));
        }

        let conn = match SqliteTarget::parse(&params.url)? {
            SqliteTarget::Memory => SqliteConnection::open_in_memory()?,
            SqliteTarget::Path(path) => SqliteConnection::open(&path)?,
        };

        for (name, value) in &params.driver_properties {
            if name == BUSY_TIMEOUT_PROPERTY {
                let millis: u64 = value.trim().parse().map_err(|_| {
                    TidepoolError::Configuration(format!(
                        "invalid value '{}' for driver property '{}'",
                        value, name
                    ))
                })?;
                conn.set_busy_timeout(Duration::from_millis(millis))?;
            } else {
                conn.set_pragma(name, value)?;
            }
        }

        Ok(conn)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>> {
        let conn = self.open_sqlite(params)?;
        Ok(Arc::new(conn))
    }
}
