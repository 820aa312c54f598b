//! SQLite connection implementation

use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::time::Duration;
use tidepool_core::{Connection, Result, StatementResult, TidepoolError};

/// SQLite connection wrapper
///
/// In manual-commit mode a `BEGIN DEFERRED` is issued lazily before the first
/// statement, and `commit`/`rollback` end whatever transaction is open.
pub struct SqliteConnection {
    conn: Mutex<Option<RusqliteConnection>>,
    auto_commit: Mutex<bool>,
    location: String,
}

impl SqliteConnection {
    /// Open a SQLite database file, or a `file:` URI
    pub fn open(path: &str) -> Result<Self> {
        tracing::debug!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        // Validate that parent directory exists for non-URI paths
        if !expanded_path.starts_with("file:") {
            let file_path = std::path::Path::new(&expanded_path);
            if let Some(parent) = file_path.parent()
                && !parent.exists()
            {
                return Err(TidepoolError::Connection(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let conn = RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
            TidepoolError::Connection(format!(
                "Failed to open SQLite database at '{}': {}",
                expanded_path, e
            ))
        })?;

        // WAL lets readers proceed while another pooled connection writes
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
            TidepoolError::Connection(format!("Failed to set journal mode: {}", e))
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            TidepoolError::Connection(format!("Failed to set synchronous mode: {}", e))
        })?;

        Self::from_rusqlite(conn, expanded_path)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = RusqliteConnection::open_in_memory().map_err(|e| {
            TidepoolError::Connection(format!("Failed to open in-memory database: {}", e))
        })?;
        Self::from_rusqlite(conn, ":memory:".to_string())
    }

    fn from_rusqlite(conn: RusqliteConnection, location: String) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            TidepoolError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        tracing::debug!(location = %location, "SQLite database connection established");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            auto_commit: Mutex::new(true),
            location,
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let home_path = std::path::PathBuf::from(home);
                home_path.join(rest).to_string_lossy().to_string()
            } else {
                return Err(TidepoolError::Configuration(
                    "Unable to determine HOME directory".into(),
                ));
            }
        } else if path.starts_with('~') {
            return Err(TidepoolError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    /// Where this connection points (file path, URI or `:memory:`)
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Set how long a statement waits on a locked database before failing
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.with_conn(|conn| {
            conn.busy_timeout(timeout)
                .map_err(|e| TidepoolError::Connection(format!("Failed to set busy timeout: {}", e)))
        })
    }

    /// Set a `PRAGMA` on this connection
    pub fn set_pragma(&self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TidepoolError::Configuration(format!(
                "invalid SQLite pragma name '{}'",
                name
            )));
        }
        self.with_conn(|conn| {
            conn.pragma_update(None, name, value).map_err(|e| {
                TidepoolError::Connection(format!("Failed to set pragma {}: {}", name, e))
            })
        })
    }

    /// Whether a transaction is currently open
    pub fn in_transaction(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&RusqliteConnection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(TidepoolError::Connection(format!(
                "SQLite connection to {} is closed",
                self.location
            ))),
        }
    }

    /// End the open transaction, if any, with `COMMIT` or `ROLLBACK`
    fn finish_transaction(&self, statement: &str) -> Result<()> {
        self.with_conn(|conn| {
            if conn.is_autocommit() {
                return Ok(());
            }
            tracing::debug!(statement, "ending SQLite transaction");
            conn.execute_batch(statement).map_err(|e| {
                TidepoolError::Query(format!("Failed to {} transaction: {}", statement, e))
            })
        })
    }
}

impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    fn execute(&self, sql: &str) -> Result<StatementResult> {
        let manual_commit = !*self.auto_commit.lock();
        self.with_conn(|conn| {
            if manual_commit && conn.is_autocommit() {
                // DEFERRED means the write lock is only acquired when the first write occurs
                conn.execute_batch("BEGIN DEFERRED").map_err(|e| {
                    TidepoolError::Query(format!("Failed to begin transaction: {}", e))
                })?;
            }

            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| TidepoolError::Query(format!("Failed to prepare statement: {}", e)))?;

            if stmt.column_count() > 0 {
                let mut rows = stmt
                    .query([])
                    .map_err(|e| TidepoolError::Query(format!("Failed to execute query: {}", e)))?;
                let mut count = 0u64;
                while rows
                    .next()
                    .map_err(|e| TidepoolError::Query(format!("Failed to fetch row: {}", e)))?
                    .is_some()
                {
                    count += 1;
                }
                tracing::debug!(row_count = count, "query executed");
                Ok(StatementResult::query(count))
            } else {
                let affected = stmt.execute([]).map_err(|e| {
                    TidepoolError::Query(format!("Failed to execute statement: {}", e))
                })?;
                tracing::debug!(affected_rows = affected, "statement executed");
                Ok(StatementResult::command(affected as u64))
            }
        })
    }

    fn auto_commit(&self) -> Result<bool> {
        if self.is_closed() {
            return Err(TidepoolError::Connection(format!(
                "SQLite connection to {} is closed",
                self.location
            )));
        }
        Ok(*self.auto_commit.lock())
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        // Switching to auto-commit commits the open transaction
        if auto_commit {
            self.finish_transaction("COMMIT")?;
        }
        *self.auto_commit.lock() = auto_commit;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.finish_transaction("ROLLBACK")
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        tracing::debug!(location = %self.location, "closing SQLite connection");
        conn.close().map_err(|(_, e)| {
            TidepoolError::Connection(format!("Failed to close SQLite connection: {}", e))
        })
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}
