//! Connection validity checks
//!
//! A pooled connection is checked before it is handed out and again when it
//! is returned. The cheap check asks the driver whether the connection is
//! closed; when pinging is enabled, connections idle longer than the
//! configured threshold also run the ping query against the database.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_connection::health::{ping_database, PingPolicy};
//!
//! // One-off round trip
//! let latency = ping_database(conn.as_ref(), "SELECT 1")?;
//!
//! // The check the pool runs
//! let policy = PingPolicy { enabled: true, query: "SELECT 1", idle_threshold: Duration::ZERO };
//! assert!(policy.check(conn.as_ref(), Duration::from_secs(30)));
//! ```

mod ping;


pub use ping::{PingError, PingPolicy, PingResult, ping_database};
