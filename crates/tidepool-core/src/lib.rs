//! Tidepool Core - Contracts between the connection pool and database drivers
//!
//! This crate defines what the pool needs from the outside world and
//! nothing more:
//!
//! - `Connection` - A live physical session to a database
//! - `ConnectionFactory` - Produces physical connections from `ConnectionParams`
//! - `TidepoolError` - The error type shared by every tidepool crate

mod connection;
mod error;
mod params;

pub use connection::*;
pub use error::*;
pub use params::*;
