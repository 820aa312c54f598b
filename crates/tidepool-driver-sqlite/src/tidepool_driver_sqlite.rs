//! SQLite connection factory and physical connection

mod connection;
mod factory;

pub use connection::SqliteConnection;
pub use factory::{SqliteConnectionFactory, SqliteTarget};
