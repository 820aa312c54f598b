use anyhow::{Context, Result};
use tidepool_connection::DataSourceConfig;
use tidepool_core::Connection;
use tidepool_driver_sqlite::SqliteConnectionFactory;

use super::probe_query;

const REDACTED: &str = "********";

pub fn check(path: &str, connect: bool) -> Result<()> {
    let config = DataSourceConfig::load(path)
        .with_context(|| format!("Invalid data source configuration in {}", path))?;

    let mut shown = config.clone();
    if shown.connection.password.is_some() {
        shown.connection.password = Some(REDACTED.to_string());
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);

    if connect {
        let query = probe_query(&config.pool).to_string();
        let pool = config
            .build(SqliteConnectionFactory::new())
            .context("Failed to create connection pool")?;
        let conn = pool.acquire().context("Failed to acquire a connection")?;
        conn.execute(&query)
            .with_context(|| format!("Probe query '{}' failed", query))?;
        tracing::info!(connection_id = %conn.id(), query = %query, "connection check passed");
        conn.release();
        pool.close();
    }

    Ok(())
}
