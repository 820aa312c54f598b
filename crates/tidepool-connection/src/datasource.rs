//! Data source configuration
//!
//! A data source is a configured [`ConnectionPool`]. It can be described by a
//! TOML document:
//!
//! ```toml
//! [connection]
//! driver = "sqlite"
//! url = "sqlite:app.db"
//!
//! [pool]
//! max_active = 4
//! ping_enabled = true
//! ping_query = "SELECT 1"
//! ```
//!
//! or by a flat string property map using the classic pooled data source
//! property names (`url`, `poolMaximumActiveConnections`, ...).

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tidepool_core::{ConnectionFactory, ConnectionParams, Result, TidepoolError};

use crate::pool::{ConnectionPool, PoolConfig};

/// Prefix of properties handed to the driver unchanged
const DRIVER_PROPERTY_PREFIX: &str = "driver.";

/// Connection parameters plus pool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub connection: ConnectionParams,
    pub pool: PoolConfig,
}

impl DataSourceConfig {
    pub fn new(connection: ConnectionParams, pool: PoolConfig) -> Self {
        Self { connection, pool }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded data source configuration");
        Self::from_toml_str(&text)
    }

    /// Build a configuration from a flat property map
    pub fn from_properties<'a>(
        properties: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in properties {
            config.set_property(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.url.trim().is_empty() {
            return Err(TidepoolError::Configuration(
                "data source url is not set".into(),
            ));
        }
        self.pool.validate()
    }

    /// Apply one named property
    ///
    /// Fails with a configuration error for unknown keys and values that do
    /// not parse.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(name) = key.strip_prefix(DRIVER_PROPERTY_PREFIX) {
            self.connection
                .driver_properties
                .insert(name.to_string(), value.to_string());
            return Ok(());
        }

        let pool = self.pool.clone();
        self.pool = match key {
            "driver" => {
                self.connection.driver = Some(value.to_string());
                pool
            }
            "url" => {
                self.connection.url = value.to_string();
                pool
            }
            "username" => {
                self.connection.username = Some(value.to_string());
                pool
            }
            "password" => {
                self.connection.password = Some(value.to_string());
                pool
            }
            "defaultAutoCommit" => {
                self.connection.auto_commit = Some(parse(key, value)?);
                pool
            }
            "poolMaximumActiveConnections" => pool.with_max_active(parse(key, value)?),
            "poolMaximumIdleConnections" => pool.with_max_idle(parse(key, value)?),
            "poolMaximumCheckoutTime" => pool.with_max_checkout_time_ms(parse(key, value)?),
            "poolTimeToWait" => pool.with_time_to_wait_ms(parse(key, value)?),
            "poolMaximumLocalBadConnectionTolerance" => {
                pool.with_local_bad_connection_tolerance(parse(key, value)?)
            }
            "poolPingQuery" => pool.with_ping_query(value),
            "poolPingEnabled" => pool.with_ping_enabled(parse(key, value)?),
            "poolPingConnectionsNotUsedFor" => {
                pool.with_ping_idle_threshold_ms(parse(key, value)?)
            }
            _ => {
                return Err(TidepoolError::Configuration(format!(
                    "unknown data source property '{}'",
                    key
                )));
            }
        };
        Ok(())
    }

    /// Create a pool from this configuration
    pub fn build<F: ConnectionFactory>(self, factory: F) -> Result<ConnectionPool> {
        self.validate()?;
        ConnectionPool::new(self.connection, self.pool, factory)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        TidepoolError::Configuration(format!(
            "invalid value '{}' for data source property '{}'",
            value, key
        ))
    })
}

/// Produces a configured data source from string properties
pub trait DataSourceFactory {
    type DataSource;

    /// Apply a property map to the data source
    fn set_properties(&mut self, properties: &BTreeMap<String, String>) -> Result<()>;

    /// The configured data source
    fn data_source(&self) -> Result<Self::DataSource>;
}

/// [`DataSourceFactory`] for pooled data sources
///
/// Properties may be applied repeatedly; each call reconfigures the same
/// pool, closing every connection it holds.
pub struct PooledDataSourceFactory {
    pool: ConnectionPool,
}

impl PooledDataSourceFactory {
    /// Wrap a raw connection factory; the pool starts with default settings
    /// and no url until properties are applied
    pub fn new<F: ConnectionFactory>(factory: F) -> Result<Self> {
        let pool = ConnectionPool::new(ConnectionParams::default(), PoolConfig::default(), factory)?;
        Ok(Self { pool })
    }
}

impl DataSourceFactory for PooledDataSourceFactory {
    type DataSource = ConnectionPool;

    fn set_properties(&mut self, properties: &BTreeMap<String, String>) -> Result<()> {
        let mut config = DataSourceConfig::new(self.pool.params(), self.pool.config());
        for (key, value) in properties {
            config.set_property(key, value)?;
        }
        config.validate()?;
        self.pool.reset(config.connection, config.pool)
    }

    fn data_source(&self) -> Result<ConnectionPool> {
        if self.pool.params().url.trim().is_empty() {
            return Err(TidepoolError::Configuration(
                "data source url is not set".into(),
            ));
        }
        Ok(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mock::MockConnectionFactory;

    fn properties(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_toml_str() {
        let config = DataSourceConfig::from_toml_str(
            r#"
            [connection]
            driver = "mock"
            url = "mock://db"
            username = "app"
            auto_commit = false

            [connection.driver_properties]
            busy_timeout_ms = "250"

            [pool]
            max_active = 4
            maxIdle = 2
            ping_enabled = true
            ping_query = "SELECT 1"
            "#,
        )
        .expect("parse");

        assert_eq!(config.connection.url, "mock://db");
        assert_eq!(config.connection.driver.as_deref(), Some("mock"));
        assert_eq!(config.connection.auto_commit, Some(false));
        assert_eq!(
            config.connection.driver_properties.get("busy_timeout_ms").map(String::as_str),
            Some("250")
        );
        assert_eq!(config.pool.max_active(), 4);
        assert_eq!(config.pool.max_idle(), 2);
        assert!(config.pool.ping_enabled());
    }

    #[test]
    fn test_from_toml_str_rejects_invalid() {
        let err = DataSourceConfig::from_toml_str("[pool]\nmax_active = 1").expect_err("no url");
        assert!(matches!(err, TidepoolError::Configuration(_)));

        let err = DataSourceConfig::from_toml_str("[connection\nurl = ").expect_err("bad toml");
        assert!(matches!(err, TidepoolError::TomlParse(_)));

        let err = DataSourceConfig::from_toml_str(
            "[connection]\nurl = \"mock://db\"\n[pool]\nping_enabled = true",
        )
        .expect_err("ping without query");
        assert!(matches!(err, TidepoolError::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[connection]\nurl = \"mock://db\"\n[pool]\ntimeToWait = 50")
            .expect("write");

        let config = DataSourceConfig::load(file.path()).expect("load");
        assert_eq!(config.pool.time_to_wait(), Duration::from_millis(50));

        let missing = file.path().with_extension("missing");
        let err = DataSourceConfig::load(&missing).expect_err("missing file");
        assert!(matches!(err, TidepoolError::Io(_)));
    }

    #[test]
    fn test_from_properties() {
        let config = DataSourceConfig::from_properties([
            ("driver", "mock"),
            ("url", "mock://db"),
            ("username", "app"),
            ("password", "secret"),
            ("defaultAutoCommit", "false"),
            ("poolMaximumActiveConnections", "3"),
            ("poolMaximumIdleConnections", "1"),
            ("poolMaximumCheckoutTime", "1000"),
            ("poolTimeToWait", "500"),
            ("poolMaximumLocalBadConnectionTolerance", "2"),
            ("poolPingQuery", "SELECT 1"),
            ("poolPingEnabled", "true"),
            ("poolPingConnectionsNotUsedFor", "60000"),
            ("driver.journal_mode", "wal"),
        ])
        .expect("properties");

        let expected_pool = PoolConfig::new()
            .with_max_active(3)
            .with_max_idle(1)
            .with_max_checkout_time_ms(1_000)
            .with_time_to_wait_ms(500)
            .with_local_bad_connection_tolerance(2)
            .with_ping_query("SELECT 1")
            .with_ping_enabled(true)
            .with_ping_idle_threshold_ms(60_000);
        assert_eq!(config.pool, expected_pool);
        assert_eq!(config.connection.username.as_deref(), Some("app"));
        assert_eq!(config.connection.auto_commit, Some(false));
        assert_eq!(
            config.connection.driver_properties.get("journal_mode").map(String::as_str),
            Some("wal")
        );
    }

    #[test]
    fn test_set_property_errors() {
        let mut config = DataSourceConfig::default();

        let err = config.set_property("poolSize", "3").expect_err("unknown key");
        assert!(err.to_string().contains("poolSize"));

        let err = config
            .set_property("poolMaximumActiveConnections", "-1")
            .expect_err("negative");
        assert!(matches!(err, TidepoolError::Configuration(_)));

        let err = config.set_property("poolPingEnabled", "yes").expect_err("not a bool");
        assert!(matches!(err, TidepoolError::Configuration(_)));

        // Failed updates leave the configuration untouched
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_build_pool() {
        let config = DataSourceConfig::new(
            ConnectionParams::new("mock://db"),
            PoolConfig::new().with_max_active(2),
        );
        let pool = config.build(MockConnectionFactory::new()).expect("build");
        assert_eq!(pool.config().max_active(), 2);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_pooled_data_source_factory() {
        let connections = MockConnectionFactory::new();
        let mut factory =
            PooledDataSourceFactory::new(std::sync::Arc::clone(&connections)).expect("factory");

        assert!(factory.data_source().is_err());

        factory
            .set_properties(&properties(&[
                ("url", "mock://db"),
                ("username", "app"),
                ("poolMaximumIdleConnections", "1"),
            ]))
            .expect("set properties");

        let pool = factory.data_source().expect("data source");
        assert_eq!(pool.params().url, "mock://db");
        assert_eq!(pool.config().max_idle(), 1);
        pool.acquire().expect("acquire").release();
        assert_eq!(pool.stats().idle(), 1);

        // Reapplying properties reconfigures the same pool
        factory
            .set_properties(&properties(&[("poolTimeToWait", "100")]))
            .expect("set properties");
        assert_eq!(pool.config().time_to_wait(), Duration::from_millis(100));
        assert_eq!(pool.config().max_idle(), 1);
        assert_eq!(pool.stats().idle(), 0);
        assert_eq!(connections.closed(), 1);
    }

    #[test]
    fn test_pooled_data_source_factory_rejects_unknown_property() {
        let mut factory =
            PooledDataSourceFactory::new(MockConnectionFactory::new()).expect("factory");
        let err = factory
            .set_properties(&properties(&[("url", "mock://db"), ("colour", "blue")]))
            .expect_err("unknown property");
        assert!(matches!(err, TidepoolError::Configuration(_)));
    }
}
