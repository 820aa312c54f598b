//! Connection parameters handed to a `ConnectionFactory`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Everything a factory needs to open one physical connection
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Driver name hint (e.g., "sqlite")
    pub driver: Option<String>,
    /// Target address of the database
    pub url: String,
    /// Principal to authenticate as
    pub username: Option<String>,
    /// Credential for `username`
    pub password: Option<String>,
    /// Driver specific settings passed through untouched
    pub driver_properties: BTreeMap<String, String>,
    /// Auto-commit mode applied to every freshly opened connection
    pub auto_commit: Option<bool>,
}

impl ConnectionParams {
    /// Create parameters for the given URL with no credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the driver name hint
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Set the principal and credential
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set a driver property
    pub fn with_driver_property(mut self, key: &str, value: &str) -> Self {
        self.driver_properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the default auto-commit mode
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = Some(auto_commit);
        self
    }

    /// Copy of these parameters authenticating as a different principal
    pub fn for_credentials(&self, username: Option<&str>, password: Option<&str>) -> Self {
        Self {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            ..self.clone()
        }
    }
}

// Hand-written so the credential never reaches a log line.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("driver_properties", &self.driver_properties)
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}
