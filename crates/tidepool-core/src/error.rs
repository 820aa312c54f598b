//! Error types for tidepool

use thiserror::Error;

/// Core error type for tidepool operations
#[derive(Error, Debug)]
pub enum TidepoolError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// Validation kept failing past the local bad-connection tolerance
    #[error("Bad connection: {0}")]
    BadConnection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No connection became available within the configured wait
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A blocked acquire was interrupted before a connection became available
    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl TidepoolError {
    /// Whether this is an exhaustion failure (nothing became available in time)
    pub fn is_timeout(&self) -> bool {
        matches!(self, TidepoolError::Timeout(_))
    }

    /// Whether the operation was interrupted rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TidepoolError::Cancelled)
    }

    /// Whether repeated validation failures exhausted the bad-connection tolerance
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, TidepoolError::BadConnection(_))
    }
}

/// Result type alias for tidepool operations
pub type Result<T> = std::result::Result<T, TidepoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(TidepoolError::Timeout("waited 100ms".into()).is_timeout());
        assert!(TidepoolError::Cancelled.is_cancelled());
        assert!(TidepoolError::BadConnection("gave up".into()).is_bad_connection());
        assert!(!TidepoolError::Connection("refused".into()).is_timeout());
    }

    #[test]
    fn test_error_display() {
        let err = TidepoolError::Timeout("no connection within 100ms".into());
        assert_eq!(err.to_string(), "Timeout: no connection within 100ms");
        assert_eq!(TidepoolError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_toml_error_conversion() {
        fn parse(text: &str) -> Result<toml::Value> {
            Ok(toml::from_str(text)?)
        }
        let err = parse("url = ").unwrap_err();
        assert!(matches!(err, TidepoolError::TomlParse(_)));
    }
}
