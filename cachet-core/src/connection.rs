//! Saved connection parameters used to rebuild a severed connection.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Everything needed to establish a fresh connection to one store.
///
/// Adapters keep the descriptor for their whole lifetime; reconnects build a
/// new native client from it instead of reviving the dead one.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    /// Connect timeout.
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep one connection across operations instead of connecting per call.
    pub persistent: bool,
    /// Logical database index (Redis only).
    pub database: i64,
}

impl ConnectionDescriptor {
    /// Create a descriptor with a 5 second timeout and a persistent connection.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            username: None,
            password: None,
            persistent: true,
            database: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth(mut self, username: Option<String>, password: impl Into<String>) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// `host:port`, as used in logs and server lists.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read a descriptor from environment variables.
    ///
    /// Environment variables (with `prefix = "CACHET_REDIS"`):
    /// - `CACHET_REDIS_HOST` (required)
    /// - `CACHET_REDIS_PORT` (required)
    /// - `CACHET_REDIS_TIMEOUT_MS` (default: 5000)
    /// - `CACHET_REDIS_USERNAME`, `CACHET_REDIS_PASSWORD` (optional)
    /// - `CACHET_REDIS_PERSISTENT`: "true" or "false" (default: true)
    /// - `CACHET_REDIS_DB` (default: 0)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();

        let host = var("HOST").ok_or_else(|| ConfigError::MissingRequired {
            field: format!("{}_HOST", prefix),
        })?;
        let raw_port = var("PORT").ok_or_else(|| ConfigError::MissingRequired {
            field: format!("{}_PORT", prefix),
        })?;
        let port = raw_port
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("{}_PORT", prefix),
                value: raw_port.clone(),
                reason: e.to_string(),
            })?;

        let timeout = var("TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));
        let persistent = var("PERSISTENT")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        let database = var("DB").and_then(|s| s.parse().ok()).unwrap_or(0);

        Ok(Self {
            host,
            port,
            timeout,
            username: var("USERNAME"),
            password: var("PASSWORD"),
            persistent,
            database,
        })
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("persistent", &self.persistent)
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let descriptor = ConnectionDescriptor::new("localhost", 6379)
            .with_timeout(Duration::from_millis(250))
            .with_auth(None, "secret")
            .with_persistent(false)
            .with_database(2);

        assert_eq!(descriptor.address(), "localhost:6379");
        assert_eq!(descriptor.timeout, Duration::from_millis(250));
        assert_eq!(descriptor.password.as_deref(), Some("secret"));
        assert!(!descriptor.persistent);
        assert_eq!(descriptor.database, 2);
    }

    #[test]
    fn test_debug_redacts_password() {
        let descriptor = ConnectionDescriptor::new("localhost", 6379).with_auth(None, "hunter2");
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_env_requires_host() {
        let err = ConnectionDescriptor::from_env("CACHET_TEST_UNSET_PREFIX").unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }
}
