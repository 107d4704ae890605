//! Cache-wide settings.
//!
//! Loaded from environment variables or a TOML document, with defaults that
//! suit development. Call [`CacheSettings::validate`] before wiring adapters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CachetError, CachetResult, ConfigError};
use crate::retry::{RetryPolicy, MAX_RETRIES_LIMIT};

/// Settings shared by the facade, network adapters and pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Retries after a connection failure (0 to 10).
    pub max_retries: u32,
    /// Delay between retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Preserve key case instead of folding keys to lower case.
    pub case_sensitive: bool,
    /// Number of adapter instances in a pooled adapter.
    pub pool_size: usize,
    /// How long a caller waits for a pooled instance, in milliseconds.
    pub pool_wait_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 1000,
            case_sensitive: false,
            pool_size: 10,
            pool_wait_timeout_ms: 3000,
        }
    }
}

impl CacheSettings {
    /// Create CacheSettings from environment variables.
    ///
    /// Environment variables:
    /// - `CACHET_MAX_RETRIES`: Retries after a connection failure (default: 0)
    /// - `CACHET_RETRY_DELAY_MS`: Delay between retries (default: 1000)
    /// - `CACHET_CASE_SENSITIVE`: "true" or "false" (default: false)
    /// - `CACHET_POOL_SIZE`: Pooled adapter instances (default: 10)
    /// - `CACHET_POOL_WAIT_TIMEOUT_MS`: Pool borrow timeout (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_retries = std::env::var("CACHET_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_delay_ms = std::env::var("CACHET_RETRY_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.retry_delay_ms);

        let case_sensitive = std::env::var("CACHET_CASE_SENSITIVE")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.case_sensitive);

        let pool_size = std::env::var("CACHET_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pool_size);

        let pool_wait_timeout_ms = std::env::var("CACHET_POOL_WAIT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pool_wait_timeout_ms);

        Self {
            max_retries,
            retry_delay_ms,
            case_sensitive,
            pool_size,
            pool_wait_timeout_ms,
        }
    }

    /// Parse settings from a TOML document. Missing fields take defaults.
    pub fn from_toml_str(raw: &str) -> CachetResult<Self> {
        let settings: Self = toml::from_str(raw).map_err(|e| {
            CachetError::Config(ConfigError::InvalidValue {
                field: "settings".to_string(),
                value: "<toml>".to_string(),
                reason: e.to_string(),
            })
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - max_retries <= 10
    /// - pool_size > 0
    pub fn validate(&self) -> CachetResult<()> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "max_retries".to_string(),
                value: self.max_retries.to_string(),
                reason: format!("max_retries must be at most {}", MAX_RETRIES_LIMIT),
            }));
        }

        if self.pool_size == 0 {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: self.pool_size.to_string(),
                reason: "pool_size must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay_ms)
    }

    pub fn pool_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.case_sensitive);
        assert_eq!(settings.retry_policy().max_attempts(), 1);
    }

    #[test]
    fn test_validate_rejects_too_many_retries() {
        let settings = CacheSettings {
            max_retries: 11,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, CachetError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let settings = CacheSettings {
            pool_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let settings = CacheSettings::from_toml_str(
            r#"
            max_retries = 3
            retry_delay_ms = 50
            case_sensitive = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_delay_ms, 50);
        assert!(settings.case_sensitive);
        assert_eq!(settings.pool_size, 10);
    }

    #[test]
    fn test_from_toml_str_validates() {
        assert!(CacheSettings::from_toml_str("max_retries = 20").is_err());
        assert!(CacheSettings::from_toml_str("max_retries = \"three\"").is_err());
    }
}
