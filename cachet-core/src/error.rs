//! Error types for cachet operations

use thiserror::Error;

/// Failures reported by a native store client, already classified.
///
/// Classification decides whether the resilient executor retries:
/// `Connection` failures are retried with reconnect, everything else is
/// surfaced immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection to {backend} failed: {reason}")]
    Connection { backend: String, reason: String },

    #[error("Command rejected by {backend}: {reason}")]
    Command { backend: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl StoreError {
    /// Build a connection failure.
    pub fn connection(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Build a command failure.
    pub fn command(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Build a filesystem failure.
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Returns true if the executor should reconnect and retry.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Envelope encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Envelope encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Envelope decoding failed: {reason}")]
    Decode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all cachet errors.
///
/// Misses, empty input and unsupported operations are never errors; they are
/// ordinary return values of the adapter contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{backend} unreachable: {operation} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        backend: String,
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("Pool error: {reason}")]
    Pool { reason: String },
}

impl CachetError {
    /// Short, stable name of the error variant, used as a telemetry label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::Connection { .. }) => "connection",
            Self::Store(StoreError::Command { .. }) => "command",
            Self::Store(StoreError::Io { .. }) => "io",
            Self::Codec(_) => "codec",
            Self::Config(_) => "config",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Pool { .. } => "pool",
        }
    }

    /// Returns true if the backend was unreachable after every retry.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Result type alias for cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_connection() {
        let err = StoreError::connection("redis", "Connection lost");
        let msg = format!("{}", err);
        assert!(msg.contains("redis"));
        assert!(msg.contains("Connection lost"));
        assert!(err.is_connection());
    }

    #[test]
    fn test_store_error_command_is_not_connection() {
        let err = StoreError::command("redis", "WRONGTYPE");
        assert!(!err.is_connection());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = CachetError::RetriesExhausted {
            backend: "redis-cluster".to_string(),
            operation: "load".to_string(),
            attempts: 4,
            reason: "went away".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("redis-cluster"));
        assert!(msg.contains("load"));
        assert!(msg.contains("4 attempts"));
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_retries".to_string(),
            value: "42".to_string(),
            reason: "must be at most 10".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_retries"));
        assert!(msg.contains("42"));
        assert!(msg.contains("must be at most 10"));
    }

    #[test]
    fn test_cachet_error_from_variants() {
        let store = CachetError::from(StoreError::command("memory", "bad"));
        assert!(matches!(store, CachetError::Store(_)));
        assert_eq!(store.kind(), "command");

        let codec = CachetError::from(CodecError::Decode {
            reason: "eof".to_string(),
        });
        assert!(matches!(codec, CachetError::Codec(_)));
        assert_eq!(codec.kind(), "codec");

        let config = CachetError::from(ConfigError::MissingRequired {
            field: "host".to_string(),
        });
        assert!(matches!(config, CachetError::Config(_)));
        assert!(!config.is_unreachable());
    }
}
