//! Retry, backoff and reconnect wrapper for one network-backed store.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::error::{CachetError, CachetResult, StoreError};
use crate::retry::{clamp_retries, Backoff, RetryPolicy};

/// Builds fresh native connections from an adapter's saved descriptor.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Cheap-to-clone handle to a live connection.
    type Connection: Clone + Send + Sync + 'static;

    /// Backend name used in errors and logs.
    fn backend(&self) -> &str;

    /// Establish a brand new connection.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Whether one connection is kept across operations. Non-persistent
    /// connectors are asked for a fresh connection on every attempt.
    fn persistent(&self) -> bool {
        true
    }
}

/// Runs store operations with retry on connection failure.
///
/// The executor owns a single connection slot. Operations receive a cloned
/// snapshot of the connection in the slot; a reconnect replaces the slot
/// contents in one write, so a snapshot is always either the old or the new
/// connection, never a mix.
///
/// A failing operation is attempted at most `max_retries + 1` times. Command
/// errors are returned immediately; connection errors trigger a sleep, a
/// reconnect from the descriptor, and another attempt. When attempts run out
/// the executor returns [`CachetError::RetriesExhausted`].
pub struct ResilientExecutor<C: Connector> {
    connector: C,
    slot: RwLock<Option<C::Connection>>,
    max_retries: AtomicU32,
    retry_delay_ms: AtomicU64,
    backoff: Backoff,
}

impl<C: Connector> ResilientExecutor<C> {
    /// Create an executor that connects lazily on first use.
    pub fn new(connector: C, policy: RetryPolicy, backoff: Backoff) -> Self {
        Self {
            connector,
            slot: RwLock::new(None),
            max_retries: AtomicU32::new(clamp_retries(policy.max_retries)),
            retry_delay_ms: AtomicU64::new(policy.retry_delay_ms),
            backoff,
        }
    }

    /// Create an executor around an already established connection.
    pub fn with_connection(
        connector: C,
        connection: C::Connection,
        policy: RetryPolicy,
        backoff: Backoff,
    ) -> Self {
        let executor = Self::new(connector, policy, backoff);
        Self {
            slot: RwLock::new(Some(connection)),
            ..executor
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Current retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.load(Ordering::Relaxed),
            retry_delay_ms: self.retry_delay_ms.load(Ordering::Relaxed),
        }
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.max_retries
            .store(clamp_retries(max_retries), Ordering::Relaxed);
    }

    pub fn set_retry_delay(&self, retry_delay_ms: u64) {
        self.retry_delay_ms.store(retry_delay_ms, Ordering::Relaxed);
    }

    /// Snapshot of the live connection, connecting if the slot is empty.
    pub async fn connection(&self) -> Result<C::Connection, StoreError> {
        if !self.connector.persistent() {
            return self.connector.connect().await;
        }

        if let Some(connection) = self.slot.read().await.as_ref() {
            return Ok(connection.clone());
        }

        let mut slot = self.slot.write().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.connector.connect().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Replace the slot with a fresh connection built from the descriptor.
    ///
    /// A failed reconnect empties the slot; the next attempt connects again.
    pub async fn reconnect(&self) {
        if !self.connector.persistent() {
            return;
        }

        match self.connector.connect().await {
            Ok(connection) => {
                *self.slot.write().await = Some(connection);
                debug!(backend = self.connector.backend(), "Reconnected");
            }
            Err(e) => {
                *self.slot.write().await = None;
                warn!(backend = self.connector.backend(), error = %e, "Reconnect failed");
            }
        }
    }

    /// Run `op` against the live connection, retrying connection failures.
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> CachetResult<T>
    where
        F: Fn(C::Connection) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let policy = self.policy();
        let max_attempts = policy.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match self.connection().await {
                Ok(connection) => op(connection).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            backend = self.connector.backend(),
                            operation,
                            attempt,
                            "Operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_connection() => return Err(e.into()),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                error!(
                    backend = self.connector.backend(),
                    operation,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(CachetError::RetriesExhausted {
                    backend: self.connector.backend().to_string(),
                    operation: operation.to_string(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            let delay = self.backoff.delay(policy.retry_delay(), attempt);
            warn!(
                backend = self.connector.backend(),
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Connection failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.reconnect().await;
        }
    }
}
