//! TTL envelope stored for every cached entry.
//!
//! Every disk and network adapter persists the same two-field JSON document:
//!
//! ```text
//! {"written_at": <unix seconds>, "data": <payload>}
//! ```
//!
//! Expiry is evaluated when the entry is read, not by the store. An envelope
//! read with `ttl` is fresh iff `now < written_at + ttl`; an expired envelope
//! is reported to callers exactly like a miss.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::payload::Payload;
use crate::time::Clock;

/// A payload together with the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// Unix timestamp (seconds) of the save that produced this envelope.
    pub written_at: i64,
    /// The caller's payload.
    pub data: Payload,
}

impl CacheEnvelope {
    /// Wrap a payload written at `written_at`.
    pub fn new(data: Payload, written_at: i64) -> Self {
        Self { written_at, data }
    }

    /// Wrap a payload written now.
    pub fn now(data: Payload, clock: &dyn Clock) -> Self {
        Self::new(data, clock.now())
    }

    /// Returns true if the envelope is still fresh at `now` for `ttl` seconds.
    pub fn is_valid_at(&self, ttl: u64, now: i64) -> bool {
        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        now < self.written_at.saturating_add(ttl)
    }

    /// Returns true if the envelope is still fresh for `ttl` seconds.
    pub fn is_valid(&self, ttl: u64, clock: &dyn Clock) -> bool {
        self.is_valid_at(ttl, clock.now())
    }

    /// Consume the envelope, returning the payload only if still fresh.
    pub fn into_fresh(self, ttl: u64, clock: &dyn Clock) -> Option<Payload> {
        if self.is_valid(ttl, clock) {
            Some(self.data)
        } else {
            None
        }
    }
}

/// Serialize a payload into the stored envelope format, stamped with `clock`.
pub fn encode(payload: &Payload, clock: &dyn Clock) -> Result<String, CodecError> {
    #[derive(Serialize)]
    struct EnvelopeRef<'a> {
        written_at: i64,
        data: &'a Payload,
    }

    serde_json::to_string(&EnvelopeRef {
        written_at: clock.now(),
        data: payload,
    })
    .map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

/// Parse a stored envelope.
pub fn decode(raw: &str) -> Result<CacheEnvelope, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

/// Decode a stored value and return its payload if fresh.
///
/// Undecodable values are logged and treated as a miss.
pub fn fresh_payload(raw: &str, ttl: u64, clock: &dyn Clock) -> Option<Payload> {
    match decode(raw) {
        Ok(envelope) => envelope.into_fresh(ttl, clock),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable cache envelope");
            None
        }
    }
}
