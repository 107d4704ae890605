//! Cached payloads and the typed result of a save.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value: either text or an arbitrary structured value.
///
/// Text payloads are JSON strings; anything else is structured. The wrapper
/// serializes transparently so it drops straight into the envelope's `data`
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Create a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    /// Create a structured payload.
    pub fn structured(value: Value) -> Self {
        Self(value)
    }

    /// Returns the text if this is a text payload.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the payload and return the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Empty payloads are never stored: `""`, `null`, `[]` and `{}`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::structured(value)
    }
}

/// Why a save did not store anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotSavedReason {
    /// The key was empty; the store was not contacted.
    EmptyKey,
    /// The payload was empty; the store was not contacted.
    EmptyPayload,
    /// The adapter never stores data (e.g. the `None` adapter).
    Unsupported,
    /// The store answered but refused the write.
    Rejected,
}

/// Outcome of a save.
///
/// A successful save echoes the payload back so callers can keep working with
/// "what got stored" without re-reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(Payload),
    NotSaved(NotSavedReason),
}

impl SaveOutcome {
    /// Returns true if the payload was stored.
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved(_))
    }

    /// Borrow the echoed payload, if stored.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Saved(payload) => Some(payload),
            Self::NotSaved(_) => None,
        }
    }

    /// Consume the outcome and return the echoed payload, if stored.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Saved(payload) => Some(payload),
            Self::NotSaved(_) => None,
        }
    }

    /// The reason nothing was stored, if any.
    pub fn reason(&self) -> Option<NotSavedReason> {
        match self {
            Self::Saved(_) => None,
            Self::NotSaved(reason) => Some(*reason),
        }
    }

    /// Precondition shared by every adapter: empty keys and payloads are
    /// rejected before any store is contacted.
    pub fn precheck(key: &str, payload: &Payload) -> Option<Self> {
        if key.is_empty() {
            return Some(Self::NotSaved(NotSavedReason::EmptyKey));
        }
        if payload.is_empty() {
            return Some(Self::NotSaved(NotSavedReason::EmptyPayload));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payloads() {
        assert!(Payload::text("").is_empty());
        assert!(Payload::structured(Value::Null).is_empty());
        assert!(Payload::structured(json!([])).is_empty());
        assert!(Payload::structured(json!({})).is_empty());

        assert!(!Payload::text("0").is_empty());
        assert!(!Payload::structured(json!(0)).is_empty());
        assert!(!Payload::structured(json!(false)).is_empty());
        assert!(!Payload::structured(json!(["test", "data"])).is_empty());
    }

    #[test]
    fn test_text_and_structured_access() {
        let text = Payload::from("pink");
        assert_eq!(text.as_str(), Some("pink"));

        let structured = Payload::from(json!({"name": "a"}));
        assert_eq!(structured.as_str(), None);
        assert_eq!(structured.as_value()["name"], "a");
    }

    #[test]
    fn test_payload_serializes_transparently() {
        let payload = Payload::structured(json!({"name": "a"}));
        let encoded = serde_json::to_string(&payload).unwrap();
        assert_eq!(encoded, r#"{"name":"a"}"#);

        let text: Payload = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, Payload::text("hello"));
    }

    #[test]
    fn test_precheck() {
        let payload = Payload::text("data");
        assert_eq!(
            SaveOutcome::precheck("", &payload),
            Some(SaveOutcome::NotSaved(NotSavedReason::EmptyKey))
        );
        assert_eq!(
            SaveOutcome::precheck("key", &Payload::text("")),
            Some(SaveOutcome::NotSaved(NotSavedReason::EmptyPayload))
        );
        assert_eq!(SaveOutcome::precheck("key", &payload), None);
    }

    #[test]
    fn test_save_outcome_accessors() {
        let saved = SaveOutcome::Saved(Payload::text("x"));
        assert!(saved.is_saved());
        assert_eq!(saved.payload(), Some(&Payload::text("x")));
        assert_eq!(saved.reason(), None);

        let not_saved = SaveOutcome::NotSaved(NotSavedReason::Unsupported);
        assert!(!not_saved.is_saved());
        assert_eq!(not_saved.reason(), Some(NotSavedReason::Unsupported));
        assert_eq!(not_saved.into_payload(), None);
    }
}
