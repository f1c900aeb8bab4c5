//! JSON envelope codec for the cross-frame message channel.
//!
//! Every message between host and plugin frame is one [`Envelope`]:
//! a correlation id plus a `call`, `result`, or `error` payload. The
//! serialized form is the flat JSON object
//! `{ id, type, method?, args?, value?, error? }`.
//!
//! Correlation ids are allocated from a per-channel atomic counter and are
//! never reused while a call with that id is pending. Responses are matched
//! solely by id; the underlying transport gives no ordering guarantee.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::WireError;

/// A single framed message crossing the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id pairing a request with its eventual response.
    pub id: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Payload of an [`Envelope`], discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// An outbound invocation: hook dispatch (host → plugin) or privileged
    /// host operation (plugin → host).
    Call {
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Successful response. `value: None` means the callee had no opinion.
    Result {
        #[serde(default)]
        value: Option<Value>,
    },
    /// Failed response.
    Error { error: WireError },
}

impl Envelope {
    pub fn call(id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            payload: Payload::Call {
                method: method.into(),
                args,
            },
        }
    }

    pub fn result(id: u64, value: Option<Value>) -> Self {
        Self {
            id,
            payload: Payload::Result { value },
        }
    }

    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            payload: Payload::Error { error },
        }
    }
}

/// Allocator for correlation ids, unique for the lifetime of one channel.
#[derive(Debug)]
pub struct CorrelationIds(AtomicU64);

impl CorrelationIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Hand out the next id. Relaxed ordering is enough: uniqueness comes
    /// from the fetch-add, and ids carry no cross-thread happens-before.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn call_envelope_serializes_flat() {
        let env = Envelope::call(7, "notice", vec![Value::String("saved".to_string())]);
        let json: Value = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "call");
        assert_eq!(json["method"], "notice");
        assert_eq!(json["args"][0], "saved");
    }

    #[test]
    fn result_envelope_roundtrips() {
        let env = Envelope::result(3, Some(serde_json::json!({"ok": true})));
        let bytes = serde_json::to_vec(&env).expect("serialize");
        let back: Envelope = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(back, env);
    }

    #[test]
    fn absent_args_default_to_empty() {
        let json = r#"{"id":1,"type":"call","method":"getSettings"}"#;
        let env: Envelope = serde_json::from_str(json).expect("deserialize");
        match env.payload {
            Payload::Call { method, args } => {
                assert_eq!(method, "getSettings");
                assert!(args.is_empty());
            }
            other => panic!("expected call payload, got {other:?}"),
        }
    }

    #[test]
    fn error_envelope_carries_code() {
        let env = Envelope::error(9, WireError {
            code: ErrorCode::UnknownMethod,
            message: "unknown method 'frobnicate'".to_string(),
        });
        let json: Value = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "UNKNOWN_METHOD");
    }

    #[test]
    fn correlation_ids_are_unique_and_monotonic() {
        let ids = CorrelationIds::new();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }
}
