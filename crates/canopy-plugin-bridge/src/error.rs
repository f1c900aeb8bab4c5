//! Fault taxonomy for the hook dispatch bridge.
//!
//! Faults are scoped to a single call or a single plugin. Nothing in this
//! taxonomy is allowed to abort sibling invocations: a hook that times out,
//! returns garbage, or throws simply contributes "no opinion" to the host.
//!
//! Errors that cross the frame boundary travel as a [`WireError`] with a
//! stable machine-readable code; the local [`BridgeError`] enum carries the
//! richer Rust-side detail.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// A fault raised while dispatching hooks or driving the transport channel.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No response arrived within the per-call deadline.
    #[error("call '{method}' timed out after {}ms", deadline.as_millis())]
    Timeout { method: String, deadline: Duration },

    /// The other side invoked a method the capability registry does not know.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// A hook invocation named a context mode this build does not recognize.
    /// Indicates a protocol version mismatch between host and plugin.
    #[error("unknown context mode '{0}'")]
    UnknownMode(String),

    /// A plugin's return value failed shape validation. Degrades to
    /// "no opinion" at the dispatch layer; never shown to end users.
    #[error("hook '{0}' returned a value that failed shape validation")]
    ValidationFailure(String),

    /// A plugin hook handler returned an error or panicked.
    #[error("hook handler faulted: {0}")]
    HandlerFault(String),

    /// The frame was torn down; all pending calls reject with this uniformly.
    #[error("channel closed")]
    ChannelClosed,

    /// Envelope or payload (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The remote side answered with an error envelope that does not map to
    /// a more specific local variant.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Machine-readable code carried in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    UnknownMethod,
    UnknownMode,
    ValidationFailure,
    HandlerFault,
    Internal,
}

/// The error form that crosses the frame boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl BridgeError {
    /// Convert into the wire representation for an error envelope.
    pub fn to_wire(&self) -> WireError {
        let code = match self {
            BridgeError::Timeout { .. } => ErrorCode::Timeout,
            BridgeError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            BridgeError::UnknownMode(_) => ErrorCode::UnknownMode,
            BridgeError::ValidationFailure(_) => ErrorCode::ValidationFailure,
            BridgeError::HandlerFault(_) => ErrorCode::HandlerFault,
            BridgeError::ChannelClosed | BridgeError::Codec(_) | BridgeError::Remote(_) => ErrorCode::Internal,
        };
        WireError {
            code,
            message: self.to_string(),
        }
    }

    /// Reconstruct a local error from a received error envelope.
    ///
    /// Codes that carry a payload (method/mode names) keep the remote
    /// message as their detail string.
    pub fn from_wire(wire: WireError) -> Self {
        match wire.code {
            ErrorCode::UnknownMethod => BridgeError::UnknownMethod(wire.message),
            ErrorCode::UnknownMode => BridgeError::UnknownMode(wire.message),
            ErrorCode::ValidationFailure => BridgeError::ValidationFailure(wire.message),
            ErrorCode::HandlerFault => BridgeError::HandlerFault(wire.message),
            ErrorCode::Timeout | ErrorCode::Internal => BridgeError::Remote(wire.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip_keeps_code() {
        let err = BridgeError::UnknownMethod("frobnicate".to_string());
        let wire = err.to_wire();
        assert_eq!(wire.code, ErrorCode::UnknownMethod);
        let back = BridgeError::from_wire(wire);
        assert!(matches!(back, BridgeError::UnknownMethod(_)));
    }

    #[test]
    fn timeout_maps_to_remote_on_receipt() {
        let err = BridgeError::Timeout {
            method: "loadUsers".to_string(),
            deadline: Duration::from_secs(30),
        };
        let wire = err.to_wire();
        assert_eq!(wire.code, ErrorCode::Timeout);
        // A remote timeout is opaque to the local caller.
        assert!(matches!(BridgeError::from_wire(wire), BridgeError::Remote(_)));
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UnknownMethod).expect("serialize");
        assert_eq!(json, "\"UNKNOWN_METHOD\"");
    }
}
