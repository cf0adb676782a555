//! Error types for the gateway client.

use std::time::Duration;

use quill_proto::{ErrorCode, ProtoError};
use serde_json::Value;
use thiserror::Error;

use crate::state::ConnectionStatus;

/// Errors surfaced by the gateway client.
///
/// Connection-level failures never come out of `connect`/`disconnect`; they
/// show up as status transitions and as [`GatewayError::ConnectionClosed`] on
/// in-flight requests.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A request was made while the handshake had not completed.
    #[error("gateway not connected (status: {status}); cannot call '{method}'")]
    NotConnected {
        /// Method the caller tried to invoke.
        method: String,
        /// Status at the time of the call.
        status: ConnectionStatus,
    },

    /// No response arrived within the caller's budget.
    #[error("request '{method}' timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// The connection did not reach `connected` in time.
    #[error("gateway connection not established within {}ms", timeout.as_millis())]
    ConnectTimeout {
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// The transport closed while the request was pending.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The gateway answered the request with `ok: false`.
    #[error("gateway error {code}: {message}")]
    Rpc {
        /// Error code from the gateway.
        code: ErrorCode,
        /// Error message from the gateway.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },

    /// No usable gateway configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame encoding/decoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// A payload could not be converted to the caller's type.
    #[error("failed to decode payload of '{method}': {source}")]
    Decode {
        /// Method whose payload failed to decode.
        method: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl GatewayError {
    /// Whether this error came from the caller's timeout budget.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_display() {
        let err = GatewayError::NotConnected {
            method: "ping".to_string(),
            status: ConnectionStatus::Reconnecting,
        };
        assert_eq!(
            err.to_string(),
            "gateway not connected (status: reconnecting); cannot call 'ping'"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = GatewayError::Timeout {
            method: "ping".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "request 'ping' timed out after 50ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_rpc_error_display() {
        let err = GatewayError::Rpc {
            code: ErrorCode::Text("INVALID_REQUEST".to_string()),
            message: "unknown method".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "gateway error INVALID_REQUEST: unknown method");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: GatewayError = ProtoError::Decoding("bad".to_string()).into();
        assert!(err.to_string().contains("protocol error"));
    }

    #[test]
    fn test_connection_closed_display() {
        let err = GatewayError::ConnectionClosed("server went away".to_string());
        assert_eq!(err.to_string(), "connection closed: server went away");
    }
}
