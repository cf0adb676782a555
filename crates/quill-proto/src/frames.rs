//! Gateway frame definitions.
//!
//! Every WebSocket text message carries exactly one JSON frame, discriminated
//! by its `type` field:
//!
//! - `event`: server-pushed notification
//! - `req`: request (the client only ever sends these)
//! - `res`: response echoing the id of a request

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::handshake::CHALLENGE_EVENT;

/// A single frame on the gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Server-pushed event.
    #[serde(rename = "event")]
    Event(EventFrame),
    /// Request frame.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Response to an earlier request.
    #[serde(rename = "res")]
    Response(ResponseFrame),
}

impl GatewayFrame {
    /// Create a request frame.
    #[must_use]
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Request(RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Parse a frame from a JSON text message.
    ///
    /// Fails if the text is not JSON, the `type` tag is unknown, or a field
    /// required by the tagged variant is missing or mistyped.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Serialize the frame to a JSON text message.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn frame_type(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Request(_) => "req",
            Self::Response(_) => "res",
        }
    }
}

/// Server-pushed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event name, e.g. `connect.challenge`.
    pub event: String,
    /// Opaque event payload.
    #[serde(default)]
    pub payload: Value,
    /// Server sequence number, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Server state version, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<u64>,
}

impl EventFrame {
    /// Create an event with the given name and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
            state_version: None,
        }
    }

    /// Whether this is the server's handshake challenge.
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        self.event == CHALLENGE_EVENT
    }
}

/// Request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestFrame {
    /// Correlation id chosen by the sender.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Opaque parameters.
    #[serde(default)]
    pub params: Value,
}

/// Response frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    /// Id of the request this answers.
    pub id: String,
    /// Whether the request succeeded.
    pub ok: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Successful response.
    #[must_use]
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Error carried by a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorShape {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorShape {
    /// Create an error with no details.
    #[must_use]
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// Error code: gateways send either a symbolic string or a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ErrorCode {
    /// Numeric code.
    Number(i64),
    /// Symbolic code such as `NOT_PAIRED`.
    Text(String),
}

impl ErrorCode {
    /// The symbolic code, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// The numeric code, if this is one.
    #[must_use]
    pub const fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::Text(code.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::Text(code)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::Number(code)
    }
}
