//! Handshake payloads.
//!
//! The gateway opens every connection with a `connect.challenge` event. The
//! client answers with a `connect` request describing itself and presenting
//! its credentials; the response to that request either accepts the client
//! (optionally advertising the methods and events it supports) or rejects it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Event name of the server's handshake challenge.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Method name of the client's handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Oldest protocol version this client speaks.
pub const MIN_PROTOCOL: u32 = 3;

/// Newest protocol version this client speaks.
pub const MAX_PROTOCOL: u32 = 3;

/// Role requested by operator clients.
pub const ROLE_OPERATOR: &str = "operator";

/// Read-only operator scope.
pub const SCOPE_OPERATOR_READ: &str = "operator.read";

/// Read/write operator scope.
pub const SCOPE_OPERATOR_WRITE: &str = "operator.write";

/// Administrative operator scope.
pub const SCOPE_OPERATOR_ADMIN: &str = "operator.admin";

/// Payload of the `connect.challenge` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengePayload {
    /// Server nonce.
    pub nonce: String,
    /// Server timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl ChallengePayload {
    /// Extract the challenge from an event payload.
    pub fn from_value(payload: &Value) -> Result<Self, ProtoError> {
        Self::deserialize(payload).map_err(|e| ProtoError::InvalidPayload {
            context: CHALLENGE_EVENT.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Params of the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Oldest supported protocol version.
    pub min_protocol: u32,
    /// Newest supported protocol version.
    pub max_protocol: u32,
    /// Client descriptor.
    pub client: ClientInfo,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Advertised capabilities (operators advertise none).
    pub caps: Vec<String>,
    /// Commands this client can execute (operators execute none).
    pub commands: Vec<String>,
    /// Permission grants (operators request none).
    pub permissions: Map<String, Value>,
    /// Credentials.
    pub auth: AuthParams,
}

/// Client descriptor sent in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Stable client identifier.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Operating system / platform.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Human-readable name shown by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Per-process instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Auth block of the `connect` request. Serializes to `{}` without a token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthParams {
    /// Bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Payload of a successful `connect` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    /// Negotiated protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    /// Server details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    /// Advertised feature set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

impl HelloPayload {
    /// Read the hello payload from a response payload.
    ///
    /// A missing or `null` payload is an empty hello; gateways are not
    /// required to advertise anything.
    pub fn from_payload(payload: Option<&Value>) -> Result<Self, ProtoError> {
        match payload {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Self::deserialize(value).map_err(|e| ProtoError::InvalidPayload {
                context: CONNECT_METHOD.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Server details from the hello payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Gateway version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Connection id assigned by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

/// Methods and events the gateway advertises.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Features {
    /// RPC methods.
    #[serde(default)]
    pub methods: BTreeSet<String>,
    /// Event names.
    #[serde(default)]
    pub events: BTreeSet<String>,
}

impl Features {
    /// Whether the gateway advertised the given method.
    #[must_use]
    pub fn supports_method(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    /// Whether the gateway advertised the given event.
    #[must_use]
    pub fn supports_event(&self, event: &str) -> bool {
        self.events.contains(event)
    }
}
