//! Challenge/connect handshake.
//!
//! The gateway opens every connection with a `connect.challenge` event. The
//! client answers with a `connect` request describing itself and presenting
//! its token, and the gateway replies with either a hello payload (features,
//! server info) or an error.

use quill_proto::{
    AuthParams, ClientInfo, ConnectParams, ErrorCode, HelloPayload, ResponseFrame, MAX_PROTOCOL,
    MIN_PROTOCOL, ROLE_OPERATOR, SCOPE_OPERATOR_READ, SCOPE_OPERATOR_WRITE,
};
use serde_json::Map;
use tracing::warn;

/// Default client id presented to the gateway.
pub const DEFAULT_CLIENT_ID: &str = "quill-desktop";

/// Default client mode.
pub const DEFAULT_CLIENT_MODE: &str = "backend";

/// Error codes that mean the gateway refused our credentials.
const AUTH_ERROR_CODES: &[&str] = &[
    "UNAUTHORIZED",
    "UNAUTHENTICATED",
    "FORBIDDEN",
    "AUTH_REQUIRED",
    "AUTH_FAILED",
    "INVALID_TOKEN",
    "TOKEN_EXPIRED",
    "TOKEN_MISMATCH",
    "NOT_PAIRED",
    "PAIRING_REQUIRED",
    "DEVICE_IDENTITY_REQUIRED",
];

/// Numeric codes with the same meaning (HTTP 401/403, WebSocket 1008).
const AUTH_ERROR_NUMBERS: &[i64] = &[401, 403, 1008];

/// Message fragments that identify an auth failure when the code does not.
const AUTH_ERROR_PHRASES: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid token",
    "token mismatch",
    "device identity required",
    "not paired",
    "pairing required",
];

/// How this client describes itself in the `connect` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client id.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Platform string.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Optional human-readable name.
    pub display_name: Option<String>,
    /// Per-process instance id.
    pub instance_id: String,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            id: DEFAULT_CLIENT_ID.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: DEFAULT_CLIENT_MODE.to_string(),
            display_name: None,
            instance_id: uuid::Uuid::new_v4().to_string(),
            role: ROLE_OPERATOR.to_string(),
            scopes: vec![
                SCOPE_OPERATOR_READ.to_string(),
                SCOPE_OPERATOR_WRITE.to_string(),
            ],
        }
    }
}

impl ClientIdentity {
    /// Set the client id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the client mode.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Replace the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Build the `connect` params presenting `token`.
    #[must_use]
    pub fn connect_params(&self, token: Option<String>) -> ConnectParams {
        ConnectParams {
            min_protocol: MIN_PROTOCOL,
            max_protocol: MAX_PROTOCOL,
            client: ClientInfo {
                id: self.id.clone(),
                version: self.version.clone(),
                platform: self.platform.clone(),
                mode: self.mode.clone(),
                display_name: self.display_name.clone(),
                instance_id: Some(self.instance_id.clone()),
            },
            role: self.role.clone(),
            scopes: self.scopes.clone(),
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: Map::new(),
            auth: AuthParams { token },
        }
    }
}

/// Result of the `connect` request.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeOutcome {
    /// The gateway accepted us.
    Accepted(HelloPayload),
    /// The gateway refused the connection.
    Rejected {
        /// Error code, if the gateway sent one.
        code: Option<ErrorCode>,
        /// Error message.
        message: String,
        /// Whether the refusal is about credentials.
        auth: bool,
    },
}

/// Tracks the in-flight `connect` request of the current transport.
#[derive(Debug, Default)]
pub struct HandshakeHandler {
    connect_id: Option<String>,
}

impl HandshakeHandler {
    /// Create an idle handler.
    #[must_use]
    pub const fn new() -> Self {
        Self { connect_id: None }
    }

    /// Record that a `connect` request with `id` went out.
    pub fn begin(&mut self, id: impl Into<String>) {
        self.connect_id = Some(id.into());
    }

    /// Whether a response with `id` answers the pending `connect` request.
    #[must_use]
    pub fn awaiting(&self, id: &str) -> bool {
        self.connect_id.as_deref() == Some(id)
    }

    /// Whether a `connect` request is outstanding.
    #[must_use]
    pub const fn in_progress(&self) -> bool {
        self.connect_id.is_some()
    }

    /// Forget the outstanding request (transport closed).
    pub fn reset(&mut self) {
        self.connect_id = None;
    }

    /// Interpret the response to the `connect` request and finish the
    /// handshake.
    pub fn interpret(&mut self, response: ResponseFrame) -> HandshakeOutcome {
        self.connect_id = None;

        if response.ok {
            return match HelloPayload::from_payload(response.payload.as_ref()) {
                Ok(hello) => HandshakeOutcome::Accepted(hello),
                Err(e) => {
                    warn!(error = %e, "malformed hello payload; using empty feature set");
                    HandshakeOutcome::Accepted(HelloPayload::default())
                }
            };
        }

        let (code, message) = match response.error {
            Some(error) => (Some(error.code), error.message),
            None => (None, "connect rejected".to_string()),
        };
        let auth = is_auth_error(code.as_ref(), &message);
        HandshakeOutcome::Rejected {
            code,
            message,
            auth,
        }
    }
}

/// Whether an error is about authentication or authorization.
#[must_use]
pub fn is_auth_error(code: Option<&ErrorCode>, message: &str) -> bool {
    let code_match = match code {
        Some(ErrorCode::Text(text)) => AUTH_ERROR_CODES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(text)),
        Some(ErrorCode::Number(number)) => AUTH_ERROR_NUMBERS.contains(number),
        None => false,
    };
    if code_match {
        return true;
    }

    let message = message.to_ascii_lowercase();
    AUTH_ERROR_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_proto::{ErrorShape, Features};
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_default_identity() {
        let identity = ClientIdentity::default();
        assert_eq!(identity.id, "quill-desktop");
        assert_eq!(identity.mode, "backend");
        assert_eq!(identity.role, "operator");
        assert_eq!(identity.scopes, vec!["operator.read", "operator.write"]);
        assert!(uuid::Uuid::parse_str(&identity.instance_id).is_ok());
    }

    #[test]
    fn test_instance_ids_differ() {
        assert_ne!(
            ClientIdentity::default().instance_id,
            ClientIdentity::default().instance_id
        );
    }

    #[test]
    fn test_connect_params_shape() {
        let identity = ClientIdentity::default()
            .with_display_name("Notes on laptop")
            .with_scopes(["operator.admin"]);
        let params = identity.connect_params(Some("tok".to_string()));
        let value = serde_json::to_value(&params).expect("serialize");

        assert_eq!(value["minProtocol"], 3);
        assert_eq!(value["maxProtocol"], 3);
        assert_eq!(value["client"]["id"], "quill-desktop");
        assert_eq!(value["client"]["displayName"], "Notes on laptop");
        assert_eq!(value["client"]["instanceId"], json!(identity.instance_id));
        assert_eq!(value["role"], "operator");
        assert_eq!(value["scopes"], json!(["operator.admin"]));
        assert_eq!(value["caps"], json!([]));
        assert_eq!(value["commands"], json!([]));
        assert_eq!(value["permissions"], json!({}));
        assert_eq!(value["auth"], json!({"token": "tok"}));
    }

    #[test]
    fn test_connect_params_without_token() {
        let params = ClientIdentity::default().connect_params(None);
        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(value["auth"], json!({}));
        assert!(value["client"].get("displayName").is_none());
    }

    #[test]
    fn test_handler_tracks_connect_id() {
        let mut handler = HandshakeHandler::new();
        assert!(!handler.in_progress());

        handler.begin("7");
        assert!(handler.awaiting("7"));
        assert!(!handler.awaiting("8"));

        handler.reset();
        assert!(!handler.awaiting("7"));
    }

    #[test]
    fn test_accepted_with_features() {
        let mut handler = HandshakeHandler::new();
        handler.begin("1");

        let outcome = handler.interpret(ResponseFrame::success(
            "1",
            json!({
                "protocol": 3,
                "server": {"version": "2026.3.1", "connId": "c-1"},
                "features": {"methods": ["ping"], "events": ["tick"]}
            }),
        ));

        match outcome {
            HandshakeOutcome::Accepted(hello) => {
                let features = hello.features.unwrap_or_else(Features::default);
                assert!(features.supports_method("ping"));
                assert!(features.supports_event("tick"));
                assert_eq!(hello.protocol, Some(3));
                assert_eq!(
                    hello.server.and_then(|s| s.conn_id).as_deref(),
                    Some("c-1")
                );
            }
            other => panic!("expected accepted, got {other:?}"),
        }
        assert!(!handler.in_progress());
    }

    #[test]
    fn test_accepted_with_malformed_hello() {
        let mut handler = HandshakeHandler::new();
        handler.begin("1");
        let outcome =
            handler.interpret(ResponseFrame::success("1", json!({"features": "nope"})));
        assert_eq!(outcome, HandshakeOutcome::Accepted(HelloPayload::default()));
    }

    #[test]
    fn test_rejected_auth() {
        let mut handler = HandshakeHandler::new();
        handler.begin("1");
        let outcome = handler.interpret(ResponseFrame::failure(
            "1",
            ErrorShape::new("INVALID_TOKEN", "token rejected"),
        ));
        assert_eq!(
            outcome,
            HandshakeOutcome::Rejected {
                code: Some(ErrorCode::from("INVALID_TOKEN")),
                message: "token rejected".to_string(),
                auth: true,
            }
        );
    }

    #[test]
    fn test_rejected_without_error_body() {
        let mut handler = HandshakeHandler::new();
        let outcome = handler.interpret(ResponseFrame {
            id: "1".to_string(),
            ok: false,
            payload: None,
            error: None,
        });
        assert_eq!(
            outcome,
            HandshakeOutcome::Rejected {
                code: None,
                message: "connect rejected".to_string(),
                auth: false,
            }
        );
    }

    #[test_case(Some(ErrorCode::from("UNAUTHORIZED")), "", true ; "unauthorized code")]
    #[test_case(Some(ErrorCode::from("token_expired")), "", true ; "lowercase code")]
    #[test_case(Some(ErrorCode::from("PAIRING_REQUIRED")), "", true ; "pairing code")]
    #[test_case(Some(ErrorCode::Number(401)), "", true ; "http 401")]
    #[test_case(Some(ErrorCode::Number(403)), "", true ; "http 403")]
    #[test_case(Some(ErrorCode::Number(1008)), "", true ; "policy violation")]
    #[test_case(Some(ErrorCode::Number(500)), "internal", false ; "server error")]
    #[test_case(Some(ErrorCode::from("INVALID_REQUEST")), "Unauthorized: bad token", true ; "message fallback")]
    #[test_case(None, "Device identity required", true ; "device identity message")]
    #[test_case(None, "gateway token mismatch", true ; "token mismatch message")]
    #[test_case(None, "this device is not paired", true ; "not paired message")]
    #[test_case(Some(ErrorCode::from("UNAVAILABLE")), "try again later", false ; "not auth")]
    #[test_case(None, "", false ; "nothing")]
    fn test_is_auth_error(code: Option<ErrorCode>, message: &str, expected: bool) {
        assert_eq!(is_auth_error(code.as_ref(), message), expected);
    }
}
