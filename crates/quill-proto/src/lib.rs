//! # quill-proto
//!
//! Wire definitions for the Quill gateway protocol: the three JSON frame
//! shapes exchanged over the WebSocket and the payloads of the
//! challenge/connect handshake.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod frames;
pub mod handshake;

pub use error::ProtoError;
pub use frames::{ErrorCode, ErrorShape, EventFrame, GatewayFrame, RequestFrame, ResponseFrame};
pub use handshake::{
    AuthParams, ChallengePayload, ClientInfo, ConnectParams, Features, HelloPayload, ServerInfo,
    CHALLENGE_EVENT, CONNECT_METHOD, MAX_PROTOCOL, MIN_PROTOCOL, ROLE_OPERATOR,
    SCOPE_OPERATOR_ADMIN, SCOPE_OPERATOR_READ, SCOPE_OPERATOR_WRITE,
};
