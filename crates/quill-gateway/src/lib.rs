//! Quill gateway client
//!
//! Keeps a long-lived WebSocket connection to the local automation gateway:
//! answers the gateway's connect challenge, multiplexes RPC calls over the
//! connection, pings to detect dead links, and reconnects with jittered
//! backoff while backing off from endpoints that reject our credentials.
//!
//! ```no_run
//! use std::sync::Arc;
//! use quill_gateway::{ClientOptions, FileResolver, GatewayClient};
//!
//! # async fn example() -> Result<(), quill_gateway::GatewayError> {
//! let resolver = Arc::new(FileResolver::new("gateway.json"));
//! let client = GatewayClient::new(resolver, ClientOptions::default());
//!
//! client.ensure_connected(None).await?;
//! let pong = client.request("ping", serde_json::Value::Null, None).await?;
//! println!("{pong}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
mod events;
pub mod handshake;
pub mod keepalive;
pub mod reconnect;
pub mod rpc;
pub mod state;

pub use client::{
    ClientOptions, DisconnectOptions, GatewayClient, DEFAULT_CONFIG_REFRESH_INTERVAL,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use config::{
    select_token, ConfigResolver, FileResolver, GatewayFileConfig, RateLimitedResolver,
    ResolvedConfig, ScopeRank, ScopedToken, StaticResolver,
};
pub use error::GatewayError;
pub use events::Subscription;
pub use handshake::{is_auth_error, ClientIdentity, HandshakeOutcome};
pub use keepalive::KeepAliveConfig;
pub use reconnect::{ReconnectConfig, ReconnectDecision, ReconnectScheduler, ReconnectState};
pub use state::ConnectionStatus;

pub use quill_proto::{ErrorCode, EventFrame, Features, ServerInfo};
