//! Connection status.

use std::fmt;

use serde::Serialize;

/// Status of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No transport, and no retry pending.
    #[default]
    Disconnected,
    /// Transport opening or handshake in progress.
    Connecting,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Handshake accepted; RPC calls are allowed.
    Connected,
}

impl ConnectionStatus {
    /// Lowercase name, as shown to users.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
        }
    }

    /// Whether a transport is open or being opened.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
