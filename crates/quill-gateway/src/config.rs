//! Gateway location and credentials.
//!
//! The client never reads configuration on its own. It is handed a
//! [`ConfigResolver`] at construction time and asks it for a fresh
//! `{url, token}` pair when it needs one:
//! - the first connect and `ensure_connected`
//! - the handshake, when no token was configured
//! - each reconnect, at most once per refresh interval

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quill_proto::{SCOPE_OPERATOR_ADMIN, SCOPE_OPERATOR_READ, SCOPE_OPERATOR_WRITE};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::error::GatewayError;

/// A gateway URL plus the credential to present to it.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Bearer token, if any.
    pub token: Option<String>,
}

impl ResolvedConfig {
    /// Create a resolved config.
    #[must_use]
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source of gateway configuration.
pub trait ConfigResolver: Send + Sync {
    /// Produce the current configuration, or `None` if there is none.
    fn resolve(&self) -> Option<ResolvedConfig>;
}

impl<F> ConfigResolver for F
where
    F: Fn() -> Option<ResolvedConfig> + Send + Sync,
{
    fn resolve(&self) -> Option<ResolvedConfig> {
        self()
    }
}

/// Resolver that always returns the same configuration.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    config: Option<ResolvedConfig>,
}

impl StaticResolver {
    /// Resolve to `config` forever.
    #[must_use]
    pub const fn new(config: ResolvedConfig) -> Self {
        Self {
            config: Some(config),
        }
    }

    /// Resolver with nothing to offer.
    #[must_use]
    pub const fn empty() -> Self {
        Self { config: None }
    }
}

impl ConfigResolver for StaticResolver {
    fn resolve(&self) -> Option<ResolvedConfig> {
        self.config.clone()
    }
}

/// A token together with the operator scopes it grants.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedToken {
    /// Bearer token.
    pub token: String,
    /// Scopes granted by the token.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ScopedToken {
    /// Highest operator scope this token grants.
    #[must_use]
    pub fn rank(&self) -> ScopeRank {
        self.scopes
            .iter()
            .map(|scope| ScopeRank::of(scope))
            .max()
            .unwrap_or(ScopeRank::None)
    }
}

impl fmt::Debug for ScopedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedToken")
            .field("token", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Ordering of operator scopes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeRank {
    /// No operator scope.
    None,
    /// `operator.read`.
    Read,
    /// `operator.write`.
    Write,
    /// `operator.admin`.
    Admin,
}

impl ScopeRank {
    /// Rank of a single scope string.
    #[must_use]
    pub fn of(scope: &str) -> Self {
        match scope {
            SCOPE_OPERATOR_ADMIN => Self::Admin,
            SCOPE_OPERATOR_WRITE => Self::Write,
            SCOPE_OPERATOR_READ => Self::Read,
            _ => Self::None,
        }
    }
}

/// Pick the most privileged token; ties go to the one declared first.
#[must_use]
pub fn select_token(tokens: &[ScopedToken]) -> Option<&ScopedToken> {
    tokens.iter().fold(None, |best, candidate| match best {
        Some(current) if current.rank() >= candidate.rank() => Some(current),
        _ => Some(candidate),
    })
}

/// On-disk gateway configuration.
///
/// ```json
/// { "url": "ws://127.0.0.1:18789", "tokens": [{ "token": "...", "scopes": ["operator.read"] }] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Explicit token; wins over `tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Candidate tokens chosen by scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<ScopedToken>,
}

impl GatewayFileConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, GatewayError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a WebSocket URL.
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_url(&self.url)
    }

    /// The URL and the token to present.
    #[must_use]
    pub fn resolved(&self) -> ResolvedConfig {
        let token = self
            .token
            .clone()
            .or_else(|| select_token(&self.tokens).map(|t| t.token.clone()));
        ResolvedConfig::new(self.url.clone(), token)
    }
}

/// Check that `url` is a `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns a config error describing the problem.
pub fn validate_url(url: &str) -> Result<(), GatewayError> {
    if url.is_empty() {
        return Err(GatewayError::Config("gateway url cannot be empty".to_string()));
    }

    let parsed =
        Url::parse(url).map_err(|e| GatewayError::Config(format!("invalid gateway url: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(GatewayError::Config(format!(
            "gateway url must start with ws:// or wss:// (got {other}://)"
        ))),
    }
}

/// Resolver backed by a JSON file, re-read on every call.
#[derive(Debug, Clone)]
pub struct FileResolver {
    path: PathBuf,
}

impl FileResolver {
    /// Resolve from the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigResolver for FileResolver {
    fn resolve(&self) -> Option<ResolvedConfig> {
        match GatewayFileConfig::from_file(&self.path) {
            Ok(config) => Some(config.resolved()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "gateway config unavailable");
                None
            }
        }
    }
}

/// Wraps a resolver so the reconnect path consults it at most once per
/// interval.
pub struct RateLimitedResolver {
    inner: Arc<dyn ConfigResolver>,
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimitedResolver {
    /// Wrap `inner`, allowing one reconnect-path lookup per `min_interval`.
    #[must_use]
    pub fn new(inner: Arc<dyn ConfigResolver>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Consult the resolver unconditionally.
    pub fn resolve_now(&self) -> Option<ResolvedConfig> {
        *self.last.lock() = Some(Instant::now());
        self.inner.resolve()
    }

    /// Consult the resolver only if the interval has elapsed since the last
    /// lookup; `None` means "not due" as well as "nothing configured".
    pub fn resolve_if_due(&self) -> Option<ResolvedConfig> {
        let now = Instant::now();
        {
            let mut last = self.last.lock();
            if let Some(previous) = *last {
                if now.saturating_duration_since(previous) < self.min_interval {
                    debug!("config refresh skipped; interval not elapsed");
                    return None;
                }
            }
            *last = Some(now);
        }
        self.inner.resolve()
    }
}

impl fmt::Debug for RateLimitedResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedResolver")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
