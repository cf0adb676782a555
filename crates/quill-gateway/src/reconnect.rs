//! Reconnection policy: exponential backoff with jitter, plus throttling of
//! retries after authentication failures.

use std::time::Duration;

use quill_proto::ErrorCode;
use rand::Rng;
use tokio::time::Instant;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Lower bound applied after jitter.
    pub min_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the base delay (0.0-1.0).
    pub jitter: f64,
    /// Minimum spacing between retries after an authentication failure,
    /// unless the token changes.
    pub auth_cooldown: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            min_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            jitter: 0.2,
            auth_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Delay for the given attempt (0-based) before jitter, capped at
    /// `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_millis(attempt).round() as u64)
    }

    fn base_millis(&self, attempt: u32) -> f64 {
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(1024) as i32;
        let base_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(exponent);
        base_ms.min(max_ms).max(0.0)
    }

    /// Delay for the given attempt with an explicit jitter sample.
    ///
    /// `unit` is clamped to `[-1, 1]`; the result lies in
    /// `[base * (1 - jitter), base * (1 + jitter)]`, clamped to
    /// `[min_delay, max_delay]` and rounded to whole milliseconds.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_millis(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let offset = base * jitter * unit.clamp(-1.0, 1.0);
        let lower = self.min_delay.as_millis() as f64;
        let upper = (self.max_delay.as_millis() as f64).max(lower);
        Duration::from_millis((base + offset).clamp(lower, upper).round() as u64)
    }

    /// Delay for the given attempt with random jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_jitter(attempt, unit)
    }
}

/// Bookkeeping shared between the connection state machine and the
/// scheduler.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Retries scheduled since the last successful connect.
    pub attempt_count: u32,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// Code of the most recent handshake rejection.
    pub last_error_code: Option<ErrorCode>,
    /// When the most recent auth-classified rejection happened.
    pub last_auth_error_at: Option<Instant>,
    /// When a retry was last scheduled after an auth failure.
    pub last_auth_retry_at: Option<Instant>,
    /// Token presented by the most recent connect request.
    pub last_connect_token: Option<String>,
    last_failure_auth: bool,
}

/// Outcome of asking the scheduler for the next retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Retry after `delay`.
    Retry {
        /// Attempt number used for the backoff (0-based).
        attempt: u32,
        /// Delay before opening the next transport.
        delay: Duration,
    },
    /// Retrying now would hammer an endpoint that rejected our credentials.
    Suppressed {
        /// Time left in the auth cool-down window.
        remaining: Duration,
    },
}

/// Decides when (and whether) to reconnect.
#[derive(Debug, Clone, Default)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    state: ReconnectState,
}

impl ReconnectScheduler {
    /// Create a scheduler with the given configuration.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ReconnectState::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Current bookkeeping.
    #[must_use]
    pub const fn state(&self) -> &ReconnectState {
        &self.state
    }

    /// Whether the most recent failure was an auth rejection.
    #[must_use]
    pub const fn last_failure_was_auth(&self) -> bool {
        self.state.last_failure_auth
    }

    /// Record the token presented by a connect request.
    pub fn record_connect_attempt(&mut self, token: Option<&str>) {
        self.state.last_connect_token = token.map(str::to_string);
    }

    /// Record a transport-level failure (socket error, close, keep-alive).
    pub fn record_transport_failure(&mut self, reason: impl Into<String>) {
        self.state.last_error = Some(reason.into());
        self.state.last_error_code = None;
        self.state.last_failure_auth = false;
    }

    /// Record a rejected handshake.
    pub fn record_rejection(
        &mut self,
        code: Option<ErrorCode>,
        message: impl Into<String>,
        auth: bool,
        now: Instant,
    ) {
        self.state.last_error = Some(message.into());
        self.state.last_error_code = code;
        self.state.last_failure_auth = auth;
        if auth {
            self.state.last_auth_error_at = Some(now);
        }
    }

    /// Record a successful handshake: attempts and error state reset.
    pub fn record_connected(&mut self) {
        self.state.attempt_count = 0;
        self.state.last_error = None;
        self.state.last_error_code = None;
        self.state.last_auth_error_at = None;
        self.state.last_auth_retry_at = None;
        self.state.last_failure_auth = false;
    }

    /// Decide the next retry.
    ///
    /// After an auth failure, a retry within the cool-down window is only
    /// allowed when `current_token` differs from the token that was rejected.
    pub fn next(&mut self, now: Instant, current_token: Option<&str>) -> ReconnectDecision {
        if self.state.last_failure_auth {
            let token_changed = current_token != self.state.last_connect_token.as_deref();
            if let Some(last_retry) = self.state.last_auth_retry_at {
                let elapsed = now.saturating_duration_since(last_retry);
                if elapsed < self.config.auth_cooldown && !token_changed {
                    return ReconnectDecision::Suppressed {
                        remaining: self.config.auth_cooldown - elapsed,
                    };
                }
            }
            self.state.last_auth_retry_at = Some(now);
        }

        let attempt = self.state.attempt_count;
        self.state.attempt_count = attempt.saturating_add(1);
        ReconnectDecision::Retry {
            attempt,
            delay: self.config.delay_for_attempt(attempt),
        }
    }
}
