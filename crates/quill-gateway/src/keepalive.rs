//! Transport keep-alive.
//!
//! The connection task pings the gateway on a fixed interval and records
//! every pong. A transport that has not produced a pong for
//! `interval * max_missed_pongs` is considered dead and is torn down, which
//! sends the client through its ordinary close-and-reconnect path.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for keep-alive behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval between pings.
    pub interval: Duration,
    /// Number of ping intervals without a pong before the transport is dead.
    pub max_missed_pongs: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed_pongs: 3,
        }
    }
}

impl KeepAliveConfig {
    /// Silence allowed before the transport is considered stale.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.interval * self.max_missed_pongs.max(1)
    }
}

/// Liveness tracker for a single transport.
///
/// Lives exactly as long as the transport it watches.
#[derive(Debug)]
pub struct KeepAlive {
    config: KeepAliveConfig,
    opened_at: Instant,
    last_pong: Option<Instant>,
    pings_sent: u64,
}

impl KeepAlive {
    /// Start tracking a transport that opened at `now`.
    #[must_use]
    pub fn new(config: KeepAliveConfig, now: Instant) -> Self {
        Self {
            config,
            opened_at: now,
            last_pong: None,
            pings_sent: 0,
        }
    }

    /// Ping interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Record that a ping went out.
    pub fn ping_sent(&mut self) {
        self.pings_sent += 1;
    }

    /// Record a pong received at `now`.
    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = Some(now);
    }

    /// Most recent pong, if any.
    #[must_use]
    pub const fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Number of pings sent on this transport.
    #[must_use]
    pub const fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Time since the last pong, or since the transport opened if none
    /// arrived yet.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_pong.unwrap_or(self.opened_at))
    }

    /// Whether the transport should be terminated.
    #[must_use]
    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.config.stale_after()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KeepAliveConfig {
        KeepAliveConfig {
            interval: Duration::from_secs(10),
            max_missed_pongs: 3,
        }
    }

    #[test]
    fn test_keepalive_config_default() {
        let config = KeepAliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.max_missed_pongs, 3);
        assert_eq!(config.stale_after(), Duration::from_secs(90));
    }

    #[test]
    fn test_stale_after_never_zero_multiplier() {
        let config = KeepAliveConfig {
            interval: Duration::from_secs(5),
            max_missed_pongs: 0,
        };
        assert_eq!(config.stale_after(), Duration::from_secs(5));
    }

    #[test]
    fn test_fresh_transport_is_not_stale() {
        let start = Instant::now();
        let monitor = KeepAlive::new(config(), start);

        assert!(monitor.last_pong().is_none());
        assert!(!monitor.is_stale(start));
        assert!(!monitor.is_stale(start + Duration::from_secs(30)));
        assert!(monitor.is_stale(start + Duration::from_secs(31)));
    }

    #[test]
    fn test_pong_resets_silence() {
        let start = Instant::now();
        let mut monitor = KeepAlive::new(config(), start);

        monitor.record_pong(start + Duration::from_secs(25));
        assert_eq!(
            monitor.silence(start + Duration::from_secs(40)),
            Duration::from_secs(15)
        );
        assert!(!monitor.is_stale(start + Duration::from_secs(50)));
        assert!(monitor.is_stale(start + Duration::from_secs(56)));
    }

    #[test]
    fn test_ping_counter() {
        let mut monitor = KeepAlive::new(config(), Instant::now());
        monitor.ping_sent();
        monitor.ping_sent();
        assert_eq!(monitor.pings_sent(), 2);
        assert_eq!(monitor.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_clock_before_open_is_not_stale() {
        let start = Instant::now() + Duration::from_secs(5);
        let monitor = KeepAlive::new(config(), start);
        assert_eq!(monitor.silence(Instant::now()), Duration::ZERO);
    }
}
