//! Two-tier call rate limiter.
//!
//! A short window caps bursts and a long window caps volume. Exceeding the
//! short window rejects the call. Exceeding the long window shuts every call
//! down for a cool-down period, after which both counters restart at zero.
//!
//! Windows are fixed rather than sliding: each one starts at the first call
//! after the previous one lapsed and its count restarts at zero. A burst
//! straddling a boundary can therefore admit up to twice the limit within
//! one window length. The limiter only guards against runaway call volume,
//! so that coarseness is accepted in exchange for keeping no call history.
//! Calls rejected by the short window are not counted against the long one.

use std::time::{Duration, Instant};

/// Limits for [`CallRateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub short_window: Duration,
    pub short_limit: u32,
    pub long_window: Duration,
    pub long_limit: u32,
    /// How long a long-window breach shuts calls down.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_window: Duration::from_secs(1),
            short_limit: 10,
            long_window: Duration::from_secs(60),
            long_limit: 100,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Short window exceeded. The call is rejected; nothing shuts down.
    Throttled,
    /// All calls are rejected until `until`.
    ShutDown { until: Instant },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug)]
struct Window {
    length: Duration,
    started: Option<Instant>,
    count: u32,
}

impl Window {
    fn new(length: Duration) -> Self {
        Self {
            length,
            started: None,
            count: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        match self.started {
            Some(start) if now.saturating_duration_since(start) < self.length => {}
            _ => {
                self.started = Some(now);
                self.count = 0;
            }
        }
    }

    fn reset(&mut self) {
        self.started = None;
        self.count = 0;
    }
}

/// Guards a call path against runaway volume.
#[derive(Debug)]
pub struct CallRateLimiter {
    config: RateLimitConfig,
    short: Window,
    long: Window,
    shutdown_until: Option<Instant>,
}

impl CallRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            short: Window::new(config.short_window),
            long: Window::new(config.long_window),
            shutdown_until: None,
            config,
        }
    }

    /// Check and count a call happening now.
    pub fn check(&mut self) -> RateDecision {
        self.check_at(Instant::now())
    }

    /// Check and count a call happening at `now`.
    pub fn check_at(&mut self, now: Instant) -> RateDecision {
        if let Some(until) = self.shutdown_until {
            if now < until {
                return RateDecision::ShutDown { until };
            }
            self.shutdown_until = None;
            self.short.reset();
            self.long.reset();
        }

        self.short.roll(now);
        self.long.roll(now);

        if self.short.count >= self.config.short_limit {
            return RateDecision::Throttled;
        }

        if self.long.count >= self.config.long_limit {
            let until = now + self.config.cooldown;
            self.shutdown_until = Some(until);
            return RateDecision::ShutDown { until };
        }

        self.short.count += 1;
        self.long.count += 1;
        RateDecision::Allowed
    }

    /// Calls counted in the current short window.
    pub fn short_count(&self) -> u32 {
        self.short.count
    }

    /// Calls counted in the current long window.
    pub fn long_count(&self) -> u32 {
        self.long.count
    }

    pub fn is_shut_down_at(&self, now: Instant) -> bool {
        self.shutdown_until.map_or(false, |until| now < until)
    }
}

impl Default for CallRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
