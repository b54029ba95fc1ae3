//! Engine configuration.

use std::time::Duration;

use threadline_core::RateLimitConfig;
use threadline_sync::BackfillConfig;

/// Message send limits.
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Inline parts larger than this many bytes are uploaded as attachments.
    pub inline_threshold: usize,
    /// Attachments uploaded at once within one send.
    pub upload_concurrency: usize,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 13 * 1024,
            upload_concurrency: 4,
        }
    }
}

/// Retry policy for status updates. Only network failures are retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(250),
            multiplier: 2,
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub backfill: BackfillConfig,
    /// Guards on-demand backfills triggered by the push stream.
    pub rate_limit: RateLimitConfig,
    pub send: SendConfig,
    pub status_retry: RetryConfig,
}
