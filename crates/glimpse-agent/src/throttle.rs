//! Per-logpoint emission throttling.
//!
//! Each logpoint owns a token bucket sized by `log.max_logs_per_second` over
//! a one-second window. Once the bucket runs dry the logpoint disables
//! itself for `log.log_delay_seconds`, then resumes. Buckets are never
//! shared between breakpoints.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::LogConfig;

#[derive(Debug)]
pub struct LogRateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    disabled_until: Option<Instant>,
    delay: Duration,
}

impl LogRateLimiter {
    pub fn new(config: &LogConfig, now: Instant) -> Self {
        let capacity = f64::from(config.max_logs_per_second.max(1));
        Self {
            capacity,
            refill_per_sec: capacity,
            tokens: capacity,
            last_refill: now,
            disabled_until: None,
            delay: Duration::from_secs(config.log_delay_seconds),
        }
    }

    /// Whether one emission is allowed at `now`. Exhausting the bucket
    /// disables the limiter until the delay elapses.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(until) = self.disabled_until {
            if now < until {
                return false;
            }
            self.disabled_until = None;
            self.tokens = self.capacity;
            self.last_refill = now;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.disabled_until = Some(now + self.delay);
            false
        }
    }
}
