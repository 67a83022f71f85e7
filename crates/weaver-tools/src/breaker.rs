//! Per-tool circuit breaker.
//!
//! After `threshold` consecutive failures inside a rolling window the
//! breaker opens for a cool-down; while open, calls fail immediately with
//! `ToolUnavailable` instead of hammering a struggling provider. A single
//! success closes the breaker again.

use std::time::{Duration, Instant};

/// Breaker parameters.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,
    /// Rolling window inside which failures must accumulate.
    pub window: Duration,
    /// How long the breaker stays open once tripped.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state for one tool. Process-wide; shared by every job.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    /// New closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            window_start: None,
            open_until: None,
        }
    }

    /// Whether calls may proceed right now.
    pub fn allows(&mut self) -> bool {
        match self.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // Cool-down elapsed: half-open, let the next call probe.
                self.open_until = None;
                self.consecutive_failures = 0;
                self.window_start = None;
                true
            }
            None => true,
        }
    }

    /// Record a successful call; closes the failure window.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.window_start = None;
    }

    /// Record a failed call; may trip the breaker open.
    pub fn record_failure(&mut self) {
        let now = Instant::now();
        match self.window_start {
            Some(start) if now.duration_since(start) <= self.config.window => {
                self.consecutive_failures += 1;
            }
            _ => {
                self.window_start = Some(now);
                self.consecutive_failures = 1;
            }
        }
        if self.consecutive_failures >= self.config.threshold {
            self.open_until = Some(now + self.config.cooldown);
        }
    }

    /// Whether the breaker is currently open.
    pub fn is_open(&self) -> bool {
        matches!(self.open_until, Some(until) if Instant::now() < until)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
