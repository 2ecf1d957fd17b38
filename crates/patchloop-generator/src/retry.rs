//! Backoff state for throttled generator calls.
//!
//! The table is owned by whoever builds the generators and handed to each of
//! them, so every generator calling the same agent backs off together.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Exponential backoff policy for rate-limited calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): initial * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Backoff state for one agent
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// When calls may resume (None = no active limit)
    pub backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits
    pub consecutive_hits: u32,
}

impl RateLimitState {
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until {
                Some(until - now)
            } else {
                None
            }
        })
    }

    pub fn record_rate_limit(&mut self, delay: Duration) {
        self.consecutive_hits += 1;
        let until = Instant::now() + delay;
        // Never shorten a backoff another caller already set
        self.backoff_until = Some(self.backoff_until.map_or(until, |current| current.max(until)));
    }

    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
        self.backoff_until = None;
    }
}

/// Per-process rate limit table keyed by agent name
#[derive(Debug, Default)]
pub struct RateLimitTable {
    entries: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining_backoff(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).and_then(RateLimitState::remaining_backoff)
    }

    pub fn record_rate_limit(&self, key: &str, delay: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            let state = entries.entry(key.to_string()).or_default();
            state.record_rate_limit(delay);
            tracing::warn!(
                agent = key,
                retry_after_ms = delay.as_millis(),
                consecutive_hits = state.consecutive_hits,
                "Rate limited, backing off"
            );
        }
    }

    pub fn record_success(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(state) = entries.get_mut(key) {
                state.record_success();
            }
        }
    }

    pub fn consecutive_hits(&self, key: &str) -> u32 {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|s| s.consecutive_hits))
            .unwrap_or(0)
    }
}
