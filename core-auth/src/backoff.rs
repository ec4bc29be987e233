//! Per-provider refresh backoff.
//!
//! After a failed refresh the provider enters a cooldown of
//! `min(cap, base * 2^(failures - 1))`. While it lasts, no refresh request
//! is sent, which keeps a revoked grant from hammering the token endpoint.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Failure state of one canonical provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub failure_count: u32,
    pub cooldown_until: DateTime<Utc>,
}

pub struct BackoffTracker {
    clock: Arc<dyn Clock>,
    base_delay: Duration,
    max_cooldown: Duration,
    entries: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    pub fn new(clock: Arc<dyn Clock>, base_delay: Duration, max_cooldown: Duration) -> Self {
        Self {
            clock,
            base_delay,
            max_cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    // Entries are plain data, so a poisoned lock still holds a usable map.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, BackoffState>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cooldown applied after the `failure_count`-th consecutive failure.
    pub fn cooldown_for(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_cooldown)
            .min(self.max_cooldown)
    }

    pub fn should_attempt(&self, provider: &str) -> bool {
        match self.entries().get(provider) {
            Some(state) => self.clock.now() >= state.cooldown_until,
            None => true,
        }
    }

    pub fn record_failure(&self, provider: &str) -> BackoffState {
        let now = self.clock.now();
        let mut entries = self.entries();
        let failure_count = entries
            .get(provider)
            .map(|s| s.failure_count.saturating_add(1))
            .unwrap_or(1);
        let cooldown = self.cooldown_for(failure_count);
        let cooldown_until = now
            + chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());

        let state = BackoffState {
            failure_count,
            cooldown_until,
        };
        entries.insert(provider.to_string(), state);

        warn!(
            provider = %provider,
            failure_count,
            cooldown_secs = cooldown.as_secs(),
            "Refresh failed, entering cooldown"
        );
        state
    }

    /// Clears the entry regardless of prior failures.
    pub fn record_success(&self, provider: &str) {
        if self.entries().remove(provider).is_some() {
            debug!(provider = %provider, "Backoff cleared after successful refresh");
        }
    }

    /// Manual override, e.g. after the user re-authenticated.
    pub fn reset(&self, provider: &str) {
        self.entries().remove(provider);
        debug!(provider = %provider, "Backoff reset");
    }

    pub fn state(&self, provider: &str) -> Option<BackoffState> {
        self.entries().get(provider).copied()
    }
}

impl std::fmt::Debug for BackoffTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffTracker")
            .field("base_delay", &self.base_delay)
            .field("max_cooldown", &self.max_cooldown)
            .field("providers", &self.entries().len())
            .finish()
    }
}
