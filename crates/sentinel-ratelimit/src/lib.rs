//! Rate Limiter (component B): fixed-window counter keyed by agent,
//! backed by a shared counter store. Fails open when the store errors.

#![deny(unsafe_code)]

use dashmap::DashMap;
use sentinel_core::degradation::DegradationEvent;
use thiserror::Error;

/// Outcome of a single rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests remaining in the current window (0 if denied).
    pub remaining: u32,
    /// When the current window resets, in epoch milliseconds.
    pub reset_at_ms: u64,
}

/// Errors a backing counter store may raise.
#[derive(Debug, Error)]
pub enum RateStoreError {
    /// The shared store is unreachable.
    #[error("counter store unreachable: {0}")]
    Unreachable(String),
}

/// A shared counter store for rate-window bookkeeping. A real deployment
/// would back this with a networked cache; the default used here is
/// in-process.
pub trait RateStore: Send + Sync {
    /// Atomically check-and-increment the counter for `key`'s current
    /// window and return the resulting decision.
    ///
    /// # Errors
    /// Returns [`RateStoreError`] when the store cannot be reached.
    fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now_ms: u64,
    ) -> Result<RateDecision, RateStoreError>;
}

struct WindowCounter {
    window_start_ms: u64,
    count: u32,
}

/// Default in-memory [`RateStore`], one entry per `rate:{agent_id}`.
#[derive(Default)]
pub struct InMemoryRateStore {
    windows: DashMap<String, WindowCounter>,
}

impl InMemoryRateStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateStore for InMemoryRateStore {
    fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now_ms: u64,
    ) -> Result<RateDecision, RateStoreError> {
        let window_ms = window_secs.saturating_mul(1000);
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter { window_start_ms: now_ms, count: 0 });

        if now_ms.saturating_sub(entry.window_start_ms) >= window_ms {
            entry.window_start_ms = now_ms;
            entry.count = 0;
        }

        let reset_at_ms = entry.window_start_ms + window_ms;
        if entry.count >= limit {
            return Ok(RateDecision { allowed: false, remaining: 0, reset_at_ms });
        }
        entry.count += 1;
        Ok(RateDecision { allowed: true, remaining: limit - entry.count, reset_at_ms })
    }
}

/// Rate Limiter facade wired to a pluggable [`RateStore`].
pub struct RateLimiter<S: RateStore> {
    store: S,
    default_limit: u32,
    default_window_secs: u64,
}

impl<S: RateStore> RateLimiter<S> {
    /// Construct a limiter with a default per-agent window.
    pub fn new(store: S, default_limit: u32, default_window_secs: u64) -> Self {
        Self { store, default_limit, default_window_secs }
    }

    /// Check an agent's rate budget, applying `override_limit` if present.
    /// On store failure, fails open (allows) and returns a degradation
    /// event instead of propagating the error — denying legitimate
    /// traffic on an infrastructure blip is worse than briefly exceeding
    /// a soft budget.
    pub fn check(
        &self,
        agent_id: &str,
        override_limit: Option<u32>,
        now_ms: u64,
    ) -> (RateDecision, Option<DegradationEvent>) {
        let limit = override_limit.unwrap_or(self.default_limit);
        let key = format!("rate:{agent_id}");
        match self.store.check_and_increment(&key, limit, self.default_window_secs, now_ms) {
            Ok(decision) => (decision, None),
            Err(err) => (
                RateDecision { allowed: true, remaining: limit, reset_at_ms: now_ms },
                Some(DegradationEvent::new("rate_limiter", err.to_string())),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(InMemoryRateStore::new(), 2, 60);
        let (d1, _) = limiter.check("agent-a", None, 0);
        let (d2, _) = limiter.check("agent-a", None, 0);
        let (d3, _) = limiter.check("agent-a", None, 0);
        assert!(d1.allowed && d2.allowed);
        assert!(!d3.allowed);
        assert_eq!(d3.remaining, 0);
    }

    #[test]
    fn window_resets_after_elapsed_time() {
        let limiter = RateLimiter::new(InMemoryRateStore::new(), 1, 60);
        assert!(limiter.check("agent-b", None, 0).0.allowed);
        assert!(!limiter.check("agent-b", None, 10_000).0.allowed);
        assert!(limiter.check("agent-b", None, 61_000).0.allowed);
    }

    #[test]
    fn per_agent_override_replaces_default_limit() {
        let limiter = RateLimiter::new(InMemoryRateStore::new(), 1, 60);
        assert!(limiter.check("agent-c", Some(3), 0).0.allowed);
        assert!(limiter.check("agent-c", Some(3), 0).0.allowed);
    }

    struct FailingRateStore;
    impl RateStore for FailingRateStore {
        fn check_and_increment(
            &self,
            _key: &str,
            _limit: u32,
            _window_secs: u64,
            _now_ms: u64,
        ) -> Result<RateDecision, RateStoreError> {
            Err(RateStoreError::Unreachable("connection refused".into()))
        }
    }

    #[test]
    fn fails_open_on_store_error() {
        let limiter = RateLimiter::new(FailingRateStore, 1, 60);
        let (decision, degraded) = limiter.check("agent-d", None, 0);
        assert!(decision.allowed);
        assert!(degraded.is_some());
    }
}
