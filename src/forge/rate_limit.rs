//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from forge API responses.  When
//! the remaining budget drops under the configured buffer, authority calls
//! fail fast instead of sleeping on the request path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Shared rate-limit state updated after every forge API response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls before the rate limit resets.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the rate limit window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current remaining calls; `u64::MAX` until the first response is seen.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Update state from HTTP response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining");
        let reset = header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset");

        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
    }

    /// Whether the budget is under `buffer` and the window has not reset yet.
    pub fn is_exhausted(&self, buffer: u32) -> bool {
        let remaining = self.remaining();
        if remaining == u64::MAX || remaining >= u64::from(buffer) {
            return false;
        }
        let exhausted = self.retry_after_secs() > 0;
        debug!(remaining, buffer, exhausted, "rate limit below buffer");
        exhausted
    }

    /// Seconds until the rate-limit window resets, or 0 if already reset.
    pub fn retry_after_secs(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        self.reset_at().saturating_sub(now)
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, primary: &str, fallback: &str) -> Option<u64> {
    headers
        .get(primary)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn future_ts(secs: u64) -> u64 {
        chrono::Utc::now().timestamp() as u64 + secs
    }

    #[test]
    fn default_remaining_is_max() {
        let state = RateLimitState::new();
        assert_eq!(state.remaining(), u64::MAX);
        assert!(!state.is_exhausted(100));
    }

    #[test]
    fn update_from_github_headers() {
        let state = RateLimitState::new();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-RateLimit-Remaining", "42".parse().unwrap());
        headers.insert("X-RateLimit-Reset", "1700000000".parse().unwrap());

        state.update_from_headers(&headers);
        assert_eq!(state.remaining(), 42);
        assert_eq!(state.reset_at(), 1700000000);
    }

    #[test]
    fn update_from_ietf_headers() {
        let state = RateLimitState::new();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("RateLimit-Remaining", "10".parse().unwrap());
        headers.insert("RateLimit-Reset", "1800000000".parse().unwrap());

        state.update_from_headers(&headers);
        assert_eq!(state.remaining(), 10);
        assert_eq!(state.reset_at(), 1800000000);
    }

    #[test]
    fn exhausted_only_before_reset() {
        let state = RateLimitState::new();
        state.remaining.store(3, Ordering::Relaxed);
        state.reset_at.store(future_ts(30), Ordering::Relaxed);
        assert!(state.is_exhausted(10));
        assert!(!state.is_exhausted(3));

        state.reset_at.store(0, Ordering::Relaxed);
        assert!(!state.is_exhausted(10));
    }

    #[test]
    fn retry_after_when_future() {
        let state = RateLimitState::new();
        state.reset_at.store(future_ts(30), Ordering::Relaxed);
        let retry = state.retry_after_secs();
        assert!((29..=31).contains(&retry));
    }
}
