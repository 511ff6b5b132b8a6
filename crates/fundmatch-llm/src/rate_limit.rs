//! Awaitable per-minute request gate
//!
//! Token-bucket gate over the provider RPM ceiling. `acquire` blocks the
//! caller until a slot frees up; waiters are served in FIFO order, which is
//! all the fairness the pipeline needs.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock, state::direct::NotKeyed, state::InMemoryState, Quota, RateLimiter,
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared request gate. Clone-cheap; clones share the same window.
#[derive(Clone)]
pub struct RequestGate {
    limiter: Arc<DirectLimiter>,
    rpm: u32,
}

impl RequestGate {
    /// Gate allowing `rpm` requests per sliding minute. A zero ceiling is
    /// clamped to one.
    pub fn per_minute(rpm: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rpm.max(1)).expect("clamped above zero"));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            rpm: rpm.max(1),
        }
    }

    /// Wait until the next request is permitted.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate").field("rpm", &self.rpm).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_quota_is_immediate() {
        let gate = RequestGate::per_minute(60);
        let start = std::time::Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }

    #[test]
    fn test_zero_rpm_clamped() {
        let gate = RequestGate::per_minute(0);
        assert_eq!(gate.rpm(), 1);
    }
}
