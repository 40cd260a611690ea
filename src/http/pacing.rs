//! Per-platform call pacing
//!
//! Some platforms publish a per-call rate (the chat API allows one call a
//! second). A [`Pacer`] is a governor token bucket the source waits on
//! before each call to that platform.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Calls allowed per second and how many may go out back to back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub per_second: u32,
    pub burst: u32,
}

impl Pacing {
    /// Steady pacing without bursts
    pub fn per_second(per_second: u32) -> Self {
        Self {
            per_second,
            burst: 1,
        }
    }

    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    fn quota(self) -> Quota {
        let rate = NonZeroU32::new(self.per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        Quota::per_second(rate).allow_burst(burst)
    }
}

/// Token bucket shared by every clone
#[derive(Clone)]
pub struct Pacer {
    pacing: Pacing,
    limiter: Arc<DirectLimiter>,
}

impl Pacer {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            limiter: Arc::new(RateLimiter::direct(pacing.quota())),
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Wait for the next slot
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}
