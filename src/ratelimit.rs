//! Per-scan request rate limiting.
//!
//! A `RateLimiter` spaces slots evenly across its window: a limit of 60 per
//! minute hands out one slot per second. Many tasks may call `take()` on the
//! same limiter; each caller reserves the next free slot and sleeps until it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::settings::TypedOptions;

/// Shape of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No throttling; `take()` returns immediately.
    Unbounded,
    /// At most `count` slots per `per`.
    Rate { count: u32, per: Duration },
}

/// Async slot limiter shared by the tasks of a single scan.
#[derive(Debug)]
pub struct RateLimiter {
    limit: Limit,
    interval: Option<Duration>,
    /// Earliest instant the next slot may start.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `count` operations per `per`.
    /// A zero count means unbounded.
    pub fn new(count: u32, per: Duration) -> Self {
        let limit = if count == 0 || per.is_zero() {
            Limit::Unbounded
        } else {
            Limit::Rate { count, per }
        };
        let interval = match limit {
            Limit::Unbounded => None,
            Limit::Rate { count, per } => Some(per / count),
        };
        Self {
            limit,
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// `count` operations per second.
    pub fn per_second(count: u32) -> Self {
        Self::new(count, Duration::from_secs(1))
    }

    /// `count` operations per 60-second window.
    pub fn per_minute(count: u32) -> Self {
        Self::new(count, Duration::from_secs(60))
    }

    /// A limiter that never waits.
    pub fn unbounded() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Wait for and consume one slot.
    pub async fn take(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

/// Pick the limiter for a scan.
///
/// A positive per-minute value wins outright; otherwise the plain per-second
/// value is used (unbounded when zero). The two are never combined.
pub fn select_limiter(options: &TypedOptions) -> RateLimiter {
    if options.rate_limit_minute > 0 {
        RateLimiter::per_minute(options.rate_limit_minute)
    } else {
        RateLimiter::per_second(options.rate_limit)
    }
}
