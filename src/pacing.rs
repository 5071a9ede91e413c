//! Request pacing and bounded backoff.
//!
//! One governor limiter per provider keeps providers independently paced no
//! matter which worker issues the call. The backoff helpers are shared by
//! storage-contention retries and provider rate-limit retries.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};

use crate::model::ProviderKind;

/// Default storage-contention retry policy: 2 s, 4 s, 8 s, then give up.
pub const STORAGE_RETRY_ATTEMPTS: u32 = 3;
pub const STORAGE_RETRY_BASE: Duration = Duration::from_secs(2);

/// Provider 429 retry cap.
pub const RATE_LIMIT_RETRY_ATTEMPTS: u32 = 3;

const PACER_POLL_INTERVAL: Duration = Duration::from_millis(25);

type DirectLimiter =
    RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Enforces a fixed minimum delay between consecutive calls to the same
/// provider. Providers with no interval (pure URL generators) are never
/// paced.
pub struct ProviderPacer {
    limiters: HashMap<ProviderKind, DirectLimiter>,
}

impl ProviderPacer {
    pub fn new(intervals: &[(ProviderKind, Duration)]) -> Self {
        let mut limiters = HashMap::new();
        for (kind, interval) in intervals {
            if interval.is_zero() {
                continue;
            }
            let quota = Quota::with_period(*interval)
                .expect("non-zero pacing interval")
                .allow_burst(NonZeroU32::new(1).expect("non-zero pacing burst"));
            limiters.insert(*kind, RateLimiter::direct(quota));
        }
        Self { limiters }
    }

    /// Blocks the calling worker until the provider's interval admits a
    /// call. Other providers and workers are unaffected.
    pub fn wait(&self, kind: ProviderKind) {
        let Some(limiter) = self.limiters.get(&kind) else {
            return;
        };
        while limiter.check().is_err() {
            std::thread::sleep(PACER_POLL_INTERVAL);
        }
    }
}

/// Exponential backoff delay for the given 1-based attempt: the base delay
/// doubles each attempt.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(Duration::from_secs(128))
}

/// Runs `op` once plus up to `max_attempts` backoff retries, sleeping the
/// doubling delay before each retry (base, 2×base, 4×base with the default
/// cap). The final error is returned to the caller, which marks the unit
/// of work failed-for-this-run and moves on.
pub fn with_backoff_retry<T, E>(
    base: Duration,
    max_attempts: u32,
    is_retriable: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if is_retriable(&error) && attempt <= max_attempts => {
                std::thread::sleep(backoff_delay(base, attempt));
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
