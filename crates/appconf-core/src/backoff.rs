//! Randomized exponential backoff for retrying transient failures

use rand::Rng;
use std::time::Duration;

/// Largest doubling exponent; keeps the millisecond ceiling inside `u64`
const MAX_SHIFT: u32 = 62;

/// Delay before retry number `attempts`
///
/// Returns `min` when `attempts <= 1` or `max <= min`. Otherwise the ceiling
/// is `min * 2^attempts` capped at `max`, and the delay is drawn uniformly
/// from `[min, ceiling]`.
pub fn backoff(min: Duration, max: Duration, attempts: u32) -> Duration {
    backoff_with(&mut rand::thread_rng(), min, max, attempts)
}

/// [`backoff`] with a caller-supplied random source
pub fn backoff_with<R: Rng + ?Sized>(
    rng: &mut R,
    min: Duration,
    max: Duration,
    attempts: u32,
) -> Duration {
    if attempts <= 1 || max <= min {
        return min;
    }

    let base_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX).max(1);
    let ceiling = base_ms
        .checked_mul(1u64 << attempts.min(MAX_SHIFT))
        .map(Duration::from_millis)
        .map_or(max, |c| c.min(max));

    if ceiling <= min {
        return min;
    }
    min + (ceiling - min).mul_f64(rng.gen::<f64>())
}
