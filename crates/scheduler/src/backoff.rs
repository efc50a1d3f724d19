//! Exponential retry backoff for transient dispatch failures.

use chrono::Duration;
use rand::Rng;

/// Retry delays never exceed one hour regardless of attempt count.
const MAX_BACKOFF_SECS: i64 = 3600;

/// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped,
/// with up to 10% jitter so a burst of failures does not refire in
/// lockstep.
pub fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let raw = (base_secs as i64).saturating_mul(1i64 << exp);
    let capped = raw.min(MAX_BACKOFF_SECS);

    let jitter_cap = (capped / 10).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
    Duration::seconds(capped + jitter)
}
