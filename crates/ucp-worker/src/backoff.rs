use std::time::Duration;

/// Exponential backoff with a 1-minute cap, used to compute a `Retry`
/// outcome's actual requeue visibility when the controller's requested
/// `after` is shorter than what `retry_count` alone would dictate (§4.5:
/// "Nack with `visibility = max(after, exponentialBackoff(retry_count))`").
pub fn exponential_backoff(retry_count: u32, base: Duration) -> Duration {
    let capped_exponent = retry_count.min(10);
    let factor = 1u64 << capped_exponent;
    base.saturating_mul(factor as u32).min(Duration::from_secs(60))
}
